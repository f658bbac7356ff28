//! Distributed filesystem paths.
//!
//! A [`VPath`] is an immutable sequence of non-empty components, none of
//! which may contain `/` (the separator) or `:` (reserved for application
//! use). The empty sequence is the root. The string form is `/` for the
//! root and `/` + components joined by `/` otherwise.
//!
//! The derived ordering compares component-wise and puts a path before its
//! extensions, so every path sorts after all of its ancestors. Callers
//! that lock several paths at once rely on that: locking in ascending
//! order cannot deadlock, because locking a path means locking every
//! component along it (see the naming server's locking protocol).

use std::fmt;
use std::path::{Path as FsPath, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("component `{0}` is empty or contains `/` or `:`")]
    InvalidComponent(String),

    #[error("path string `{0}` must begin with `/` and must not contain `:`")]
    InvalidString(String),

    #[error("the root path has no {0}")]
    Root(&'static str),

    #[error("directory not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// An immutable path in the drift namespace.
///
/// The derived `Ord` is the lock-acquisition order: component-wise
/// lexicographic, with a path preceding every path it is a prefix of.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VPath {
    components: Vec<String>,
}

impl VPath {
    /// The root directory.
    pub fn root() -> Self {
        Self::default()
    }

    /// Append one component, validating it.
    pub fn child(&self, component: &str) -> Result<Self, PathError> {
        if component.is_empty() || component.contains('/') || component.contains(':') {
            return Err(PathError::InvalidComponent(component.to_string()));
        }
        let mut components = self.components.clone();
        components.push(component.to_string());
        Ok(Self { components })
    }

    /// Parse a path string: must begin with `/`, must not contain `:`;
    /// empty components between slashes are dropped.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        if !path.starts_with('/') || path.contains(':') {
            return Err(PathError::InvalidString(path.to_string()));
        }
        let components = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.to_string())
            .collect();
        Ok(Self { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// The parent path. The root has none.
    pub fn parent(&self) -> Result<Self, PathError> {
        if self.is_root() {
            return Err(PathError::Root("parent"));
        }
        Ok(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// The last component. The root has none.
    pub fn last(&self) -> Result<&str, PathError> {
        self.components
            .last()
            .map(String::as_str)
            .ok_or(PathError::Root("last component"))
    }

    /// True iff `other` is a prefix of this path. Every path is a subpath
    /// of itself.
    pub fn is_subpath(&self, other: &VPath) -> bool {
        other.components.len() <= self.components.len()
            && self.components[..other.components.len()] == other.components[..]
    }

    /// Iterate over the components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Every proper ancestor, root first. Empty for the root itself.
    pub fn ancestors(&self) -> Vec<VPath> {
        (0..self.components.len())
            .map(|len| Self {
                components: self.components[..len].to_vec(),
            })
            .collect()
    }

    /// Map this path under a local filesystem root.
    pub fn to_local(&self, root: &FsPath) -> PathBuf {
        let mut out = root.to_path_buf();
        for component in &self.components {
            out.push(component);
        }
        out
    }

    /// Recursively enumerate all files under a local directory as paths
    /// relative to it. Fails if the directory is absent or not a
    /// directory.
    pub fn list(directory: &FsPath) -> Result<Vec<VPath>, PathError> {
        if !directory.exists() {
            return Err(PathError::NotFound(directory.display().to_string()));
        }
        if !directory.is_dir() {
            return Err(PathError::NotDirectory(directory.display().to_string()));
        }
        let mut out = Vec::new();
        collect_files(directory, &VPath::root(), &mut out)?;
        Ok(out)
    }
}

fn collect_files(dir: &FsPath, prefix: &VPath, out: &mut Vec<VPath>) -> Result<(), PathError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let child = prefix.child(&name).map_err(|_| {
            PathError::InvalidComponent(format!("{} under {}", name, dir.display()))
        })?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), &child, out)?;
        } else if file_type.is_file() {
            out.push(child);
        }
    }
    Ok(())
}

impl fmt::Display for VPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

impl FromStr for VPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
