//! # drift-naming
//!
//! The naming server. It owns the directory tree of the whole filesystem,
//! maps each file to the storage servers replicating it, and coordinates
//! concurrent access with per-node FIFO reader/writer locks acquired
//! along full paths. It stores no file bytes itself.
//!
//! Locking protocol: to lock a path in some mode, every ancestor is
//! locked shared, root first, and then the path itself in the requested
//! mode; unlocking walks the exact reverse. All lockers therefore acquire
//! along a common prefix order and cannot deadlock, and a directory can
//! never be deleted while anything below it is in use.
//!
//! The lock manager doubles as the replication policy's trigger: shared
//! acquisitions of a file bump its read counter (replicating the file to
//! one more storage server when the counter crosses the threshold), and
//! an exclusive acquisition of a multi-replica file invalidates all but
//! one replica before the writer proceeds.

pub mod lock;
pub mod tree;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use drift_proto::{
    Command, CommandStub, Registration, RegistrationDispatcher, RegistrationError, Service,
    ServiceDispatcher, ServiceError, StorageError, StorageStub, VPath,
};
use drift_rmi::{RmiError, Skeleton};

use lock::{LockTable, Mode};
use tree::{NameTree, Node};

/// Shared state behind both skeletons.
struct NamingCore {
    tree: Mutex<NameTree>,
    locks: LockTable,
    /// Reverse index: each registered storage's client stub to its
    /// command stub. Mutated only under the root's exclusive lock.
    storages: Mutex<Vec<(StorageStub, CommandStub)>>,
    read_threshold: u32,
}

impl NamingCore {
    fn new(read_threshold: u32) -> Self {
        Self {
            tree: Mutex::new(NameTree::new()),
            locks: LockTable::new(),
            storages: Mutex::new(Vec::new()),
            read_threshold,
        }
    }

    fn storages_snapshot(&self) -> Vec<(StorageStub, CommandStub)> {
        self.storages.lock().unwrap().clone()
    }

    fn command_for(&self, storage: &StorageStub) -> Option<CommandStub> {
        self.storages
            .lock()
            .unwrap()
            .iter()
            .find(|(s, _)| s == storage)
            .map(|(_, c)| c.clone())
    }

    // ===== Path-level locking protocol =====

    /// Acquire the lock chain for a path: ancestors shared root-first,
    /// then the path itself. Runs the replication/invalidation hooks for
    /// the target acquisition.
    fn acquire_chain(&self, path: &VPath, mode: Mode) {
        for ancestor in path.ancestors() {
            self.locks.lock_of(&ancestor).acquire(Mode::Shared);
        }
        self.locks.lock_of(path).acquire(mode);
        self.after_acquire(path, mode);
    }

    /// Release the lock chain in exact reverse: the path, then its
    /// ancestors deepest-first.
    fn release_chain(&self, path: &VPath, _mode: Mode) {
        self.locks.lock_of(path).release();
        for ancestor in path.ancestors().iter().rev() {
            self.locks.lock_of(ancestor).release();
        }
    }

    /// Lock with an existence check, as the public `lock` operation
    /// requires.
    fn lock_path(&self, path: &VPath, mode: Mode) -> Result<(), ServiceError> {
        if !self.tree.lock().unwrap().contains(path) {
            return Err(ServiceError::NotFound(path.to_string()));
        }
        self.acquire_chain(path, mode);
        Ok(())
    }

    fn unlock_path(&self, path: &VPath, _mode: Mode) -> Result<(), ServiceError> {
        if !self.locks.known(path) || !self.locks.lock_of(path).release() {
            return Err(ServiceError::InvalidArgument(format!(
                "{path} is not locked"
            )));
        }
        for ancestor in path.ancestors().iter().rev() {
            self.locks.lock_of(ancestor).release();
        }
        Ok(())
    }

    /// Run `f` with the path locked, releasing on every exit path.
    fn with_lock<T>(
        &self,
        path: &VPath,
        mode: Mode,
        f: impl FnOnce() -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        self.lock_path(path, mode)?;
        let result = f();
        self.release_chain(path, mode);
        result
    }

    // ===== Replication and invalidation =====

    /// Policy hook after the target node's lock is granted.
    fn after_acquire(&self, path: &VPath, mode: Mode) {
        match mode {
            Mode::Shared => self.maybe_replicate(path),
            Mode::Exclusive => self.invalidate_extra_replicas(path),
        }
    }

    /// Read-driven replication: on the acquisition that crosses the
    /// threshold, copy the file to one storage server that does not hold
    /// it yet.
    fn maybe_replicate(&self, path: &VPath) {
        let all = self.storages_snapshot();

        let (source, candidates) = {
            let mut tree = self.tree.lock().unwrap();
            if !tree.bump_shared_read(path, self.read_threshold) {
                return;
            }
            let replicas = match tree.replicas(path) {
                Some(replicas) if !replicas.is_empty() => replicas.to_vec(),
                _ => return,
            };
            let candidates: Vec<(StorageStub, CommandStub)> = all
                .into_iter()
                .filter(|(storage, _)| !replicas.contains(storage))
                .collect();
            (replicas[0].clone(), candidates)
        };

        let Some((target, command)) = candidates.choose(&mut rand::thread_rng()).cloned() else {
            // Already everywhere; the counter stays reset.
            return;
        };

        // The command call runs while this node's shared lock is held;
        // storage servers never call back into the naming server.
        match command.copy(path, &source) {
            Ok(true) => {
                self.tree.lock().unwrap().add_replica(path, target.clone());
                info!(path = %path, replica = %target, "replicated after read threshold");
            }
            Ok(false) => warn!(path = %path, replica = %target, "replication refused"),
            Err(e) => warn!(path = %path, replica = %target, error = %e, "replication failed"),
        }
    }

    /// Write-driven invalidation: an exclusive acquisition of a file with
    /// several replicas keeps one and deletes the rest.
    fn invalidate_extra_replicas(&self, path: &VPath) {
        let (keep, losers) = {
            let mut tree = self.tree.lock().unwrap();
            let replicas = match tree.replicas(path) {
                Some(replicas) if replicas.len() > 1 => replicas.to_vec(),
                _ => return,
            };
            let keep = match replicas.choose(&mut rand::thread_rng()) {
                Some(keep) => keep.clone(),
                None => return,
            };
            tree.retain_single_replica(path, &keep);
            let losers: Vec<StorageStub> =
                replicas.into_iter().filter(|r| *r != keep).collect();
            (keep, losers)
        };

        debug!(path = %path, keep = %keep, dropped = losers.len(), "invalidating replicas");
        for loser in losers {
            match self.command_for(&loser) {
                Some(command) => {
                    if let Err(e) = command.delete(path) {
                        warn!(path = %path, replica = %loser, error = %e, "invalidation delete failed");
                    }
                }
                None => warn!(replica = %loser, "no command stub for replica"),
            }
        }
    }
}

impl Service for NamingCore {
    fn is_directory(&self, path: &VPath) -> Result<bool, ServiceError> {
        self.with_lock(path, Mode::Shared, || {
            self.tree
                .lock()
                .unwrap()
                .is_directory(path)
                .ok_or_else(|| ServiceError::NotFound(path.to_string()))
        })
    }

    fn list(&self, directory: &VPath) -> Result<Vec<String>, ServiceError> {
        self.with_lock(directory, Mode::Shared, || {
            self.tree
                .lock()
                .unwrap()
                .children(directory)
                .ok_or_else(|| ServiceError::NotFound(format!("{directory} is not a directory")))
        })
    }

    fn create_file(&self, file: &VPath) -> Result<bool, ServiceError> {
        if file.is_root() {
            return Ok(false);
        }
        if self.storages.lock().unwrap().is_empty() {
            return Err(ServiceError::IllegalState(
                "no storage server is registered".to_string(),
            ));
        }
        let parent = file
            .parent()
            .map_err(|e| ServiceError::InvalidArgument(e.to_string()))?;

        self.with_lock(&parent, Mode::Exclusive, || {
            {
                let tree = self.tree.lock().unwrap();
                match tree.is_directory(&parent) {
                    Some(true) => {}
                    Some(false) => {
                        return Err(ServiceError::NotFound(format!(
                            "{parent} is not a directory"
                        )))
                    }
                    None => return Err(ServiceError::NotFound(parent.to_string())),
                }
                if tree.contains(file) {
                    return Ok(false);
                }
            }

            let all = self.storages_snapshot();
            let Some((storage, command)) = all.choose(&mut rand::thread_rng()).cloned() else {
                return Err(ServiceError::IllegalState(
                    "no storage server is registered".to_string(),
                ));
            };

            // Create the bytes first; a transport failure aborts, a
            // refusal is advisory (the file may simply linger there).
            match command.create(file) {
                Ok(created) => {
                    if !created {
                        debug!(path = %file, storage = %storage, "storage reported existing file");
                    }
                }
                Err(StorageError::Rmi(e)) => return Err(ServiceError::Rmi(e)),
                Err(e) => {
                    warn!(path = %file, storage = %storage, error = %e, "storage create failed");
                    return Ok(false);
                }
            }

            Ok(self.tree.lock().unwrap().insert_file(file, storage))
        })
    }

    fn create_directory(&self, directory: &VPath) -> Result<bool, ServiceError> {
        if directory.is_root() {
            return Ok(false);
        }
        let parent = directory
            .parent()
            .map_err(|e| ServiceError::InvalidArgument(e.to_string()))?;

        self.with_lock(&parent, Mode::Exclusive, || {
            let mut tree = self.tree.lock().unwrap();
            match tree.is_directory(&parent) {
                Some(true) => {}
                Some(false) => {
                    return Err(ServiceError::NotFound(format!(
                        "{parent} is not a directory"
                    )))
                }
                None => return Err(ServiceError::NotFound(parent.to_string())),
            }
            if tree.contains(directory) {
                return Ok(false);
            }
            Ok(tree.insert_directory(directory))
        })
    }

    fn delete(&self, path: &VPath) -> Result<bool, ServiceError> {
        if path.is_root() {
            return Ok(false);
        }

        self.with_lock(path, Mode::Exclusive, || {
            let involved = {
                let mut tree = self.tree.lock().unwrap();
                if !tree.contains(path) {
                    return Err(ServiceError::NotFound(path.to_string()));
                }
                let involved = tree.collect_replicas(path);
                tree.remove_subtree(path);
                involved
            };

            // One delete per involved storage server, issued under the
            // exclusive lock. Failures are logged, not retried.
            for storage in involved {
                match self.command_for(&storage) {
                    Some(command) => {
                        if let Err(e) = command.delete(path) {
                            warn!(path = %path, storage = %storage, error = %e, "delete on storage failed");
                        }
                    }
                    None => warn!(storage = %storage, "no command stub for storage"),
                }
            }
            Ok(true)
        })
    }

    fn get_storage(&self, file: &VPath) -> Result<StorageStub, ServiceError> {
        self.with_lock(file, Mode::Shared, || {
            let tree = self.tree.lock().unwrap();
            match tree.node(file) {
                None => Err(ServiceError::NotFound(file.to_string())),
                Some(Node::Directory { .. }) => Err(ServiceError::NotFound(format!(
                    "{file} is a directory"
                ))),
                Some(Node::File { replicas, .. }) => replicas
                    .choose(&mut rand::thread_rng())
                    .cloned()
                    .ok_or_else(|| ServiceError::NotFound(format!("{file} has no replica"))),
            }
        })
    }

    fn lock(&self, path: &VPath, exclusive: bool) -> Result<(), ServiceError> {
        let mode = if exclusive { Mode::Exclusive } else { Mode::Shared };
        self.lock_path(path, mode)
    }

    fn unlock(&self, path: &VPath, exclusive: bool) -> Result<(), ServiceError> {
        let mode = if exclusive { Mode::Exclusive } else { Mode::Shared };
        self.unlock_path(path, mode)
    }
}

impl Registration for NamingCore {
    fn register(
        &self,
        storage: StorageStub,
        command: CommandStub,
        files: Vec<VPath>,
    ) -> Result<Vec<VPath>, RegistrationError> {
        let root = VPath::root();
        self.acquire_chain(&root, Mode::Exclusive);

        // The duplicate check runs under the root's exclusive lock so two
        // racing registrations of the same stub cannot both pass it.
        {
            let mut storages = self.storages.lock().unwrap();
            if storages.iter().any(|(s, _)| *s == storage) {
                drop(storages);
                self.release_chain(&root, Mode::Exclusive);
                return Err(RegistrationError::IllegalState(format!(
                    "{storage} is already registered"
                )));
            }
            storages.push((storage.clone(), command));
        }

        let mut duplicates = Vec::new();
        {
            let mut tree = self.tree.lock().unwrap();
            for path in &files {
                if path.is_root() {
                    continue;
                }
                if tree.contains(path) || !tree.insert_file(path, storage.clone()) {
                    duplicates.push(path.clone());
                }
            }
        }

        self.release_chain(&root, Mode::Exclusive);

        info!(
            storage = %storage,
            offered = files.len(),
            duplicates = duplicates.len(),
            "storage server registered"
        );
        Ok(duplicates)
    }
}

/// The naming server: one core behind two skeletons.
pub struct NamingServer {
    core: Arc<NamingCore>,
    service: Skeleton<ServiceDispatcher<NamingCore>>,
    registration: Skeleton<RegistrationDispatcher<NamingCore>>,
}

impl NamingServer {
    /// Create a naming server bound to the two given addresses (service
    /// and registration interfaces). Port zero picks a free port at
    /// start.
    pub fn new(
        service_addr: SocketAddr,
        registration_addr: SocketAddr,
        read_threshold: u32,
    ) -> Result<Self, RmiError> {
        let core = Arc::new(NamingCore::new(read_threshold));
        let service = Skeleton::bind(ServiceDispatcher::new(Arc::clone(&core)), service_addr)?;
        let registration = Skeleton::bind(
            RegistrationDispatcher::new(Arc::clone(&core)),
            registration_addr,
        )?;
        Ok(Self {
            core,
            service,
            registration,
        })
    }

    /// Start both interfaces.
    pub fn start(&self) -> Result<(), RmiError> {
        self.service.start()?;
        self.registration.start()?;
        info!(
            service = %self.service.address().map(|a| a.to_string()).unwrap_or_default(),
            registration = %self.registration.address().map(|a| a.to_string()).unwrap_or_default(),
            "naming server started"
        );
        Ok(())
    }

    /// Stop both interfaces. The naming server is not restartable; its
    /// tree dies with the process.
    pub fn stop(&self) {
        self.service.stop();
        self.registration.stop();
        self.service.wait_stopped();
        self.registration.wait_stopped();
    }

    /// Block until both skeletons have stopped.
    pub fn wait(&self) {
        self.service.wait_stopped();
        self.registration.wait_stopped();
    }

    pub fn service_address(&self) -> Option<SocketAddr> {
        self.service.address()
    }

    pub fn registration_address(&self) -> Option<SocketAddr> {
        self.registration.address()
    }

    /// Number of registered storage servers.
    pub fn storage_count(&self) -> usize {
        self.core.storages.lock().unwrap().len()
    }

    /// Replica count of a file, if the path names one.
    pub fn replica_count(&self, file: &VPath) -> Option<usize> {
        self.core
            .tree
            .lock()
            .unwrap()
            .replicas(file)
            .map(|r| r.len())
    }

    /// Current shared-read counter of a file, if the path names one.
    pub fn shared_reads(&self, file: &VPath) -> Option<u32> {
        self.core.tree.lock().unwrap().shared_reads(file)
    }
}
