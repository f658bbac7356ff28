//! Static descriptions of remote interfaces.
//!
//! A remote interface is declared as a `const` [`InterfaceDesc`]: the
//! interface name plus one [`MethodSig`] per method. The skeleton resolves
//! incoming requests against the descriptor by (name, parameter types) and
//! verifies the declared return type; stubs embed the same signature data
//! into every request they send.

use crate::error::RmiError;

/// Signature of one remote method.
///
/// `params` and `returns` are wire-level type names; they only need to be
/// consistent between the stub and the skeleton of the same interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSig {
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub returns: &'static str,
    /// Whether the method declares the transport error among its errors.
    /// An interface is remote only if every method does.
    pub declares_transport_error: bool,
}

impl MethodSig {
    /// Does this signature match a request's (name, parameter types)?
    pub fn matches(&self, method: &str, param_types: &[String]) -> bool {
        self.name == method
            && self.params.len() == param_types.len()
            && self.params.iter().zip(param_types).all(|(a, b)| *a == b)
    }
}

/// Description of a remote interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDesc {
    pub name: &'static str,
    pub methods: &'static [MethodSig],
}

impl InterfaceDesc {
    /// An interface is remote iff every method declares the transport
    /// error.
    pub fn is_remote(&self) -> bool {
        self.methods.iter().all(|m| m.declares_transport_error)
    }

    /// Reject non-remote interfaces at construction time.
    pub fn ensure_remote(&self) -> Result<(), RmiError> {
        if self.is_remote() {
            Ok(())
        } else {
            Err(RmiError::NotRemote(self.name.to_string()))
        }
    }

    /// Resolve a method by name and parameter types.
    pub fn find(&self, method: &str, param_types: &[String]) -> Option<&MethodSig> {
        self.methods.iter().find(|m| m.matches(method, param_types))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: MethodSig = MethodSig {
        name: "ping",
        params: &["String"],
        returns: "String",
        declares_transport_error: true,
    };

    const SILENT: MethodSig = MethodSig {
        name: "silent",
        params: &[],
        returns: "()",
        declares_transport_error: false,
    };

    const REMOTE: InterfaceDesc = InterfaceDesc {
        name: "Pinger",
        methods: &[PING],
    };

    const LOCAL: InterfaceDesc = InterfaceDesc {
        name: "Local",
        methods: &[PING, SILENT],
    };

    #[test]
    fn remote_check_requires_transport_error_on_every_method() {
        assert!(REMOTE.is_remote());
        assert!(REMOTE.ensure_remote().is_ok());
        assert!(!LOCAL.is_remote());
        assert!(matches!(
            LOCAL.ensure_remote(),
            Err(RmiError::NotRemote(name)) if name == "Local"
        ));
    }

    #[test]
    fn find_matches_name_and_parameter_types() {
        let found = REMOTE.find("ping", &["String".to_string()]);
        assert_eq!(found, Some(&PING));

        assert!(REMOTE.find("ping", &[]).is_none());
        assert!(REMOTE
            .find("ping", &["u64".to_string()])
            .is_none());
        assert!(REMOTE.find("pong", &["String".to_string()]).is_none());
    }
}
