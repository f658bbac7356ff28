//! Shared scaffolding: a naming server plus live storage servers on
//! loopback, each rooted in its own temp directory.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use drift_naming::NamingServer;
use drift_proto::{RegistrationStub, ServiceStub, VPath};
use drift_storage::StorageServer;

pub fn loopback() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

pub fn p(s: &str) -> VPath {
    VPath::parse(s).unwrap()
}

pub fn start_naming(read_threshold: u32) -> NamingServer {
    let naming = NamingServer::new(loopback(), loopback(), read_threshold).unwrap();
    naming.start().unwrap();
    naming
}

pub fn service_stub(naming: &NamingServer) -> ServiceStub {
    ServiceStub::new(naming.service_address().unwrap()).unwrap()
}

pub fn registration_stub(naming: &NamingServer) -> RegistrationStub {
    RegistrationStub::new(naming.registration_address().unwrap()).unwrap()
}

pub struct TestStorage {
    pub dir: tempfile::TempDir,
    pub server: StorageServer,
}

impl TestStorage {
    pub fn client_port(&self) -> u16 {
        self.server.client_address().unwrap().port()
    }

    pub fn has_local(&self, path: &str) -> bool {
        p(path).to_local(self.dir.path()).exists()
    }
}

/// Start a storage server seeded with the given files and register it.
pub fn start_storage(naming: &NamingServer, files: &[(&str, &[u8])]) -> TestStorage {
    let dir = tempfile::tempdir().unwrap();
    for (path, contents) in files {
        let local = p(path).to_local(dir.path());
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(local, contents).unwrap();
    }
    let server = StorageServer::new(dir.path(), 0, 0).unwrap();
    server
        .start("127.0.0.1", &registration_stub(naming))
        .unwrap();
    TestStorage { dir, server }
}
