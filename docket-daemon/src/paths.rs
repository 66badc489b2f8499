use std::path::{Path, PathBuf};

pub use docket_core::store::docket_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    docket_root(home).join(DAEMON_SOCKET)
}
