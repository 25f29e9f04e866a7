use std::path::{Path, PathBuf};
use std::time::Duration;

pub use courtsync_core::config::{config_path_at as config_path, root_at as courtsync_root};
pub use courtsync_sync::file_store::store_path_at as store_path;
pub use courtsync_sync::queue::queue_path_at as queue_path;

/// Realtime events for one table inside this window collapse into one cycle.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const ENGINE_LOCK: &str = "engine.lock";

pub fn socket_path(home: &Path) -> PathBuf {
    courtsync_root(home).join(DAEMON_SOCKET)
}

pub fn lock_path(home: &Path) -> PathBuf {
    courtsync_root(home).join(ENGINE_LOCK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_lives_under_dot_courtsync() {
        let home = Path::new("/home/coach");
        for path in [
            socket_path(home),
            lock_path(home),
            store_path(home),
            queue_path(home),
            config_path(home),
        ] {
            assert!(path.starts_with("/home/coach/.courtsync"), "{}", path.display());
        }
    }
}
