use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use courtsync_core::config;

fn courtsync_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_courtsync"))
}

fn courtsync(home: &Path, args: &[&str]) -> std::process::Output {
    Command::new(courtsync_bin())
        .env("HOME", home)
        .env("USERPROFILE", home)
        .args(args)
        .output()
        .expect("run courtsync")
}

struct DaemonProcess {
    child: Child,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(home: PathBuf) -> Self {
        let child = Command::new(courtsync_bin())
            .env("HOME", &home)
            .env("USERPROFILE", &home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");

        Self { child, home }
    }

    fn stop(&mut self) {
        let _ = courtsync(&self.home, &["daemon", "stop"]);

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn json_of(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or(serde_json::Value::Null)
}

fn daemon_running(home: &Path) -> bool {
    let output = courtsync(home, &["daemon", "status"]);
    output.status.success() && json_of(&output)["running"] == true
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn daemon_serves_status_toggle_and_stop() {
    let home = TempDir::new().expect("home");
    let init = courtsync(home.path(), &["init", "--remote-url", "http://127.0.0.1:1"]);
    assert!(init.status.success());

    let mut daemon = DaemonProcess::start(home.path().to_path_buf());
    assert!(
        wait_until(Duration::from_secs(10), || daemon_running(home.path())),
        "daemon did not report running state in time",
    );

    let status = courtsync(home.path(), &["status", "--json"]);
    assert!(status.status.success());
    let status = json_of(&status);
    assert_eq!(status["running"], true);
    assert_eq!(status["online"], false, "nothing listens on the remote port");
    assert_eq!(status["pending_operations"], 0);

    let disable = courtsync(home.path(), &["disable"]);
    assert!(disable.status.success());
    assert!(String::from_utf8_lossy(&disable.stdout).contains("daemon updated"));
    assert!(!config::load_at(home.path()).expect("config").sync.enabled);

    let sync = courtsync(home.path(), &["sync", "--json"]);
    assert!(sync.status.success());
    assert_eq!(json_of(&sync)["outcome"], "disabled");

    let queue = courtsync(home.path(), &["queue", "--json"]);
    assert!(queue.status.success());
    assert_eq!(json_of(&queue), serde_json::json!([]));

    daemon.stop();
    assert!(
        wait_until(Duration::from_secs(5), || !daemon_running(home.path())),
        "daemon still reachable after stop",
    );
}
