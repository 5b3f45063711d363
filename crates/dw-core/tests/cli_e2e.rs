//! End-to-end tests of the `diskwatch` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Env {
    runtime: TempDir,
    workspace: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            runtime: tempfile::tempdir().unwrap(),
            workspace: tempfile::tempdir().unwrap(),
        }
    }

    /// A clean environment with the required keys and local roots.
    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("diskwatch").unwrap();
        cmd.env_clear()
            .env("JENKINS_USER", "bot")
            .env("JENKINS_PASS", "hunter2")
            .env("JENKINS_NODE", "agent-1")
            // Nothing listens on the discard port; any scheduler call fails fast.
            .env("JENKINS_URL", "http://127.0.0.1:9")
            .env("DOCKER_ROOT_DIR", self.runtime.path())
            .env("WORKSPACE_ROOT_DIR", self.workspace.path())
            .env("DW_LOG", "warn");
        cmd
    }
}

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("diskwatch")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn missing_required_key_exits_with_config_error() {
    let env = Env::new();
    env.command()
        .env_remove("JENKINS_NODE")
        .arg("config")
        .assert()
        .code(10)
        .stderr(predicate::str::contains("JENKINS_NODE"));
}

#[test]
fn config_error_is_logged_with_codes() {
    let env = Env::new();
    let output = env
        .command()
        .env_remove("JENKINS_PASS")
        .args(["--log-format", "jsonl", "config"])
        .assert()
        .code(10)
        .get_output()
        .stderr
        .clone();
    let text = String::from_utf8(output).unwrap();
    let events: Vec<serde_json::Value> = text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();

    let config_error = events
        .iter()
        .find(|e| e["event"] == "config.error")
        .expect("config.error event");
    assert_eq!(config_error["fields"]["key"], "JENKINS_PASS");
    assert_eq!(config_error["fields"]["code"], 64);
    assert!(events
        .iter()
        .any(|e| e["fields"]["exit_code"] == "ERR_CONFIG"));
}

#[test]
fn empty_required_key_counts_as_missing() {
    let env = Env::new();
    env.command()
        .env("JENKINS_USER", "")
        .arg("config")
        .assert()
        .code(10)
        .stderr(predicate::str::contains("JENKINS_USER"));
}

#[test]
fn non_integer_threshold_exits_with_config_error() {
    let env = Env::new();
    env.command()
        .env("DISK_THRESHOLD", "seventy")
        .args(["run", "--once"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("DISK_THRESHOLD"));
}

#[test]
fn out_of_range_threshold_exits_with_config_error() {
    let env = Env::new();
    env.command()
        .env("DISK_THRESHOLD", "101")
        .arg("check")
        .assert()
        .code(10);
}

#[test]
fn config_redacts_password() {
    let env = Env::new();
    let output = env.command().arg("config").assert().success().get_output().stdout.clone();
    let text = String::from_utf8(output).unwrap();
    assert!(!text.contains("hunter2"));
    assert!(text.contains("[REDACTED]"));

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["scheduler"]["node"], "agent-1");
    assert_eq!(value["watch"]["threshold_percent"], 70);
}

#[test]
fn check_reports_pressure_with_zero_threshold() {
    let env = Env::new();
    let output = env
        .command()
        .env("DISK_THRESHOLD", "0")
        .arg("check")
        .assert()
        .code(1)
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["critical"], true);
    assert_eq!(value["samples"].as_array().map(Vec::len), Some(2));
}

#[test]
fn check_on_missing_path_is_io_error() {
    let env = Env::new();
    env.command()
        .env("WORKSPACE_ROOT_DIR", "/definitely/not/here/diskwatch")
        .arg("check")
        .assert()
        .code(21);
}

#[test]
fn dry_run_once_never_contacts_scheduler() {
    let env = Env::new();
    std::fs::write(env.workspace.path().join("artifact.bin"), b"data").unwrap();

    env.command()
        .env("DISK_THRESHOLD", "0")
        .args(["run", "--once", "--dry-run"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success();

    assert!(env.workspace.path().join("artifact.bin").exists());
}

#[test]
fn jsonl_logs_hide_password() {
    let env = Env::new();
    let output = env
        .command()
        .env("DW_LOG", "debug")
        .args(["--log-format", "jsonl", "run", "--once", "--dry-run"])
        .assert()
        .success()
        .get_output()
        .stderr
        .clone();
    let text = String::from_utf8(output).unwrap();
    assert!(!text.contains("hunter2"));
    assert!(text.lines().any(|line| line.contains("\"run.started\"")));
}

#[cfg(unix)]
mod termination {
    //! `diskwatch run` receiving SIGTERM, against a fake Jenkins and a fake
    //! `docker` that blocks mid-prune.

    use std::io::{BufRead, BufReader};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::process::{Child, Command, Stdio};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use tiny_http::{Header, Method, Response, Server};

    #[derive(Debug, Default)]
    struct Node {
        offline: bool,
        posts: usize,
    }

    /// Jenkins with real toggle semantics and the crumb issuer disabled.
    fn start_jenkins() -> (Arc<Mutex<Node>>, String) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let node = Arc::new(Mutex::new(Node::default()));
        let shared = node.clone();
        thread::spawn(move || {
            for request in server.incoming_requests() {
                let path = request.url().split('?').next().unwrap_or_default().to_string();
                let mut state = shared.lock().unwrap();
                let response = if path == "/computer/agent-1/api/json" {
                    Response::from_string(format!(r#"{{"idle":true,"offline":{}}}"#, state.offline))
                        .with_header(
                            Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                                .unwrap(),
                        )
                } else if path == "/computer/agent-1/toggleOffline"
                    && *request.method() == Method::Post
                {
                    state.offline = !state.offline;
                    state.posts += 1;
                    Response::from_string("").with_status_code(302).with_header(
                        Header::from_bytes(&b"Location"[..], &b"/computer/agent-1/"[..]).unwrap(),
                    )
                } else {
                    Response::from_string("{}").with_status_code(404)
                };
                drop(state);
                let _ = request.respond(response);
            }
        });
        (node, format!("http://{addr}"))
    }

    /// A `docker` that records it was started and then hangs.
    fn hanging_docker(dir: &Path) -> PathBuf {
        let marker = dir.join("docker-started");
        let script = dir.join("docker");
        std::fs::write(
            &script,
            format!("#!/bin/sh\ntouch '{}'\nexec sleep 30\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        marker
    }

    fn wait_until(what: &str, mut ready: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while !ready() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(50));
        }
    }

    struct Running {
        child: Child,
        log: mpsc::Receiver<String>,
        _dirs: [tempfile::TempDir; 3],
    }

    fn spawn_run(url: &str, threshold: &str) -> (Running, PathBuf) {
        let bin = tempfile::tempdir().unwrap();
        let runtime = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let marker = hanging_docker(bin.path());

        let mut child = Command::new(env!("CARGO_BIN_EXE_diskwatch"))
            .args(["--log-format", "jsonl", "run"])
            .env_clear()
            .env("PATH", format!("{}:/usr/bin:/bin", bin.path().display()))
            .env("JENKINS_USER", "bot")
            .env("JENKINS_PASS", "hunter2")
            .env("JENKINS_NODE", "agent-1")
            .env("JENKINS_URL", url)
            .env("DISK_THRESHOLD", threshold)
            .env("RUNTIME_TIMEOUT_SECS", "120")
            .env("DOCKER_ROOT_DIR", runtime.path())
            .env("WORKSPACE_ROOT_DIR", workspace.path())
            .env("DW_LOG", "info")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let stderr = child.stderr.take().unwrap();
        let (tx, log) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                let _ = tx.send(line);
            }
        });

        (
            Running {
                child,
                log,
                _dirs: [bin, runtime, workspace],
            },
            marker,
        )
    }

    impl Running {
        fn wait_for_event(&self, event: &str) {
            let needle = format!("\"{event}\"");
            let deadline = Instant::now() + Duration::from_secs(30);
            loop {
                let left = deadline.saturating_duration_since(Instant::now());
                let line = self
                    .log
                    .recv_timeout(left)
                    .unwrap_or_else(|_| panic!("no {event} log line"));
                if line.contains(&needle) {
                    return;
                }
            }
        }

        fn terminate(mut self) -> Option<i32> {
            let pid = self.child.id() as libc::pid_t;
            assert_eq!(unsafe { libc::kill(pid, libc::SIGTERM) }, 0);
            let deadline = Instant::now() + Duration::from_secs(30);
            loop {
                if let Some(status) = self.child.try_wait().unwrap() {
                    return status.code();
                }
                if Instant::now() >= deadline {
                    let _ = self.child.kill();
                    panic!("diskwatch did not exit after SIGTERM");
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    #[test]
    fn sigterm_mid_cleanup_restores_node_before_exit() {
        let (node, url) = start_jenkins();
        let (running, marker) = spawn_run(&url, "0");

        wait_until("prune to start", || marker.exists());
        assert!(node.lock().unwrap().offline);

        assert_eq!(running.terminate(), Some(143));

        let node = node.lock().unwrap();
        assert!(!node.offline, "node left offline");
        assert_eq!(node.posts, 2);
    }

    #[test]
    fn sigterm_while_idle_exits_without_touching_node() {
        let (node, url) = start_jenkins();
        let (running, marker) = spawn_run(&url, "100");

        running.wait_for_event("run.started");
        assert_eq!(running.terminate(), Some(143));

        assert!(!marker.exists());
        let node = node.lock().unwrap();
        assert_eq!(node.posts, 0);
        assert!(!node.offline);
    }
}
