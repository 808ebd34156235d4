//! Pool behaviour against real child processes.
//!
//! The downstream server is a small `sh` script that answers `initialize`,
//! `tools/list` and `tools/call`, and writes its pid so the tests can check
//! that the process is really gone afterwards.

#![cfg(unix)]

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use toolbox_core::{
    ConnectionPool, ServerLaunchSpec, ToolIdentifier, ToolboxDefinition, ToolboxError,
    ToolboxesConfig,
};

const FIXTURE: &str = r#"#!/bin/sh
echo $$ > "$1"
tag="$2"
mode="$3"
if [ "$mode" = stubborn ]; then trap '' TERM; fi
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"%s"}}}\n' "$id" "$tag" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"read_file","description":"Read a file","inputSchema":{"type":"object","properties":{"path":{"type":"string"}}}},{"name":"slow","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"name":"slow"'*)
      ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"127.0.0.1 localhost (%s)"}]}}\n' "$id" "$tag" ;;
  esac
done
if [ "$mode" = stubborn ]; then
  while :; do sleep 1; done
fi
"#;

struct Fixture {
    dir: TempDir,
    script: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fixture.sh");
        std::fs::write(&script, FIXTURE).unwrap();
        Self { dir, script }
    }

    fn pid_file(&self, tag: &str) -> PathBuf {
        self.dir.path().join(format!("{tag}.pid"))
    }

    fn server(&self, name: &str, tag: &str) -> ServerLaunchSpec {
        ServerLaunchSpec::new(name, "sh")
            .with_args([
                self.script.display().to_string(),
                self.pid_file(tag).display().to_string(),
                tag.to_string(),
            ])
            .with_timeout_secs(10)
    }

    /// Ignores SIGTERM and keeps running after stdin closes
    fn stubborn_server(&self, name: &str, tag: &str) -> ServerLaunchSpec {
        let mut spec = self.server(name, tag);
        spec.args.push("stubborn".to_string());
        spec
    }

    fn pid(&self, tag: &str) -> Pid {
        read_pid(&self.pid_file(tag))
    }
}

fn read_pid(path: &Path) -> Pid {
    let raw = std::fs::read_to_string(path).unwrap();
    Pid::from_raw(raw.trim().parse().unwrap())
}

fn is_gone(pid: Pid) -> bool {
    kill(pid, None) == Err(Errno::ESRCH)
}

fn pool(toolboxes: Vec<ToolboxDefinition>) -> ConnectionPool {
    ConnectionPool::new(Arc::new(ToolboxesConfig::new(toolboxes).unwrap()))
}

#[tokio::test]
async fn open_and_invoke_through_child_process() {
    let fixture = Fixture::new();
    let pool = pool(vec![
        ToolboxDefinition::new("dev", "Development").with_server(fixture.server("fs", "dev-fs")),
    ]);

    let snapshot = pool.open("dev").await.unwrap();
    assert_eq!(snapshot.servers_connected, 1);
    assert_eq!(snapshot.capabilities.len(), 2);
    let cap = &snapshot.capabilities[0];
    assert_eq!(
        (cap.name.as_str(), cap.server.as_str(), cap.toolbox.as_str()),
        ("read_file", "fs", "dev")
    );

    let result = pool
        .invoke(
            &ToolIdentifier::new("dev", "fs", "read_file"),
            json!({"path": "/etc/hosts"}),
        )
        .await
        .unwrap();
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("127.0.0.1 localhost"), "{text}");

    pool.shutdown().await;
}

#[tokio::test]
async fn invoke_before_open_names_the_toolbox() {
    let fixture = Fixture::new();
    let pool = pool(vec![
        ToolboxDefinition::new("dev", "").with_server(fixture.server("fs", "dev-fs")),
    ]);

    let err = pool
        .invoke(&ToolIdentifier::new("dev", "fs", "read_file"), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolboxError::ToolboxNotOpen { .. }));
    let text = err.to_string();
    assert!(text.contains("dev") && text.contains("not found"), "{text}");
}

#[tokio::test]
async fn broken_server_fails_open_and_leaves_no_process() {
    let fixture = Fixture::new();
    let pool = pool(vec![
        ToolboxDefinition::new("mixed", "")
            .with_server(fixture.server("fs", "mixed-fs"))
            .with_server(ServerLaunchSpec::new("broken", "/nonexistent/mcp-server")),
        ToolboxDefinition::new("dev", "").with_server(fixture.server("fs", "dev-fs")),
    ]);

    let err = pool.open("mixed").await.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("mixed") && text.contains("broken"), "{text}");
    assert!(!pool.is_open("mixed"));
    assert!(is_gone(fixture.pid("mixed-fs")));

    let snapshot = pool.open("dev").await.unwrap();
    assert_eq!(snapshot.servers_connected, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_reaps_every_child() {
    let fixture = Fixture::new();
    let pool = pool(vec![
        ToolboxDefinition::new("alpha", "")
            .with_server(fixture.server("storage", "alpha-storage"))
            .with_server(fixture.server("fs", "alpha-fs")),
        ToolboxDefinition::new("beta", "").with_server(fixture.server("storage", "beta-storage")),
    ]);

    pool.open("alpha").await.unwrap();
    pool.open("beta").await.unwrap();

    // Same server name in both toolboxes; each call reaches its own process
    let result = pool
        .invoke(&ToolIdentifier::new("beta", "storage", "read_file"), json!({}))
        .await
        .unwrap();
    assert!(result["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("(beta-storage)"));

    let pids: Vec<Pid> = ["alpha-storage", "alpha-fs", "beta-storage"]
        .iter()
        .map(|tag| fixture.pid(tag))
        .collect();
    assert!(pids.iter().all(|pid| !is_gone(*pid)));

    pool.shutdown().await;

    assert!(pool.open_toolboxes().is_empty());
    for pid in pids {
        assert!(is_gone(pid), "process {pid} still running");
    }
}

#[tokio::test]
async fn shutdown_interrupts_unanswered_call() {
    let fixture = Fixture::new();
    let pool = Arc::new(
        pool(vec![
            ToolboxDefinition::new("dev", "").with_server(fixture.server("fs", "dev-fs")),
        ])
        .with_shutdown_budget(Duration::from_secs(1)),
    );
    pool.open("dev").await.unwrap();
    let pid = fixture.pid("dev-fs");

    let call = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move {
            pool.invoke(&ToolIdentifier::new("dev", "fs", "slow"), json!({}))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!call.is_finished());

    pool.shutdown().await;
    assert!(is_gone(pid), "process {pid} still running");

    let outcome = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .expect("call still pending after shutdown")
        .unwrap();
    assert!(matches!(outcome, Err(ToolboxError::Invocation { .. })));
}

#[tokio::test]
async fn shutdown_kills_server_that_outlives_budget() {
    let fixture = Fixture::new();
    let pool = pool(vec![ToolboxDefinition::new("dev", "")
        .with_server(fixture.stubborn_server("fs", "dev-fs"))])
    .with_shutdown_budget(Duration::from_millis(500));
    pool.open("dev").await.unwrap();
    let pid = fixture.pid("dev-fs");

    let started = Instant::now();
    pool.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(is_gone(pid), "process {pid} still running");
}
