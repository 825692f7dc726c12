//! Integration tests for the Orchestrator and the status board
//!
//! These tests verify that:
//! - Every configured line gets its own worker
//! - A line whose receiver is down does not hold up the others
//! - Observers see health through events and the status board
//! - Stop is cooperative and bounded

use camino::Utf8PathBuf;
use inspection_bridge::logging::ActivityLog;
use inspection_bridge::models::{
    ConnectPolicy, DecodeRules, DisposalMode, FileType, HealthThresholds, LineConfig,
};
use inspection_bridge::{HealthState, LineEvent, Orchestrator};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::timeout;

fn line(root: &Utf8PathBuf, name: &str, port: u16) -> LineConfig {
    LineConfig {
        name: name.to_string(),
        file_type: FileType::Csv,
        source_dir: root.join("in").join(name),
        target_dir: root.join("out").join(name),
        disposal: DisposalMode::Move,
        host: "127.0.0.1".to_string(),
        port,
        poll_interval: Duration::from_millis(50),
        rules: DecodeRules {
            pass_tokens: ["PASS".to_string()].into_iter().collect(),
            xml_mapping: Default::default(),
        },
        connect: ConnectPolicy {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(10),
            read_timeout: Duration::from_secs(1),
        },
        health: HealthThresholds::default(),
        log_activity: false,
    }
}

async fn acking_listener() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 || socket.write_all(b"ACK").await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    port
}

fn closed_port() -> u16 {
    let placeholder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = placeholder.local_addr().unwrap().port();
    drop(placeholder);
    port
}

async fn wait_for<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("Timeout waiting for condition");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lines_are_independent() {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();

    let good_port = acking_listener().await;
    let bad_port = closed_port();

    let lines = vec![line(&root, "GOOD", good_port), line(&root, "BAD", bad_port)];
    for l in &lines {
        std::fs::create_dir_all(&l.source_dir).unwrap();
        std::fs::write(l.source_dir.join("SN1_20250101120000_PASS.csv"), "").unwrap();
    }

    let mut orchestrator = Orchestrator::new(lines, ActivityLog::disabled());
    let mut events = orchestrator.events();
    orchestrator.start();

    let board = orchestrator.board().clone();
    wait_for(|| {
        board.read("GOOD", |s| s.health) == Some(HealthState::Ok)
            && board.read("BAD", |s| s.health) == Some(HealthState::Error)
    })
    .await;

    assert!(root.join("out/GOOD/SN1_20250101120000_PASS.csv").exists());
    assert!(root.join("in/BAD/SN1_20250101120000_PASS.csv").exists());
    assert_eq!(board.read("GOOD", |s| s.last_event_id.clone()), Some(Some("1".to_string())));

    let good_metrics = orchestrator.metrics("GOOD").unwrap();
    assert_eq!(good_metrics.forwarded.load(Ordering::Relaxed), 1);
    let bad_metrics = orchestrator.metrics("BAD").unwrap();
    assert!(bad_metrics.send_failures.load(Ordering::Relaxed) >= 1);

    let report = orchestrator.stop(Duration::from_secs(5)).await;
    assert!(report.is_clean());
    assert_eq!(report.stopped.len(), 2);

    let mut saw_forwarded = false;
    loop {
        match events.try_recv() {
            Ok(LineEvent::Forwarded { line, serial, .. }) => {
                assert_eq!(line, "GOOD");
                assert_eq!(serial, "SN1");
                saw_forwarded = true;
            }
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    assert!(saw_forwarded);
}

#[tokio::test]
async fn test_stop_is_prompt_during_long_poll_interval() {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();

    let mut config = line(&root, "IDLE", acking_listener().await);
    config.poll_interval = Duration::from_secs(3600);

    let mut orchestrator = Orchestrator::new(vec![config], ActivityLog::disabled());
    orchestrator.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    let report = orchestrator.stop(Duration::from_secs(2)).await;

    assert!(report.is_clean());
    assert!(started.elapsed() < Duration::from_secs(1));

    let board = orchestrator.board().clone();
    wait_for(|| board.read("IDLE", |s| s.running) == Some(false)).await;
}
