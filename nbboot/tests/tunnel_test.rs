use nbboot::tunnel::{
    CLOUDFLARED_PATTERN, OutputBuffer, TunnelError, TunnelReader, TunnelStatus, TunnelSupervisor,
};
use nbboot::utils::logging::init_test_logging;
use nbboot_common::supervisor_state::SupervisorState;
use regex::Regex;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

fn supervisor() -> TunnelSupervisor {
    TunnelSupervisor::new(7860)
        .quiet()
        .with_url_timeout(Some(Duration::from_secs(10)))
        .with_grace_period(Duration::from_secs(1))
}

#[tokio::test]
async fn test_reader_records_first_url_once() {
    init_test_logging();
    let (tx, rx) = watch::channel(None);
    let output = Arc::new(Mutex::new(OutputBuffer::default()));
    let reader = TunnelReader {
        name: "cloudflared".into(),
        pattern: Regex::new(CLOUDFLARED_PATTERN).unwrap(),
        note: None,
        url: tx,
        output: output.clone(),
        announce: false,
    };

    let stdout: &[u8] = b"starting\nyour url is: https://abc123.trycloudflare.com\nlater https://zzz999.trycloudflare.com\n";
    let stderr: &[u8] = b"some warning\n";
    reader.run(Some(stdout), Some(stderr)).await;

    assert_eq!(rx.borrow().as_deref(), Some("abc123.trycloudflare.com"));
    let lines = output.lock().unwrap().lines();
    assert_eq!(lines.len(), 4);
    assert!(lines.contains(&"your url is: https://abc123.trycloudflare.com".to_string()));
}

#[tokio::test]
async fn test_supervisor_reports_url_from_child_output() {
    init_test_logging();
    let mut sup = supervisor();
    sup.add_tunnel(
        "echo serving on {port} at https://abc123.trycloudflare.com; exec sleep 30",
        "cloudflared",
        CLOUDFLARED_PATTERN,
        Some("note".into()),
    )
    .unwrap();

    sup.start().unwrap();
    assert_eq!(sup.state(), SupervisorState::Running);

    let urls = sup.wait_for_urls().await;
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0].url, "abc123.trycloudflare.com");
    assert_eq!(urls[0].note.as_deref(), Some("note"));

    let reports = sup.reports();
    assert!(reports[0].recent_output[0].contains("serving on 7860"));

    sup.stop().await;
    assert_eq!(sup.state(), SupervisorState::Stopped);
    assert_eq!(sup.reports()[0].status, TunnelStatus::Stopped);
}

#[tokio::test]
async fn test_stop_twice_terminates_processes() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let mut sup = supervisor();
    sup.add_tunnel(
        format!("echo $$ > '{}'; exec sleep 30", pid_file.display()),
        "sleeper",
        CLOUDFLARED_PATTERN,
        None,
    )
    .unwrap();
    sup.start().unwrap();

    let mut pid = String::new();
    for _ in 0..50 {
        pid = std::fs::read_to_string(&pid_file).unwrap_or_default();
        if !pid.trim().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!pid.trim().is_empty(), "tunnel never wrote its pid");

    sup.stop().await;
    sup.stop().await;
    assert_eq!(sup.state(), SupervisorState::Stopped);

    let liveness = format!("kill -0 {} 2>/dev/null", pid.trim());
    let alive = std::process::Command::new("sh")
        .args(["-c", liveness.as_str()])
        .status()
        .unwrap()
        .success();
    assert!(!alive, "tunnel process survived stop()");
}

#[tokio::test]
async fn test_missing_program_does_not_block_others() {
    init_test_logging();
    let mut sup = supervisor();
    sup.add_tunnel(
        "nbboot-missing-tunnel-binary --port {port}",
        "ghost",
        CLOUDFLARED_PATTERN,
        None,
    )
    .unwrap();
    sup.add_tunnel(
        "echo https://live42.trycloudflare.com; exec sleep 30",
        "live",
        CLOUDFLARED_PATTERN,
        None,
    )
    .unwrap();

    let err = sup.start().unwrap_err();
    match err {
        TunnelError::Spawn { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].name, "ghost");
        }
        other => panic!("unexpected error: {other}"),
    }

    let urls = sup.wait_for_urls().await;
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0].name, "live");
    assert!(
        sup.reports()
            .iter()
            .any(|r| r.name == "ghost" && matches!(r.status, TunnelStatus::SpawnFailed(_)))
    );
    sup.stop().await;
}

#[tokio::test]
async fn test_stop_on_idle_and_restart_rejected() {
    let mut sup = supervisor();
    sup.stop().await;
    assert_eq!(sup.state(), SupervisorState::Stopped);
    assert!(matches!(
        sup.start(),
        Err(TunnelError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_invalid_pattern_rejected() {
    let mut sup = supervisor();
    let err = sup
        .add_tunnel("cl tunnel --url localhost:{port}", "bad", "([", None)
        .unwrap_err();
    assert!(matches!(err, TunnelError::InvalidPattern { .. }));
}

#[tokio::test]
async fn test_run_scoped_always_stops() {
    init_test_logging();
    let mut sup = supervisor();
    sup.add_tunnel("sleep 30", "sleeper", CLOUDFLARED_PATTERN, None)
        .unwrap();
    let run = sup.run_scoped(async { 42 }).await.unwrap();
    assert_eq!(run.output, 42);
    assert_eq!(sup.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_run_scoped_url_timeout_ends_wait_while_body_runs() {
    init_test_logging();
    let mut sup = TunnelSupervisor::new(7860)
        .quiet()
        .with_url_timeout(Some(Duration::from_millis(200)))
        .with_grace_period(Duration::from_secs(1));
    sup.add_tunnel("sleep 30", "silent", CLOUDFLARED_PATTERN, None)
        .unwrap();

    let run = sup
        .run_scoped(async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            "ui done"
        })
        .await
        .unwrap();

    assert_eq!(run.output, "ui done");
    assert_eq!(run.urls, Some(Vec::new()));
    assert_eq!(sup.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_run_scoped_collects_url_before_body_ends() {
    init_test_logging();
    let mut sup = supervisor();
    sup.add_tunnel(
        "echo https://early7.trycloudflare.com; exec sleep 30",
        "cloudflared",
        CLOUDFLARED_PATTERN,
        None,
    )
    .unwrap();

    let run = sup
        .run_scoped(tokio::time::sleep(Duration::from_secs(2)))
        .await
        .unwrap();

    let urls = run.urls.expect("URL wait should finish before the body");
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0].url, "early7.trycloudflare.com");
}

#[tokio::test]
async fn test_run_scoped_body_first_skips_url_report() {
    init_test_logging();
    let mut sup = TunnelSupervisor::new(7860)
        .quiet()
        .with_grace_period(Duration::from_secs(1));
    sup.add_tunnel("sleep 30", "silent", CLOUDFLARED_PATTERN, None)
        .unwrap();

    let run = sup.run_scoped(async { 7 }).await.unwrap();
    assert_eq!(run.output, 7);
    assert_eq!(run.urls, None);
    assert_eq!(sup.state(), SupervisorState::Stopped);
}
