#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::*;
use dynamo_emulator_instance::{
    InstanceRecord, LaunchError, LaunchSpec, Lifecycle, LifecycleError,
    PortRegistry, ReadinessProbe, StartOutcome, StateDir, StopResult,
};

fn lifecycle<L: dynamo_emulator_instance::Launch>(launcher: L) -> Lifecycle<L> {
    Lifecycle::with_launcher(Arc::new(PortRegistry::new()), launcher)
        .with_probe(fast_probe())
        .with_grace_period(Duration::from_secs(5))
}

fn port_is_bindable(port: u16) -> bool {
    std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let port = free_port();
    let lifecycle = lifecycle(Recording::new(ListeningLauncher));
    let spec = LaunchSpec::new(port, "sh");

    let first = lifecycle.start(&spec).await.unwrap();
    let second = lifecycle.start(&spec).await.unwrap();

    assert!(matches!(first, StartOutcome::Started(_)));
    assert_eq!(second, StartOutcome::AlreadyRunning(first.info()));
    assert_eq!(lifecycle.launches(), 1);
    assert_eq!(lifecycle.registry().running_ports(), vec![port]);

    lifecycle.stop(port).await.unwrap();
}

#[tokio::test]
async fn test_start_then_stop_frees_port() {
    let port = free_port();
    let lifecycle = lifecycle(ListeningLauncher);
    let spec = LaunchSpec::new(port, "sh");

    let info = lifecycle.start(&spec).await.unwrap().info();
    assert_eq!(info.port, port);
    assert!(lifecycle.probe().is_reachable(port).await);
    assert!(!port_is_bindable(port));

    let stopped = lifecycle.stop(port).await.unwrap();
    assert_eq!(stopped, StopResult::Stopped { info, forced: false });

    assert!(!lifecycle.registry().contains(port));
    assert!(eventually_dead(info.pid).await);
    assert!(port_is_bindable(port));

    assert_eq!(
        lifecycle.stop(port).await.unwrap(),
        StopResult::NotRunning { port }
    );
}

#[tokio::test]
async fn test_stop_unknown_port() {
    let lifecycle = lifecycle(ListeningLauncher);
    let port = free_port();

    assert_eq!(
        lifecycle.stop(port).await.unwrap(),
        StopResult::NotRunning { port }
    );
}

#[tokio::test]
async fn test_port_zero_rejected() {
    let lifecycle = lifecycle(Recording::new(ListeningLauncher));

    let err = lifecycle.start(&LaunchSpec::new(0, "sh")).await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidPort(0)));
    assert_eq!(lifecycle.launches(), 0);
}

#[tokio::test]
async fn test_readiness_timeout_leaves_nothing_behind() {
    let port = free_port();
    let lifecycle = lifecycle(Recording::new(SilentLauncher)).with_probe(ReadinessProbe::new(
        Duration::from_millis(300),
        Duration::from_millis(50),
    ));

    let err = lifecycle
        .start(&LaunchSpec::new(port, "sh"))
        .await
        .unwrap_err();
    match err {
        LifecycleError::ReadinessTimeout { port: p, waited } => {
            assert_eq!(p, port);
            assert!(waited >= Duration::from_millis(300));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(!lifecycle.registry().contains(port));
    let pids = lifecycle.launcher_pids();
    assert_eq!(pids.len(), 1);
    assert!(eventually_dead(pids[0]).await);
}

#[tokio::test]
async fn test_early_exit_reported() {
    let port = free_port();
    let lifecycle = lifecycle(CrashingLauncher);

    let err = lifecycle
        .start(&LaunchSpec::new(port, "sh"))
        .await
        .unwrap_err();
    match err {
        LifecycleError::Launch(LaunchError::ExitedEarly { port: p, status }) => {
            assert_eq!(p, port);
            assert!(status.contains('1'));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!lifecycle.registry().contains(port));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_launch_once() {
    let port = free_port();
    let lifecycle = Arc::new(lifecycle(Recording::new(ListeningLauncher)));
    let spec = LaunchSpec::new(port, "sh");

    let starts: Vec<_> = (0..2)
        .map(|_| {
            let lifecycle = lifecycle.clone();
            let spec = spec.clone();
            tokio::spawn(async move { lifecycle.start(&spec).await.unwrap() })
        })
        .collect();

    let mut outcomes = Vec::new();
    for start in starts {
        outcomes.push(start.await.unwrap());
    }

    assert_eq!(lifecycle.launches(), 1);
    let started = outcomes
        .iter()
        .filter(|o| matches!(o, StartOutcome::Started(_)))
        .count();
    assert_eq!(started, 1);
    assert_eq!(outcomes[0].info(), outcomes[1].info());

    lifecycle.stop(port).await.unwrap();
}

#[tokio::test]
async fn test_stale_record_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    let port = free_port();

    let mut gone = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = gone.id();
    gone.wait().unwrap();
    state
        .save(&InstanceRecord {
            port,
            pid: dead_pid,
            started_at: Utc::now(),
        })
        .await
        .unwrap();

    let lifecycle = lifecycle(Recording::new(ListeningLauncher)).with_state_dir(state.clone());
    let outcome = lifecycle.start(&LaunchSpec::new(port, "sh")).await.unwrap();

    assert!(matches!(outcome, StartOutcome::Started(_)));
    assert_eq!(lifecycle.launches(), 1);
    let record = state.load(port).await.unwrap().unwrap();
    assert_eq!(record.pid, outcome.info().pid);

    lifecycle.stop(port).await.unwrap();
    assert_eq!(state.load(port).await.unwrap(), None);
}

#[tokio::test]
async fn test_stop_from_later_invocation() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    let port = free_port();

    // First invocation starts and leaves the emulator running
    let starter = lifecycle(ListeningLauncher).with_state_dir(state.clone());
    let info = starter.start(&LaunchSpec::new(port, "sh")).await.unwrap().info();
    assert_eq!(starter.detach(port).await, Some(info));
    drop(starter);
    assert!(is_alive(info.pid));

    // Second invocation has an empty registry and only the record
    let stopper = lifecycle(ListeningLauncher).with_state_dir(state.clone());
    assert_eq!(stopper.status(port).await.unwrap(), Some(info));

    let stopped = stopper.stop(port).await.unwrap();
    assert_eq!(stopped, StopResult::Stopped { info, forced: false });
    assert!(eventually_dead(info.pid).await);
    assert_eq!(state.load(port).await.unwrap(), None);
    assert_eq!(stopper.status(port).await.unwrap(), None);
}

#[tokio::test]
async fn test_stop_leaves_unrelated_process_alone() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    let port = free_port();

    // The recorded pid now belongs to something that does not serve the port
    let mut unrelated = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    state
        .save(&InstanceRecord {
            port,
            pid: unrelated.id(),
            started_at: Utc::now(),
        })
        .await
        .unwrap();

    let stopper = lifecycle(ListeningLauncher).with_state_dir(state.clone());
    assert_eq!(stopper.status(port).await.unwrap(), None);
    assert_eq!(
        stopper.stop(port).await.unwrap(),
        StopResult::NotRunning { port }
    );

    assert!(unrelated.try_wait().unwrap().is_none());
    assert_eq!(state.load(port).await.unwrap(), None);

    unrelated.kill().unwrap();
    unrelated.wait().unwrap();
}

#[tokio::test]
async fn test_unreadable_record_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    let port = free_port();
    let truncated = r#"{"port": 1, "pid""#;

    std::fs::write(state.record_path(port), truncated).unwrap();
    let lifecycle = lifecycle(Recording::new(ListeningLauncher)).with_state_dir(state.clone());
    assert_eq!(
        lifecycle.stop(port).await.unwrap(),
        StopResult::NotRunning { port }
    );
    assert!(!state.record_path(port).exists());

    std::fs::write(state.record_path(port), truncated).unwrap();
    let info = lifecycle.start(&LaunchSpec::new(port, "sh")).await.unwrap().info();
    assert_eq!(lifecycle.launches(), 1);
    assert_eq!(state.load(port).await.unwrap().map(|r| r.pid), Some(info.pid));

    lifecycle.stop(port).await.unwrap();
    assert!(eventually_dead(info.pid).await);
}

#[tokio::test]
async fn test_restart_adopts_recorded_instance() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    let port = free_port();

    let starter = lifecycle(ListeningLauncher).with_state_dir(state.clone());
    let info = starter.start(&LaunchSpec::new(port, "sh")).await.unwrap().info();
    starter.detach(port).await;

    let again = lifecycle(Recording::new(ListeningLauncher)).with_state_dir(state.clone());
    let outcome = again.start(&LaunchSpec::new(port, "sh")).await.unwrap();

    assert_eq!(outcome, StartOutcome::AlreadyRunning(info));
    assert_eq!(again.launches(), 0);

    again.stop(port).await.unwrap();
    assert!(eventually_dead(info.pid).await);
}

#[tokio::test]
async fn test_stop_after_crash() {
    let port = free_port();
    let lifecycle = lifecycle(ListeningLauncher);
    let info = lifecycle.start(&LaunchSpec::new(port, "sh")).await.unwrap().info();

    unsafe {
        libc::kill(info.pid as i32, libc::SIGKILL);
    }
    assert!(eventually_dead(info.pid).await);

    assert_eq!(
        lifecycle.stop(port).await.unwrap(),
        StopResult::AlreadyStopped { port }
    );
}

#[tokio::test]
async fn test_shutdown_stops_owned_instances() {
    let lifecycle = lifecycle(ListeningLauncher);
    let mut pids = Vec::new();
    for _ in 0..2 {
        let port = free_port();
        let info = lifecycle.start(&LaunchSpec::new(port, "sh")).await.unwrap().info();
        pids.push(info.pid);
    }

    lifecycle.shutdown().await.unwrap();

    assert!(lifecycle.registry().running_ports().is_empty());
    for pid in pids {
        assert!(eventually_dead(pid).await);
    }
}

trait RecordingExt {
    fn launches(&self) -> usize;
    fn launcher_pids(&self) -> Vec<u32>;
}

impl<L: dynamo_emulator_instance::Launch> RecordingExt for Lifecycle<Recording<L>> {
    fn launches(&self) -> usize {
        self.launcher().launches()
    }

    fn launcher_pids(&self) -> Vec<u32> {
        self.launcher().pids()
    }
}
