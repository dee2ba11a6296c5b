//! Bring-down state machine against a scripted host

mod common;

use common::{context, FakeConsole, FakeRemote, ScriptedRunner};
use std::time::Duration;
use tempfile::TempDir;
use vpilot::exec::CommandOutput;
use vpilot::guest::{GuestLifecycle, GuestSpec};
use vpilot::{Accelerator, OperationResult, StepError};

fn spec(accelerator: Accelerator) -> GuestSpec {
    GuestSpec {
        name: "vm1".to_string(),
        accelerator,
        ..GuestSpec::default()
    }
}

fn lifecycle(runner: &std::sync::Arc<ScriptedRunner>, dir: &TempDir) -> GuestLifecycle {
    let ctx = context(runner.clone(), FakeConsole::clean(), FakeRemote::new(), dir.path());
    GuestLifecycle::new(&ctx)
}

#[tokio::test]
async fn test_kvm_clean_shutdown() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();

    let result = lifecycle(&runner, &dir).bring_down(&spec(Accelerator::Kvm)).await;
    let result: OperationResult = result.map(|()| None::<String>).into();

    assert_eq!(result, OperationResult::ok());
    assert_eq!(runner.count("shutdown vm1"), 1);
    assert_eq!(runner.count("destroy vm1"), 0);
    assert_eq!(runner.count("undefine vm1"), 1);
    assert!(runner.position("domstate vm1").unwrap() > runner.position("shutdown vm1").unwrap());
}

#[tokio::test]
async fn test_shutdown_failure_falls_back_to_destroy() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();
    runner.fail("shutdown vm1", "busy");
    runner.fail("undefine vm1", "in use");

    let result: OperationResult = lifecycle(&runner, &dir)
        .bring_down(&spec(Accelerator::Kvm))
        .await
        .map(|()| None::<String>)
        .into();

    // A recovered shutdown is not reported; only the undefine failure is
    assert_eq!(result, OperationResult::failed("Undefine failed: in use"));
    assert_eq!(runner.count("destroy vm1"), 1);
    assert_eq!(runner.count("undefine vm1"), 1);
}

#[tokio::test]
async fn test_all_steps_fail_are_aggregated() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();
    runner.fail("shutdown vm1", "busy");
    runner.fail("destroy vm1", "denied");
    runner.fail("undefine vm1", "in use");

    let err = lifecycle(&runner, &dir)
        .bring_down(&spec(Accelerator::Kvm))
        .await
        .unwrap_err();

    assert!(matches!(err, StepError::Aggregate(_)));
    assert_eq!(
        err.to_string(),
        "Shutdown failed: busy | Destroy failed: denied | Undefine failed: in use"
    );
}

#[tokio::test]
async fn test_tcg_never_shuts_down() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();

    lifecycle(&runner, &dir)
        .bring_down(&spec(Accelerator::Tcg))
        .await
        .unwrap();

    assert_eq!(runner.count("shutdown"), 0);
    assert_eq!(runner.count("domstate"), 0);
    assert_eq!(
        runner.calls(),
        vec![
            "virsh --connect qemu:///system destroy vm1",
            "virsh --connect qemu:///system undefine vm1",
        ]
    );
}

#[tokio::test]
async fn test_guest_that_never_stops_is_destroyed() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();
    runner.on("domstate vm1", CommandOutput::ok("running\n"));

    let spec = GuestSpec {
        shutdown_timeout: Duration::from_secs(1),
        ..spec(Accelerator::Kvm)
    };
    lifecycle(&runner, &dir).bring_down(&spec).await.unwrap();

    assert!(runner.count("domstate vm1") >= 2);
    assert_eq!(runner.count("destroy vm1"), 1);
    assert_eq!(runner.count("undefine vm1"), 1);
}

#[tokio::test]
async fn test_undefine_runs_exactly_once_for_every_outcome() {
    for (shutdown_fails, destroy_fails) in [(false, false), (false, true), (true, false), (true, true)] {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        if shutdown_fails {
            runner.fail("shutdown vm1", "busy");
        }
        if destroy_fails {
            runner.fail("destroy vm1", "denied");
        }

        let result = lifecycle(&runner, &dir).bring_down(&spec(Accelerator::Kvm)).await;

        assert_eq!(runner.count("undefine vm1"), 1, "{} {}", shutdown_fails, destroy_fails);
        assert_eq!(result.is_err(), shutdown_fails && destroy_fails);
    }
}

#[tokio::test]
async fn test_restore_runs_only_when_requested() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();

    lifecycle(&runner, &dir)
        .bring_down(&spec(Accelerator::Tcg))
        .await
        .unwrap();

    assert_eq!(runner.count("modprobe"), 0);
    assert_eq!(runner.count("systemctl"), 0);
}

#[tokio::test]
async fn test_restore_after_teardown() {
    let dir = TempDir::new().unwrap();
    let blacklist = dir.path().join("disable-kvm.conf");
    std::fs::write(&blacklist, "install kvm /bin/false\ninstall kvm_hv /bin/false\n").unwrap();

    let runner = ScriptedRunner::new();
    runner.loaded(&["kvm_hv", "kvm"]);

    let spec = GuestSpec {
        restore_kvm: true,
        ..spec(Accelerator::Tcg)
    };
    lifecycle(&runner, &dir).bring_down(&spec).await.unwrap();

    assert!(!blacklist.exists());
    let undefine = runner.position("undefine vm1").unwrap();
    let load_kvm = runner.position("modprobe kvm").unwrap();
    let load_hv = runner.position("modprobe kvm_hv").unwrap();
    let restart = runner.position("systemctl restart libvirtd").unwrap();
    assert!(undefine < load_kvm && load_kvm < load_hv && load_hv < restart);
}

#[tokio::test]
async fn test_restore_failure_keeps_earlier_failures() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();
    runner.fail("undefine vm1", "in use");
    runner.fail("modprobe kvm", "module not found");

    let spec = GuestSpec {
        restore_kvm: true,
        ..spec(Accelerator::Tcg)
    };
    let err = lifecycle(&runner, &dir).bring_down(&spec).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "Undefine failed: in use | Load module kvm failed: module not found"
    );
}

#[tokio::test]
async fn test_restore_failure_overrides_success() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();
    // Loads succeed but lsmod never shows the modules
    runner.loaded(&[]);

    let spec = GuestSpec {
        restore_kvm: true,
        ..spec(Accelerator::Kvm)
    };
    let err = lifecycle(&runner, &dir).bring_down(&spec).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "Verify modules loaded failed: accelerator modules not loaded: kvm_hv, kvm"
    );
}
