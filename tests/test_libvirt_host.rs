//! Checks against a real libvirt host. Needs root, libvirtd and virsh.
//!
//! Run with `--features privileged-tests`.

#![cfg(feature = "privileged-tests")]

use std::sync::Arc;
use std::time::Duration;
use vpilot::exec::SystemRunner;
use vpilot::hypervisor::Virsh;
use vpilot::paths;

#[tokio::test]
async fn test_virsh_reaches_libvirt() {
    let virsh = Virsh::new(Arc::new(SystemRunner), paths::DEFAULT_CONNECT_URI);
    let err = virsh
        .domstate("vpilot-no-such-guest")
        .await
        .expect_err("unknown domain must not have a state");
    assert!(err.to_string().contains("Domain state failed"));
}

#[tokio::test]
async fn test_discovery_of_missing_guest_fails_cleanly() {
    let virsh = Virsh::new(Arc::new(SystemRunner), paths::DEFAULT_CONNECT_URI);
    let err = virsh
        .domifaddr("vpilot-no-such-guest", "virbr0", Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Address discovery failed: "));
}
