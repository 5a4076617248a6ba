//! BDD scenarios for the idempotent volume lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Attaching a block volume twice returns the same device"
)]
fn scenario_attach_twice(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Attaching to a second node names the current owner"
)]
fn scenario_attach_elsewhere(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Mounting and unmounting a block device twice"
)]
fn scenario_mount_twice(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Detaching a block volume twice"
)]
fn scenario_detach_twice(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Exporting a file system twice"
)]
fn scenario_export_twice(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Unmounting a file system through the generic driver name"
)]
fn scenario_generic_unmount(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}
