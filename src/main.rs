//! Binary entry point for the `oci-flexvolume` call-out driver.

use std::env;
use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use tracing::warn;

use oci_flexvolume::bridge::{LinuxHost, ProcessCommandRunner};
use oci_flexvolume::config::DriverPaths;
use oci_flexvolume::driver::{DriverSet, DriverTable, HttpConnector};
use oci_flexvolume::flexvolume::DriverStatus;
use oci_flexvolume::logging;
use oci_flexvolume::metadata::HttpMetadata;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args: Vec<String> = env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    let status = run(&args).await;
    write_status(io::stdout(), &status);
    process::exit(status.exit_code());
}

async fn run(args: &[String]) -> DriverStatus {
    let paths = DriverPaths::from_env();
    let log_file = paths.log_file();
    if !logging::init(&log_file) {
        warn!(%log_file, "could not open driver log; logging to stderr");
    }

    let metadata = match HttpMetadata::new() {
        Ok(metadata) => metadata,
        Err(err) => return DriverStatus::failure(err),
    };
    let connector = HttpConnector::new(paths, Arc::new(metadata));
    let drivers = DriverSet::new(connector, LinuxHost::new(ProcessCommandRunner));
    drivers.execute(&DriverTable::STANDARD, args).await
}

fn write_status(mut target: impl Write, status: &DriverStatus) {
    writeln!(target, "{}", status.to_json()).ok();
}
