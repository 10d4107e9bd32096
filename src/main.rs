use clap::Parser;
use log::{error, info};
use netsentry::configuration::config::{CliArgs, Config};
use netsentry::controller::Controller;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Unable to load configuration: {}", e);
            std::process::exit(2);
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(config.log_filter())
        .format_target(false)
        .init();

    println!(
        "
==============================================================================
  netsentry v{}  |  rotating capture with live payload inspection
  segments: {}  |  rotation: {}s  |  retention: {}h
==============================================================================
",
        env!("CARGO_PKG_VERSION"),
        config.output_dir.display(),
        config.rotation_secs,
        config.retention_hours
    );

    let controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    info!("Starting capture pipeline");
    match controller.run().await {
        Ok(summary) => info!(
            "Captured {} segment(s) across {} rotation(s), rendered {} record(s)",
            summary.capture.segments_dispatched, summary.capture.rotations, summary.records
        ),
        Err(e) => {
            error!("Capture pipeline stopped: {}, exiting...", e);
            std::process::exit(1);
        }
    }
}
