//! camdash CLI
//!
//! Usage:
//!   camdash
//!   camdash -c /etc/camdash.yaml -l debug
//!   camdash --validate
//!   camdash --list-devices

use camdash::discovery::DeviceScanner;
use camdash::{AppConfig, CamdashArgs, Session};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: CamdashArgs = argh::from_env();

    let (config, path) = AppConfig::load(args.config.as_deref())?;
    camdash::logging::init(&config.log, args.log_level.as_deref())?;
    log::info!("[Config] Loaded {}", path.display());

    let (ok, warnings) = config.validate();
    for warning in &warnings {
        log::warn!("[Config] {}", warning);
    }

    if args.validate {
        println!(
            "Config '{}' is {}",
            path.display(),
            if ok { "valid" } else { "invalid" }
        );
        println!(
            "  Capture: {}x{} @ {} fps ({:?})",
            config.capture.width, config.capture.height, config.capture.fps, config.capture.format
        );
        println!("  Slots: {}", config.cameras.slot_count);
        println!("  Warnings: {}", warnings.len());
        if !ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    if args.list_devices {
        let scanner = DeviceScanner::new(config.scanner_config());
        let cameras = scanner.enumerate();
        if cameras.is_empty() {
            println!("No cameras found");
        }
        for camera in cameras {
            println!(
                "{}  {}  {}",
                camera.device_path.display(),
                camera.name,
                camera.device_id
            );
        }
        return Ok(());
    }

    // Graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, initiating shutdown...");
        let _ = shutdown_tx.send(());
    })?;

    let session = Session::with_ffmpeg(config);
    session.run(shutdown_rx).await?;

    log::info!("camdash exiting");
    Ok(())
}
