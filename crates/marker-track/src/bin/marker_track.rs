//! Minimal command-line runner: load a driver config, track, print poses.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use marker_track::{Driver, DriverConfig};

#[derive(Parser)]
#[command(name = "marker-track", about = "Run the marker tracking driver from a config file")]
struct Args {
    /// Driver configuration (JSON).
    config: PathBuf,
    /// Consumer tick period in milliseconds.
    #[arg(long, default_value_t = 33)]
    tick_ms: u64,
    /// Stop after this many seconds (0 = run forever).
    #[arg(long, default_value_t = 0)]
    duration_s: u64,
    /// Start a calibration run immediately.
    #[arg(long)]
    calibrate: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    marker_track_core::init_with_level(log::LevelFilter::Info)?;
    let args = Args::parse();

    let text = std::fs::read_to_string(&args.config)?;
    let config: DriverConfig = serde_json::from_str(&text)?;
    let board = config.calibration_board.clone();

    let mut driver = Driver::new(config);
    driver.register_board(board, true)?;
    driver.initialize()?;
    if args.calibrate {
        driver.start_calibration()?;
    }

    let started = std::time::Instant::now();
    let mut last_diag = String::new();
    loop {
        for result in driver.tick() {
            if result.valid {
                let t = result.pose.translation;
                println!(
                    "{}: t=({:.3}, {:.3}, {:.3}) markers={}",
                    result.board, t.x, t.y, t.z, result.markers_used
                );
            }
        }

        let diag = driver.diagnostic_text();
        if diag != last_diag {
            println!("[{}]", diag);
            last_diag = diag;
        }

        if args.duration_s > 0 && started.elapsed().as_secs() >= args.duration_s {
            break;
        }
        std::thread::sleep(Duration::from_millis(args.tick_ms));
    }

    driver.shutdown();
    Ok(())
}
