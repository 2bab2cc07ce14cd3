use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use v4l2cam::{CameraConfig, CaptureSession, MenuItem};

#[derive(Parser, Debug)]
#[command(name = "v4l2cam")]
#[command(about = "Capture frames from a V4L2 device")]
#[command(version)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, help = "Path to TOML configuration file")]
    config: Option<String>,

    /// Device node path (overrides configuration)
    #[arg(short, long, help = "Device node path, e.g. /dev/video0")]
    device: Option<String>,

    /// Requested resolution as WIDTHxHEIGHT (overrides configuration)
    #[arg(short, long, help = "Requested resolution, e.g. 1280x720")]
    resolution: Option<String>,

    /// Requested frame rate (overrides configuration)
    #[arg(long, help = "Requested frames per second")]
    fps: Option<u32>,

    /// List device controls and formats, then exit
    #[arg(short, long, help = "List controls and formats without capturing")]
    list: bool,

    /// Number of frames to capture
    #[arg(short = 'n', long, default_value_t = 1, help = "Frames to capture")]
    frames: u32,

    /// Write the last captured frame to this path as binary PPM
    #[arg(short, long, help = "Output path for the last frame (PPM)")]
    output: Option<String>,

    /// Print default configuration in TOML format and exit
    #[arg(long, help = "Print default configuration and exit")]
    print_config: bool,

    /// Enable debug logging
    #[arg(long, help = "Enable debug level logging")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", CameraConfig::default().to_toml()?);
        return Ok(());
    }

    init_logging(args.debug);

    let config = build_config(&args)?;
    config.validate()?;

    let session = open_session(&config)?;

    if args.list {
        print_catalogs(&session);
        return Ok(());
    }

    session
        .config_set(&config.to_format()?)
        .context("format negotiation failed")?;
    if (session.width(), session.height()) != config.resolution {
        warn!(
            "Driver adjusted resolution: requested {}x{}, got {}x{}",
            config.resolution.0,
            config.resolution.1,
            session.width(),
            session.height()
        );
    }

    session.start().context("cannot start streaming")?;

    let mut captured = 0u32;
    let mut attempts = 0u32;
    while captured < args.frames {
        attempts += 1;
        if attempts > args.frames * 3 {
            bail!("too many dequeue failures, giving up");
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        session.capture(move |success| {
            let _ = tx.send(success);
        })?;

        // No timeout is applied to an armed watch; guard here instead.
        let success = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .context("timed out waiting for a frame")?
            .context("capture callback dropped")?;

        if success {
            captured += 1;
            info!("Captured frame {}/{}", captured, args.frames);
        } else {
            warn!("Transient dequeue failure, retrying");
        }
    }

    if let Some(path) = &args.output {
        let frame = session.frame();
        write_ppm(path, frame.width(), frame.height(), &frame.to_rgb())
            .with_context(|| format!("cannot write {path}"))?;
        info!(
            "Wrote {} ({}x{} PPM)",
            path,
            frame.width(),
            frame.height()
        );
    }

    let (tx, rx) = tokio::sync::oneshot::channel();
    session.stop(move || {
        let _ = tx.send(());
    })?;
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .context("timed out waiting for the stream to drain")?
        .ok();
    info!("Streaming stopped");

    Ok(())
}

fn init_logging(debug: bool) {
    use tracing_subscriber::EnvFilter;

    let default_filter = if debug {
        "v4l2cam=debug"
    } else {
        "v4l2cam=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

fn build_config(args: &Args) -> Result<CameraConfig> {
    let mut config = match &args.config {
        Some(path) => CameraConfig::load_from_file(path)
            .with_context(|| format!("cannot load configuration from {path}"))?,
        None => CameraConfig::default(),
    };

    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    if let Some(resolution) = &args.resolution {
        config.resolution = parse_resolution(resolution)?;
    }
    if let Some(fps) = args.fps {
        config.fps = fps;
    }

    Ok(config)
}

fn parse_resolution(value: &str) -> Result<(u32, u32)> {
    let Some((width, height)) = value.split_once('x') else {
        bail!("resolution must look like 1280x720, got {value}");
    };
    Ok((
        width.parse().context("invalid width")?,
        height.parse().context("invalid height")?,
    ))
}

#[cfg(target_os = "linux")]
fn open_session(config: &CameraConfig) -> Result<CaptureSession> {
    Ok(CaptureSession::open(config.device.clone())?)
}

/// Without V4L2 the demo runs against the mock engine, with a ticker
/// standing in for the device's frame clock.
#[cfg(not(target_os = "linux"))]
fn open_session(config: &CameraConfig) -> Result<CaptureSession> {
    use std::sync::Arc;
    use v4l2cam::MockEngine;

    warn!("V4L2 is only available on Linux; capturing from the mock engine");

    let engine = Arc::new(MockEngine::new());
    let ticker = Arc::clone(&engine);
    let interval = Duration::from_millis(1000 / u64::from(config.fps.max(1)));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            ticker.signal_ready();
        }
    });

    Ok(CaptureSession::with_engine(engine, config.device.clone())?)
}

fn print_catalogs(session: &CaptureSession) {
    println!("Device: {}", session.device());

    println!("\nControls:");
    let name_width = session
        .controls()
        .iter()
        .map(|ctrl| ctrl.name.len())
        .max()
        .unwrap_or(0);
    for ctrl in session.controls() {
        println!(
            "  {:name_width$}  {:8}  [{}, {}] step {} default {}",
            ctrl.name, ctrl.typ, ctrl.min, ctrl.max, ctrl.step, ctrl.default
        );
        for item in &ctrl.menu {
            match item {
                MenuItem::Label(label) => println!("  {:name_width$}    - {label}", ""),
                MenuItem::Value(value) => println!("  {:name_width$}    - {value}", ""),
            }
        }
    }

    println!("\nFormats:");
    for format in session.formats() {
        println!(
            "  {} {}x{} @ {} fps",
            format.fourcc,
            format.width,
            format.height,
            format.interval.fps()
        );
    }
}

fn write_ppm(path: &str, width: u32, height: u32, rgb: &[u8]) -> std::io::Result<()> {
    use std::io::Write as _;

    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    write!(writer, "P6\n{width} {height}\n255\n")?;
    writer.write_all(rgb)?;
    writer.flush()
}
