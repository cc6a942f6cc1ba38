//! detect_leaves - run the leaf detector outside the video service
//!
//! With an image path: detect once and print the candidates as JSON.
//! Without one: poll the frame source and print a JSON line each time the
//! standalone detection interval (2 s by default) elapses.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use leafguard::{open_source, LeafDetectionService, LeafguardConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect leaf regions in an image or frame source")]
struct Args {
    /// Image to analyse. When omitted, the frame source is polled.
    image: Option<PathBuf>,

    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "LEAFGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source URL; overrides the configured source.
    #[arg(long)]
    source: Option<String>,

    /// Stop after this many detection passes (polling mode).
    #[arg(long)]
    passes: Option<u64>,

    /// Force the colour/contour fallback even when a model is configured.
    #[arg(long)]
    fallback: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = LeafguardConfig::load_from(args.config.as_deref())?;
    let detector = if args.fallback {
        LeafDetectionService::fallback_only()
    } else {
        LeafDetectionService::initialize(&cfg.detector)
    };
    let mut detector = detector.with_interval(cfg.schedule.service_interval);

    if let Some(path) = args.image.as_ref() {
        let image = image::open(path)
            .with_context(|| format!("open image {}", path.display()))?
            .into_rgb8();
        let leaves = detector.detect_leaves(&image);
        let report = json!({
            "image": path.display().to_string(),
            "width": image.width(),
            "height": image.height(),
            "detector": detector.active_name(),
            "variant": detector.active(),
            "leaves": leaves,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let url = args.source.unwrap_or_else(|| cfg.source.url.clone());
    let mut source = open_source(&url)?;
    source.open()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = shutdown.clone();
    ctrlc::set_handler(move || shutdown_handler.store(true, Ordering::SeqCst))
        .context("set Ctrl-C handler")?;

    let interval = cfg.source.frame_interval();
    let mut passes = 0u64;
    log::info!(
        "polling {} every {:?}, detecting every {:?}",
        source.describe(),
        interval,
        cfg.schedule.service_interval
    );
    while !shutdown.load(Ordering::SeqCst) {
        let started = Instant::now();
        match source.read() {
            Ok(Some(frame)) if detector.should_detect(started) => {
                let leaves = detector.detect_leaves(frame.image());
                println!(
                    "{}",
                    json!({ "frame": frame.seq(), "detector": detector.active_name(), "leaves": leaves })
                );
                passes += 1;
                if args.passes.is_some_and(|limit| passes >= limit) {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("frame read failed: {:#}", e),
        }
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest.max(Duration::from_millis(1)));
        }
    }
    source.close();
    Ok(())
}
