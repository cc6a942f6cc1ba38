//! leafguardd - leaf disease sprayer daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by LEAFGUARD_CONFIG, then env overrides)
//! 2. Brings up the leaf detector (trained model, else colour/contour fallback)
//! 3. Opens the detection store, classifier client and sprayer
//! 4. Starts the configured frame source and runs the frame loop on a thread
//! 5. Reads one JSON command per line on stdin and answers on stdout
//!
//! Example commands:
//!   {"command": "toggle_mode"}
//!   {"command": "click", "x": 320, "y": 240}
//!   {"command": "classify_region", "region_index": 0}
//!   {"command": "automatic_detections"}

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use leafguard::{
    sprayer_from_settings, Command, DetectionPipeline, DetectionStore, HttpClassifier,
    LeafDetectionService, LeafguardConfig, SqliteDetectionStore, VideoService,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Leaf disease detection and spraying daemon")]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "LEAFGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source URL; overrides the configured source.
    #[arg(long)]
    source: Option<String>,

    /// Start in automatic mode instead of manual.
    #[arg(long)]
    automatic: bool,

    /// Do not read commands from stdin.
    #[arg(long)]
    no_stdin: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = LeafguardConfig::load_from(args.config.as_deref())?;

    let detector = LeafDetectionService::initialize(&cfg.detector);
    let store: Arc<Mutex<dyn DetectionStore>> =
        Arc::new(Mutex::new(SqliteDetectionStore::open(&cfg.db_path)?));
    let sprayer = Arc::new(Mutex::new(sprayer_from_settings(&cfg.sprayer)));
    let classifier = Arc::new(HttpClassifier::from_settings(&cfg.classifier));
    log::info!(
        "classifier endpoint {} (timeout {:?})",
        classifier.url(),
        cfg.classifier.timeout
    );
    let pipeline = DetectionPipeline::from_config(&cfg, classifier, store, sprayer);
    let service = Arc::new(VideoService::from_config(&cfg, detector, pipeline)?);

    let source_url = args.source.clone().unwrap_or_else(|| cfg.source.url.clone());
    if !service.start_url(&source_url) {
        log::warn!("no active capture session; send start_session to retry");
    }
    if args.automatic {
        service.toggle_mode();
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let frame_loop = {
        let service = service.clone();
        let shutdown = shutdown.clone();
        let interval = cfg.source.frame_interval();
        std::thread::Builder::new()
            .name("leafguard-frames".to_string())
            .spawn(move || service.run_frame_loop(&shutdown, interval))
            .context("spawn frame loop")?
    };

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("set Ctrl-C handler")?;

    if !args.no_stdin {
        let service = service.clone();
        std::thread::Builder::new()
            .name("leafguard-commands".to_string())
            .spawn(move || serve_stdin(&service))
            .context("spawn command reader")?;
    }

    log::info!(
        "leafguardd running: db={} mode={} (Ctrl-C to stop)",
        cfg.db_path,
        service.mode()
    );
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    shutdown.store(true, Ordering::SeqCst);
    if frame_loop.join().is_err() {
        log::error!("frame loop panicked");
    }
    service.stop();
    Ok(())
}

fn serve_stdin(service: &VideoService) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::warn!("stdin closed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match Command::parse(&line).and_then(|cmd| service.execute(cmd)) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("command rejected: {}", e);
                e.to_payload()
            }
        };
        let mut stdout = std::io::stdout().lock();
        if writeln!(stdout, "{}", response).and_then(|_| stdout.flush()).is_err() {
            break;
        }
    }
    log::info!("command input closed; daemon keeps running until Ctrl-C");
}
