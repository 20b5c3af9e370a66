//! doorbotd - Doorbot capture daemon
//!
//! This daemon:
//! 1. Opens the configured camera and runs its acquisition thread
//! 2. Runs the detector on the newest frame at the dispatch rate
//! 3. Notifies on movement (log, optionally MQTT with snapshots)
//! 4. Captures and archives movement per `[[capture]]` channel
//! 5. Serves live views (MJPEG reserver, framebuffer) when configured

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use doorbot::{
    ingest::open_device,
    notify::{LoggerNotifier, MqttNotifier},
    observe::{FramebufferObserver, Reserver},
    ArchiveWriter, CaptureChannel, CaptureSession, DetectorRegistry, Dispatcher, DoorbotConfig,
    FrameBus, Source,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Motion-triggered capture and archival daemon")]
struct Args {
    /// TOML configuration file.
    #[arg(long, short, env = "DOORBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, short, conflicts_with = "quiet")]
    verbose: bool,

    /// Log errors only.
    #[arg(long, short)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let cfg = DoorbotConfig::load_from(args.config.as_deref())?;
    log::info!(
        "doorbotd {} starting: source {} ({})",
        env!("CARGO_PKG_VERSION"),
        cfg.source.name,
        cfg.device.url
    );

    let bus = FrameBus::new();
    let device = open_device(&cfg.device)?;
    let detector = DetectorRegistry::with_builtin().create(&cfg.detector, &cfg.detector_settings)?;

    let mut dispatcher = Dispatcher::new(cfg.dispatch.clone(), bus.subscribe(), detector);
    dispatcher.add_notifier(Box::new(LoggerNotifier));
    if let Some(mqtt) = &cfg.mqtt {
        let notifier = MqttNotifier::new(mqtt).context("start mqtt client")?;
        dispatcher.add_notifier(Box::new(notifier));
    }
    for capture in &cfg.captures {
        let writer = ArchiveWriter::new(&capture.name, capture.archive.clone())
            .with_context(|| format!("capture '{}'", capture.name))?
            .with_metrics(dispatcher.metrics());
        let session = CaptureSession::new(&capture.name, capture.session.clone());
        dispatcher.add_channel(CaptureChannel::new(session, writer));
    }

    let mut observers = Vec::new();
    if let Some(reserver) = cfg.reserver.clone() {
        observers.push(Reserver::new(reserver).spawn(dispatcher.observers())?);
    }
    if let Some(framebuffer) = cfg.framebuffer.clone() {
        observers.push(
            FramebufferObserver::new(framebuffer)
                .spawn(dispatcher.observers())
                .context("start framebuffer observer")?,
        );
    }

    let running = dispatcher.running_flag();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, finishing open captures...");
        running.store(false, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    let mut source = Source::new(cfg.source.clone(), device, bus)
        .spawn()
        .context("start source thread")?;
    let result = dispatcher.run(&mut source);

    for observer in observers {
        observer.stop();
    }
    if let Err(err) = source.stop() {
        log::debug!("source stopped: {err}");
    }
    result?;
    log::info!("doorbotd stopped");
    Ok(())
}
