//! Application entry point for the `firenav-client` runtime.
//!
//! This binary orchestrates the full startup sequence of the client core:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the shared WebSocket channel and registering the push token
//! - Mounting one floor screen per configured floor on that channel
//! - Following the server's floor to pick the screen to show
//! - Replaying beacon advertisements from stdin into a scan session
//!
//! # Environment Variables
//! - `FIRENAV_WS_URL` (optional) – shared channel URL (see `config`)
//! - `FIRENAV_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `FIRENAV_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating transport to `bus`, beacon sensing to `ble`, floor state to
//! `store` and configuration parsing to `config`.
use std::{
    env,
    io::IsTerminal,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Result;
use dotenvy::dotenv;
use tokio::io::BufReader;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use firenav_client::ble::{FloorTracker, LineScanner, ScanError, ScanSession};
use firenav_client::bus::Bus;
use firenav_client::config;
use firenav_client::map::{Calibration, FloorLayout};
use firenav_client::models::{FloorKey, Inbound, PlanarPoint};
use firenav_client::store::{AlertSurface, Effect, FloorScreen};

// ---

/// Route graph of the 4th floor, in planar metres.
const F4_NODES: &[[f64; 2]] = &[
    [-6.0, -3.0],
    [-2.0, 1.0],
    [-2.0, 5.0],
    [-2.0, 9.0],
    [2.0, 1.0],
    [6.0, 1.0],
    [10.0, 1.0],
    [14.0, 1.0],
    [18.0, 1.0],
];

/// Calibration of the 4th floor plan image.
const F4_CALIBRATION: Calibration = Calibration {
    x0: -32.0,
    x1: 52.5,
    y0: -38.0,
    y1: 39.0,
};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let bus = Bus::new(cfg.shared_bus()).ensure_connected();
    if let Some(token) = cfg.push_token.as_deref() {
        bus.register_push_token(token);
    }

    let surface: Arc<dyn AlertSurface> = Arc::new(LogSurface);
    let screens: Vec<FloorScreen> = cfg
        .floors
        .iter()
        .map(|&floor| FloorScreen::mount(&bus, layout_for(floor), cfg.fire_cooldown, Arc::clone(&surface)))
        .collect();

    // Follow whichever floor the server is talking about.
    let router = Mutex::new(FloorTracker::new(1).on_change(|floor| {
        tracing::info!(floor = %floor, "navigate to floor screen");
    }));
    let _routing = bus.subscribe(move |envelope| {
        let Some(floor) = envelope.message().and_then(Inbound::floor) else {
            return;
        };
        router.lock().unwrap_or_else(PoisonError::into_inner).observe(floor);
    });

    let scanner = LineScanner::new(BufReader::new(tokio::io::stdin()));
    let session = match ScanSession::start(cfg.scan(), scanner, |floor| {
        tracing::info!(floor = %floor, "device floor inferred from beacons");
    }) {
        Ok(session) => Some(session),
        Err(ScanError::PermissionDenied) => {
            tracing::warn!("Beacon scan permission denied, scanning disabled");
            None
        }
        Err(e) => {
            tracing::warn!("Beacon scan unavailable, scanning disabled: {}", e);
            None
        }
    };

    tracing::info!("Client running with {} floor screen(s), press Ctrl-C to exit", screens.len());
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    if let Some(session) = session {
        session.stop();
    }
    for screen in screens {
        screen.unmount();
    }
    bus.close();

    Ok(())
}

// ---

/// Map data for a floor. Floors without a surveyed route graph get an empty
/// node set on the building-wide calibration.
fn layout_for(floor: FloorKey) -> FloorLayout {
    // ---
    let manifest = match floor {
        FloorKey::F4 => PlanarPoint::from_pairs(F4_NODES),
        _ => Vec::new(),
    };
    FloorLayout {
        floor,
        manifest,
        calibration: F4_CALIBRATION,
        image_size: None,
    }
}

/// Surface that reports alert effects through the log.
struct LogSurface;

impl AlertSurface for LogSurface {
    fn perform(&self, effect: &Effect) {
        // ---
        match effect {
            Effect::Haptic { millis } => tracing::info!("Vibrate for {} ms", millis),
            Effect::ShowGuidance(alert) => tracing::warn!(
                floor = %alert.floor,
                confidence = alert.confidence,
                ts = alert.ts.as_deref().unwrap_or("-"),
                "Showing evacuation guidance"
            ),
            Effect::Notify { title, body } => tracing::warn!("{}: {}", title, body),
        }
    }
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `FIRENAV_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `FIRENAV_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("FIRENAV_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // RUST_LOG wins over FIRENAV_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("FIRENAV_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},tungstenite=warn,tokio_tungstenite=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
