//! Hall Headless Client
//!
//! Connects to a relay and runs the fixed-rate presentation loop without a
//! window: drains the session queue, answers state requests and integrates
//! every peer. With `HALL_CLIENT_WALK` set, the local player walks in a circle.
//! Ctrl-C stops the loop and shuts the session down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hall_relay::{ClientConfig, Intent, LocalWorld, NetworkSession, SessionHandle, VERSION};

/// Seconds between peer summaries.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Hall Client v{}", VERSION);

    let config = ClientConfig::from_env();
    let walk = std::env::var_os("HALL_CLIENT_WALK").is_some();
    let frame = Duration::from_secs_f64(1.0 / f64::from(config.frame_rate));

    let stop = watch_ctrl_c().context("installing Ctrl-C handler")?;
    let session = NetworkSession::connect(&config).context("starting network session")?;

    info!("Connecting to server...");
    let own_id = loop {
        if let Some(id) = session.own_id() {
            break id;
        }
        if stop.load(Ordering::SeqCst) {
            session.shutdown();
            info!("Interrupted before connecting");
            return Ok(());
        }
        if session.is_disconnected() {
            bail!("could not connect to {}", config.server_addr());
        }
        thread::sleep(frame);
    };

    let mut world = LocalWorld::new(own_id);
    if walk {
        send_intent(&session, &mut world, Intent::WalkForward, true);
        send_intent(&session, &mut world, Intent::TurnRight, true);
    }

    run_loop(&session, &mut world, frame, &stop);

    session.shutdown();
    info!("Disconnected");
    Ok(())
}

/// Flag raised once Ctrl-C is received. The wait runs on its own thread with
/// a single-threaded runtime, since the presentation loop is synchronous.
fn watch_ctrl_c() -> anyhow::Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let flag = stop.clone();
    thread::Builder::new()
        .name("hall-signal".to_string())
        .spawn(move || match rt.block_on(tokio::signal::ctrl_c()) {
            Ok(()) => {
                info!("Shutting down");
                flag.store(true, Ordering::SeqCst);
            }
            Err(e) => warn!("Ctrl-C handler failed: {}", e),
        })?;

    Ok(stop)
}

/// Fixed-rate loop. Returns when the session ends or `stop` is raised.
fn run_loop(session: &SessionHandle, world: &mut LocalWorld, frame: Duration, stop: &AtomicBool) {
    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();

    while !session.is_disconnected() && !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        let dt = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        if let Err(e) = world.drain(session) {
            warn!("Reply failed: {}", e);
            break;
        }
        world.update(dt);

        if last_report.elapsed() >= REPORT_INTERVAL {
            last_report = Instant::now();
            let [x, _, z] = world.player().position;
            info!("{} peers, at ({:.2}, {:.2})", world.peer_count(), x, z);
            for (id, peer) in world.peers() {
                info!("  {} at ({:.2}, {:.2})", id.short(), peer.position[0], peer.position[2]);
            }
        }

        if let Some(rest) = frame.checked_sub(now.elapsed()) {
            thread::sleep(rest);
        }
    }
}

fn send_intent(session: &SessionHandle, world: &mut LocalWorld, intent: Intent, pressed: bool) {
    if let Some(msg) = world.set_intent(intent, pressed) {
        if let Err(e) = session.send(&msg) {
            warn!("Failed to send {:?}: {}", msg.kind(), e);
        }
    }
}
