//! Telerec - Main Entry Point
//!
//! Records teleoperated robot demonstrations: an operator moves a leader
//! arm, a follower mirrors it at a fixed tick rate while cameras capture,
//! and every episode is committed to a durable on-disk dataset.

use std::sync::Arc;
use telerec_rs::{
    clock::SystemClock,
    config::SessionConfig,
    session::{SessionRunner, StopHandle},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Initialize logging: console plus a daily-rolled file in the data dir
    let mut file_guard = None;
    let file_layer = telerec_rs::config::app_data_dir().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir.join("logs"), "telerec.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
    });
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,telerec_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    tracing::info!("Starting telerec");

    let config = SessionConfig::load_or_default()?;
    let (mut runner, stop) = SessionRunner::new(config, Arc::new(SystemClock::new()))?;

    spawn_stop_listener(stop);

    let outcome = runner.run()?;
    tracing::info!(
        "Recorded {} episode(s) ({} completed), {} samples",
        outcome.committed.len(),
        outcome.completed(),
        outcome.stats.samples_recorded
    );

    drop(file_guard);
    if let Some(fault) = outcome.fault {
        anyhow::bail!("session ended on a device fault: {fault}");
    }
    Ok(())
}

/// Stop the session from the terminal: the operator presses Enter and the
/// loop seals the current episode as aborted at the next tick boundary
fn spawn_stop_listener(stop: StopHandle) {
    std::thread::spawn(move || {
        tracing::info!("Press Enter to stop the session");
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_ok() {
            tracing::info!("Stop requested from terminal");
            stop.stop();
        }
    });
}
