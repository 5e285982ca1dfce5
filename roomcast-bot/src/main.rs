//! roomcast-bot - Main entry point
//!
//! Wires the components together: the scheduler owns the queue and the
//! player, the session client owns the room connection, and this binary
//! owns the channels between them plus the ordered shutdown sequence.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roomcast_bot::commands::CommandRouter;
use roomcast_bot::player::PlayerController;
use roomcast_bot::resolver::ExtractorResolver;
use roomcast_bot::scheduler::{Scheduler, SchedulerCommand};
use roomcast_bot::session::{HttpRoomApi, SessionClient};
use roomcast_bot::shutdown::ShutdownHandle;
use roomcast_common::config::{self, BotConfig};

/// Command-line arguments for roomcast-bot
#[derive(Parser, Debug)]
#[command(name = "roomcast-bot")]
#[command(about = "Chat-room media broadcast bot")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "ROOMCAST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast_bot=debug,roomcast_common=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = config::load(args.config.as_deref()).context("Failed to load configuration")?;

    info!("Starting roomcast bot for room '{}'", config.room.room_name);

    let (shutdown, mut shutdown_rx) = ShutdownHandle::new();
    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(64);
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(64);
    let (scheduler_tx, scheduler_rx) = mpsc::channel::<SchedulerCommand>(64);
    let (session_stop_tx, session_stop_rx) = watch::channel(false);

    // Scheduler task: queue, votes, and the player subprocess
    let resolver = Arc::new(ExtractorResolver::new(config.resolver.clone()));
    let controller = PlayerController::new(config.player.clone());
    let scheduler = Scheduler::new(
        config.player.clone(),
        controller,
        resolver,
        outbound_tx.clone(),
        scheduler_tx.clone(),
        shutdown.clone(),
    );
    let scheduler_task = tokio::spawn(scheduler.run(scheduler_rx));

    // Session task: room polling, inbound/outbound messages
    let api = HttpRoomApi::new(config.room.clone()).context("Failed to build HTTP client")?;
    let session = SessionClient::new(api, config.room.clone(), inbound_tx, shutdown.clone());
    let session_task = tokio::spawn(session.run(outbound_rx, session_stop_rx));

    // Dispatch task: inbound lines to scheduler commands
    let router = CommandRouter::new(scheduler_tx.clone(), config.bot.elevated_senders.clone());
    let dispatch_task = tokio::spawn(dispatch_inbound(
        inbound_rx,
        router,
        scheduler_tx.clone(),
        config.bot.clone(),
    ));

    // Wait for a fatal condition or a signal
    tokio::select! {
        reason = shutdown_rx.recv() => {
            warn!(
                "shutting down: {}",
                reason.unwrap_or_else(|| "shutdown channel closed".to_string())
            );
        }
        _ = shutdown_signal() => {
            shutdown.fire("signal received");
        }
    }

    // Ordered teardown: stop the player (via the scheduler) before the
    // control socket goes away, then stop the session client.
    let _ = scheduler_tx.send(SchedulerCommand::Shutdown).await;
    let _ = scheduler_task.await;

    if config.player.control_socket.exists() {
        let _ = std::fs::remove_file(&config.player.control_socket);
    }

    let _ = session_stop_tx.send(true);
    let _ = session_task.await;
    dispatch_task.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Forward inbound room lines to the command layer: watch for the stream-id
/// marker until it arrives, then extract `sender: !word args` commands.
async fn dispatch_inbound(
    mut inbound: mpsc::Receiver<String>,
    router: CommandRouter,
    scheduler: mpsc::Sender<SchedulerCommand>,
    bot: BotConfig,
) {
    let marker = bot.stream_id_marker.to_ascii_lowercase();
    let mut stream_known = false;

    while let Some(line) = inbound.recv().await {
        if !stream_known {
            if let Some(index) = line.to_ascii_lowercase().find(&marker) {
                let id = line[index + marker.len()..]
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_string();
                if !id.is_empty() {
                    stream_known = true;
                    let _ = scheduler.send(SchedulerCommand::StreamReady(id)).await;
                    continue;
                }
            }
        }

        let Some((sender, text)) = line.split_once(':') else {
            continue;
        };
        let Some(rest) = text.trim_start().strip_prefix(&bot.command_prefix) else {
            continue;
        };
        let mut parts = rest.splitn(2, char::is_whitespace);
        let Some(word) = parts.next().filter(|word| !word.is_empty()) else {
            continue;
        };
        let arguments = parts.next().map(str::trim).filter(|a| !a.is_empty());
        router.dispatch(sender, word, arguments).await;
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
