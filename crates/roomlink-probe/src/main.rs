//! # roomlink-probe
//!
//! Opens only the signal channel against a real server, logs every state
//! change and decoded response, and exits once the channel reaches a terminal
//! state (or on Ctrl-C, after sending a leave).

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use roomlink_common::config;
use roomlink_common::protocol::SignalResponse;
use roomlink_common::telemetry::{self, LogFormat};
use roomlink_signal::{SignalClient, SignalFailure, SignalListener, SignalState, WsConnector};
use tokio::sync::mpsc;

#[derive(Debug, Parser)]
#[command(name = "roomlink-probe", version, about = "Probe a room server's signal channel")]
struct Cli {
    /// Server URL (`ws://` or `wss://`). Overrides `probe.server_url`.
    #[arg(long, env = "ROOMLINK_URL")]
    url: Option<String>,

    /// Access token. Overrides `probe.token`.
    #[arg(long, env = "ROOMLINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Config file name, extension optional.
    #[arg(long, default_value = "roomlink")]
    config: String,

    /// Emit JSON logs.
    #[arg(long)]
    json: bool,
}

enum Observed {
    State(SignalState),
    Response(SignalResponse),
}

struct ChannelListener(mpsc::UnboundedSender<Observed>);

impl SignalListener for ChannelListener {
    fn on_state_changed(&self, state: SignalState) {
        let _ = self.0.send(Observed::State(state));
    }

    fn on_response(&self, response: SignalResponse) {
        let _ = self.0.send(Observed::Response(response));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app = config::load_from(&cli.config).context("loading configuration")?;

    let format = if cli.json { LogFormat::Json } else { LogFormat::Pretty };
    telemetry::init("roomlink=debug,roomlink_signal=debug,roomlink_probe=debug", format)?;

    let url = cli.url.unwrap_or(app.probe.server_url);
    let token = cli.token.unwrap_or(app.probe.token);
    if url.is_empty() || token.is_empty() {
        bail!(
            "a server URL and token are required (--url/--token or probe.server_url/probe.token)"
        );
    }

    tracing::info!("Starting roomlink-probe v{}", env!("CARGO_PKG_VERSION"));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connector = WsConnector::new(app.signal);
    let client = SignalClient::connect(&connector, &url, &token, Arc::new(ChannelListener(tx)))
        .context("opening signal channel")?;

    let outcome = loop {
        tokio::select! {
            observed = rx.recv() => match observed {
                Some(Observed::State(state)) => {
                    tracing::info!(state = ?state, "Signal state changed");
                    if state.is_terminal() {
                        break state;
                    }
                }
                Some(Observed::Response(response)) => log_response(&response, client.rtt()),
                None => break SignalState::Disconnected,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, leaving");
                if let Err(e) = client.send_leave() {
                    tracing::warn!(error = %e, "Failed to send leave");
                }
                break SignalState::Disconnected;
            }
        }
    };

    drop(client);
    match outcome {
        SignalState::Failed(failure) => bail!("signal channel failed: {}", describe(failure)),
        _ => Ok(()),
    }
}

fn log_response(response: &SignalResponse, rtt_ms: i64) {
    match response {
        SignalResponse::Join(join) => tracing::info!(
            room = join.room.as_ref().map(|r| r.name.as_str()).unwrap_or(""),
            identity = %join.participant.identity,
            others = join.other_participants.len(),
            ice_servers = join.ice_servers.len(),
            subscriber_primary = join.subscriber_primary,
            ping_interval = join.ping_interval,
            "Joined"
        ),
        SignalResponse::Leave(leave) => tracing::info!(
            reason = ?leave.reason,
            can_reconnect = leave.can_reconnect,
            "Server asked us to leave"
        ),
        other => tracing::info!(response = other.name(), rtt_ms, "Signal response"),
    }
    tracing::debug!(?response, "Full response");
}

fn describe(failure: SignalFailure) -> &'static str {
    match failure {
        SignalFailure::Unreachable => "server unreachable",
        SignalFailure::PingTimeout => "ping timeout",
        SignalFailure::Internal => "server error",
        SignalFailure::BadToken => "bad token",
        SignalFailure::Unauthorized => "unauthorized",
        SignalFailure::ClientOther => "request rejected",
    }
}
