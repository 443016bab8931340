use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mmc_core::{config::Config, Client};
use mmc_http::{HttpApi, WsListener};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mmc_core::logging::init("mmc")?;

    let cfg = Arc::new(Config::load()?);

    let api = Arc::new(HttpApi::from_config(&cfg)?);
    api.login(&cfg.credentials)
        .await
        .with_context(|| format!("login to {} failed", cfg.server))?;
    let token = api
        .token()
        .await
        .context("no session token after login")?;

    let client = Client::bootstrap(cfg.clone(), api.clone(), api.clone()).await?;
    let team = match client.primary_team_id().await {
        Some(id) => client.team_name(&id).await,
        None => None,
    };
    tracing::info!(
        user = %client.me().username,
        team = team.as_deref().unwrap_or("-"),
        "connected"
    );

    let cancel = CancellationToken::new();
    let (frame_tx, frame_rx) = mpsc::channel(cfg.event_buffer.max(1));
    let listener = WsListener::from_config(&cfg, token);
    let socket = {
        let cancel = cancel.clone();
        tokio::spawn(async move { listener.run(frame_tx, cancel).await })
    };

    let mut streams = client.start(frame_rx);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                break;
            }
            msg = streams.messages.recv() => match msg {
                Some(m) => tracing::info!(
                    kind = ?m.kind,
                    channel = m.channel.as_deref().unwrap_or("?"),
                    team = m.team.as_deref().unwrap_or("-"),
                    from = %m.username,
                    "{}",
                    m.text
                ),
                None => break,
            },
            Some(pong) = streams.pongs.recv() => {
                tracing::debug!(seq = pong.seq_reply, "pong");
            }
        }
    }

    cancel.cancel();
    socket.await??;
    Ok(())
}
