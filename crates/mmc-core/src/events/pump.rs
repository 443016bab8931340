use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::events::{
    message::Message,
    normalizer::{Disposition, Normalizer},
    types::{Frame, RawResponse},
};

/// Receivers handed to the consumer of the event API.
pub struct EventStreams {
    /// One message per delivered, non-discarded post event, in arrival order.
    pub messages: mpsc::Receiver<Message>,
    /// Ping replies, for liveness monitoring.
    pub pongs: mpsc::Receiver<RawResponse>,
    pub task: JoinHandle<()>,
}

/// Spawn the task that drains `frames` through the normalizer.
///
/// The task ends when the frame source closes or the message receiver is dropped.
pub fn spawn(
    normalizer: Arc<Normalizer>,
    frames: mpsc::Receiver<Frame>,
    buffer: usize,
) -> EventStreams {
    let (msg_tx, msg_rx) = mpsc::channel(buffer.max(1));
    let (pong_tx, pong_rx) = mpsc::channel(buffer.max(1));
    let task = tokio::spawn(run(normalizer, frames, msg_tx, pong_tx));
    EventStreams {
        messages: msg_rx,
        pongs: pong_rx,
        task,
    }
}

async fn run(
    normalizer: Arc<Normalizer>,
    mut frames: mpsc::Receiver<Frame>,
    messages: mpsc::Sender<Message>,
    pongs: mpsc::Sender<RawResponse>,
) {
    while let Some(frame) = frames.recv().await {
        match frame {
            Frame::Response(resp) if resp.is_pong() => {
                // liveness only; a consumer that does not read pongs must not stall events
                if pongs.try_send(resp).is_err() {
                    debug!("pong dropped, receiver full or closed");
                }
            }
            Frame::Response(resp) => {
                if let Some(err) = &resp.error {
                    warn!(seq_reply = resp.seq_reply, "server rejected action: {err}");
                } else {
                    debug!(seq_reply = resp.seq_reply, status = %resp.status, "action acknowledged");
                }
            }
            Frame::Event(raw) => {
                if let Disposition::Emit(msg) = normalizer.handle(raw).await {
                    if messages.send(*msg).await.is_err() {
                        debug!("message receiver dropped, stopping event pump");
                        return;
                    }
                }
            }
        }
    }
    debug!("frame source closed, stopping event pump");
}
