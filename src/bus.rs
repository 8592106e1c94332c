use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::warn;

use crate::message::Message;

/// In-process message bus between network listeners and the forwarder.
///
/// Frames travel encoded, exactly as they would over an external broker, so
/// listeners and the forwarder only share the wire format.
pub struct MessageBus;

impl MessageBus {
    pub fn new(capacity: usize) -> (BusPublisher, BusReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (BusPublisher { tx }, BusReceiver { rx })
    }
}

/// Producer handle, one clone per listener task
#[derive(Clone)]
pub struct BusPublisher {
    tx: mpsc::Sender<String>,
}

impl BusPublisher {
    /// Waits while the bus is full
    pub async fn publish(&self, msg: &Message) -> Result<()> {
        let frame = msg.dumps()?;
        self.tx
            .send(frame)
            .await
            .ok()
            .context("Message bus is closed")
    }
}

/// Single consumer end, owned by the forwarder
pub struct BusReceiver {
    rx: mpsc::Receiver<String>,
}

impl BusReceiver {
    /// Next decodable message. Undecodable frames are skipped. `None` once
    /// every publisher has been dropped.
    pub async fn next(&mut self) -> Option<Message> {
        while let Some(frame) = self.rx.recv().await {
            match Message::loads(&frame) {
                Ok(msg) => return Some(msg),
                Err(e) => warn!("Dropping malformed bus frame: {:#}", e),
            }
        }
        None
    }
}
