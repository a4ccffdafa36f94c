//! Hand-off from the acquisition task to the presentation loop.
//!
//! The sender side never blocks, so a slow or stalled presenter cannot hold
//! up sampling. Commands are applied in the order they were enqueued.

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::alerts::AlertEvent;
use crate::models::Reading;

#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    UpdateDisplay(Reading),
    RefreshChart,
    RaiseAlert(AlertEvent),
    SourceUnavailable(String),
}

#[derive(Clone)]
pub struct UpdateSender {
    tx: mpsc::UnboundedSender<UiCommand>,
}

impl UpdateSender {
    /// Returns false once the receiving side has been dropped.
    pub fn enqueue(&self, command: UiCommand) -> bool {
        self.tx.send(command).is_ok()
    }
}

pub struct UpdateReceiver {
    rx: mpsc::UnboundedReceiver<UiCommand>,
}

impl UpdateReceiver {
    pub fn try_next(&mut self) -> Option<UiCommand> {
        match self.rx.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Waits for the next command. `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<UiCommand> {
        self.rx.recv().await
    }
}

pub fn update_channel() -> (UpdateSender, UpdateReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UpdateSender { tx }, UpdateReceiver { rx })
}
