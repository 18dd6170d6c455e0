//! Single-slot "latest value wins" channel.
//!
//! Used for the camera → worker and worker → display hand-offs. A send never
//! blocks: if the slot is occupied, the stale value is dropped and replaced.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

/// Create a connected sender/receiver pair.
pub fn slot<T>() -> (SlotSender<T>, SlotReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (
        SlotSender {
            tx,
            drain: rx.clone(),
        },
        SlotReceiver { rx },
    )
}

/// Writing half of a slot.
pub struct SlotSender<T> {
    tx: Sender<T>,
    drain: Receiver<T>,
}

impl<T> SlotSender<T> {
    /// Store `value`, replacing whatever has not been taken yet.
    pub fn send(&self, mut value: T) {
        loop {
            match self.tx.try_send(value) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    let _ = self.drain.try_recv();
                    value = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

impl<T> Clone for SlotSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            drain: self.drain.clone(),
        }
    }
}

/// Reading half of a slot.
pub struct SlotReceiver<T> {
    rx: Receiver<T>,
}

impl<T> SlotReceiver<T> {
    /// Take the pending value without waiting.
    pub fn try_take(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for a value.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Some(value),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}
