//! Hand-off of composed frames to the host display.

use std::time::Duration;

use crate::render::ComposedFrame;
use crate::slot::{slot, SlotReceiver, SlotSender};

/// Receives composed frames from the render loop.
///
/// Called on the worker thread once per composed frame.
pub trait DisplaySink: Send + Sync {
    fn publish(&self, frame: ComposedFrame);
}

/// Create a connected publisher/receiver pair.
///
/// Only the latest frame is kept; a display that falls behind skips frames.
pub fn frame_slot() -> (FramePublisher, FrameReceiver) {
    let (sender, receiver) = slot();
    (FramePublisher { sender }, FrameReceiver { receiver })
}

/// Worker-side end of the frame slot.
#[derive(Clone)]
pub struct FramePublisher {
    sender: SlotSender<ComposedFrame>,
}

impl DisplaySink for FramePublisher {
    fn publish(&self, frame: ComposedFrame) {
        self.sender.send(frame);
    }
}

/// Display-side end of the frame slot.
pub struct FrameReceiver {
    receiver: SlotReceiver<ComposedFrame>,
}

impl FrameReceiver {
    /// Latest frame, if one arrived since the last take.
    pub fn try_take(&self) -> Option<ComposedFrame> {
        self.receiver.try_take()
    }

    /// Wait up to `timeout` for the next frame.
    pub fn take_timeout(&self, timeout: Duration) -> Option<ComposedFrame> {
        self.receiver.take_timeout(timeout)
    }
}
