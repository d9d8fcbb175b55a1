//! The multi-producer, single-consumer input event queue.
//!
//! Upstream threads enqueue; the reactor thread is the sole consumer. This
//! is the only mutable surface upstream touches directly, everything else
//! about a connection's state is reached only through emitted events.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use crate::events::InputEvent;

#[derive(Clone)]
pub struct EventQueueSender {
    sender: Sender<InputEvent>,
}

impl EventQueueSender {
    pub fn enqueue(&self, event: InputEvent) {
        // The receiver only disappears once the reactor thread has shut
        // down and dropped it, at which point there is nothing useful left
        // to do with the event.
        let _ = self.sender.send(event);
    }
}

pub struct EventQueueReceiver {
    receiver: Receiver<InputEvent>,
}

impl EventQueueReceiver {
    /// Pops the next queued event without blocking, `None` once the queue
    /// is drained.
    pub fn try_dequeue(&self) -> Option<InputEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

pub fn event_queue() -> (EventQueueSender, EventQueueReceiver) {
    let (sender, receiver) = unbounded();
    (EventQueueSender { sender }, EventQueueReceiver { receiver })
}
