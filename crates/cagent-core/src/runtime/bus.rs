//! The per-run event channel.
//!
//! Bounded FIFO, single producer (the active agent loop on behalf of its
//! session), single consumer. A full buffer blocks the producer; events are
//! never dropped, since event loss would corrupt the observed session order.
//! Dropping the bus closes the channel, which is the run-over signal.

use tokio::sync::mpsc;

use super::events::Event;

/// Buffer capacity. Enough headroom that bursty content deltas rarely
/// stall the loop under a slow renderer.
pub const EVENT_BUFFER: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<Event>,
}

impl EventBus {
    pub fn channel() -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        (Self { tx }, rx)
    }

    /// Send one event, blocking on backpressure. Returns false when the
    /// consumer is gone; producers treat that as a cancelled run.
    pub async fn publish(&self, event: Event) -> bool {
        self.tx.send(event).await.is_ok()
    }
}
