//! The bounded queue of events heading to one connection.
//!
//! Matches never wait on a socket: an event that does not fit into a full queue marks the
//! connection as lagging, and its send task then drops the connection instead of buffering
//! without limit.

use protocol::ServerEvent;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, error::TrySendError};

/// How many events may wait for one connection before it counts as lagging.
pub const OUTBOUND_BUFFER_SIZE: usize = 256;

/// Why a connection receives no further events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// Every sender is gone.
    Closed,
    /// An event was dropped because the queue was full.
    Lagged,
}

/// The sending half, cloned into every match the connection attaches to.
#[derive(Debug, Clone)]
pub struct Outbound {
    events: mpsc::Sender<ServerEvent>,
    lagged: Arc<Notify>,
}

pub struct OutboundReceiver {
    events: mpsc::Receiver<ServerEvent>,
    lagged: Arc<Notify>,
}

impl Outbound {
    pub fn channel(capacity: usize) -> (Outbound, OutboundReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        let lagged = Arc::new(Notify::new());
        (
            Outbound {
                events: sender,
                lagged: Arc::clone(&lagged),
            },
            OutboundReceiver {
                events: receiver,
                lagged,
            },
        )
    }

    /// Queues `event` without waiting. Returns false if it was not queued.
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.lagged.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

impl OutboundReceiver {
    /// The next event in order. A lagging connection gets `Lagged` before anything else.
    pub async fn recv(&mut self) -> Result<ServerEvent, RecvError> {
        tokio::select! {
            biased;
            _ = self.lagged.notified() => Err(RecvError::Lagged),
            event = self.events.recv() => event.ok_or(RecvError::Closed),
        }
    }

    /// The next event if one is queued already.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.events.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (outbound, mut receiver) = Outbound::channel(4);
        assert!(outbound.send(ServerEvent::Begin {}));
        assert!(outbound.send(ServerEvent::Left {}));
        assert_eq!(receiver.recv().await, Ok(ServerEvent::Begin {}));
        assert_eq!(receiver.recv().await, Ok(ServerEvent::Left {}));
    }

    #[tokio::test]
    async fn full_queue_marks_the_connection_as_lagging() {
        let (outbound, mut receiver) = Outbound::channel(2);
        assert!(outbound.send(ServerEvent::Begin {}));
        assert!(outbound.send(ServerEvent::Begin {}));
        assert!(!outbound.send(ServerEvent::Left {}));
        assert_eq!(receiver.recv().await, Err(RecvError::Lagged));
    }

    #[tokio::test]
    async fn dropped_senders_close_the_queue() {
        let (outbound, mut receiver) = Outbound::channel(2);
        drop(outbound);
        assert_eq!(receiver.recv().await, Err(RecvError::Closed));
    }

    #[test]
    fn sending_to_a_gone_receiver_fails() {
        let (outbound, receiver) = Outbound::channel(2);
        drop(receiver);
        assert!(!outbound.send(ServerEvent::Left {}));
    }
}
