//! Push events and their handler table.
//!
//! The reader task decodes indications into [`Event`]s and queues them on a
//! bounded channel. A dispatch task drains the channel in arrival order and
//! invokes the handler registered for each event's [`EventKind`]. Events
//! without a handler are dropped.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::types::{
    DataSent, DiagnosticConfig, Endpoint, ReceivedData, RemoteStatus, ScanNeighborsDone,
    StackStatus,
};

/// An unsolicited event pushed by the node.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// App config data changed in the network.
    AppConfigChanged(DiagnosticConfig),
    /// Application data received on an endpoint.
    DataReceived(ReceivedData),
    /// Neighbor scan finished.
    ScanNeighborsDone(ScanNeighborsDone),
    /// Remote scratchpad status report.
    RemoteStatus(RemoteStatus),
    /// Stack status changed.
    StackStatusChanged(StackStatus),
    /// Transmission report for a packet sent with a report request.
    DataSent(DataSent),
}

impl Event {
    /// Returns the handler slot this event is routed to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::AppConfigChanged(_) => EventKind::AppConfigChanged,
            Self::DataReceived(data) => EventKind::DataReceived(data.destination_endpoint),
            Self::ScanNeighborsDone(_) => EventKind::ScanNeighborsDone,
            Self::RemoteStatus(_) => EventKind::RemoteStatus,
            Self::StackStatusChanged(_) => EventKind::StackStatusChanged,
            Self::DataSent(_) => EventKind::DataSent,
        }
    }
}

/// Handler slot key. Data events have one slot per destination endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AppConfigChanged,
    DataReceived(Endpoint),
    ScanNeighborsDone,
    RemoteStatus,
    StackStatusChanged,
    DataSent,
}

/// A registered event handler.
pub type Handler = Arc<dyn Fn(Event) + Send + Sync>;

/// Table of at most one handler per [`EventKind`].
#[derive(Default)]
pub struct EventTable {
    handlers: Mutex<HashMap<EventKind, Handler>>,
}

impl EventTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` for `kind`, replacing any previous handler.
    ///
    /// Every event dispatched after this returns sees the new handler.
    pub fn register(&self, kind: EventKind, handler: Handler) {
        if self.lock().insert(kind, handler).is_some() {
            tracing::debug!(?kind, "replaced event handler");
        }
    }

    /// Removes the handler for `kind`. Returns true if one was installed.
    pub fn unregister(&self, kind: EventKind) -> bool {
        self.lock().remove(&kind).is_some()
    }

    /// Removes every handler.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Invokes the handler for the event's kind.
    ///
    /// The table lock is released before the handler runs, so handlers may
    /// register or unregister handlers themselves. A panicking handler is
    /// logged and does not affect later dispatches.
    ///
    /// Returns true if a handler was invoked.
    pub fn dispatch(&self, event: Event) -> bool {
        let kind = event.kind();
        let Some(handler) = self.lock().get(&kind).cloned() else {
            tracing::trace!(?kind, "no handler, event dropped");
            return false;
        };

        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            tracing::warn!(?kind, %message, "event handler panicked");
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventKind, Handler>> {
        // Handlers never run under the lock, so poisoning cannot leave the map
        // half-updated.
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<EventKind> = self.lock().keys().copied().collect();
        f.debug_struct("EventTable").field("kinds", &kinds).finish()
    }
}

/// Drains queued events into the table until the queue closes.
pub(crate) async fn run_dispatch(table: Arc<EventTable>, mut events: mpsc::Receiver<Event>) {
    while let Some(event) = events.recv().await {
        table.dispatch(event);
    }
    tracing::debug!("event dispatch stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::types::{NodeAddress, Qos};

    fn data_event(endpoint: u8) -> Event {
        Event::DataReceived(ReceivedData {
            payload: Bytes::from_static(b"x"),
            source: NodeAddress(1),
            destination: NodeAddress(2),
            source_endpoint: Endpoint(1),
            destination_endpoint: Endpoint(endpoint),
            qos: Qos::Normal,
            travel_time_ms: 0,
            hop_count: 0,
            received_at_ms: 0,
        })
    }

    fn counter(count: &Arc<AtomicUsize>) -> Handler {
        let count = Arc::clone(count);
        Arc::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispatch_routes_by_endpoint() {
        let table = EventTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        table.register(EventKind::DataReceived(Endpoint(7)), counter(&hits));

        assert!(table.dispatch(data_event(7)));
        assert!(!table.dispatch(data_event(8)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_replaces_previous() {
        let table = EventTable::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        table.register(EventKind::StackStatusChanged, counter(&first));
        table.register(EventKind::StackStatusChanged, counter(&second));
        table.dispatch(Event::StackStatusChanged(StackStatus(0)));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister() {
        let table = EventTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        table.register(EventKind::ScanNeighborsDone, counter(&hits));

        assert!(table.unregister(EventKind::ScanNeighborsDone));
        assert!(!table.unregister(EventKind::ScanNeighborsDone));
        assert!(!table.dispatch(Event::ScanNeighborsDone(ScanNeighborsDone { ready: true })));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    fn panicking(_: Event) {
        panic!("handler failure");
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let table = EventTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        table.register(
            EventKind::DataReceived(Endpoint(1)),
            Arc::new(panicking),
        );
        table.register(EventKind::DataReceived(Endpoint(2)), counter(&hits));

        assert!(table.dispatch(data_event(1)));
        assert!(table.dispatch(data_event(2)));
        assert!(table.dispatch(data_event(1)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_touch_table() {
        let table = Arc::new(EventTable::new());
        let inner = Arc::clone(&table);
        table.register(
            EventKind::RemoteStatus,
            Arc::new(move |_| {
                inner.unregister(EventKind::RemoteStatus);
            }),
        );

        let event = Event::RemoteStatus(RemoteStatus {
            source: NodeAddress(3),
            status: crate::types::ScratchpadStatus::default(),
            update_timeout_s: 0,
        });
        assert!(table.dispatch(event.clone()));
        assert!(!table.dispatch(event));
    }

    #[tokio::test]
    async fn test_dispatch_task_preserves_order() {
        let table = Arc::new(EventTable::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        table.register(
            EventKind::StackStatusChanged,
            Arc::new(move |event: Event| {
                if let Event::StackStatusChanged(status) = event {
                    sink.lock().unwrap().push(status.bits());
                }
            }),
        );

        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(run_dispatch(Arc::clone(&table), rx));
        for bits in 0..10u8 {
            tx.send(Event::StackStatusChanged(StackStatus(bits)))
                .await
                .unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<u8>>());
    }
}
