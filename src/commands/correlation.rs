//! Frame id allocation and confirm matching.
//!
//! Each outstanding request owns one frame id until its confirm arrives.
//! When a caller gives up (timeout), its id is quarantined instead of
//! freed, so a late confirm is recognized and discarded rather than handed
//! to the next request that reuses the id.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::protocol::parser::Confirm;
use crate::protocol::primitive::Primitive;

/// How long an abandoned or internal id stays reserved.
pub const QUARANTINE: Duration = Duration::from_secs(30);

/// Receiver side of a pending request.
pub type ConfirmReceiver = oneshot::Receiver<Result<Confirm>>;

#[derive(Debug)]
enum Slot {
    /// A caller is waiting for the confirm.
    Waiting {
        primitive: Primitive,
        reply: oneshot::Sender<Result<Confirm>>,
    },
    /// Request issued by the reader itself (indication poll).
    Internal { primitive: Primitive, since: Instant },
    /// The caller gave up; the confirm will be discarded.
    Abandoned { primitive: Primitive, since: Instant },
}

impl Slot {
    const fn primitive(&self) -> Primitive {
        match self {
            Self::Waiting { primitive, .. }
            | Self::Internal { primitive, .. }
            | Self::Abandoned { primitive, .. } => *primitive,
        }
    }
}

/// Outcome of matching a confirm.
#[derive(Debug)]
pub enum Matched {
    /// A caller is waiting; send it the confirm.
    Waiting(oneshot::Sender<Result<Confirm>>),
    /// Confirm of a request issued by the reader.
    Internal,
    /// Confirm of an abandoned request.
    Late,
    /// No request with this id and primitive is outstanding.
    Unknown,
}

/// Table of outstanding requests keyed by frame id.
#[derive(Debug, Default)]
pub struct Correlator {
    slots: HashMap<u8, Slot>,
    next: u8,
    closed: bool,
}

impl Correlator {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a frame id for a caller and returns the confirm receiver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] after [`close`](Self::close), or
    /// [`Error::Protocol`] if every frame id is in use.
    pub fn allocate(&mut self, primitive: Primitive) -> Result<(u8, ConfirmReceiver)> {
        let (reply, receiver) = oneshot::channel();
        let id = self.reserve(Slot::Waiting { primitive, reply })?;
        Ok((id, receiver))
    }

    /// Reserves a frame id for a request issued by the reader.
    pub fn allocate_internal(&mut self, primitive: Primitive) -> Result<u8> {
        self.reserve(Slot::Internal {
            primitive,
            since: Instant::now(),
        })
    }

    fn reserve(&mut self, slot: Slot) -> Result<u8> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        self.purge_expired();

        for _ in 0..=u8::MAX {
            let id = self.next;
            self.next = self.next.wrapping_add(1);
            if !self.slots.contains_key(&id) {
                self.slots.insert(id, slot);
                return Ok(id);
            }
        }
        Err(Error::protocol("no free frame id: too many outstanding requests"))
    }

    /// Takes the slot matching a confirm's frame id and primitive.
    ///
    /// A confirm whose primitive differs from the request's leaves the slot
    /// untouched.
    pub fn take(&mut self, frame_id: u8, primitive: Primitive) -> Matched {
        match self.slots.get(&frame_id) {
            Some(slot) if slot.primitive() == primitive => {}
            _ => return Matched::Unknown,
        }
        match self.slots.remove(&frame_id) {
            Some(Slot::Waiting { reply, .. }) => Matched::Waiting(reply),
            Some(Slot::Internal { .. }) => Matched::Internal,
            Some(Slot::Abandoned { .. }) => Matched::Late,
            None => Matched::Unknown,
        }
    }

    /// Marks a waiting request as abandoned.
    ///
    /// Returns false if the slot is no longer waiting: its confirm was
    /// already taken, or the table was closed. The caller then still gets
    /// an answer on its receiver.
    pub fn abandon(&mut self, frame_id: u8) -> bool {
        match self.slots.get_mut(&frame_id) {
            Some(slot @ Slot::Waiting { .. }) => {
                *slot = Slot::Abandoned {
                    primitive: slot.primitive(),
                    since: Instant::now(),
                };
                true
            }
            _ => false,
        }
    }

    /// Frees a frame id whose request never reached the transport.
    pub fn release(&mut self, frame_id: u8) {
        self.slots.remove(&frame_id);
    }

    /// Fails every waiting request with [`Error::NotConnected`] and refuses
    /// further allocations.
    pub fn close(&mut self) {
        tracing::debug!(waiting = self.waiting(), "closing request table");
        self.closed = true;
        for (_, slot) in self.slots.drain() {
            if let Slot::Waiting { reply, .. } = slot {
                let _ = reply.send(Err(Error::NotConnected));
            }
        }
    }

    /// Number of requests with a waiting caller.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Waiting { .. }))
            .count()
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.slots.retain(|_, slot| match slot {
            Slot::Waiting { .. } => true,
            Slot::Internal { since, .. } | Slot::Abandoned { since, .. } => {
                now.duration_since(*since) < QUARANTINE
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parser::ConfirmBody;

    fn confirm(primitive: Primitive, frame_id: u8) -> Confirm {
        Confirm {
            primitive,
            frame_id,
            body: ConfirmBody::Status(0),
        }
    }

    #[tokio::test]
    async fn test_confirm_reaches_waiter() {
        let mut table = Correlator::new();
        let (id, rx) = table.allocate(Primitive::StackStop).unwrap();

        let Matched::Waiting(reply) = table.take(id, Primitive::StackStop) else {
            panic!("expected waiter");
        };
        reply.send(Ok(confirm(Primitive::StackStop, id))).unwrap();
        assert_eq!(rx.await.unwrap().unwrap().frame_id, id);
        assert_eq!(table.waiting(), 0);
    }

    #[test]
    fn test_primitive_must_match() {
        let mut table = Correlator::new();
        let (id, _rx) = table.allocate(Primitive::CsapAttributeRead).unwrap();

        assert!(matches!(
            table.take(id, Primitive::MsapAttributeRead),
            Matched::Unknown
        ));
        assert_eq!(table.waiting(), 1);
    }

    #[test]
    fn test_abandoned_id_is_not_reused() {
        let mut table = Correlator::new();
        let (first, _rx) = table.allocate(Primitive::CsapAttributeRead).unwrap();
        assert!(table.abandon(first));

        for _ in 0..u8::MAX {
            let (id, _rx) = table.allocate(Primitive::CsapAttributeRead).unwrap();
            assert_ne!(id, first);
            table.release(id);
        }
        assert!(matches!(
            table.take(first, Primitive::CsapAttributeRead),
            Matched::Late
        ));
    }

    #[tokio::test]
    async fn test_abandon_after_take_keeps_answer() {
        let mut table = Correlator::new();
        let (id, rx) = table.allocate(Primitive::CsapAttributeRead).unwrap();

        let Matched::Waiting(reply) = table.take(id, Primitive::CsapAttributeRead) else {
            panic!("expected waiter");
        };
        // Confirm already taken: the caller must wait for it
        assert!(!table.abandon(id));
        reply
            .send(Ok(confirm(Primitive::CsapAttributeRead, id)))
            .unwrap();
        assert_eq!(rx.await.unwrap().unwrap().frame_id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quarantine_expires() {
        let mut table = Correlator::new();
        let (first, _rx) = table.allocate(Primitive::StackStart).unwrap();
        assert!(table.abandon(first));

        tokio::time::advance(QUARANTINE + Duration::from_secs(1)).await;
        table.allocate_internal(Primitive::IndicationPoll).unwrap();
        assert!(matches!(
            table.take(first, Primitive::StackStart),
            Matched::Unknown
        ));
    }

    #[test]
    fn test_exhaustion() {
        let mut table = Correlator::new();
        let mut receivers = Vec::new();
        for _ in 0..=u8::MAX {
            receivers.push(table.allocate(Primitive::DataTx).unwrap());
        }
        assert!(matches!(
            table.allocate(Primitive::DataTx),
            Err(Error::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let mut table = Correlator::new();
        let (_, rx) = table.allocate(Primitive::CsapAttributeRead).unwrap();
        table.close();

        assert!(matches!(rx.await.unwrap(), Err(Error::NotConnected)));
        assert!(matches!(
            table.allocate(Primitive::CsapAttributeRead),
            Err(Error::NotConnected)
        ));
    }
}
