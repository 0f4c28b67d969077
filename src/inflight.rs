//! Packet identifier allocator and pending acknowledgment registry
use std::num::NonZeroU16;

use ntex_util::{channel::pool, HashMap};

use crate::error::{ClientError, ProtocolError};
use crate::types::QoS;

const WORDS: usize = (u16::MAX as usize + 1) / 64;

/// Bounded allocator over `[1, 65535]`.
///
/// Ids are handed out round-robin, starting after the last issued id.
pub(crate) struct PacketIds {
    bits: Box<[u64; WORDS]>,
    last: u16,
    used: u32,
}

impl PacketIds {
    pub(crate) fn new() -> Self {
        PacketIds { bits: Box::new([0; WORDS]), last: 0, used: 0 }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.used as usize
    }

    #[cfg(test)]
    pub(crate) fn is_used(&self, id: NonZeroU16) -> bool {
        let (w, b) = Self::pos(id.get());
        self.bits[w] & b != 0
    }

    pub(crate) fn acquire(&mut self) -> Option<NonZeroU16> {
        if self.used == u16::MAX as u32 {
            return None;
        }

        let mut id = self.last;
        loop {
            id = if id == u16::MAX { 1 } else { id + 1 };

            let (w, b) = Self::pos(id);
            if self.bits[w] == u64::MAX {
                // whole word is taken, jump to the last id of the word
                id = ((w as u32 * 64) + 63) as u16;
                continue;
            }
            if self.bits[w] & b == 0 {
                self.bits[w] |= b;
                self.used += 1;
                self.last = id;
                return NonZeroU16::new(id);
            }
        }
    }

    /// Mark id as free, returns `false` if id is not allocated
    pub(crate) fn release(&mut self, id: NonZeroU16) -> bool {
        let (w, b) = Self::pos(id.get());
        if self.bits[w] & b == 0 {
            false
        } else {
            self.bits[w] &= !b;
            self.used -= 1;
            true
        }
    }

    #[inline]
    fn pos(id: u16) -> (usize, u64) {
        ((id / 64) as usize, 1u64 << (id % 64))
    }
}

/// Completion delivered to the publish call waiting on an id
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    Acked,
    Closed,
}

/// Ack expected next for an outstanding publish
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum AckType {
    /// PUBACK, QoS 1
    Publish,
    /// PUBREC, QoS 2 first phase
    Receive,
    /// PUBCOMP, QoS 2 second phase
    Complete,
}

impl AckType {
    fn expected_str(self) -> &'static str {
        match self {
            AckType::Publish => "Expected PUBACK packet",
            AckType::Receive => "Expected PUBREC packet",
            AckType::Complete => "Expected PUBCOMP packet",
        }
    }
}

/// Result of applying an inbound ack to the registry
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    /// Publish is complete, waiter is notified and id released
    Resolved,
    /// PUBREC accepted, PUBREL must be sent
    Release,
    /// No outstanding publish with this id
    Unknown,
}

struct Pending {
    tx: pool::Sender<Completion>,
    ack: AckType,
}

/// Outstanding QoS 1/2 publishes of one session.
///
/// Every id stored in `entries` is allocated in `ids` and vice versa,
/// an entry is removed and its id released in a single step.
pub(crate) struct Inflight {
    ids: PacketIds,
    entries: HashMap<NonZeroU16, Pending>,
    pool: pool::Pool<Completion>,
}

impl Inflight {
    pub(crate) fn new() -> Self {
        Inflight { ids: PacketIds::new(), entries: HashMap::default(), pool: pool::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Allocate id and register completion handle for it
    pub(crate) fn register(
        &mut self,
        qos: QoS,
    ) -> Result<(NonZeroU16, pool::Receiver<Completion>), ClientError> {
        let ack = match qos {
            QoS::AtLeastOnce => AckType::Publish,
            QoS::ExactlyOnce => AckType::Receive,
            QoS::AtMostOnce => return Err(ClientError::InvalidQoS),
        };
        let id = self.ids.acquire().ok_or(ClientError::PacketIdsExhausted)?;
        let (tx, rx) = self.pool.channel();
        self.entries.insert(id, Pending { tx, ack });
        Ok((id, rx))
    }

    /// Apply inbound PUBACK, PUBREC or PUBCOMP
    pub(crate) fn ack(
        &mut self,
        id: NonZeroU16,
        ack: AckType,
    ) -> Result<AckOutcome, ProtocolError> {
        let expected = if let Some(entry) = self.entries.get_mut(&id) {
            if entry.ack != ack {
                log::trace!(
                    "Unexpected {:?} ack for packet id {}, {:?} expected",
                    ack,
                    id,
                    entry.ack
                );
                return Err(ProtocolError::unexpected_ack(id, entry.ack.expected_str()));
            }
            if ack == AckType::Receive {
                entry.ack = AckType::Complete;
                return Ok(AckOutcome::Release);
            }
            entry.ack
        } else {
            return Ok(AckOutcome::Unknown);
        };

        log::trace!("Ack packet with id: {} ({:?})", id, expected);
        if let Some(entry) = self.remove(id) {
            let _ = entry.tx.send(Completion::Acked);
        }
        Ok(AckOutcome::Resolved)
    }

    /// Drop entry on behalf of its waiter.
    ///
    /// Returns `false` if the entry was resolved already.
    pub(crate) fn abandon(&mut self, id: NonZeroU16) -> bool {
        self.remove(id).is_some()
    }

    /// Resolve every outstanding entry with `Completion::Closed`
    pub(crate) fn clear(&mut self) {
        let ids: Vec<_> = self.entries.keys().copied().collect();
        for id in ids {
            if let Some(entry) = self.remove(id) {
                let _ = entry.tx.send(Completion::Closed);
            }
        }
    }

    fn remove(&mut self, id: NonZeroU16) -> Option<Pending> {
        let entry = self.entries.remove(&id)?;
        let released = self.ids.release(id);
        if !released {
            log::error!("Packet id {} is released twice", id);
        }
        debug_assert!(released, "packet id {id} is not allocated");
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use ntex_util::future::lazy;

    use super::*;

    fn id(v: u16) -> NonZeroU16 {
        NonZeroU16::new(v).unwrap()
    }

    #[test]
    fn test_acquire_round_robin() {
        let mut ids = PacketIds::new();
        assert_eq!(ids.acquire(), Some(id(1)));
        assert_eq!(ids.acquire(), Some(id(2)));
        assert!(ids.release(id(1)));
        // released id is not reissued right away
        assert_eq!(ids.acquire(), Some(id(3)));
        assert_eq!(ids.len(), 2);
        assert!(ids.is_used(id(2)));
        assert!(!ids.is_used(id(1)));

        assert!(ids.release(id(2)));
        assert!(!ids.release(id(2)));
    }

    #[test]
    fn test_exhaustion() {
        let mut ids = PacketIds::new();
        for i in 1..=u16::MAX {
            assert_eq!(ids.acquire(), Some(id(i)));
        }
        assert_eq!(ids.len(), 65535);
        assert_eq!(ids.acquire(), None);

        assert!(ids.release(id(100)));
        assert_eq!(ids.acquire(), Some(id(100)));
        assert_eq!(ids.acquire(), None);

        // wraps around to the lowest free id
        assert!(ids.release(id(7)));
        assert!(ids.release(id(65535)));
        assert_eq!(ids.acquire(), Some(id(65535)));
        assert_eq!(ids.acquire(), Some(id(7)));
    }

    #[ntex::test]
    async fn test_qos1_resolve() {
        let mut inflight = Inflight::new();
        let (pid, rx) = inflight.register(QoS::AtLeastOnce).unwrap();
        assert_eq!(pid, id(1));
        assert_eq!(inflight.len(), 1);

        assert!(inflight.ack(pid, AckType::Receive).is_err());
        assert_eq!(inflight.ack(pid, AckType::Publish).unwrap(), AckOutcome::Resolved);
        assert_eq!(rx.await.unwrap(), Completion::Acked);
        assert_eq!(inflight.len(), 0);
        assert!(!inflight.ids.is_used(pid));

        // late ack
        assert_eq!(inflight.ack(pid, AckType::Publish).unwrap(), AckOutcome::Unknown);
        assert!(!inflight.abandon(pid));
    }

    #[ntex::test]
    async fn test_qos2_resolve() {
        let mut inflight = Inflight::new();
        let (pid, rx) = inflight.register(QoS::ExactlyOnce).unwrap();

        assert!(inflight.ack(pid, AckType::Publish).is_err());
        assert!(inflight.ack(pid, AckType::Complete).is_err());
        assert_eq!(inflight.ack(pid, AckType::Receive).unwrap(), AckOutcome::Release);
        assert!(!lazy(|cx| rx.poll_recv(cx).is_ready()).await);
        assert!(inflight.ack(pid, AckType::Receive).is_err());

        assert_eq!(inflight.ack(pid, AckType::Complete).unwrap(), AckOutcome::Resolved);
        assert_eq!(rx.await.unwrap(), Completion::Acked);
        assert!(!inflight.ids.is_used(pid));
    }

    #[ntex::test]
    async fn test_abandon() {
        let mut inflight = Inflight::new();
        let (pid, rx) = inflight.register(QoS::AtLeastOnce).unwrap();

        assert!(inflight.abandon(pid));
        assert!(!inflight.ids.is_used(pid));
        assert!(rx.await.is_err());

        // ack after abandon is ignored
        assert_eq!(inflight.ack(pid, AckType::Publish).unwrap(), AckOutcome::Unknown);

        let (pid, rx) = inflight.register(QoS::AtLeastOnce).unwrap();
        assert_eq!(inflight.ack(pid, AckType::Publish).unwrap(), AckOutcome::Resolved);
        // resolution won
        assert!(!inflight.abandon(pid));
        assert_eq!(rx.await.unwrap(), Completion::Acked);
    }

    #[ntex::test]
    async fn test_clear() {
        let mut inflight = Inflight::new();
        let (_, rx1) = inflight.register(QoS::AtLeastOnce).unwrap();
        let (pid2, rx2) = inflight.register(QoS::ExactlyOnce).unwrap();
        inflight.ack(pid2, AckType::Receive).unwrap();

        inflight.clear();
        assert_eq!(inflight.len(), 0);
        assert_eq!(inflight.ids.len(), 0);
        assert_eq!(rx1.await.unwrap(), Completion::Closed);
        assert_eq!(rx2.await.unwrap(), Completion::Closed);
    }

    #[test]
    fn test_register_qos0() {
        let mut inflight = Inflight::new();
        assert!(matches!(inflight.register(QoS::AtMostOnce), Err(ClientError::InvalidQoS)));
        assert_eq!(inflight.ids.len(), 0);
    }
}
