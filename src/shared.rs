use std::{cell::Cell, cell::RefCell, fmt, num::NonZeroU16, time::Instant};

use ntex_io::{IoRef, OnDisconnect};
use ntex_util::channel::pool;

use crate::codec::{Codec, Packet, Publish};
use crate::error::{ClientError, EncodeError, ProtocolError};
use crate::inflight::{AckOutcome, AckType, Completion, Inflight};
use crate::types::{packet_type, QoS};

/// Session lifecycle
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum SessionState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// State shared between session loops and publish calls
pub(crate) struct MqttShared {
    io: IoRef,
    state: Cell<SessionState>,
    inflight: RefCell<Inflight>,
    last_write: Cell<Instant>,
    ping_sent: Cell<Option<Instant>>,
    pub(crate) codec: Codec,
}

impl MqttShared {
    pub(crate) fn new(io: IoRef, codec: Codec) -> Self {
        Self {
            io,
            codec,
            state: Cell::new(SessionState::Connecting),
            inflight: RefCell::new(Inflight::new()),
            last_write: Cell::new(Instant::now()),
            ping_sent: Cell::new(None),
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SessionState {
        self.state.get()
    }

    pub(crate) fn set_connected(&self) {
        if self.state.get() == SessionState::Connecting {
            self.state.set(SessionState::Connected);
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.get() == SessionState::Connected && !self.io.is_closed()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.inflight.borrow().len()
    }

    pub(crate) fn on_disconnect(&self) -> OnDisconnect {
        self.io.on_disconnect()
    }

    pub(crate) fn last_write(&self) -> Instant {
        self.last_write.get()
    }

    pub(crate) fn ping_sent(&self) -> Option<Instant> {
        self.ping_sent.get()
    }

    pub(crate) fn encode_packet(&self, pkt: Packet) -> Result<(), EncodeError> {
        self.io.encode(pkt, &self.codec)?;
        self.last_write.set(Instant::now());
        Ok(())
    }

    pub(crate) fn send_ping(&self) -> Result<(), EncodeError> {
        self.encode_packet(Packet::PingRequest)?;
        self.ping_sent.set(Some(self.last_write.get()));
        Ok(())
    }

    /// Send publish packet.
    ///
    /// For QoS 1 and 2 the packet id is allocated and a completion handle
    /// registered before any bytes are written.
    pub(crate) fn publish(
        &self,
        mut pkt: Publish,
    ) -> Result<Option<(NonZeroU16, pool::Receiver<Completion>)>, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        if pkt.qos == QoS::AtMostOnce {
            self.encode_packet(pkt.into())?;
            return Ok(None);
        }

        let mut inflight = self.inflight.borrow_mut();
        let (id, rx) = inflight.register(pkt.qos)?;
        pkt.packet_id = Some(id);

        log::trace!("Publish packet with id: {}", id);
        if let Err(err) = self.encode_packet(pkt.into()) {
            inflight.abandon(id);
            return Err(err.into());
        }
        Ok(Some((id, rx)))
    }

    /// Remove pending publish on behalf of its caller
    pub(crate) fn abandon(&self, id: NonZeroU16) -> bool {
        let removed = self.inflight.borrow_mut().abandon(id);
        if removed {
            log::trace!("Publish with id {} is abandoned", id);
        }
        removed
    }

    /// Graceful close, sends DISCONNECT and flushes write buffer
    pub(crate) fn close(&self) {
        if self.state.get() == SessionState::Connected {
            self.state.set(SessionState::Closing);
            self.inflight.borrow_mut().clear();
            let _ = self.encode_packet(Packet::Disconnect);
        } else if self.state.get() != SessionState::Closing {
            self.state.set(SessionState::Closed);
            self.inflight.borrow_mut().clear();
        }
        self.io.close();
    }

    /// Drop connection without flushing
    pub(crate) fn force_close(&self) {
        self.state.set(SessionState::Closed);
        self.inflight.borrow_mut().clear();
        self.io.force_close();
    }

    /// Tear session down after fatal error
    pub(crate) fn terminate(&self, err: Option<ClientError>) {
        match self.state.get() {
            SessionState::Closed => (),
            SessionState::Closing => {
                // graceful close is in progress, io is flushing
                self.state.set(SessionState::Closed);
                self.inflight.borrow_mut().clear();
            }
            SessionState::Connecting | SessionState::Connected => {
                match err {
                    Some(ref err) => log::debug!("Session is terminated: {}", err),
                    None => log::debug!("Session is closed by peer"),
                }
                self.force_close();
            }
        }
    }

    /// Process inbound packet
    pub(crate) fn handle_packet(&self, pkt: Packet) -> Result<(), ProtocolError> {
        log::trace!("Received packet: {:?}", pkt);

        match pkt {
            Packet::PublishAck { packet_id } => {
                self.ack(packet_id, AckType::Publish)?;
            }
            Packet::PublishReceived { packet_id } => {
                // unknown id still gets PUBREL, broker can drop its state
                self.ack(packet_id, AckType::Receive)?;
                self.encode_packet(Packet::PublishRelease { packet_id })?;
            }
            Packet::PublishComplete { packet_id } => {
                self.ack(packet_id, AckType::Complete)?;
            }
            Packet::Publish(publish) => match (publish.qos, publish.packet_id) {
                (QoS::AtLeastOnce, Some(packet_id)) => {
                    self.encode_packet(Packet::PublishAck { packet_id })?;
                }
                (QoS::ExactlyOnce, Some(packet_id)) => {
                    self.encode_packet(Packet::PublishReceived { packet_id })?;
                }
                _ => (),
            },
            Packet::PublishRelease { packet_id } => {
                self.encode_packet(Packet::PublishComplete { packet_id })?;
            }
            Packet::PingResponse => {
                self.ping_sent.set(None);
            }
            Packet::Disconnect => {
                return Err(ProtocolError::unexpected_packet(
                    packet_type::DISCONNECT,
                    "DISCONNECT packet is not allowed from server",
                ));
            }
            pkt => {
                return Err(ProtocolError::unexpected_packet(
                    pkt.packet_type(),
                    "Unexpected packet after connection is established",
                ));
            }
        }
        Ok(())
    }

    fn ack(&self, id: NonZeroU16, ack: AckType) -> Result<(), ProtocolError> {
        if self.inflight.borrow_mut().ack(id, ack)? == AckOutcome::Unknown {
            log::trace!("Ignore {:?} ack for unknown packet id {}", ack, id);
        }
        Ok(())
    }
}

impl fmt::Debug for MqttShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttShared")
            .field("state", &self.state.get())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
