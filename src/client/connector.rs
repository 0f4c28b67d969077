use std::rc::Rc;

use ntex_bytes::{ByteString, Bytes};
use ntex_io::IoBoxed;
use ntex_net::connect::{self, Connect, Connector};
use ntex_service::{IntoService, Pipeline, Service};
use ntex_util::time::{timeout_checked, Seconds};

use crate::codec::{self, Codec, Packet};
use crate::config::ClientOptions;
use crate::error::{ClientError, ProtocolError};
use crate::shared::MqttShared;

/// Established transport after successful CONNECT/CONNACK exchange
pub(crate) struct Handshake {
    pub(crate) io: IoBoxed,
    pub(crate) shared: Rc<MqttShared>,
    pub(crate) session_present: bool,
}

/// Mqtt client connector
pub(crate) struct MqttConnector<T> {
    connector: Pipeline<T>,
    pkt: codec::Connect,
    handshake_timeout: Seconds,
    max_packet_size: u32,
}

impl MqttConnector<Connector<String>> {
    /// Create connector with default tcp transport
    pub(crate) fn new(opts: &ClientOptions) -> Self {
        MqttConnector {
            connector: Pipeline::new(Connector::default()),
            pkt: codec::Connect {
                clean_session: opts.clean_session,
                keep_alive: opts.keep_alive,
                last_will: None,
                client_id: opts.client_id.as_deref().map(ByteString::from).unwrap_or_default(),
                username: opts.username.as_deref().map(ByteString::from),
                password: opts
                    .password
                    .as_deref()
                    .map(|p| Bytes::copy_from_slice(p.as_bytes())),
            },
            handshake_timeout: Seconds(opts.connect_timeout),
            max_packet_size: opts.max_packet_size,
        }
    }
}

impl<T> MqttConnector<T>
where
    T: Service<Connect<String>, Error = connect::ConnectError>,
    IoBoxed: From<T::Response>,
{
    /// Use custom connector
    pub(crate) fn connector<U, F>(self, connector: F) -> MqttConnector<U>
    where
        F: IntoService<U, Connect<String>>,
        U: Service<Connect<String>, Error = connect::ConnectError>,
        IoBoxed: From<U::Response>,
    {
        MqttConnector {
            connector: Pipeline::new(connector.into_service()),
            pkt: self.pkt,
            handshake_timeout: self.handshake_timeout,
            max_packet_size: self.max_packet_size,
        }
    }

    pub(crate) fn client_id(&self) -> &ByteString {
        &self.pkt.client_id
    }

    /// Connect to mqtt server
    pub(crate) async fn connect(&self, address: String) -> Result<Handshake, ClientError> {
        timeout_checked(self.handshake_timeout, self._connect(address))
            .await
            .map_err(|_| ClientError::HandshakeTimeout)
            .and_then(|res| res)
    }

    async fn _connect(&self, address: String) -> Result<Handshake, ClientError> {
        let io: IoBoxed = self.connector.call(Connect::new(address)).await?.into();
        let codec = Codec::new();
        codec.set_max_size(self.max_packet_size);

        io.encode(Packet::Connect(Box::new(self.pkt.clone())), &codec)?;

        let packet = io.recv(&codec).await.map_err(ClientError::from)?.ok_or_else(|| {
            log::trace!("Mqtt server is disconnected during handshake");
            ClientError::Disconnected(None)
        })?;

        match packet {
            Packet::ConnectAck(ack) => {
                log::trace!("Connect ack response from server: {:?}", ack);
                if ack.return_code.is_accepted() {
                    if ack.session_present && self.pkt.clean_session {
                        return Err(ProtocolError::generic_violation(
                            "Session present flag is set for clean session [MQTT-3.2.2-1]",
                        )
                        .into());
                    }
                    let shared = Rc::new(MqttShared::new(io.get_ref(), codec));
                    shared.set_connected();
                    Ok(Handshake { io, shared, session_present: ack.session_present })
                } else {
                    Err(ClientError::Ack(ack.return_code))
                }
            }
            p => Err(ProtocolError::unexpected_packet(
                p.packet_type(),
                "CONNACK packet expected from server first [MQTT-3.2.0-1]",
            )
            .into()),
        }
    }
}
