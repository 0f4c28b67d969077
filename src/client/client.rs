use std::cell::{Cell, RefCell};

use ntex_bytes::{ByteString, Bytes};
use ntex_io::IoBoxed;
use ntex_net::connect::{self, Connect, Connector};
use ntex_service::{IntoService, Service};
use ntex_util::future::{select, Either};
use ntex_util::time::{timeout_checked, Seconds};
use serde::Serialize;

use crate::config::ClientOptions;
use crate::context::Context;
use crate::error::ClientError;
use crate::sink::{MqttSink, PublishOptions};
use crate::types::QoS;

use super::{connection, connector::MqttConnector};

/// Mqtt v3.1.1 client.
///
/// Owns at most one live session at a time. Publish calls are routed to
/// the current session and fail with `ClientError::NotConnected` if there
/// is none. The client never reconnects on its own.
pub struct Client<T = Connector<String>> {
    opts: ClientOptions,
    addresses: Vec<String>,
    connector: MqttConnector<T>,
    sink: SessionSlot,
    session_present: Cell<bool>,
    connecting: Cell<bool>,
}

impl Client {
    /// Create new client, options are validated
    pub fn new(opts: ClientOptions) -> Result<Self, ClientError> {
        opts.validate()?;
        Ok(Client {
            addresses: opts.addresses()?,
            connector: MqttConnector::new(&opts),
            opts,
            sink: SessionSlot::default(),
            session_present: Cell::new(false),
            connecting: Cell::new(false),
        })
    }
}

impl<T> Client<T>
where
    T: Service<Connect<String>, Error = connect::ConnectError>,
    IoBoxed: From<T::Response>,
{
    /// Use custom connector
    pub fn connector<U, F>(self, connector: F) -> Client<U>
    where
        F: IntoService<U, Connect<String>>,
        U: Service<Connect<String>, Error = connect::ConnectError>,
        IoBoxed: From<U::Response>,
    {
        Client {
            connector: self.connector.connector(connector),
            opts: self.opts,
            addresses: self.addresses,
            sink: self.sink,
            session_present: self.session_present,
            connecting: self.connecting,
        }
    }

    #[inline]
    /// Client options
    pub fn options(&self) -> &ClientOptions {
        &self.opts
    }

    #[inline]
    /// Client identifier sent in CONNECT packet
    pub fn client_id(&self) -> &ByteString {
        self.connector.client_id()
    }

    #[inline]
    /// Check if client has live session
    pub fn is_connected(&self) -> bool {
        self.sink.get().map(|s| s.is_open()).unwrap_or(false)
    }

    #[inline]
    /// Indicates whether broker had stored session state on last connect
    pub fn session_present(&self) -> bool {
        self.session_present.get()
    }

    /// Handle of the current session
    pub fn sink(&self) -> Option<MqttSink> {
        self.sink.get().filter(|s| s.is_open())
    }

    /// Establish session.
    ///
    /// Servers are tried in order, the first one that completes the handshake
    /// is used. Fails with `ClientError::AlreadyConnected` if session is live
    /// or another connect is in progress.
    pub async fn connect(&self, ctx: &Context) -> Result<(), ClientError> {
        if self.connecting.get() || self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        self.connecting.set(true);
        let _guard = ConnectingGuard(&self.connecting);

        // drop closed session
        if let Some(sink) = self.sink.take() {
            sink.force_close();
        }

        let mut last_err = ClientError::NotConnected;
        for addr in &self.addresses {
            log::trace!("Connecting to {}", addr);

            match select(ctx.done(), self.connector.connect(addr.clone())).await {
                Either::Left(err) => return Err(err.into()),
                Either::Right(Ok(hnd)) => {
                    log::debug!(
                        "Connected to {}, session present: {}",
                        addr,
                        hnd.session_present
                    );
                    connection::start(
                        hnd.io,
                        hnd.shared.clone(),
                        Seconds(self.opts.keep_alive),
                        self.opts.ping_timeout_secs(),
                    );
                    self.session_present.set(hnd.session_present);
                    self.sink.set(MqttSink::new(hnd.shared));
                    return Ok(());
                }
                Either::Right(Err(err)) => {
                    log::warn!("Cannot connect to {}: {}", addr, err);
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    /// Publish message with default options
    pub async fn publish<Q>(
        &self,
        ctx: &Context,
        topic: &str,
        payload: Bytes,
        qos: Q,
    ) -> Result<(), ClientError>
    where
        Q: TryInto<QoS>,
    {
        self.publish_with(ctx, topic, payload, qos, PublishOptions::empty()).await
    }

    /// Publish message, see [`MqttSink::publish_with`]
    pub async fn publish_with<Q>(
        &self,
        ctx: &Context,
        topic: &str,
        payload: Bytes,
        qos: Q,
        opts: PublishOptions,
    ) -> Result<(), ClientError>
    where
        Q: TryInto<QoS>,
    {
        match self.sink.get() {
            Some(sink) => sink.publish_with(ctx, topic, payload, qos, opts).await,
            None => {
                crate::sink::validate(topic, qos)?;
                Err(ClientError::NotConnected)
            }
        }
    }

    /// Publish utf-8 string payload
    pub async fn publish_string<Q>(
        &self,
        ctx: &Context,
        topic: &str,
        payload: &str,
        qos: Q,
    ) -> Result<(), ClientError>
    where
        Q: TryInto<QoS>,
    {
        let payload = Bytes::copy_from_slice(payload.as_bytes());
        self.publish(ctx, topic, payload, qos).await
    }

    /// Serialize value to json and publish it
    pub async fn publish_json<V, Q>(
        &self,
        ctx: &Context,
        topic: &str,
        value: &V,
        qos: Q,
    ) -> Result<(), ClientError>
    where
        V: Serialize + ?Sized,
        Q: TryInto<QoS>,
    {
        let payload = serde_json::to_vec(value)?;
        self.publish(ctx, topic, Bytes::from(payload), qos).await
    }

    /// Disconnect gracefully.
    ///
    /// Sends DISCONNECT packet and waits until the connection is closed.
    /// Outstanding publishes fail with `ClientError::SessionClosed`. If `ctx`
    /// fires first, the connection is dropped and the context error is returned.
    pub async fn disconnect(&self, ctx: &Context) -> Result<(), ClientError> {
        let sink = self.sink.take().ok_or(ClientError::NotConnected)?;
        log::debug!("Disconnecting mqtt client");

        sink.close();
        let timeout = Seconds(self.opts.disconnect_timeout);
        let on_disconnect = sink.shared().on_disconnect();

        match select(ctx.done(), timeout_checked(timeout, on_disconnect)).await {
            Either::Left(err) => {
                sink.force_close();
                Err(err.into())
            }
            Either::Right(res) => {
                if res.is_err() {
                    log::debug!("Disconnect timeout, dropping connection");
                }
                sink.force_close();
                Ok(())
            }
        }
    }

    /// Drop connection without waiting for anything.
    ///
    /// Outstanding publishes fail with `ClientError::SessionClosed`.
    /// Safe to call any number of times.
    pub fn disconnect_immediately(&self) {
        if let Some(sink) = self.sink.take() {
            log::debug!("Dropping mqtt client connection");
            sink.force_close();
        }
    }
}

/// Current session, connection is dropped together with the client
#[derive(Default)]
struct SessionSlot(RefCell<Option<MqttSink>>);

impl SessionSlot {
    fn get(&self) -> Option<MqttSink> {
        self.0.borrow().clone()
    }

    fn set(&self, sink: MqttSink) {
        *self.0.borrow_mut() = Some(sink);
    }

    fn take(&self) -> Option<MqttSink> {
        self.0.borrow_mut().take()
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        if let Some(sink) = self.0.get_mut().take() {
            sink.force_close();
        }
    }
}

struct ConnectingGuard<'a>(&'a Cell<bool>);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
