use std::{fmt, future::poll_fn, future::Future, num::NonZeroU16, pin::Pin, rc::Rc, task::Poll};

use ntex_bytes::{ByteString, Bytes};
use serde::Serialize;

use crate::codec::Publish;
use crate::context::Context;
use crate::error::ClientError;
use crate::inflight::Completion;
use crate::shared::MqttShared;
use crate::topic::validate_topic;
use crate::types::QoS;

bitflags::bitflags! {
    /// Publish options
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PublishOptions: u8 {
        /// Broker stores the message as the last known value of the topic
        const RETAIN = 0b0000_0001;
    }
}

/// Handle of a live session, used to publish messages
#[derive(Clone)]
pub struct MqttSink(Rc<MqttShared>);

impl MqttSink {
    pub(crate) fn new(shared: Rc<MqttShared>) -> Self {
        MqttSink(shared)
    }

    #[inline]
    /// Check if session is connected
    pub fn is_open(&self) -> bool {
        self.0.is_connected()
    }

    #[inline]
    /// Number of publishes waiting for acknowledgment
    pub fn in_flight(&self) -> usize {
        self.0.in_flight()
    }

    /// Publish message with default options.
    ///
    /// See [`MqttSink::publish_with`].
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

    /// Publish message.
    ///
    /// QoS 0 completes once the packet is queued for write. QoS 1 and 2
    /// wait for the broker's acknowledgment, the context deadline or
    /// cancellation, or session closure, whichever happens first.
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
        let qos = validate(topic, qos)?;
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let pkt = Publish {
            qos,
            payload,
            dup: false,
            retain: opts.contains(PublishOptions::RETAIN),
            topic: ByteString::from(topic),
            packet_id: None,
        };

        let (id, rx) = match self.0.publish(pkt)? {
            Some(item) => item,
            None => return Ok(()),
        };
        let mut guard = PendingGuard { shared: &self.0, id: Some(id) };

        let mut done = ctx.done();
        let res = poll_fn(|cx| {
            if let Poll::Ready(res) = rx.poll_recv(cx) {
                return Poll::Ready(Ok(res));
            }
            Pin::new(&mut done).poll(cx).map(Err)
        })
        .await;

        match res {
            Ok(Ok(Completion::Acked)) => {
                guard.disarm();
                // session loss takes precedence over late ack
                if self.0.is_connected() {
                    Ok(())
                } else {
                    Err(ClientError::SessionClosed)
                }
            }
            Ok(Ok(Completion::Closed)) | Ok(Err(_)) => {
                guard.disarm();
                Err(ClientError::SessionClosed)
            }
            Err(err) => {
                if guard.abandon() {
                    log::trace!("Publish with id {} is aborted: {}", id, err);
                    Err(err.into())
                } else {
                    // resolution won the race
                    match rx.await {
                        Ok(Completion::Acked) if self.0.is_connected() => Ok(()),
                        _ => Err(ClientError::SessionClosed),
                    }
                }
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

    /// Serialize value to json and publish it.
    ///
    /// Serialization failure is reported as `ClientError::Encoding`,
    /// nothing is sent in that case.
    pub async fn publish_json<T, Q>(
        &self,
        ctx: &Context,
        topic: &str,
        value: &T,
        qos: Q,
    ) -> Result<(), ClientError>
    where
        T: Serialize + ?Sized,
        Q: TryInto<QoS>,
    {
        let payload = serde_json::to_vec(value)?;
        self.publish(ctx, topic, Bytes::from(payload), qos).await
    }

    /// Close session gracefully, outstanding publishes fail with `SessionClosed`
    pub fn close(&self) {
        self.0.close();
    }

    /// Drop connection immediately
    pub fn force_close(&self) {
        self.0.force_close();
    }

    pub(crate) fn shared(&self) -> &Rc<MqttShared> {
        &self.0
    }
}

impl fmt::Debug for MqttSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MqttSink").field(&self.0).finish()
    }
}

/// Check publish arguments before anything is sent
pub(crate) fn validate<Q: TryInto<QoS>>(topic: &str, qos: Q) -> Result<QoS, ClientError> {
    let qos = qos.try_into().map_err(|_| ClientError::InvalidQoS)?;
    validate_topic(topic)?;
    Ok(qos)
}

/// Releases packet id if publish future is dropped while waiting
struct PendingGuard<'a> {
    shared: &'a MqttShared,
    id: Option<NonZeroU16>,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.id = None;
    }

    fn abandon(&mut self) -> bool {
        self.id.take().map(|id| self.shared.abandon(id)).unwrap_or(false)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.abandon();
    }
}
