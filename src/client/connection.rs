use std::{rc::Rc, time::Duration, time::Instant};

use ntex_io::IoBoxed;
use ntex_util::future::{select, Either};
use ntex_util::time::{sleep, Seconds};

use crate::error::{ClientError, ProtocolError};
use crate::shared::MqttShared;

/// Start session loops.
///
/// Outbound frames are flushed by the io write task, so the session only
/// needs a reader task and, with non-zero keep-alive, a ping task.
pub(crate) fn start(
    io: IoBoxed,
    shared: Rc<MqttShared>,
    keep_alive: Seconds,
    ping_timeout: Seconds,
) {
    if keep_alive.0 > 0 {
        let _ = ntex_rt::spawn(keepalive(shared.clone(), keep_alive, ping_timeout));
    }
    let _ = ntex_rt::spawn(read_loop(io, shared));
}

async fn read_loop(io: IoBoxed, shared: Rc<MqttShared>) {
    log::debug!("Start mqtt client read task");

    let err = loop {
        match io.recv(&shared.codec).await {
            Ok(Some(pkt)) => {
                if let Err(err) = shared.handle_packet(pkt) {
                    break Some(ClientError::Protocol(err));
                }
            }
            Ok(None) => {
                log::trace!("Mqtt server is disconnected");
                break None;
            }
            Err(err) => break Some(ClientError::from(err)),
        }
    };
    shared.terminate(err);

    // keep io alive until pending writes are flushed
    io.on_disconnect().await;
    log::debug!("Mqtt client read task is stopped");
}

async fn keepalive(shared: Rc<MqttShared>, keep_alive: Seconds, ping_timeout: Seconds) {
    log::debug!("Start mqtt client keep-alive task");

    let interval = Duration::from_secs(u64::from(keep_alive.0));
    let grace = if ping_timeout.0 > 0 {
        Duration::from_secs(u64::from(ping_timeout.0))
    } else {
        interval
    };

    while shared.is_connected() {
        let now = Instant::now();
        let expire = if let Some(sent) = shared.ping_sent() {
            let expire = sent + grace;
            if now >= expire {
                log::debug!("PINGRESP is not received in {:?}, closing connection", grace);
                shared.terminate(Some(ClientError::Protocol(ProtocolError::KeepAliveTimeout)));
                break;
            }
            expire
        } else {
            let expire = shared.last_write() + interval;
            if now >= expire {
                log::trace!("Send PINGREQ packet");
                if let Err(err) = shared.send_ping() {
                    shared.terminate(Some(err.into()));
                    break;
                }
                continue;
            }
            expire
        };

        if let Either::Right(_) = select(sleep(expire - now), shared.on_disconnect()).await {
            break;
        }
    }
    log::debug!("Mqtt client connection is closed, stopping keep-alive task");
}
