//! MQTT 3.1.1 client
#[allow(clippy::module_inception)]
mod client;
mod connection;
mod connector;

pub use self::client::Client;
