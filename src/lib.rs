//! MQTT v3.1.1 publishing client

#[macro_use]
mod utils;

pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod topic;
pub mod types;

mod inflight;
mod shared;
mod sink;

pub use self::client::Client;
pub use self::config::{ClientOptions, OptionsError};
pub use self::context::{Context, ContextError};
pub use self::error::{ClientError, ErrorKind, ProtocolError};
pub use self::sink::{MqttSink, PublishOptions};
pub use self::topic::TopicError;
pub use self::types::QoS;

