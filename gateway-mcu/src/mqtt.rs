//! MQTT Client Abstraction Traits
//!
//! The client library owns the broker socket and TLS; the gateway only
//! drives its lifecycle and reacts to the events it reports.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Broker address
#[derive(Debug, Clone)]
pub struct BrokerInfo {
    pub host: String,
    pub port: u16,
}

/// TLS material handed to the client library as-is
#[derive(Debug, Clone, Default)]
pub struct TlsMaterial {
    pub root_ca: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub alpn: Option<String>,
    pub sni: Option<String>,
}

/// Session parameters for CONNECT
#[derive(Debug, Clone)]
pub struct ConnectInfo {
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    /// Bound on each broker round trip
    pub timeout: Duration,
}

/// A topic filter to subscribe to
#[derive(Debug, Clone)]
pub struct Subscription {
    pub topic: String,
    pub qos: Qos,
}

/// A message, in either direction
#[derive(Debug, Clone)]
pub struct Publish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

/// Events the client library reports from its own context
#[derive(Debug, Clone)]
pub enum MqttEvent {
    Disconnected { reason: String },
    Message(Publish),
}

/// Callback the client library invokes for every event
pub type MqttEventCallback = Box<dyn Fn(MqttEvent) + Send + Sync>;

/// Trait for MQTT client operations
pub trait MqttClient: Send {
    /// Error type for MQTT operations
    type Error: fmt::Debug;

    /// Initialize the client library
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Create a client instance bound to a broker
    fn create(
        &mut self,
        broker: &BrokerInfo,
        tls: Option<&TlsMaterial>,
        on_event: MqttEventCallback,
    ) -> Result<(), Self::Error>;

    /// Open the MQTT session
    fn connect(&mut self, info: &ConnectInfo) -> Result<(), Self::Error>;

    fn subscribe(&mut self, subscriptions: &[Subscription]) -> Result<(), Self::Error>;

    fn unsubscribe(&mut self, subscriptions: &[Subscription]) -> Result<(), Self::Error>;

    fn publish(&mut self, message: &Publish) -> Result<(), Self::Error>;

    /// Close the MQTT session
    fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Destroy the client instance
    fn delete(&mut self) -> Result<(), Self::Error>;

    /// Release the client library
    fn deinit(&mut self) -> Result<(), Self::Error>;
}
