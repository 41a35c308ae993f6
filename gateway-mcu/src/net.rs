//! Network Stack Abstraction Traits
//!
//! The gateway picks which link carries default traffic and in which order
//! DNS servers are tried; the platform network stack applies it.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Kind of link that can carry the default route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityType {
    None,
    Cellular,
    #[serde(rename = "wifi")]
    WifiStation,
}

impl fmt::Display for ConnectivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityType::Cellular => f.write_str("Cellular"),
            ConnectivityType::WifiStation => f.write_str("Wi-Fi"),
            ConnectivityType::None => f.write_str("None"),
        }
    }
}

/// Called by a connection manager when a link loses its address
///
/// Runs in the manager's callback context, so it must not block.
#[derive(Clone)]
pub struct IpLostHook(Arc<dyn Fn() + Send + Sync>);

impl IpLostHook {
    pub fn new(hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    pub fn fire(&self) {
        (self.0)()
    }
}

impl fmt::Debug for IpLostHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IpLostHook")
    }
}

/// Trait for default-route and resolver configuration
pub trait NetStack: Send {
    /// Error type for network stack operations
    type Error: fmt::Debug;

    /// Route default traffic through a link
    fn set_default_interface(&mut self, kind: ConnectivityType) -> Result<(), Self::Error>;

    /// Set the resolver's DNS server at `index` (0 is tried first)
    fn set_dns_server(&mut self, index: usize, addr: IpAddr) -> Result<(), Self::Error>;
}
