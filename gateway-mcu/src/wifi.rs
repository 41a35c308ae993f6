//! Wi-Fi Abstraction Traits
//!
//! Traits for Wi-Fi station operations that platform crates implement.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::IpLostHook;

/// Wi-Fi security mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WifiSecurity {
    Open,
    Wpa2Personal,
    Wpa3Personal,
}

/// Station credentials
#[derive(Debug, Clone)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
    pub security: WifiSecurity,
}

/// What a station connect needs
#[derive(Debug, Clone)]
pub struct WifiConnectParams {
    pub credentials: WifiCredentials,
    /// Fired when the station loses its DHCP address after connecting
    pub on_ip_lost: Option<IpLostHook>,
}

impl From<WifiCredentials> for WifiConnectParams {
    fn from(credentials: WifiCredentials) -> Self {
        Self {
            credentials,
            on_ip_lost: None,
        }
    }
}

/// IP address info reported by a link once it is up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpInfo {
    pub ip: IpAddr,
    pub gateway: Option<IpAddr>,
}

impl IpInfo {
    pub fn new(ip: IpAddr) -> Self {
        Self { ip, gateway: None }
    }
}

impl fmt::Display for IpInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ip)
    }
}

/// Trait for Wi-Fi station operations
///
/// Platform crates implement this trait using their connection manager.
pub trait WifiManager: Send {
    /// Error type for Wi-Fi operations
    type Error: fmt::Debug;

    /// Bring up the Wi-Fi stack
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Join an access point and wait for an address
    ///
    /// `None` waits without a deadline.
    fn connect(
        &mut self,
        params: &WifiConnectParams,
        timeout: Option<Duration>,
    ) -> Result<IpInfo, Self::Error>;

    /// Leave the access point
    fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Check if associated with an access point
    fn is_connected(&self) -> bool;

    /// DNS server learned from DHCP
    fn dns_server(&self, index: usize) -> Option<IpAddr>;

    /// Tear the Wi-Fi stack down
    fn deinit(&mut self) -> Result<(), Self::Error>;
}
