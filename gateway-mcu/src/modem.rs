//! Cellular Modem Abstraction Traits
//!
//! The modem is a single physical resource used two ways: as a PPP data
//! link, and as a command channel for raw UICC (SIM) transactions. Platform
//! crates implement [`ModemManager`] over their PPP connection manager and
//! [`UiccModem`] over their UICC driver.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::IpLostHook;
use crate::wifi::IpInfo;

/// Operating mode of an open modem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemMode {
    /// AT command mode
    Command,
    /// PPP data mode
    Ppp,
}

impl fmt::Display for ModemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModemMode::Command => f.write_str("command"),
            ModemMode::Ppp => f.write_str("ppp"),
        }
    }
}

/// PPP authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PppAuth {
    None,
    Pap,
    Chap,
}

/// Parameters for opening the modem
#[derive(Debug, Clone)]
pub struct ModemConnectParams {
    /// Bring up PPP after opening; `false` leaves the modem in command mode
    pub connect_ppp: bool,
    pub apn: String,
    pub username: String,
    pub password: String,
    pub auth: PppAuth,
    /// Fired when PPP loses its address after connecting
    pub on_ip_lost: Option<IpLostHook>,
}

impl ModemConnectParams {
    /// Open in command mode only
    pub fn command_mode() -> Self {
        Self {
            connect_ppp: false,
            apn: String::new(),
            username: String::new(),
            password: String::new(),
            auth: PppAuth::None,
            on_ip_lost: None,
        }
    }
}

/// Errors reported by the modem connection manager
///
/// Callers branch on these, so this is a concrete type rather than an
/// associated one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModemError {
    #[error("modem is not open")]
    NotOpen,
    #[error("modem is in use by another session")]
    InUse,
    #[error("modem operation timed out")]
    Timeout,
    #[error("modem operation failed: {0}")]
    Failed(String),
}

/// Trait for the modem / PPP connection manager
pub trait ModemManager: Send {
    /// Bring up the connection manager
    fn init(&mut self) -> Result<(), ModemError>;

    /// Open the modem, optionally bringing up PPP
    ///
    /// Returns the PPP address when `params.connect_ppp` is set.
    fn connect_modem(
        &mut self,
        params: &ModemConnectParams,
        timeout: Option<Duration>,
    ) -> Result<Option<IpInfo>, ModemError>;

    /// Close the modem (and PPP, if up)
    fn disconnect_modem(&mut self, timeout: Option<Duration>) -> Result<(), ModemError>;

    /// Mode of the open modem; `NotOpen` when closed
    fn modem_mode(&self) -> Result<ModemMode, ModemError>;

    /// Switch an open modem between command and PPP mode
    fn change_modem_mode(&mut self, mode: ModemMode, timeout: Duration) -> Result<(), ModemError>;

    /// DNS server negotiated over PPP
    fn dns_server(&self, index: usize) -> Option<IpAddr>;

    /// Tear the connection manager down
    fn deinit(&mut self) -> Result<(), ModemError>;
}

/// Trait for raw UICC command exchange over a modem serial port
pub trait UiccModem: Send {
    /// Error type for UICC operations
    type Error: fmt::Debug;

    /// Open a UICC session on a serial port, returning its handle
    fn open(&mut self, port: &str) -> Result<u32, Self::Error>;

    /// Close a session
    fn close(&mut self, handle: u32) -> Result<(), Self::Error>;

    /// Send one command APDU sequence and return the response
    fn trans_receive(&mut self, handle: u32, command: &[u8]) -> Result<Vec<u8>, Self::Error>;
}
