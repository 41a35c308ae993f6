//! Cellular (PPP over modem) transport
//!
//! Opens and closes its data session through the [`ModemArbiter`], so a BLE
//! lease and PPP never drive the modem at the same time.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use gateway_mcu::{ConnectivityType, IpInfo, IpLostHook, ModemConnectParams, ModemError};

use crate::arbiter::{ArbiterError, ModemArbiter};
use crate::lifecycle::{ConnectError, Transport};

/// PPP negotiates a primary and a secondary resolver
const PPP_DNS_SERVERS: usize = 2;

pub struct CellularTransport {
    arbiter: Arc<ModemArbiter>,
    params: ModemConnectParams,
    connect_timeout: Option<Duration>,
    disconnect_timeout: Option<Duration>,
}

impl CellularTransport {
    pub fn new(
        arbiter: Arc<ModemArbiter>,
        params: ModemConnectParams,
        connect_timeout: Option<Duration>,
        disconnect_timeout: Option<Duration>,
    ) -> Self {
        Self {
            arbiter,
            params,
            connect_timeout,
            disconnect_timeout,
        }
    }

    /// Report PPP address loss from the connection manager through `hook`
    pub fn on_ip_lost(mut self, hook: IpLostHook) -> Self {
        self.params.on_ip_lost = Some(hook);
        self
    }
}

impl From<ArbiterError> for ConnectError {
    fn from(e: ArbiterError) -> Self {
        match e {
            ArbiterError::AlreadyInUse | ArbiterError::Modem(ModemError::InUse) => ConnectError::ModemInUse,
            ArbiterError::Busy | ArbiterError::Modem(ModemError::Timeout) => ConnectError::Timeout,
            other => ConnectError::Failed(other.to_string()),
        }
    }
}

impl Transport for CellularTransport {
    fn kind(&self) -> ConnectivityType {
        ConnectivityType::Cellular
    }

    fn init(&mut self) -> Result<(), ConnectError> {
        self.arbiter
            .init()
            .map_err(|e| ConnectError::Failed(format!("modem init: {e}")))
    }

    fn connect(&mut self) -> Result<IpInfo, ConnectError> {
        log::info!("bringing up ppp on apn '{}'", self.params.apn);
        self.arbiter
            .open_data_session(&self.params, self.connect_timeout)?
            .ok_or_else(|| ConnectError::Failed("ppp came up without an address".to_string()))
    }

    fn disconnect(&mut self) -> Result<(), ConnectError> {
        self.arbiter.close_data_session(self.disconnect_timeout)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.arbiter.has_data_session()
    }

    fn dns_servers(&self) -> Vec<IpAddr> {
        self.arbiter.dns_servers(PPP_DNS_SERVERS)
    }

    fn deinit(&mut self) {
        if let Err(e) = self.arbiter.deinit() {
            log::error!("modem deinit failed: {e}");
        }
    }
}
