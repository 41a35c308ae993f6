//! Wi-Fi station transport

use std::net::IpAddr;
use std::time::Duration;

use gateway_mcu::{ConnectivityType, IpInfo, IpLostHook, WifiConnectParams, WifiCredentials, WifiManager};

use crate::lifecycle::{ConnectError, Transport};

pub struct WifiTransport<W: WifiManager> {
    manager: W,
    params: WifiConnectParams,
    connect_timeout: Option<Duration>,
}

impl<W: WifiManager> WifiTransport<W> {
    pub fn new(manager: W, credentials: WifiCredentials, connect_timeout: Option<Duration>) -> Self {
        Self {
            manager,
            params: credentials.into(),
            connect_timeout,
        }
    }

    /// Report address loss from the connection manager through `hook`
    pub fn on_ip_lost(mut self, hook: IpLostHook) -> Self {
        self.params.on_ip_lost = Some(hook);
        self
    }
}

impl<W: WifiManager> Transport for WifiTransport<W> {
    fn kind(&self) -> ConnectivityType {
        ConnectivityType::WifiStation
    }

    fn init(&mut self) -> Result<(), ConnectError> {
        self.manager
            .init()
            .map_err(|e| ConnectError::Failed(format!("wifi init: {e:?}")))
    }

    fn connect(&mut self) -> Result<IpInfo, ConnectError> {
        log::info!("connecting to access point '{}'", self.params.credentials.ssid);
        self.manager
            .connect(&self.params, self.connect_timeout)
            .map_err(|e| ConnectError::Failed(format!("{e:?}")))
    }

    fn disconnect(&mut self) -> Result<(), ConnectError> {
        self.manager
            .disconnect()
            .map_err(|e| ConnectError::Failed(format!("{e:?}")))
    }

    fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    fn dns_servers(&self) -> Vec<IpAddr> {
        self.manager.dns_server(0).into_iter().collect()
    }

    fn deinit(&mut self) {
        if let Err(e) = self.manager.deinit() {
            log::error!("wifi deinit failed: {e:?}");
        }
    }
}
