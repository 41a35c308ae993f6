//! Per-transport context shared between a lifecycle task and its readers

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use gateway_mcu::{ConnectivityType, IpLostHook};
use log::warn;

use crate::lock;
use crate::notification::Command;
use crate::status::{CommonStatus, TaskContext};

/// Addressing a transport published when it came up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Addressing {
    pub ip: Option<IpAddr>,
    pub dns: Vec<IpAddr>,
}

/// One I/O transport (Wi-Fi or Cellular)
#[derive(Debug)]
pub struct Link {
    kind: ConnectivityType,
    ctx: TaskContext,
    addressing: Mutex<Addressing>,
}

impl Link {
    pub fn new(kind: ConnectivityType) -> Self {
        let name = match kind {
            ConnectivityType::WifiStation => "Wi-Fi",
            ConnectivityType::Cellular => "Cellular",
            ConnectivityType::None => "None",
        };
        Self {
            kind,
            ctx: TaskContext::new(name),
            addressing: Mutex::new(Addressing::default()),
        }
    }

    pub fn kind(&self) -> ConnectivityType {
        self.kind
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    pub fn status(&self) -> CommonStatus {
        self.ctx.status()
    }

    /// True while the transport is up and addressed
    pub fn is_up(&self) -> bool {
        self.status() == CommonStatus::Started
    }

    pub fn notify(&self, command: Command) {
        self.ctx.notify(command);
    }

    pub fn addressing(&self) -> Addressing {
        lock(&self.addressing).clone()
    }

    pub fn ip(&self) -> Option<IpAddr> {
        lock(&self.addressing).ip
    }

    pub fn dns(&self) -> Vec<IpAddr> {
        lock(&self.addressing).dns.clone()
    }

    /// Hook for the platform's address-lost callback
    pub fn ip_lost(&self) {
        warn!("{}: IP address lost, restarting", self.ctx.name());
        self.notify(Command::Restart);
    }

    /// Address-lost hook for this link's connection manager
    pub fn ip_lost_hook(self: &Arc<Self>) -> IpLostHook {
        let link = Arc::downgrade(self);
        IpLostHook::new(move || {
            if let Some(link) = link.upgrade() {
                link.ip_lost();
            }
        })
    }

    pub(crate) fn publish(&self, ip: IpAddr, dns: Vec<IpAddr>) {
        *lock(&self.addressing) = Addressing { ip: Some(ip), dns };
    }

    pub(crate) fn clear_addressing(&self) {
        *lock(&self.addressing) = Addressing::default();
    }
}
