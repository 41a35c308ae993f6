//! Which registered link carries default traffic

use std::sync::{Arc, Mutex};

use gateway_mcu::ConnectivityType;

use crate::link::Link;
use crate::lock;

#[derive(Debug)]
pub struct Routes {
    wifi: Option<Arc<Link>>,
    cellular: Option<Arc<Link>>,
    default: Mutex<ConnectivityType>,
}

impl Routes {
    pub fn new(wifi: Option<Arc<Link>>, cellular: Option<Arc<Link>>, default: ConnectivityType) -> Self {
        Self {
            wifi,
            cellular,
            default: Mutex::new(default),
        }
    }

    pub fn default_io(&self) -> ConnectivityType {
        *lock(&self.default)
    }

    pub fn link(&self, kind: ConnectivityType) -> Option<&Arc<Link>> {
        match kind {
            ConnectivityType::WifiStation => self.wifi.as_ref(),
            ConnectivityType::Cellular => self.cellular.as_ref(),
            ConnectivityType::None => None,
        }
    }

    /// Registered links, Wi-Fi first
    pub fn links(&self) -> impl Iterator<Item = &Arc<Link>> {
        self.wifi.iter().chain(self.cellular.iter())
    }

    /// True when the default link is up
    pub fn default_ready(&self) -> bool {
        self.link(self.default_io()).is_some_and(|link| link.is_up())
    }

    pub(crate) fn set_default(&self, kind: ConnectivityType) {
        *lock(&self.default) = kind;
    }
}
