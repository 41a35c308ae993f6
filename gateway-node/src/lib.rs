//! Gateway Node - task logic for the connectivity gateway
//!
//! This crate holds everything above the platform traits in `gateway-mcu`:
//! the per-task notification signal, the connection lifecycle for Wi-Fi and
//! cellular links, the modem arbiter shared by PPP and the BLE bridge, the
//! BLE chunked transfer bridge, the MQTT app, and the orchestrator that the
//! console menu and the GATT control characteristic drive.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod arbiter;
pub mod ble_modem;
pub mod cellular;
pub mod config;
pub mod gateway;
pub mod gatt;
pub mod gatt_db;
pub mod lifecycle;
pub mod link;
pub mod menu;
pub mod mqtt;
pub mod notification;
pub mod orchestrator;
pub mod routes;
pub mod status;
pub mod subscriber;
pub mod wifi;

#[cfg(test)]
mod testing;

pub use arbiter::{ArbiterError, ModemArbiter, ModemLease};
pub use ble_modem::{BleModemBridge, BridgeMsg, BridgeSettings};
pub use cellular::CellularTransport;
pub use config::{ConfigError, GatewayConfig};
pub use gateway::{BootError, Collaborators, Gateway, Platform};
pub use gatt::{ControlSink, GattDatabase, GattHandler, Notifier};
pub use lifecycle::{ConnectError, Lifecycle, RetryPolicy, Transport};
pub use link::{Addressing, Link};
pub use menu::ConsoleMenu;
pub use mqtt::{MqttHandle, MqttOp, MqttTask};
pub use notification::{Command, Commands, Signal};
pub use orchestrator::{App, Orchestrator, OrchestratorError};
pub use routes::Routes;
pub use status::{CommonStatus, StatusListener, TaskContext};
pub use subscriber::DeviceSwitch;
pub use wifi::WifiTransport;

/// Lock a mutex, carrying on if a panicking task poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
