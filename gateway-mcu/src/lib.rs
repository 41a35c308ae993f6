//! Gateway MCU Library
//!
//! Traits for the platform services the gateway firmware drives but does not
//! implement itself. A board support crate (or the host simulator in
//! `gateway-device`) provides one implementation of each.
//!
//! This crate provides:
//! - Wi-Fi station manager
//! - Cellular modem / PPP connection manager and the UICC command channel
//! - MQTT client
//! - BLE GATT server events and notification sink
//! - Network stack routing (default interface, DNS)
//! - Console keystroke input and line output
//! - The device output the MQTT subscriber drives

pub mod ble;
pub mod console;
pub mod modem;
pub mod mqtt;
pub mod net;
pub mod output;
pub mod wifi;

pub use ble::*;
pub use console::*;
pub use modem::*;
pub use mqtt::*;
pub use net::*;
pub use output::*;
pub use wifi::*;
