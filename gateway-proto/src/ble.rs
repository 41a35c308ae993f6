//! BLE GATT service constants for the gateway
//!
//! The UICC service carries modem sessions (open, close, chunked
//! transreceive, ack). The gateway service carries task control and status.

use uuid::Uuid;

/// UICC bridge service
pub const UICC_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e3a_1000_5c4f_4b8a_9d2e_7a10_c0de_0001);

/// Modem open characteristic (write: serial port name)
pub const MODEM_OPEN_UUID: Uuid = Uuid::from_u128(0x6e3a_1001_5c4f_4b8a_9d2e_7a10_c0de_0001);

/// Modem close characteristic (write: handle, u32 LE)
pub const MODEM_CLOSE_UUID: Uuid = Uuid::from_u128(0x6e3a_1002_5c4f_4b8a_9d2e_7a10_c0de_0001);

/// Modem transreceive characteristic (write: request chunk, notify: response chunk)
pub const MODEM_TRANSRECEIVE_UUID: Uuid = Uuid::from_u128(0x6e3a_1003_5c4f_4b8a_9d2e_7a10_c0de_0001);

/// Modem handle characteristic (read/notify: u32 LE)
pub const MODEM_HANDLE_UUID: Uuid = Uuid::from_u128(0x6e3a_1004_5c4f_4b8a_9d2e_7a10_c0de_0001);

/// Chunk ack characteristic (read/notify: one byte)
pub const MODEM_ACK_UUID: Uuid = Uuid::from_u128(0x6e3a_1005_5c4f_4b8a_9d2e_7a10_c0de_0001);

/// Gateway control service
pub const GATEWAY_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e3a_2000_5c4f_4b8a_9d2e_7a10_c0de_0001);

/// Control characteristic (write: `[target, action]`)
pub const CONTROL_UUID: Uuid = Uuid::from_u128(0x6e3a_2001_5c4f_4b8a_9d2e_7a10_c0de_0001);

/// Status characteristic (read/notify: `"<task>: <status>"`)
pub const STATUS_UUID: Uuid = Uuid::from_u128(0x6e3a_2002_5c4f_4b8a_9d2e_7a10_c0de_0001);

/// 16-bit attribute types used in the attribute table
pub mod attr_type {
    pub const PRIMARY_SERVICE: u16 = 0x2800;
    pub const CHARACTERISTIC: u16 = 0x2803;
    pub const CLIENT_CHAR_CONFIG: u16 = 0x2902;
    /// Characteristic values carry a 128-bit UUID; the table tags them with this
    pub const CHARACTERISTIC_VALUE: u16 = 0x0000;
}

/// Client characteristic configuration bits
pub const CCCD_NOTIFICATION: u16 = 0x0001;
pub const CCCD_INDICATION: u16 = 0x0002;

/// Control characteristic bytes
pub mod control {
    /// First byte: which task the command is for
    pub const TARGET_WIFI: u8 = 0x01;
    pub const TARGET_CELLULAR: u8 = 0x02;
    pub const TARGET_MQTT: u8 = 0x10;

    /// Second byte: what to do
    pub const ACTION_STOP: u8 = 0x01;
    pub const ACTION_START: u8 = 0x02;
    pub const ACTION_RESTART: u8 = 0x03;
    /// Only valid for I/O targets
    pub const ACTION_SET_DEFAULT: u8 = 0x04;
}
