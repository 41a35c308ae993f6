//! BLE GATT server types and traits
//!
//! Protocol constants (UUIDs, chunk framing) are in gateway_proto.
//! This module covers the boundary with the platform BLE stack: the events it
//! delivers to the gateway and the calls the gateway makes back into it.

// Re-export protocol constants for convenience
pub use gateway_proto::ble::{CCCD_INDICATION, CCCD_NOTIFICATION, attr_type, control};

use std::fmt;

/// Default ATT MTU before any exchange
pub const DEFAULT_MTU: u16 = 23;

/// Events delivered by the BLE stack's single callback
#[derive(Debug, Clone)]
pub enum GattEvent {
    Connected { conn_id: u16, peer: [u8; 6] },
    Disconnected { conn_id: u16, reason: u16 },
    Request { conn_id: u16, request: AttributeRequest },
    /// The stack wants a buffer for a response of `len` bytes
    GetResponseBuffer { len: usize },
    /// A buffer handed to the stack has been sent
    AppBufferTransmitted,
}

/// Attribute requests from a connected client
#[derive(Debug, Clone)]
pub enum AttributeRequest {
    Read { handle: u16, offset: u16, max_len: u16 },
    ReadByType { start: u16, end: u16, attr_type: u16, max_len: u16 },
    Write { handle: u16, value: Vec<u8> },
    MtuExchange { remote_mtu: u16 },
    /// A notification or indication was confirmed
    HandleValueConfirmed { handle: u16 },
}

/// What the stack should send back for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattResponse {
    Value(Vec<u8>),
    Written,
    Mtu(u16),
    None,
}

/// ATT error codes the gateway reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GattStatus {
    #[error("invalid handle")]
    InvalidHandle,
    #[error("read not permitted")]
    ReadNotPermitted,
    #[error("write not permitted")]
    WriteNotPermitted,
    #[error("invalid offset")]
    InvalidOffset,
    #[error("attribute not found")]
    AttributeNotFound,
    #[error("invalid attribute value length")]
    InvalidAttrLength,
    #[error("insufficient resources")]
    InsufficientResources,
    #[error("value not allowed")]
    ValueNotAllowed,
}

impl GattStatus {
    pub fn code(self) -> u8 {
        match self {
            GattStatus::InvalidHandle => 0x01,
            GattStatus::ReadNotPermitted => 0x02,
            GattStatus::WriteNotPermitted => 0x03,
            GattStatus::InvalidOffset => 0x07,
            GattStatus::AttributeNotFound => 0x0A,
            GattStatus::InvalidAttrLength => 0x0D,
            GattStatus::InsufficientResources => 0x11,
            GattStatus::ValueNotAllowed => 0x13,
        }
    }
}

/// Trait for the calls the gateway makes into the BLE stack
///
/// Platform crates implement this trait using their BLE stack.
pub trait GattServer: Send {
    /// Error type for BLE operations
    type Error: fmt::Debug;

    /// Send an unacknowledged notification
    fn send_notification(&mut self, conn_id: u16, handle: u16, value: &[u8]) -> Result<(), Self::Error>;

    /// Start undirected advertising
    fn start_advertising(&mut self) -> Result<(), Self::Error>;

    /// Check if advertising is on
    fn is_advertising(&self) -> bool;
}
