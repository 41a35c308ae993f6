//! BLE modem bridge: UICC sessions for a BLE client
//!
//! The client opens a session by writing a port name, exchanges commands as
//! chunked writes on the transreceive characteristic and closes the session by
//! writing the handle back. Each inbound chunk is acked on the ack
//! characteristic before the client may send the next one. Responses go back
//! as chunked notifications on the transreceive characteristic.
//!
//! While a session is open the bridge holds a [`ModemLease`], so PPP and the
//! UICC never drive the modem at the same time.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;

use data_encoding::HEXLOWER;
use gateway_mcu::{GattServer, UiccModem};
use gateway_proto::{
    ACK_TRANSRECEIVE_CHUNK, INVALID_HANDLE, Reassembler, Reassembly, RequestChunk, response_chunks,
};
use log::*;

use crate::arbiter::{ModemArbiter, ModemLease};
use crate::config::BleConfig;
use crate::gatt::{Notifier, handles};

/// Work the GATT handler hands to the bridge
#[derive(Debug)]
pub enum BridgeMsg {
    /// Client went away: end its session and advertise again
    Disconnected,
    ModemOpen(Vec<u8>),
    ModemClose(Vec<u8>),
    TransReceive(Vec<u8>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub acquire_timeout: Duration,
    /// Pause between response notifications
    pub chunk_interval: Duration,
    pub reassembly_capacity: usize,
    pub port_name_max: usize,
}

impl From<&BleConfig> for BridgeSettings {
    fn from(config: &BleConfig) -> Self {
        Self {
            acquire_timeout: config.acquire_timeout(),
            chunk_interval: config.chunk_interval(),
            reassembly_capacity: config.reassembly_capacity,
            port_name_max: crate::gatt::MODEM_OPEN_CAPACITY - 1,
        }
    }
}

pub struct BleModemBridge<U: UiccModem, G: GattServer> {
    uicc: U,
    arbiter: Option<Arc<ModemArbiter>>,
    notifier: Notifier<G>,
    settings: BridgeSettings,
    lease: Option<ModemLease>,
    handle: u32,
    reassembler: Reassembler,
}

impl<U: UiccModem, G: GattServer> BleModemBridge<U, G> {
    pub fn new(
        uicc: U,
        arbiter: Option<Arc<ModemArbiter>>,
        notifier: Notifier<G>,
        settings: BridgeSettings,
    ) -> Self {
        let reassembler = Reassembler::new(settings.reassembly_capacity);
        Self {
            uicc,
            arbiter,
            notifier,
            settings,
            lease: None,
            handle: INVALID_HANDLE,
            reassembler,
        }
    }

    /// Task body; returns on Shutdown or when every sender is gone
    pub fn run(mut self, rx: Receiver<BridgeMsg>) {
        info!("BLE modem bridge started");
        self.notifier.start_advertising_if_off();
        for msg in rx.iter() {
            if !self.handle_message(msg) {
                break;
            }
        }
        self.close_session();
        info!("BLE modem bridge exiting");
    }

    /// Returns false once the bridge should stop
    pub(crate) fn handle_message(&mut self, msg: BridgeMsg) -> bool {
        match msg {
            BridgeMsg::Disconnected => {
                if self.handle != INVALID_HANDLE {
                    warn!("client left with modem session {:#010x} open, closing it", self.handle);
                }
                self.close_session();
                self.notifier.start_advertising_if_off();
            }
            BridgeMsg::ModemOpen(value) => self.open(&value),
            BridgeMsg::ModemClose(value) => self.close(&value),
            BridgeMsg::TransReceive(value) => self.trans_receive(&value),
            BridgeMsg::Shutdown => return false,
        }
        true
    }

    fn open(&mut self, value: &[u8]) {
        let name = value.split(|b| *b == 0).next().unwrap_or_default();
        let name = match std::str::from_utf8(name) {
            Ok(name) if !name.is_empty() && name.len() <= self.settings.port_name_max => name,
            _ => {
                warn!("ignoring modem open with bad port name {}", HEXLOWER.encode(value));
                return;
            }
        };

        if self.handle != INVALID_HANDLE {
            warn!("modem session {:#010x} already open, ignoring open of {name}", self.handle);
            return;
        }

        let lease = match &self.arbiter {
            Some(arbiter) => match arbiter.acquire(self.settings.acquire_timeout) {
                Ok(lease) => Some(lease),
                Err(e) => {
                    warn!("cannot take the modem for {name}: {e}");
                    self.publish_handle();
                    return;
                }
            },
            None => None,
        };

        match self.uicc.open(name) {
            Ok(handle) if handle != INVALID_HANDLE => {
                info!("modem session {handle:#010x} opened on {name}");
                self.handle = handle;
                self.lease = lease;
                self.reassembler.clear();
            }
            Ok(_) => {
                error!("uicc open of {name} returned the invalid handle");
                drop(lease);
            }
            Err(e) => {
                error!("uicc open of {name} failed: {e:?}");
                drop(lease);
            }
        }
        self.publish_handle();
    }

    fn close(&mut self, value: &[u8]) {
        let Ok(bytes) = <[u8; 4]>::try_from(value) else {
            warn!("ignoring modem close with {} byte handle", value.len());
            return;
        };
        let handle = u32::from_le_bytes(bytes);
        if handle == INVALID_HANDLE || handle != self.handle {
            warn!("ignoring close of stale handle {handle:#010x}");
            return;
        }
        self.close_session();
    }

    /// Close the UICC session, then give the modem back
    fn close_session(&mut self) {
        if self.handle != INVALID_HANDLE {
            let handle = std::mem::replace(&mut self.handle, INVALID_HANDLE);
            match self.uicc.close(handle) {
                Ok(()) => info!("modem session {handle:#010x} closed"),
                Err(e) => error!("closing modem session {handle:#010x} failed: {e:?}"),
            }
            self.reassembler.clear();
            self.publish_handle();
        }
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
    }

    fn publish_handle(&self) {
        self.notifier
            .update_and_notify(handles::MODEM_HANDLE_VALUE, &self.handle.to_le_bytes());
    }

    fn trans_receive(&mut self, value: &[u8]) {
        let chunk = match RequestChunk::from_bytes(value) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("dropping malformed chunk: {e}");
                return;
            }
        };
        if self.handle == INVALID_HANDLE || chunk.handle != self.handle {
            debug!("ignoring chunk for handle {:#010x}", chunk.handle);
            return;
        }
        debug!("chunk {:?}: {}", chunk.indicator, HEXLOWER.encode(&chunk.data));

        match self.reassembler.push(chunk.indicator, &chunk.data) {
            Reassembly::Appended => self.ack(),
            Reassembly::Empty => {}
            Reassembly::Nothing => debug!("last chunk with nothing accumulated"),
            Reassembly::Overflow => warn!(
                "command exceeds {} bytes, discarded",
                self.settings.reassembly_capacity
            ),
            Reassembly::Complete(command) => {
                if !chunk.data.is_empty() {
                    self.ack();
                }
                self.dispatch(&command);
            }
        }
    }

    fn ack(&self) {
        self.notifier
            .update_and_notify(handles::MODEM_ACK_VALUE, &[ACK_TRANSRECEIVE_CHUNK]);
    }

    fn dispatch(&mut self, command: &[u8]) {
        info!("uicc command: {}", HEXLOWER.encode(command));
        match self.uicc.trans_receive(self.handle, command) {
            Ok(response) => {
                info!("uicc response: {}", HEXLOWER.encode(&response));
                self.send_response(&response);
            }
            Err(e) => error!("uicc transreceive failed: {e:?}"),
        }
    }

    /// Sent back-to-back; the client does not ack responses
    fn send_response(&self, response: &[u8]) {
        let Some(capacity) = self.notifier.database().response_chunk_capacity() else {
            error!("mtu {} too small for a response chunk", self.notifier.database().mtu());
            return;
        };
        if !self.notifier.can_notify(handles::MODEM_TRANSRECEIVE_VALUE) {
            warn!("client not subscribed to responses, dropping {} bytes", response.len());
            return;
        }

        let chunks = response_chunks(response, capacity);
        let count = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 && !self.settings.chunk_interval.is_zero() {
                thread::sleep(self.settings.chunk_interval);
            }
            if !self
                .notifier
                .update_and_notify(handles::MODEM_TRANSRECEIVE_VALUE, &chunk.to_bytes())
            {
                warn!("response chunk {}/{count} not delivered, abandoning response", i + 1);
                return;
            }
        }
        debug!("response sent in {count} chunks of up to {capacity} bytes");
    }
}
