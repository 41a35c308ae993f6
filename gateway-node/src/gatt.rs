//! GATT server surface: attribute database, event handler and notifier
//!
//! The platform BLE stack delivers every event to [`GattHandler::handle_event`]
//! from its callback context. The handler only touches the attribute table and
//! enqueues work for the BLE bridge; nothing here blocks on the modem.

use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};

use gateway_mcu::{
    AttributeRequest, CCCD_INDICATION, CCCD_NOTIFICATION, DEFAULT_MTU, GattEvent, GattResponse,
    GattServer, GattStatus, attr_type,
};
use gateway_proto::ble::{
    CONTROL_UUID, GATEWAY_SERVICE_UUID, MODEM_ACK_UUID, MODEM_CLOSE_UUID, MODEM_HANDLE_UUID,
    MODEM_OPEN_UUID, MODEM_TRANSRECEIVE_UUID, STATUS_UUID, UICC_SERVICE_UUID,
};
use gateway_proto::response_chunk_capacity;
use log::*;
use uuid::Uuid;

use crate::ble_modem::BridgeMsg;
use crate::gatt_db::{Attribute, AttributeTable, Permissions, TableError};
use crate::lock;
use crate::orchestrator::OrchestratorError;
use crate::status::StatusListener;

/// Attribute handles of the gateway's GATT database
pub mod handles {
    pub const UICC_SERVICE: u16 = 0x0028;
    pub const MODEM_OPEN_DECL: u16 = 0x0029;
    pub const MODEM_OPEN_VALUE: u16 = 0x002a;
    pub const MODEM_CLOSE_DECL: u16 = 0x002b;
    pub const MODEM_CLOSE_VALUE: u16 = 0x002c;
    pub const MODEM_TRANSRECEIVE_DECL: u16 = 0x002d;
    pub const MODEM_TRANSRECEIVE_VALUE: u16 = 0x002e;
    pub const MODEM_TRANSRECEIVE_CCCD: u16 = 0x002f;
    pub const MODEM_HANDLE_DECL: u16 = 0x0030;
    pub const MODEM_HANDLE_VALUE: u16 = 0x0031;
    pub const MODEM_HANDLE_CCCD: u16 = 0x0032;
    pub const MODEM_ACK_DECL: u16 = 0x0033;
    pub const MODEM_ACK_VALUE: u16 = 0x0034;
    pub const MODEM_ACK_CCCD: u16 = 0x0035;

    pub const GATEWAY_SERVICE: u16 = 0x0040;
    pub const CONTROL_DECL: u16 = 0x0041;
    pub const CONTROL_VALUE: u16 = 0x0042;
    pub const STATUS_DECL: u16 = 0x0043;
    pub const STATUS_VALUE: u16 = 0x0044;
    pub const STATUS_CCCD: u16 = 0x0045;
}

/// Characteristic property bits
mod props {
    pub const READ: u8 = 0x02;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
}

/// Longest UICC port name plus its terminator
pub const MODEM_OPEN_CAPACITY: usize = 33;
const MODEM_CLOSE_CAPACITY: usize = 4;
const MODEM_HANDLE_CAPACITY: usize = 4;
const MODEM_ACK_CAPACITY: usize = 1;
const CONTROL_CAPACITY: usize = 2;
const STATUS_CAPACITY: usize = 64;

/// 128-bit UUIDs go on the air little-endian
fn uuid_le(uuid: &Uuid) -> [u8; 16] {
    uuid.as_u128().to_le_bytes()
}

fn service(handle: u16, uuid: &Uuid) -> Attribute {
    Attribute::fixed(handle, attr_type::PRIMARY_SERVICE, uuid_le(uuid).to_vec())
}

fn declaration(handle: u16, properties: u8, uuid: &Uuid) -> Attribute {
    let mut value = vec![properties];
    value.extend_from_slice(&(handle + 1).to_le_bytes());
    value.extend_from_slice(&uuid_le(uuid));
    Attribute::fixed(handle, attr_type::CHARACTERISTIC, value)
}

fn build_table(transreceive_capacity: usize) -> Result<AttributeTable, TableError> {
    use handles::*;

    AttributeTable::new(vec![
        service(UICC_SERVICE, &UICC_SERVICE_UUID),
        declaration(MODEM_OPEN_DECL, props::WRITE, &MODEM_OPEN_UUID),
        Attribute::value(MODEM_OPEN_VALUE, Permissions::WRITE, MODEM_OPEN_CAPACITY),
        declaration(MODEM_CLOSE_DECL, props::WRITE, &MODEM_CLOSE_UUID),
        Attribute::value(MODEM_CLOSE_VALUE, Permissions::WRITE, MODEM_CLOSE_CAPACITY),
        declaration(
            MODEM_TRANSRECEIVE_DECL,
            props::WRITE | props::NOTIFY,
            &MODEM_TRANSRECEIVE_UUID,
        ),
        Attribute::value(MODEM_TRANSRECEIVE_VALUE, Permissions::WRITE, transreceive_capacity),
        Attribute::cccd(MODEM_TRANSRECEIVE_CCCD),
        declaration(MODEM_HANDLE_DECL, props::READ | props::NOTIFY, &MODEM_HANDLE_UUID),
        Attribute::value(MODEM_HANDLE_VALUE, Permissions::READ, MODEM_HANDLE_CAPACITY),
        Attribute::cccd(MODEM_HANDLE_CCCD),
        declaration(MODEM_ACK_DECL, props::READ | props::NOTIFY, &MODEM_ACK_UUID),
        Attribute::value(MODEM_ACK_VALUE, Permissions::READ, MODEM_ACK_CAPACITY),
        Attribute::cccd(MODEM_ACK_CCCD),
        service(GATEWAY_SERVICE, &GATEWAY_SERVICE_UUID),
        declaration(CONTROL_DECL, props::WRITE, &CONTROL_UUID),
        Attribute::value(CONTROL_VALUE, Permissions::WRITE, CONTROL_CAPACITY),
        declaration(STATUS_DECL, props::READ | props::NOTIFY, &STATUS_UUID),
        Attribute::value(STATUS_VALUE, Permissions::READ, STATUS_CAPACITY),
        Attribute::cccd(STATUS_CCCD),
    ])
}

#[derive(Debug, Clone, Copy)]
struct ConnectionState {
    /// Zero while no client is connected
    conn_id: u16,
    mtu: u16,
    peer: [u8; 6],
}

/// Attribute table plus the state of the one client connection
#[derive(Debug)]
pub struct GattDatabase {
    table: Mutex<AttributeTable>,
    connection: Mutex<ConnectionState>,
    transreceive_capacity: usize,
}

impl GattDatabase {
    pub fn new(transreceive_capacity: usize) -> Result<Self, TableError> {
        Ok(Self {
            table: Mutex::new(build_table(transreceive_capacity)?),
            connection: Mutex::new(ConnectionState {
                conn_id: 0,
                mtu: DEFAULT_MTU,
                peer: [0; 6],
            }),
            transreceive_capacity,
        })
    }

    pub fn conn_id(&self) -> Option<u16> {
        let conn = lock(&self.connection);
        (conn.conn_id != 0).then_some(conn.conn_id)
    }

    pub fn mtu(&self) -> u16 {
        lock(&self.connection).mtu
    }

    /// Address of the connected client
    pub fn peer(&self) -> Option<[u8; 6]> {
        let conn = lock(&self.connection);
        (conn.conn_id != 0).then_some(conn.peer)
    }

    /// Current value of an attribute, as a client read would see it
    pub fn value(&self, handle: u16) -> Option<Vec<u8>> {
        self.table().get(handle).map(|a| a.value.clone())
    }

    /// Whether the client asked for notifications on a characteristic value
    ///
    /// Every notifying characteristic keeps its CCCD right after the value.
    pub fn notifications_enabled(&self, value_handle: u16) -> bool {
        self.table().cccd(value_handle + 1) & (CCCD_NOTIFICATION | CCCD_INDICATION) != 0
    }

    /// Payload bytes per transreceive response chunk on this connection
    pub fn response_chunk_capacity(&self) -> Option<usize> {
        response_chunk_capacity(self.mtu(), self.transreceive_capacity)
    }

    fn table(&self) -> MutexGuard<'_, AttributeTable> {
        lock(&self.table)
    }
}

/// Stores server-side values and pushes them to the client
pub struct Notifier<G: GattServer> {
    db: Arc<GattDatabase>,
    server: Arc<Mutex<G>>,
}

impl<G: GattServer> Clone for Notifier<G> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            server: self.server.clone(),
        }
    }
}

impl<G: GattServer> Notifier<G> {
    pub fn new(db: Arc<GattDatabase>, server: G) -> Self {
        Self {
            db,
            server: Arc::new(Mutex::new(server)),
        }
    }

    pub fn database(&self) -> &Arc<GattDatabase> {
        &self.db
    }

    /// True when a client is connected and subscribed to `value_handle`
    pub fn can_notify(&self, value_handle: u16) -> bool {
        self.db.conn_id().is_some() && self.db.notifications_enabled(value_handle)
    }

    /// Store `value` and notify it if the client subscribed; true if sent
    pub fn update_and_notify(&self, value_handle: u16, value: &[u8]) -> bool {
        if let Err(e) = self.db.table().set_value(value_handle, value) {
            error!("cannot store value for {value_handle:#06x}: {e}");
            return false;
        }
        let Some(conn_id) = self.db.conn_id() else {
            return false;
        };
        if !self.db.notifications_enabled(value_handle) {
            return false;
        }
        match lock(&self.server).send_notification(conn_id, value_handle, value) {
            Ok(()) => true,
            Err(e) => {
                error!("notification on {value_handle:#06x} failed: {e:?}");
                false
            }
        }
    }

    pub fn start_advertising_if_off(&self) {
        let mut server = lock(&self.server);
        if server.is_advertising() {
            return;
        }
        match server.start_advertising() {
            Ok(()) => info!("advertising started"),
            Err(e) => error!("failed to start advertising: {e:?}"),
        }
    }
}

impl<G: GattServer + 'static> Notifier<G> {
    /// Listener that mirrors task status into the status characteristic
    pub fn status_listener(&self) -> StatusListener {
        let notifier = self.clone();
        Box::new(move |task, status| {
            let mut text = format!("{task}: {status}");
            text.truncate(STATUS_CAPACITY);
            notifier.update_and_notify(handles::STATUS_VALUE, text.as_bytes());
        })
    }
}

/// Where control characteristic writes go
pub trait ControlSink: Send + Sync {
    fn control(&self, command: &[u8]) -> Result<(), OrchestratorError>;
}

pub struct GattHandler {
    db: Arc<GattDatabase>,
    bridge: Option<SyncSender<BridgeMsg>>,
    control: Mutex<Option<Arc<dyn ControlSink>>>,
    local_mtu: u16,
}

impl GattHandler {
    pub fn new(db: Arc<GattDatabase>, bridge: Option<SyncSender<BridgeMsg>>, local_mtu: u16) -> Self {
        Self {
            db,
            bridge,
            control: Mutex::new(None),
            local_mtu: local_mtu.max(DEFAULT_MTU),
        }
    }

    pub fn set_control(&self, sink: Arc<dyn ControlSink>) {
        *lock(&self.control) = Some(sink);
    }

    pub fn database(&self) -> &Arc<GattDatabase> {
        &self.db
    }

    /// Dispatch one event from the BLE stack
    pub fn handle_event(&self, event: GattEvent) -> Result<GattResponse, GattStatus> {
        match event {
            GattEvent::Connected { conn_id, peer } => {
                info!("client {peer:02x?} connected, conn id {conn_id}");
                *lock(&self.db.connection) = ConnectionState {
                    conn_id,
                    mtu: DEFAULT_MTU,
                    peer,
                };
                Ok(GattResponse::None)
            }
            GattEvent::Disconnected { conn_id, reason } => {
                info!("client disconnected, conn id {conn_id}, reason {reason:#04x}");
                {
                    let mut conn = lock(&self.db.connection);
                    conn.conn_id = 0;
                    conn.mtu = DEFAULT_MTU;
                    conn.peer = [0; 6];
                }
                self.db.table().clear_cccds();
                self.post(BridgeMsg::Disconnected)?;
                Ok(GattResponse::None)
            }
            GattEvent::Request { conn_id, request } => self.handle_request(conn_id, request),
            GattEvent::GetResponseBuffer { len } => {
                debug!("response buffer of {len} bytes requested");
                Ok(GattResponse::None)
            }
            GattEvent::AppBufferTransmitted => Ok(GattResponse::None),
        }
    }

    fn handle_request(&self, conn_id: u16, request: AttributeRequest) -> Result<GattResponse, GattStatus> {
        match request {
            AttributeRequest::Read { handle, offset, max_len } => {
                self.db.table().read(handle, offset, max_len).map(GattResponse::Value)
            }
            AttributeRequest::ReadByType {
                start,
                end,
                attr_type,
                max_len,
            } => self
                .db
                .table()
                .read_by_type(start, end, attr_type, max_len)
                .map(GattResponse::Value),
            AttributeRequest::Write { handle, value } => self.handle_write(handle, value),
            AttributeRequest::MtuExchange { remote_mtu } => {
                let mtu = remote_mtu.clamp(DEFAULT_MTU, self.local_mtu);
                lock(&self.db.connection).mtu = mtu;
                info!("conn {conn_id}: mtu {mtu}");
                Ok(GattResponse::Mtu(self.local_mtu))
            }
            AttributeRequest::HandleValueConfirmed { handle } => {
                debug!("conn {conn_id}: confirmation for {handle:#06x}");
                Ok(GattResponse::None)
            }
        }
    }

    fn handle_write(&self, handle: u16, value: Vec<u8>) -> Result<GattResponse, GattStatus> {
        self.db.table().write(handle, &value)?;

        match handle {
            handles::MODEM_OPEN_VALUE => self.post(BridgeMsg::ModemOpen(value))?,
            handles::MODEM_CLOSE_VALUE => self.post(BridgeMsg::ModemClose(value))?,
            handles::MODEM_TRANSRECEIVE_VALUE => self.post(BridgeMsg::TransReceive(value))?,
            handles::CONTROL_VALUE => {
                let sink = lock(&self.control).clone();
                let Some(sink) = sink else {
                    warn!("control write with no orchestrator attached");
                    return Err(GattStatus::WriteNotPermitted);
                };
                sink.control(&value).map_err(|e| {
                    warn!("control write rejected: {e}");
                    GattStatus::ValueNotAllowed
                })?;
            }
            _ => debug!("cccd {handle:#06x} set to {value:02x?}"),
        }
        Ok(GattResponse::Written)
    }

    fn post(&self, msg: BridgeMsg) -> Result<(), GattStatus> {
        let Some(bridge) = &self.bridge else {
            debug!("no modem bridge, dropping {msg:?}");
            return Ok(());
        };
        match bridge.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => {
                warn!("bridge queue full, dropping {msg:?}");
                Err(GattStatus::InsufficientResources)
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("bridge task is gone");
                Err(GattStatus::InsufficientResources)
            }
        }
    }
}
