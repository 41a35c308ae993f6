//! Simulated board collaborators
//!
//! Stand-ins for the Wi-Fi connection manager, the cellular modem, the UICC
//! channel, the BLE stack, the MQTT client, the network stack and the LED.
//! They succeed after a short delay and log what the firmware asked of them,
//! which is enough to drive every task through its lifecycle from the
//! console. With an address lifetime set, Wi-Fi and PPP report losing their
//! address that long after each connect.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use data_encoding::HEXLOWER;
use gateway_mcu::{
    BrokerInfo, ConnectInfo, ConnectivityType, DeviceOutput, GattServer, IpInfo, IpLostHook, ModemConnectParams,
    ModemError, ModemManager, ModemMode, MqttClient, MqttEventCallback, NetStack, Publish, Subscription,
    TlsMaterial, UiccModem, WifiConnectParams, WifiManager,
};
use gateway_node::{Collaborators, Platform};
use log::*;

use crate::console::StdinConsole;

const WIFI_ASSOCIATE: Duration = Duration::from_millis(800);
const MODEM_DIAL: Duration = Duration::from_millis(1500);
const MODE_SWITCH: Duration = Duration::from_millis(200);
const SIM_HANDLE: u32 = 0x0000_0001;

fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(a, b, c, d))
}

pub struct Simulator;

impl Platform for Simulator {
    type Wifi = SimWifi;
    type Uicc = SimUicc;
    type Gatt = SimGatt;
    type Mqtt = SimMqtt;
    type Net = SimNet;
    type Console = StdinConsole;
}

/// Every collaborator the simulator offers
///
/// `address_lifetime` makes each Wi-Fi and PPP address expire that long after
/// it was assigned.
pub fn collaborators(console: StdinConsole, address_lifetime: Option<Duration>) -> Collaborators<Simulator> {
    Collaborators::new(SimNet)
        .wifi(SimWifi::new(address_lifetime))
        .modem(SimModem::new(address_lifetime))
        .ble(SimUicc::default(), SimGatt::default())
        .mqtt(SimMqtt::default(), LogLed)
        .console(console)
}

/// Address expiry for one simulated link
///
/// Every connect or disconnect starts a new lease; only the lease that is
/// still current when its lifetime runs out reports the loss.
#[derive(Default)]
struct AddressLease {
    lifetime: Option<Duration>,
    current: Arc<AtomicU64>,
}

impl AddressLease {
    fn new(lifetime: Option<Duration>) -> Self {
        Self {
            lifetime,
            current: Arc::default(),
        }
    }

    fn renew(&self, link: &'static str, hook: Option<&IpLostHook>) {
        let lease = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        let (Some(lifetime), Some(hook)) = (self.lifetime, hook) else {
            return;
        };
        let current = self.current.clone();
        let hook = hook.clone();
        let spawned = thread::Builder::new().name("sim-dhcp".into()).spawn(move || {
            thread::sleep(lifetime);
            if current.load(Ordering::Acquire) == lease {
                warn!("sim {link}: address expired");
                hook.fire();
            }
        });
        if let Err(e) = spawned {
            error!("sim {link}: cannot schedule address expiry: {e}");
        }
    }

    fn end(&self) {
        self.current.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
pub struct SimWifi {
    connected: bool,
    lease: AddressLease,
}

impl SimWifi {
    pub fn new(address_lifetime: Option<Duration>) -> Self {
        Self {
            connected: false,
            lease: AddressLease::new(address_lifetime),
        }
    }
}

impl WifiManager for SimWifi {
    type Error = String;

    fn init(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn connect(&mut self, params: &WifiConnectParams, _timeout: Option<Duration>) -> Result<IpInfo, String> {
        let credentials = &params.credentials;
        info!("sim wifi: joining {:?} ({:?})", credentials.ssid, credentials.security);
        thread::sleep(WIFI_ASSOCIATE);
        self.connected = true;
        self.lease.renew("wifi", params.on_ip_lost.as_ref());
        Ok(IpInfo {
            ip: v4(192, 168, 1, 20),
            gateway: Some(v4(192, 168, 1, 1)),
        })
    }

    fn disconnect(&mut self) -> Result<(), String> {
        self.connected = false;
        self.lease.end();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn dns_server(&self, index: usize) -> Option<IpAddr> {
        (self.connected && index == 0).then(|| v4(192, 168, 1, 1))
    }

    fn deinit(&mut self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Default)]
pub struct SimModem {
    mode: Option<ModemMode>,
    lease: AddressLease,
}

impl SimModem {
    pub fn new(address_lifetime: Option<Duration>) -> Self {
        Self {
            mode: None,
            lease: AddressLease::new(address_lifetime),
        }
    }
}

impl ModemManager for SimModem {
    fn init(&mut self) -> Result<(), ModemError> {
        Ok(())
    }

    fn connect_modem(
        &mut self,
        params: &ModemConnectParams,
        _timeout: Option<Duration>,
    ) -> Result<Option<IpInfo>, ModemError> {
        if self.mode.is_some() {
            return Err(ModemError::InUse);
        }
        thread::sleep(MODEM_DIAL);
        if params.connect_ppp {
            info!("sim modem: PPP up on APN {}", params.apn);
            self.mode = Some(ModemMode::Ppp);
            self.lease.renew("ppp", params.on_ip_lost.as_ref());
            Ok(Some(IpInfo::new(v4(10, 64, 0, 2))))
        } else {
            info!("sim modem: opened in command mode");
            self.mode = Some(ModemMode::Command);
            Ok(None)
        }
    }

    fn disconnect_modem(&mut self, _timeout: Option<Duration>) -> Result<(), ModemError> {
        self.lease.end();
        self.mode.take().map(|_| ()).ok_or(ModemError::NotOpen)
    }

    fn modem_mode(&self) -> Result<ModemMode, ModemError> {
        self.mode.ok_or(ModemError::NotOpen)
    }

    fn change_modem_mode(&mut self, mode: ModemMode, _timeout: Duration) -> Result<(), ModemError> {
        let current = self.mode.as_mut().ok_or(ModemError::NotOpen)?;
        thread::sleep(MODE_SWITCH);
        *current = mode;
        Ok(())
    }

    fn dns_server(&self, index: usize) -> Option<IpAddr> {
        match (self.mode, index) {
            (Some(ModemMode::Ppp), 0) => Some(v4(10, 64, 0, 1)),
            (Some(ModemMode::Ppp), 1) => Some(v4(10, 64, 0, 9)),
            _ => None,
        }
    }

    fn deinit(&mut self) -> Result<(), ModemError> {
        Ok(())
    }
}

/// UICC channel that answers every command with status word 90 00
#[derive(Default)]
pub struct SimUicc {
    open: Option<u32>,
}

impl UiccModem for SimUicc {
    type Error = String;

    fn open(&mut self, port: &str) -> Result<u32, String> {
        if self.open.is_some() {
            return Err("session already open".to_string());
        }
        info!("sim uicc: opened {port}");
        self.open = Some(SIM_HANDLE);
        Ok(SIM_HANDLE)
    }

    fn close(&mut self, handle: u32) -> Result<(), String> {
        match self.open {
            Some(open) if open == handle => {
                self.open = None;
                Ok(())
            }
            _ => Err(format!("no session {handle:#010x}")),
        }
    }

    fn trans_receive(&mut self, handle: u32, command: &[u8]) -> Result<Vec<u8>, String> {
        if self.open != Some(handle) {
            return Err(format!("no session {handle:#010x}"));
        }
        debug!("sim uicc: apdu {}", HEXLOWER.encode(command));
        Ok(vec![0x90, 0x00])
    }
}

/// BLE stack with no radio: notifications only reach the log
#[derive(Default)]
pub struct SimGatt {
    advertising: bool,
}

impl GattServer for SimGatt {
    type Error = String;

    fn send_notification(&mut self, conn_id: u16, handle: u16, value: &[u8]) -> Result<(), String> {
        debug!("sim gatt: notify conn {conn_id} {handle:#06x} {}", HEXLOWER.encode(value));
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), String> {
        self.advertising = true;
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.advertising
    }
}

/// Broker that accepts everything and never sends anything
#[derive(Default)]
pub struct SimMqtt {
    callback: Option<MqttEventCallback>,
}

impl MqttClient for SimMqtt {
    type Error = String;

    fn init(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn create(&mut self, broker: &BrokerInfo, tls: Option<&TlsMaterial>, on_event: MqttEventCallback) -> Result<(), String> {
        info!(
            "sim mqtt: client for {}:{} ({})",
            broker.host,
            broker.port,
            if tls.is_some() { "tls" } else { "plain" }
        );
        self.callback = Some(on_event);
        Ok(())
    }

    fn connect(&mut self, session: &ConnectInfo) -> Result<(), String> {
        info!("sim mqtt: connected as {}", session.client_id);
        Ok(())
    }

    fn subscribe(&mut self, subscriptions: &[Subscription]) -> Result<(), String> {
        for s in subscriptions {
            info!("sim mqtt: subscribed to {} ({:?})", s.topic, s.qos);
        }
        Ok(())
    }

    fn unsubscribe(&mut self, _subscriptions: &[Subscription]) -> Result<(), String> {
        Ok(())
    }

    fn publish(&mut self, message: &Publish) -> Result<(), String> {
        info!("sim mqtt: publish {} bytes to {}", message.payload.len(), message.topic);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn delete(&mut self) -> Result<(), String> {
        if self.callback.take().is_some() {
            debug!("sim mqtt: client deleted");
        }
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), String> {
        Ok(())
    }
}

pub struct SimNet;

impl NetStack for SimNet {
    type Error = String;

    fn set_default_interface(&mut self, kind: ConnectivityType) -> Result<(), String> {
        info!("sim net: default route via {kind}");
        Ok(())
    }

    fn set_dns_server(&mut self, index: usize, addr: IpAddr) -> Result<(), String> {
        info!("sim net: dns[{index}] = {addr}");
        Ok(())
    }
}

pub struct LogLed;

impl DeviceOutput for LogLed {
    fn set(&mut self, on: bool) {
        info!("sim led: {}", if on { "on" } else { "off" });
    }
}
