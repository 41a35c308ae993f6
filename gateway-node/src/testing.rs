//! In-memory collaborators for unit tests

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gateway_mcu::{
    BrokerInfo, Console, ConnectInfo, ConnectivityType, DeviceOutput, GattServer, IpInfo, IpLostHook,
    ModemConnectParams, ModemError, ModemManager, ModemMode, MqttClient, MqttEvent,
    MqttEventCallback, NetStack, Publish, Subscription, TlsMaterial, UiccModem, WifiConnectParams,
    WifiManager,
};

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

// Modem

#[derive(Debug, Default)]
struct ModemSim {
    mode: Option<ModemMode>,
    connect_delay: Duration,
    connect_error: Option<ModemError>,
    fail_mode_switch: bool,
    connects: usize,
    disconnects: usize,
    ip_lost: Option<IpLostHook>,
}

pub struct MockModem {
    sim: Arc<Mutex<ModemSim>>,
}

#[derive(Clone)]
pub struct ModemProbe {
    sim: Arc<Mutex<ModemSim>>,
}

impl MockModem {
    pub fn new() -> (Self, ModemProbe) {
        let sim = Arc::new(Mutex::new(ModemSim::default()));
        (Self { sim: sim.clone() }, ModemProbe { sim })
    }
}

impl ModemProbe {
    pub fn mode(&self) -> Option<ModemMode> {
        self.sim.lock().unwrap().mode
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.sim.lock().unwrap().connect_delay = delay;
    }

    pub fn fail_mode_switch(&self, fail: bool) {
        self.sim.lock().unwrap().fail_mode_switch = fail;
    }

    /// Fail the next open with `error`
    pub fn fail_connect(&self, error: ModemError) {
        self.sim.lock().unwrap().connect_error = Some(error);
    }

    pub fn connects(&self) -> usize {
        self.sim.lock().unwrap().connects
    }

    pub fn disconnects(&self) -> usize {
        self.sim.lock().unwrap().disconnects
    }

    /// Drop the PPP address the way the connection manager reports it
    pub fn lose_ip(&self) -> bool {
        let hook = self.sim.lock().unwrap().ip_lost.clone();
        hook.map(|hook| hook.fire()).is_some()
    }
}

impl ModemManager for MockModem {
    fn init(&mut self) -> Result<(), ModemError> {
        Ok(())
    }

    fn connect_modem(
        &mut self,
        params: &ModemConnectParams,
        _timeout: Option<Duration>,
    ) -> Result<Option<IpInfo>, ModemError> {
        let delay = self.sim.lock().unwrap().connect_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let mut sim = self.sim.lock().unwrap();
        if let Some(error) = sim.connect_error.take() {
            return Err(error);
        }
        if sim.mode.is_some() {
            return Err(ModemError::InUse);
        }
        sim.connects += 1;
        if params.connect_ppp {
            sim.mode = Some(ModemMode::Ppp);
            sim.ip_lost = params.on_ip_lost.clone();
            Ok(Some(IpInfo::new(IpAddr::V4(Ipv4Addr::new(10, 64, 0, 2)))))
        } else {
            sim.mode = Some(ModemMode::Command);
            Ok(None)
        }
    }

    fn disconnect_modem(&mut self, _timeout: Option<Duration>) -> Result<(), ModemError> {
        let mut sim = self.sim.lock().unwrap();
        if sim.mode.take().is_none() {
            return Err(ModemError::NotOpen);
        }
        sim.disconnects += 1;
        Ok(())
    }

    fn modem_mode(&self) -> Result<ModemMode, ModemError> {
        self.sim.lock().unwrap().mode.ok_or(ModemError::NotOpen)
    }

    fn change_modem_mode(&mut self, mode: ModemMode, _timeout: Duration) -> Result<(), ModemError> {
        let mut sim = self.sim.lock().unwrap();
        if sim.fail_mode_switch {
            return Err(ModemError::Timeout);
        }
        match sim.mode {
            None => Err(ModemError::NotOpen),
            Some(_) => {
                sim.mode = Some(mode);
                Ok(())
            }
        }
    }

    fn dns_server(&self, index: usize) -> Option<IpAddr> {
        let sim = self.sim.lock().unwrap();
        match (sim.mode, index) {
            (Some(ModemMode::Ppp), 0) => Some(IpAddr::V4(Ipv4Addr::new(10, 64, 0, 1))),
            (Some(ModemMode::Ppp), 1) => Some(IpAddr::V4(Ipv4Addr::new(10, 64, 0, 9))),
            _ => None,
        }
    }

    fn deinit(&mut self) -> Result<(), ModemError> {
        Ok(())
    }
}

// Wi-Fi

#[derive(Default)]
pub struct WifiSim {
    pub connected: bool,
    pub connects: usize,
    ip_lost: Option<IpLostHook>,
}

#[derive(Clone, Default)]
pub struct MockWifi {
    sim: Arc<Mutex<WifiSim>>,
}

impl MockWifi {
    pub fn sim(&self) -> std::sync::MutexGuard<'_, WifiSim> {
        self.sim.lock().unwrap()
    }

    /// Lose the DHCP address the way the connection manager reports it
    pub fn lose_ip(&self) -> bool {
        let hook = {
            let mut sim = self.sim();
            sim.connected = false;
            sim.ip_lost.clone()
        };
        hook.map(|hook| hook.fire()).is_some()
    }
}

impl WifiManager for MockWifi {
    type Error = String;

    fn init(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn connect(&mut self, params: &WifiConnectParams, _timeout: Option<Duration>) -> Result<IpInfo, String> {
        let mut sim = self.sim();
        sim.connected = true;
        sim.connects += 1;
        sim.ip_lost = params.on_ip_lost.clone();
        Ok(IpInfo::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))))
    }

    fn disconnect(&mut self) -> Result<(), String> {
        self.sim().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.sim().connected
    }

    fn dns_server(&self, index: usize) -> Option<IpAddr> {
        (index == 0 && self.sim().connected).then_some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)))
    }

    fn deinit(&mut self) -> Result<(), String> {
        Ok(())
    }
}

// UICC

pub const UICC_HANDLE: u32 = 0x0000_0007;

#[derive(Debug, Default)]
pub struct UiccLog {
    pub opened: Vec<String>,
    pub closed: Vec<u32>,
    pub commands: Vec<Vec<u8>>,
    pub fail_open: bool,
}

/// Answers each command with the command followed by status word 90 00
pub struct MockUicc {
    log: Arc<Mutex<UiccLog>>,
}

impl MockUicc {
    pub fn new() -> (Self, Arc<Mutex<UiccLog>>) {
        let log = Arc::new(Mutex::new(UiccLog::default()));
        (Self { log: log.clone() }, log)
    }
}

impl UiccModem for MockUicc {
    type Error = String;

    fn open(&mut self, port: &str) -> Result<u32, String> {
        let mut log = self.log.lock().unwrap();
        if log.fail_open {
            return Err(format!("no such port {port}"));
        }
        log.opened.push(port.to_string());
        Ok(UICC_HANDLE)
    }

    fn close(&mut self, handle: u32) -> Result<(), String> {
        self.log.lock().unwrap().closed.push(handle);
        Ok(())
    }

    fn trans_receive(&mut self, handle: u32, command: &[u8]) -> Result<Vec<u8>, String> {
        if handle != UICC_HANDLE {
            return Err("bad handle".to_string());
        }
        self.log.lock().unwrap().commands.push(command.to_vec());
        let mut response = command.to_vec();
        response.extend_from_slice(&[0x90, 0x00]);
        Ok(response)
    }
}

// GATT server

#[derive(Debug, Default)]
struct GattSim {
    sent: Vec<(u16, u16, Vec<u8>)>,
    advertising: bool,
    advertise_calls: usize,
}

/// Records notifications; tests wait on the count
#[derive(Clone, Default)]
pub struct MockGatt {
    sim: Arc<(Mutex<GattSim>, Condvar)>,
}

impl MockGatt {
    pub fn sent(&self) -> Vec<(u16, u16, Vec<u8>)> {
        self.sim.0.lock().unwrap().sent.clone()
    }

    /// Notification values sent on `handle`
    pub fn sent_on(&self, handle: u16) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter(|(_, h, _)| *h == handle)
            .map(|(_, _, v)| v)
            .collect()
    }

    /// Block until `count` notifications went out on `handle`
    pub fn wait_for_on(&self, handle: u16, count: usize, timeout: Duration) -> bool {
        let on_handle = |s: &GattSim| s.sent.iter().filter(|(_, h, _)| *h == handle).count();
        let (sim, cond) = &*self.sim;
        let guard = sim.lock().unwrap();
        let (guard, _) = cond
            .wait_timeout_while(guard, timeout, |s| on_handle(&*s) < count)
            .unwrap();
        on_handle(&guard) >= count
    }

    pub fn advertise_calls(&self) -> usize {
        self.sim.0.lock().unwrap().advertise_calls
    }

    pub fn stop_advertising(&self) {
        self.sim.0.lock().unwrap().advertising = false;
    }
}

impl GattServer for MockGatt {
    type Error = String;

    fn send_notification(&mut self, conn_id: u16, handle: u16, value: &[u8]) -> Result<(), String> {
        let (sim, cond) = &*self.sim;
        sim.lock().unwrap().sent.push((conn_id, handle, value.to_vec()));
        cond.notify_all();
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), String> {
        let mut sim = self.sim.0.lock().unwrap();
        sim.advertising = true;
        sim.advertise_calls += 1;
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.sim.0.lock().unwrap().advertising
    }
}

// MQTT client

#[derive(Default)]
pub struct MqttSim {
    pub calls: Vec<&'static str>,
    pub connect_failures: u32,
    pub subscribe_failures: u32,
    pub subscribed: Vec<String>,
    pub client_ids: Vec<String>,
    callback: Option<MqttEventCallback>,
}

#[derive(Clone, Default)]
pub struct MockMqtt {
    sim: Arc<Mutex<MqttSim>>,
}

impl MockMqtt {
    pub fn sim(&self) -> std::sync::MutexGuard<'_, MqttSim> {
        self.sim.lock().unwrap()
    }

    pub fn count(&self, call: &str) -> usize {
        self.sim().calls.iter().filter(|c| **c == call).count()
    }

    /// Deliver an event the way the client library's callback would
    pub fn fire(&self, event: MqttEvent) {
        let sim = self.sim();
        if let Some(callback) = sim.callback.as_ref() {
            callback(event);
        }
    }
}

impl MqttClient for MockMqtt {
    type Error = String;

    fn init(&mut self) -> Result<(), String> {
        self.sim().calls.push("init");
        Ok(())
    }

    fn create(&mut self, _broker: &BrokerInfo, _tls: Option<&TlsMaterial>, on_event: MqttEventCallback) -> Result<(), String> {
        let mut sim = self.sim();
        sim.calls.push("create");
        sim.callback = Some(on_event);
        Ok(())
    }

    fn connect(&mut self, info: &ConnectInfo) -> Result<(), String> {
        let mut sim = self.sim();
        sim.calls.push("connect");
        sim.client_ids.push(info.client_id.clone());
        if sim.connect_failures > 0 {
            sim.connect_failures -= 1;
            return Err("broker unreachable".to_string());
        }
        Ok(())
    }

    fn subscribe(&mut self, subscriptions: &[Subscription]) -> Result<(), String> {
        let mut sim = self.sim();
        sim.calls.push("subscribe");
        if sim.subscribe_failures > 0 {
            sim.subscribe_failures -= 1;
            return Err("suback refused".to_string());
        }
        sim.subscribed.extend(subscriptions.iter().map(|s| s.topic.clone()));
        Ok(())
    }

    fn unsubscribe(&mut self, subscriptions: &[Subscription]) -> Result<(), String> {
        let mut sim = self.sim();
        sim.calls.push("unsubscribe");
        sim.subscribed.retain(|t| subscriptions.iter().all(|s| &s.topic != t));
        Ok(())
    }

    fn publish(&mut self, _message: &Publish) -> Result<(), String> {
        self.sim().calls.push("publish");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), String> {
        self.sim().calls.push("disconnect");
        Ok(())
    }

    fn delete(&mut self) -> Result<(), String> {
        let mut sim = self.sim();
        sim.calls.push("delete");
        sim.callback = None;
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), String> {
        self.sim().calls.push("deinit");
        Ok(())
    }
}

// Network stack

#[derive(Debug, Default)]
pub struct NetLog {
    pub default: Option<ConnectivityType>,
    pub dns: Vec<(usize, IpAddr)>,
}

#[derive(Clone, Default)]
pub struct MockNet {
    pub log: Arc<Mutex<NetLog>>,
}

impl NetStack for MockNet {
    type Error = String;

    fn set_default_interface(&mut self, kind: ConnectivityType) -> Result<(), String> {
        self.log.lock().unwrap().default = Some(kind);
        Ok(())
    }

    fn set_dns_server(&mut self, index: usize, addr: IpAddr) -> Result<(), String> {
        self.log.lock().unwrap().dns.push((index, addr));
        Ok(())
    }
}

// Console

/// Feeds keys from a script, then reports end of input
pub struct ScriptedConsole {
    keys: VecDeque<char>,
    pub lines: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConsole {
    pub fn new(keys: &str) -> Self {
        Self {
            keys: keys.chars().collect(),
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Console for ScriptedConsole {
    fn read_key(&mut self) -> Option<char> {
        self.keys.pop_front()
    }

    fn print_line(&mut self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

// Device output

#[derive(Clone, Default)]
pub struct MockOutput {
    pub states: Arc<Mutex<Vec<bool>>>,
}

impl DeviceOutput for MockOutput {
    fn set(&mut self, on: bool) {
        self.states.lock().unwrap().push(on);
    }
}
