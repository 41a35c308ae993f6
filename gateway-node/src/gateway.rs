//! Boot and teardown
//!
//! [`Gateway::start`] turns a config and the platform's collaborators into
//! running tasks: one thread per I/O link, one for MQTT and one for the BLE
//! modem bridge. The console menu is built here but run by the caller, since
//! it owns the terminal.

use std::sync::Arc;
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};

use gateway_mcu::{
    Console, ConnectivityType, DeviceOutput, GattServer, ModemManager, MqttClient, NetStack, UiccModem,
    WifiManager,
};
use log::*;

use crate::arbiter::ModemArbiter;
use crate::ble_modem::{BleModemBridge, BridgeMsg, BridgeSettings};
use crate::cellular::CellularTransport;
use crate::config::{ConfigError, GatewayConfig};
use crate::gatt::{GattDatabase, GattHandler, Notifier};
use crate::gatt_db::TableError;
use crate::lifecycle::{Lifecycle, RetryPolicy, Transport};
use crate::link::Link;
use crate::menu::ConsoleMenu;
use crate::mqtt::{MqttHandle, MqttTask};
use crate::notification::Command;
use crate::orchestrator::Orchestrator;
use crate::routes::Routes;
use crate::subscriber::DeviceSwitch;
use crate::wifi::WifiTransport;

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("failed to spawn {task} task: {source}")]
    Spawn {
        task: &'static str,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid attribute table: {0}")]
    Table(#[from] TableError),
    #[error("{0} is enabled but the platform did not provide it")]
    MissingCollaborator(&'static str),
}

/// Concrete collaborator types of one board (or of the host simulator)
pub trait Platform: 'static {
    type Wifi: WifiManager + 'static;
    type Uicc: UiccModem + 'static;
    type Gatt: GattServer + 'static;
    type Mqtt: MqttClient + 'static;
    type Net: NetStack + 'static;
    type Console: Console + 'static;
}

/// The collaborators a platform hands over at boot
///
/// Everything except the network stack is optional; a feature enabled in the
/// config whose collaborator is missing fails the boot.
pub struct Collaborators<P: Platform> {
    pub wifi: Option<P::Wifi>,
    pub modem: Option<Box<dyn ModemManager>>,
    pub uicc: Option<P::Uicc>,
    pub gatt: Option<P::Gatt>,
    pub mqtt: Option<P::Mqtt>,
    pub output: Option<Box<dyn DeviceOutput>>,
    pub net: P::Net,
    pub console: Option<P::Console>,
}

impl<P: Platform> Collaborators<P> {
    pub fn new(net: P::Net) -> Self {
        Self {
            wifi: None,
            modem: None,
            uicc: None,
            gatt: None,
            mqtt: None,
            output: None,
            net,
            console: None,
        }
    }

    pub fn wifi(mut self, wifi: P::Wifi) -> Self {
        self.wifi = Some(wifi);
        self
    }

    pub fn modem(mut self, modem: impl ModemManager + 'static) -> Self {
        self.modem = Some(Box::new(modem));
        self
    }

    pub fn ble(mut self, uicc: P::Uicc, gatt: P::Gatt) -> Self {
        self.uicc = Some(uicc);
        self.gatt = Some(gatt);
        self
    }

    pub fn mqtt(mut self, client: P::Mqtt, output: impl DeviceOutput + 'static) -> Self {
        self.mqtt = Some(client);
        self.output = Some(Box::new(output));
        self
    }

    pub fn console(mut self, console: P::Console) -> Self {
        self.console = Some(console);
        self
    }
}

type Spawned = (&'static str, JoinHandle<()>);

fn spawn(task: &'static str, body: impl FnOnce() + Send + 'static) -> Result<Spawned, BootError> {
    thread::Builder::new()
        .name(task.to_string())
        .spawn(body)
        .map(|handle| (task, handle))
        .map_err(|source| BootError::Spawn { task, source })
}

fn spawn_link<T: Transport + 'static>(
    task: &'static str,
    transport: T,
    link: &Arc<Link>,
    policy: RetryPolicy,
) -> Result<Spawned, BootError> {
    let lifecycle = Lifecycle::new(transport, link.clone(), policy);
    spawn(task, move || lifecycle.run())
}

/// Tasks started so far and how to reach each of them
struct Running {
    routes: Arc<Routes>,
    mqtt: Option<Arc<MqttHandle>>,
    bridge: Option<SyncSender<BridgeMsg>>,
    tasks: Vec<Spawned>,
}

impl Running {
    fn new(routes: Arc<Routes>) -> Self {
        Self {
            routes,
            mqtt: None,
            bridge: None,
            tasks: Vec::new(),
        }
    }

    /// Keep a spawned task; on a failed spawn stop everything already running
    fn push(&mut self, spawned: Result<Spawned, BootError>) -> Result<(), BootError> {
        match spawned {
            Ok(task) => {
                self.tasks.push(task);
                Ok(())
            }
            Err(e) => {
                error!("boot failed: {e}; stopping {} started tasks", self.tasks.len());
                self.stop();
                Err(e)
            }
        }
    }

    /// Send Shutdown to every task and join them
    fn stop(&mut self) {
        if let Some(mqtt) = &self.mqtt {
            mqtt.notify(Command::Shutdown);
        }
        for link in self.routes.links() {
            link.notify(Command::Shutdown);
        }
        if let Some(bridge) = &self.bridge {
            if bridge.send(BridgeMsg::Shutdown).is_err() {
                debug!("BLE bridge already gone");
            }
        }

        for (task, handle) in self.tasks.drain(..) {
            match handle.join() {
                Ok(()) => debug!("{task} task joined"),
                Err(_) => error!("{task} task panicked"),
            }
        }
    }
}

pub struct Gateway<P: Platform> {
    orchestrator: Arc<Orchestrator<P::Net>>,
    gatt: Option<Arc<GattHandler>>,
    console: Option<ConsoleMenu<P::Console, P::Net>>,
    running: Running,
}

impl<P: Platform> Gateway<P> {
    /// Spawn every enabled task and wire them together
    pub fn start(config: GatewayConfig, platform: Collaborators<P>) -> Result<Self, BootError> {
        config.validate()?;
        let features = &config.features;
        let Collaborators {
            wifi,
            modem,
            uicc,
            gatt,
            mqtt,
            output,
            net,
            console,
        } = platform;

        let wifi = features
            .wifi
            .then(|| wifi.ok_or(BootError::MissingCollaborator("wifi")))
            .transpose()?;
        let arbiter = match modem {
            Some(modem) => Some(Arc::new(ModemArbiter::new(modem))),
            None if features.cellular => return Err(BootError::MissingCollaborator("modem")),
            None => None,
        };
        let ble = features
            .ble_modem
            .then(|| uicc.zip(gatt).ok_or(BootError::MissingCollaborator("ble")))
            .transpose()?;
        let mqtt = features
            .mqtt
            .then(|| mqtt.zip(output).ok_or(BootError::MissingCollaborator("mqtt")))
            .transpose()?;
        let console = features
            .console
            .then(|| console.ok_or(BootError::MissingCollaborator("console")))
            .transpose()?;

        let wifi_link = wifi
            .is_some()
            .then(|| Arc::new(Link::new(ConnectivityType::WifiStation)));
        let cellular_link = features
            .cellular
            .then(|| Arc::new(Link::new(ConnectivityType::Cellular)));
        let routes = Arc::new(Routes::new(wifi_link.clone(), cellular_link.clone(), config.default_io));
        let mut running = Running::new(routes.clone());

        // BLE first, so status listeners exist before any task reports
        let mut gatt_handler = None;
        let mut notifier = None;
        if let Some((uicc, server)) = ble {
            let db = Arc::new(GattDatabase::new(config.ble.transreceive_capacity)?);
            let (tx, rx) = mpsc::sync_channel(config.ble.queue_depth);
            let gatt_notifier = Notifier::new(db.clone(), server);
            let bridge_task = BleModemBridge::new(
                uicc,
                arbiter.clone(),
                gatt_notifier.clone(),
                BridgeSettings::from(&config.ble),
            );
            running.bridge = Some(tx.clone());
            running.push(spawn("ble-modem", move || bridge_task.run(rx)))?;
            gatt_handler = Some(Arc::new(GattHandler::new(db, Some(tx), config.ble.local_mtu)));
            notifier = Some(gatt_notifier);
            info!("BLE: advertising as {}", config.ble.device_name);
        }

        let mut mqtt_handle = None;
        let mut mqtt_task = None;
        if let Some((client, output)) = mqtt {
            let switch = Arc::new(DeviceSwitch::new(output));
            let (task, handle) = MqttTask::new(client, config.mqtt.clone(), routes.clone(), switch);
            mqtt_task = Some(task);
            mqtt_handle = Some(handle);
        }
        running.mqtt = mqtt_handle.clone();

        if let Some(notifier) = &notifier {
            for link in routes.links() {
                link.context().on_status_change(notifier.status_listener());
            }
            if let Some(handle) = &mqtt_handle {
                handle.context().on_status_change(notifier.status_listener());
            }
        }

        if let (Some(manager), Some(link)) = (wifi, &wifi_link) {
            let transport = WifiTransport::new(manager, config.wifi.credentials(), config.wifi.connect_timeout())
                .on_ip_lost(link.ip_lost_hook());
            running.push(spawn_link("wifi", transport, link, config.wifi.retry_policy()))?;
        }
        if let (Some(arbiter), Some(link)) = (&arbiter, &cellular_link) {
            let transport = CellularTransport::new(
                arbiter.clone(),
                config.cellular.connect_params(),
                config.cellular.connect_timeout(),
                config.cellular.disconnect_timeout(),
            )
            .on_ip_lost(link.ip_lost_hook());
            running.push(spawn_link("ppp", transport, link, config.cellular.retry_policy()))?;
        }
        if let Some(task) = mqtt_task {
            running.push(spawn("mqtt", move || task.run()))?;
        }

        let orchestrator = Arc::new(Orchestrator::new(routes, mqtt_handle.clone(), net));
        if let Some(handler) = &gatt_handler {
            handler.set_control(orchestrator.clone());
        }
        let console = console.map(|console| ConsoleMenu::new(console, orchestrator.clone()));

        info!(
            "gateway started with {} tasks, default I/O {}",
            running.tasks.len(),
            orchestrator.default_io()
        );
        Ok(Self {
            orchestrator,
            gatt: gatt_handler,
            console,
            running,
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator<P::Net>> {
        &self.orchestrator
    }

    /// Entry point for the platform's BLE stack callback
    pub fn gatt(&self) -> Option<&Arc<GattHandler>> {
        self.gatt.as_ref()
    }

    /// The console menu, once; the caller runs it on a thread of its own
    pub fn take_console(&mut self) -> Option<ConsoleMenu<P::Console, P::Net>> {
        self.console.take()
    }

    /// Shut every task down and wait for it
    pub fn shutdown(mut self) {
        info!("gateway shutting down");
        self.running.stop();
        info!("gateway stopped");
    }
}
