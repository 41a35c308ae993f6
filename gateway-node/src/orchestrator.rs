//! Command dispatch across tasks
//!
//! The console menu and the GATT control characteristic both end up here.
//! Besides forwarding commands the orchestrator owns one policy: which I/O
//! link is the default route. Changing it updates the network stack and DNS
//! order together, then restarts the apps that ride on the route.

use std::fmt;
use std::sync::{Arc, Mutex};

use gateway_mcu::{ConnectivityType, NetStack, control};
use log::*;

use crate::gatt::ControlSink;
use crate::lock;
use crate::mqtt::MqttHandle;
use crate::notification::Command;
use crate::routes::Routes;
use crate::status::CommonStatus;

/// Application tasks the orchestrator can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum App {
    Mqtt,
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            App::Mqtt => f.write_str("MQTT"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{0} is not registered")]
    NotRegistered(ConnectivityType),
    #[error("{0} cannot be the default I/O")]
    InvalidDefault(ConnectivityType),
    #[error("{0} is not registered")]
    AppNotRegistered(App),
    #[error("network stack rejected the route change: {0}")]
    NetStack(String),
    #[error("malformed control command {0:02x?}")]
    InvalidControl(Vec<u8>),
}

pub struct Orchestrator<N: NetStack> {
    routes: Arc<Routes>,
    mqtt: Option<Arc<MqttHandle>>,
    net: Mutex<N>,
}

impl<N: NetStack> Orchestrator<N> {
    pub fn new(routes: Arc<Routes>, mqtt: Option<Arc<MqttHandle>>, net: N) -> Self {
        Self {
            routes,
            mqtt,
            net: Mutex::new(net),
        }
    }

    pub fn routes(&self) -> &Arc<Routes> {
        &self.routes
    }

    /// Registered I/O links, Wi-Fi first
    pub fn io_types(&self) -> Vec<ConnectivityType> {
        self.routes.links().map(|link| link.kind()).collect()
    }

    pub fn apps(&self) -> Vec<App> {
        self.mqtt.iter().map(|_| App::Mqtt).collect()
    }

    pub fn notify_io(&self, kind: ConnectivityType, command: Command) -> Result<(), OrchestratorError> {
        let link = self.routes.link(kind).ok_or(OrchestratorError::NotRegistered(kind))?;
        info!("{command} requested for {kind}");
        link.notify(command);
        Ok(())
    }

    pub fn notify_app(&self, app: App, command: Command) -> Result<(), OrchestratorError> {
        let handle = self.app(app)?;
        info!("{command} requested for {app}");
        handle.notify(command);
        Ok(())
    }

    pub fn io_status(&self, kind: ConnectivityType) -> CommonStatus {
        self.routes
            .link(kind)
            .map(|link| link.status())
            .unwrap_or(CommonStatus::Unknown)
    }

    pub fn app_status(&self, app: App) -> CommonStatus {
        self.app(app)
            .map(|handle| handle.status())
            .unwrap_or(CommonStatus::Unknown)
    }

    pub fn default_io(&self) -> ConnectivityType {
        self.routes.default_io()
    }

    /// Route default traffic over `kind` and restart the apps
    pub fn set_default_io(&self, kind: ConnectivityType) -> Result<(), OrchestratorError> {
        if kind == ConnectivityType::None {
            return Err(OrchestratorError::InvalidDefault(kind));
        }
        let link = self.routes.link(kind).ok_or(OrchestratorError::NotRegistered(kind))?;

        {
            let mut net = lock(&self.net);
            net.set_default_interface(kind)
                .map_err(|e| OrchestratorError::NetStack(format!("{e:?}")))?;
            for (index, dns) in link.dns().into_iter().enumerate() {
                if let Err(e) = net.set_dns_server(index, dns) {
                    warn!("setting dns server {index} to {dns} failed: {e:?}");
                }
            }
            self.routes.set_default(kind);
        }
        info!("default I/O is now {kind}");

        if let Some(mqtt) = &self.mqtt {
            mqtt.notify(Command::Restart);
        }
        Ok(())
    }

    fn app(&self, app: App) -> Result<&Arc<MqttHandle>, OrchestratorError> {
        match app {
            App::Mqtt => self.mqtt.as_ref().ok_or(OrchestratorError::AppNotRegistered(app)),
        }
    }

    /// Apply a `[target, action]` control write
    pub fn control(&self, bytes: &[u8]) -> Result<(), OrchestratorError> {
        let invalid = || OrchestratorError::InvalidControl(bytes.to_vec());
        let &[target, action] = bytes else {
            return Err(invalid());
        };

        let command = match action {
            control::ACTION_STOP => Some(Command::Stop),
            control::ACTION_START => Some(Command::Start),
            control::ACTION_RESTART => Some(Command::Restart),
            control::ACTION_SET_DEFAULT => None,
            _ => return Err(invalid()),
        };

        let io = match target {
            control::TARGET_WIFI => Some(ConnectivityType::WifiStation),
            control::TARGET_CELLULAR => Some(ConnectivityType::Cellular),
            control::TARGET_MQTT => None,
            _ => return Err(invalid()),
        };

        match (io, command) {
            (Some(kind), Some(command)) => self.notify_io(kind, command),
            (Some(kind), None) => self.set_default_io(kind),
            (None, Some(command)) => self.notify_app(App::Mqtt, command),
            (None, None) => Err(invalid()),
        }
    }
}

impl<N: NetStack + 'static> ControlSink for Orchestrator<N> {
    fn control(&self, command: &[u8]) -> Result<(), OrchestratorError> {
        Orchestrator::control(self, command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Link;
    use crate::mqtt::MqttTask;
    use crate::subscriber::DeviceSwitch;
    use crate::testing::{MockMqtt, MockNet, MockOutput};
    use std::net::{IpAddr, Ipv4Addr};

    fn links() -> (Arc<Link>, Arc<Link>, Arc<Routes>) {
        let wifi = Arc::new(Link::new(ConnectivityType::WifiStation));
        let cellular = Arc::new(Link::new(ConnectivityType::Cellular));
        let routes = Arc::new(Routes::new(
            Some(wifi.clone()),
            Some(cellular.clone()),
            ConnectivityType::Cellular,
        ));
        (wifi, cellular, routes)
    }

    #[test]
    fn set_default_switches_route_and_dns() {
        let (wifi, _cellular, routes) = links();
        let dns = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
        wifi.publish(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)), vec![dns]);
        let net = MockNet::default();
        let orchestrator = Orchestrator::new(routes, None, net.clone());

        orchestrator.set_default_io(ConnectivityType::WifiStation).unwrap();
        assert_eq!(orchestrator.default_io(), ConnectivityType::WifiStation);
        let log = net.log.lock().unwrap();
        assert_eq!(log.default, Some(ConnectivityType::WifiStation));
        assert_eq!(log.dns, vec![(0, dns)]);
    }

    #[test]
    fn default_must_be_a_registered_link() {
        let wifi = Arc::new(Link::new(ConnectivityType::WifiStation));
        let routes = Arc::new(Routes::new(Some(wifi), None, ConnectivityType::WifiStation));
        let orchestrator = Orchestrator::new(routes, None, MockNet::default());

        assert!(matches!(
            orchestrator.set_default_io(ConnectivityType::None),
            Err(OrchestratorError::InvalidDefault(_))
        ));
        assert!(matches!(
            orchestrator.set_default_io(ConnectivityType::Cellular),
            Err(OrchestratorError::NotRegistered(ConnectivityType::Cellular))
        ));
        assert_eq!(orchestrator.default_io(), ConnectivityType::WifiStation);
        assert_eq!(orchestrator.io_status(ConnectivityType::Cellular), CommonStatus::Unknown);
    }

    #[test]
    fn default_change_restarts_mqtt() {
        let (_wifi, _cellular, routes) = links();
        let switch = Arc::new(DeviceSwitch::new(Box::new(MockOutput::default())));
        let (_task, mqtt) = MqttTask::new(MockMqtt::default(), Default::default(), routes.clone(), switch);
        let orchestrator = Orchestrator::new(routes, Some(mqtt.clone()), MockNet::default());

        orchestrator.set_default_io(ConnectivityType::WifiStation).unwrap();
        assert_eq!(mqtt.context().pending_commands().dominant(), Some(Command::Restart));
    }

    #[test]
    fn control_bytes_map_to_commands() {
        let (wifi, cellular, routes) = links();
        let orchestrator = Orchestrator::new(routes, None, MockNet::default());

        orchestrator.control(&[control::TARGET_WIFI, control::ACTION_STOP]).unwrap();
        assert_eq!(wifi.context().pending_commands().dominant(), Some(Command::Stop));
        orchestrator
            .control(&[control::TARGET_CELLULAR, control::ACTION_RESTART])
            .unwrap();
        assert_eq!(cellular.context().pending_commands().dominant(), Some(Command::Restart));

        orchestrator
            .control(&[control::TARGET_WIFI, control::ACTION_SET_DEFAULT])
            .unwrap();
        assert_eq!(orchestrator.default_io(), ConnectivityType::WifiStation);

        assert!(matches!(
            orchestrator.control(&[control::TARGET_MQTT, control::ACTION_START]),
            Err(OrchestratorError::AppNotRegistered(App::Mqtt))
        ));
        assert!(matches!(
            orchestrator.control(&[control::TARGET_MQTT, control::ACTION_SET_DEFAULT]),
            Err(OrchestratorError::InvalidControl(_))
        ));
        assert!(matches!(
            orchestrator.control(&[0x7f, control::ACTION_STOP]),
            Err(OrchestratorError::InvalidControl(_))
        ));
        assert!(matches!(orchestrator.control(&[1]), Err(OrchestratorError::InvalidControl(_))));
    }
}
