//! Gateway configuration
//!
//! Read once at boot from a JSON file; every field has a default so a partial
//! (or missing) file works. Defaults match the shipping firmware.

use std::path::Path;
use std::time::Duration;

use gateway_mcu::{
    BrokerInfo, ConnectivityType, ModemConnectParams, PppAuth, Qos, TlsMaterial, WifiCredentials,
    WifiSecurity,
};
use serde::{Deserialize, Serialize};

use crate::lifecycle::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Link that carries default traffic at boot
    pub default_io: ConnectivityType,
    pub features: Features,
    pub wifi: WifiConfig,
    pub cellular: CellularConfig,
    pub mqtt: MqttConfig,
    pub ble: BleConfig,
}

/// Which tasks run
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Features {
    pub wifi: bool,
    pub cellular: bool,
    pub mqtt: bool,
    pub ble_modem: bool,
    pub console: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
    pub security: WifiSecurity,
    pub max_retries: u32,
    pub retry_interval_ms: u64,
    /// Per-attempt deadline; none waits for the manager to give up
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CellularConfig {
    pub apn: String,
    pub username: String,
    pub password: String,
    pub auth: PppAuth,
    pub max_retries: u32,
    pub retry_interval_ms: u64,
    pub connect_timeout_ms: Option<u64>,
    pub disconnect_timeout_ms: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub client_id_prefix: String,
    /// Append a random suffix so several devices can share a prefix
    pub unique_client_id: bool,
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u16,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_interval_ms: u64,
    pub topic: String,
    pub qos: Qos,
    pub on_message: String,
    pub off_message: String,
    pub subscribe_retries: u32,
    pub subscribe_interval_ms: u64,
    pub root_ca: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub alpn: Option<String>,
    pub sni: Option<String>,
    pub queue_depth: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BleConfig {
    pub device_name: String,
    pub acquire_timeout_ms: u64,
    /// Pause between response notifications; zero sends back-to-back
    pub chunk_interval_ms: u64,
    pub reassembly_capacity: usize,
    pub transreceive_capacity: usize,
    pub local_mtu: u16,
    pub queue_depth: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_io: ConnectivityType::Cellular,
            features: Features::default(),
            wifi: WifiConfig::default(),
            cellular: CellularConfig::default(),
            mqtt: MqttConfig::default(),
            ble: BleConfig::default(),
        }
    }
}

impl Default for Features {
    fn default() -> Self {
        Self {
            wifi: true,
            cellular: true,
            mqtt: true,
            ble_modem: true,
            console: true,
        }
    }
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: "WIFI_SSID".to_string(),
            password: "WIFI_PASSWORD".to_string(),
            security: WifiSecurity::Wpa2Personal,
            max_retries: 10,
            retry_interval_ms: 10_000,
            connect_timeout_ms: None,
        }
    }
}

impl Default for CellularConfig {
    fn default() -> Self {
        Self {
            apn: "move.dataxs.mobi".to_string(),
            username: String::new(),
            password: String::new(),
            auth: PppAuth::Pap,
            max_retries: 10,
            retry_interval_ms: 10_000,
            connect_timeout_ms: Some(180_000),
            disconnect_timeout_ms: Some(30_000),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "a1b2c3d4e5f6g7-ats.iot.us-east-1.amazonaws.com".to_string(),
            port: 8883,
            client_id_prefix: "psoc6-mqtt-client".to_string(),
            unique_client_id: true,
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 60,
            timeout_ms: 5_000,
            max_retries: 150,
            retry_interval_ms: 10_000,
            topic: "ledstatus".to_string(),
            qos: Qos::AtLeastOnce,
            on_message: "TURN ON".to_string(),
            off_message: "TURN OFF".to_string(),
            subscribe_retries: 3,
            subscribe_interval_ms: 1_000,
            root_ca: None,
            client_cert: None,
            client_key: None,
            alpn: None,
            sni: None,
            queue_depth: 10,
        }
    }
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            device_name: "UICC-Bridge".to_string(),
            acquire_timeout_ms: 5_000,
            chunk_interval_ms: 0,
            reassembly_capacity: 2048,
            transreceive_capacity: 512,
            local_mtu: 512,
            queue_depth: 10,
        }
    }
}

impl GatewayConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.features.wifi && self.wifi.max_retries == 0 {
            return invalid("wifi.max_retries must be at least 1");
        }
        if self.features.cellular {
            if self.cellular.max_retries == 0 {
                return invalid("cellular.max_retries must be at least 1");
            }
            if self.cellular.apn.is_empty() {
                return invalid("cellular.apn must be set");
            }
        }
        if self.features.mqtt {
            if self.mqtt.broker.is_empty() {
                return invalid("mqtt.broker must be set");
            }
            if self.mqtt.max_retries == 0 || self.mqtt.subscribe_retries == 0 {
                return invalid("mqtt retry counts must be at least 1");
            }
        }
        match self.default_io {
            ConnectivityType::WifiStation if !self.features.wifi => {
                return invalid("default_io is wifi but wifi is disabled");
            }
            ConnectivityType::Cellular if !self.features.cellular => {
                return invalid("default_io is cellular but cellular is disabled");
            }
            _ => {}
        }
        if self.ble.reassembly_capacity < self.ble.transreceive_capacity {
            return invalid("ble.reassembly_capacity must hold at least one chunk");
        }
        if self.ble.queue_depth == 0 || self.mqtt.queue_depth == 0 {
            return invalid("queue depths must be at least 1");
        }
        Ok(())
    }
}

impl WifiConfig {
    pub fn credentials(&self) -> WifiCredentials {
        WifiCredentials {
            ssid: self.ssid.clone(),
            password: self.password.clone(),
            security: self.security,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl CellularConfig {
    pub fn connect_params(&self) -> ModemConnectParams {
        ModemConnectParams {
            connect_ppp: true,
            apn: self.apn.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            auth: self.auth,
            on_ip_lost: None,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn disconnect_timeout(&self) -> Option<Duration> {
        self.disconnect_timeout_ms.map(Duration::from_millis)
    }
}

impl MqttConfig {
    pub fn broker_info(&self) -> BrokerInfo {
        BrokerInfo {
            host: self.broker.clone(),
            port: self.port,
        }
    }

    /// TLS material, if any was configured
    pub fn tls(&self) -> Option<TlsMaterial> {
        let tls = TlsMaterial {
            root_ca: self.root_ca.clone(),
            client_cert: self.client_cert.clone(),
            client_key: self.client_key.clone(),
            alpn: self.alpn.clone(),
            sni: self.sni.clone(),
        };
        let any = tls.root_ca.is_some() || tls.client_cert.is_some() || tls.client_key.is_some();
        any.then_some(tls)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
        }
    }
}

impl BleConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }
}
