use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::Result;

pub mod utils;

pub use utils::XsDuration;

pub const DEFAULT_IPV4_ADDRESS: &str = "localhost";
pub const DEFAULT_HTTP_PORT: u16 = 5000;
pub const DEFAULT_HTTPS_PORT: u16 = 5001;

/// Fully qualified discovery type, e.g. `dn:NetworkVideoTransmitter`.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct DiscoveryType {
    #[serde(rename = "Namespace")]
    pub namespace: String,
    #[serde(rename = "Prefix")]
    pub prefix: String,
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct OnvifDiscovery {
    #[serde(rename = "IPv4Address")]
    pub ipv4_address: String,
    #[serde(rename = "httpPort")]
    pub http_port: u16,
    #[serde(rename = "httpsPort")]
    pub https_port: u16,

    #[serde(rename = "Enabled")]
    pub enabled: bool,
    #[serde(rename = "EndpointId")]
    pub endpoint_id: Option<String>,
    #[serde(rename = "NetworkInterfaces")]
    pub network_interfaces: Vec<Ipv4Addr>,
    #[serde(rename = "Scopes")]
    pub scopes: Vec<String>,
    #[serde(rename = "Types")]
    pub types: Vec<DiscoveryType>,
    #[serde(rename = "MetadataVersion")]
    pub metadata_version: u32,
}

impl Default for OnvifDiscovery {
    fn default() -> Self {
        OnvifDiscovery {
            ipv4_address: DEFAULT_IPV4_ADDRESS.to_owned(),
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            enabled: true,
            endpoint_id: None,
            network_interfaces: Vec::new(),
            scopes: vec![
                "onvif://www.onvif.org/type/video_encoder".to_owned(),
                "onvif://www.onvif.org/type/ptz".to_owned(),
                "onvif://www.onvif.org/Profile/Streaming".to_owned(),
                "onvif://www.onvif.org/name/OnvifService".to_owned(),
                "onvif://www.onvif.org/hardware/RustCam".to_owned(),
            ],
            types: vec![
                DiscoveryType {
                    namespace: "http://www.onvif.org/ver10/device/wsdl".to_owned(),
                    prefix: "tds".to_owned(),
                    name: "Device".to_owned(),
                },
                DiscoveryType {
                    namespace: "http://www.onvif.org/ver10/network/wsdl".to_owned(),
                    prefix: "dn".to_owned(),
                    name: "NetworkVideoTransmitter".to_owned(),
                },
            ],
            metadata_version: 1,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DeviceInfo {
    #[serde(rename = "Manufacturer")]
    pub manufacturer: String,
    #[serde(rename = "Model")]
    pub model: String,
    #[serde(rename = "FirmwareVersion")]
    pub firmware_version: String,
    #[serde(rename = "SerialNumber")]
    pub serial_number: String,
    #[serde(rename = "HardwareId")]
    pub hardware_id: String,
    #[serde(rename = "Hostname")]
    pub hostname: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        DeviceInfo {
            manufacturer: "OnvifService".to_owned(),
            model: "RustCam".to_owned(),
            firmware_version: env!("CARGO_PKG_VERSION").to_owned(),
            serial_number: "000000000001".to_owned(),
            hardware_id: "RustCam-1".to_owned(),
            hostname: "onvif-service".to_owned(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct MediaProfile {
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Encoding")]
    pub encoding: String,
    #[serde(rename = "Width")]
    pub width: u32,
    #[serde(rename = "Height")]
    pub height: u32,
    #[serde(rename = "FrameRate")]
    pub frame_rate: u32,
    #[serde(rename = "StreamUri")]
    pub stream_uri: String,
    #[serde(rename = "SnapshotUri")]
    pub snapshot_uri: Option<String>,
}

impl Default for MediaProfile {
    fn default() -> Self {
        MediaProfile {
            token: "Profile_1".to_owned(),
            name: "mainStream".to_owned(),
            encoding: "H264".to_owned(),
            width: 1920,
            height: 1080,
            frame_rate: 25,
            stream_uri: "rtsp://localhost:8554/stream".to_owned(),
            snapshot_uri: None,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Media {
    #[serde(rename = "Profiles")]
    pub profiles: Vec<MediaProfile>,
}

impl Default for Media {
    fn default() -> Self {
        Media {
            profiles: vec![MediaProfile::default()],
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum UserLevel {
    Anonymous,
    User,
    Operator,
    Administrator,
}

impl UserLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserLevel::Anonymous => "Anonymous",
            UserLevel::User => "User",
            UserLevel::Operator => "Operator",
            UserLevel::Administrator => "Administrator",
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct UserConfig {
    #[serde(rename = "UserName")]
    pub user_name: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "UserLevel", default = "default_user_level")]
    pub level: UserLevel,
}

fn default_user_level() -> UserLevel {
    UserLevel::User
}

fn default_users() -> Vec<UserConfig> {
    vec![UserConfig {
        user_name: "admin".to_owned(),
        password: "password".to_owned(),
        level: UserLevel::Administrator,
    }]
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Events {
    /// Seconds between simulated motion alarm toggles, 0 disables the source.
    #[serde(rename = "MotionAlarmInterval")]
    pub motion_alarm_interval: u64,
    #[serde(rename = "MaxPullTimeout")]
    pub max_pull_timeout: XsDuration,
    #[serde(rename = "DefaultTerminationTime")]
    pub default_termination_time: XsDuration,
}

impl Default for Events {
    fn default() -> Self {
        Events {
            motion_alarm_interval: 10,
            max_pull_timeout: XsDuration::from_secs(60),
            default_termination_time: XsDuration::from_secs(60),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct Tls {
    #[serde(rename = "Certificate")]
    pub certificate: PathBuf,
    #[serde(rename = "PrivateKey")]
    pub private_key: PathBuf,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(rename = "OnvifDiscovery", default)]
    pub discovery: OnvifDiscovery,
    #[serde(rename = "Device", default)]
    pub device: DeviceInfo,
    #[serde(rename = "Media", default)]
    pub media: Media,
    #[serde(rename = "Users", default = "default_users")]
    pub users: Vec<UserConfig>,
    #[serde(rename = "Events", default)]
    pub events: Events,
    #[serde(rename = "Tls")]
    pub tls: Option<Tls>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            discovery: Default::default(),
            device: Default::default(),
            media: Default::default(),
            users: default_users(),
            events: Default::default(),
            tls: None,
        }
    }
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Config> {
        let config: Config = toml::from_str(s).context("invalid configuration")?;
        Ok(config)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(s) => Config::from_toml(&s).with_context(|| format!("failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("{} not found, using defaults", path.display());
                Config::default()
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("failed to read {}", path.display()))),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(ip) = var("ONVIF_IPV4_ADDRESS") {
            self.discovery.ipv4_address = ip;
        }
        if let Some(port) = var("ONVIF_HTTP_PORT") {
            self.discovery.http_port = port.parse().context("ONVIF_HTTP_PORT")?;
        }
        if let Some(port) = var("ONVIF_HTTPS_PORT") {
            self.discovery.https_port = port.parse().context("ONVIF_HTTPS_PORT")?;
        }
        Ok(())
    }

    pub fn https_url(&self) -> String {
        format!("https://{}:{}", self.discovery.ipv4_address, self.discovery.https_port)
    }

    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.discovery.ipv4_address, self.discovery.http_port)
    }

    /// Listen URLs in the order they are bound, HTTPS first.
    pub fn listen_urls(&self) -> Vec<String> {
        vec![self.https_url(), self.http_url()]
    }
}
