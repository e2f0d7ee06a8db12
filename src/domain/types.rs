use serde::{Deserialize, Serialize};

/// Client platform an ad, feedback entry or server targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsType {
    Android,
    Ios,
    /// Servers only: reachable from both platforms.
    Both,
}

impl OsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Android => "android",
            OsType::Ios => "ios",
            OsType::Both => "both",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdType {
    Banner,
    Interstitial,
    Reward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdPosition {
    Home,
    Splash,
    Server,
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Wifi,
    Mobile,
}

/// Operational mode of a server. `Off` servers stay listed for administrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    #[default]
    Test,
    Live,
    Off,
}

impl ServerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerMode::Test => "test",
            ServerMode::Live => "live",
            ServerMode::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerCategory {
    Gaming,
    Streaming,
}

/// Tunnel protocol, derived from the first configured protocol block of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Openvpn,
    Wireguard,
    Xray,
}

impl Protocol {
    /// Field holding this protocol's configuration block.
    pub fn config_field(&self) -> &'static str {
        match self {
            Protocol::Openvpn => "openvpn_config",
            Protocol::Wireguard => "wireguard_config",
            Protocol::Xray => "xray_config",
        }
    }

    /// Precedence order used when a server carries several blocks.
    pub const PRECEDENCE: [Protocol; 3] = [Protocol::Openvpn, Protocol::Wireguard, Protocol::Xray];
}
