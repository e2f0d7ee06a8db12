//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::domain::types::{
    AdPosition, AdType, NetworkType, OsType, Protocol, ServerCategory, ServerMode,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub ad_type: AdType,
    pub position: AdPosition,
    pub status: bool,
    /// Network-side placement identifier; unique when present.
    pub ad_id: Option<String>,
    pub os_type: OsType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Country keyed by its ISO 3166-1 alpha-2 code (`"IN"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryRecord {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub flag: Option<String>,
    pub country_code: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRecord {
    pub id: String,
    pub name: String,
    pub slug: String,
    /// Upper-cased state code.
    pub state: String,
    /// Upper-cased country id.
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqRecord {
    pub id: String,
    pub question: String,
    pub slug: String,
    pub answer: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub reason: String,
    pub network_type: Option<NetworkType>,
    pub requested_server: Option<String>,
    pub server_id: Option<String>,
    /// 1 to 5 when present.
    pub rating: Option<u8>,
    pub review: Option<String>,
    pub additional_data: Option<Value>,
    pub os_type: OsType,
    #[serde(with = "time::serde::rfc3339")]
    pub datetime: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropdownValue {
    pub name: String,
    pub value: String,
}

/// Named option list consumed by client forms (`"reasons"`, `"network_types"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropdownRecord {
    pub id: String,
    pub name: String,
    pub values: Vec<DropdownValue>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Static content page addressed by a unique lowercase type (`"privacy"`, `"terms"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub page_type: String,
    pub title: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerGeneral {
    pub name: String,
    pub categories: Vec<ServerCategory>,
    pub country_id: String,
    pub city_id: String,
    pub is_pro: bool,
    pub mode: ServerMode,
    pub ip: String,
    pub latitude: f64,
    pub longitude: f64,
    pub os_type: OsType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenVpnConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub config: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireguardConfig {
    pub url: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrayConfig {
    pub shadowsocks: Option<String>,
    pub vless: Option<String>,
    pub vmess: Option<String>,
    pub trojan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    pub general: ServerGeneral,
    pub openvpn_config: Option<OpenVpnConfig>,
    pub wireguard_config: Option<WireguardConfig>,
    pub xray_config: Option<XrayConfig>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ServerRecord {
    /// First protocol whose configuration block carries a non-empty value.
    pub fn protocol(&self) -> Option<Protocol> {
        fn filled(values: &[&Option<String>]) -> bool {
            values
                .iter()
                .any(|value| value.as_deref().is_some_and(|v| !v.is_empty()))
        }

        let openvpn = self
            .openvpn_config
            .as_ref()
            .is_some_and(|c| filled(&[&c.username, &c.password, &c.config]));
        let wireguard = self
            .wireguard_config
            .as_ref()
            .is_some_and(|c| filled(&[&c.url, &c.api_token]));
        let xray = self
            .xray_config
            .as_ref()
            .is_some_and(|c| filled(&[&c.shadowsocks, &c.vless, &c.vmess, &c.trojan]));

        Protocol::PRECEDENCE
            .into_iter()
            .zip([openvpn, wireguard, xray])
            .find_map(|(protocol, present)| present.then_some(protocol))
    }
}

/// One client session against a server. Open while `disconnected_at` is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityRecord {
    pub id: String,
    pub user_id: String,
    pub server_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub connected_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub disconnected_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ConnectivityRecord {
    pub fn is_open(&self) -> bool {
        self.disconnected_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn server(openvpn: Option<OpenVpnConfig>, xray: Option<XrayConfig>) -> ServerRecord {
        ServerRecord {
            id: "s1".into(),
            general: ServerGeneral {
                name: "Frankfurt 1".into(),
                categories: vec![ServerCategory::Streaming],
                country_id: "DE".into(),
                city_id: "c1".into(),
                is_pro: false,
                mode: ServerMode::Live,
                ip: "10.0.0.1".into(),
                latitude: 50.1,
                longitude: 8.6,
                os_type: OsType::Both,
            },
            openvpn_config: openvpn,
            wireguard_config: None,
            xray_config: xray,
            created_at: datetime!(2025-01-01 0:00 UTC),
            updated_at: datetime!(2025-01-01 0:00 UTC),
        }
    }

    #[test]
    fn protocol_follows_precedence_and_ignores_blank_blocks() {
        let blank = OpenVpnConfig {
            username: Some(String::new()),
            ..Default::default()
        };
        let xray = XrayConfig {
            vless: Some("vless://...".into()),
            ..Default::default()
        };
        assert_eq!(server(Some(blank), Some(xray.clone())).protocol(), Some(Protocol::Xray));

        let openvpn = OpenVpnConfig {
            config: Some("client\n".into()),
            ..Default::default()
        };
        assert_eq!(server(Some(openvpn), Some(xray)).protocol(), Some(Protocol::Openvpn));
        assert_eq!(server(None, None).protocol(), None);
    }

    #[test]
    fn open_sessions_serialize_null_disconnect() {
        let session = ConnectivityRecord {
            id: "c1".into(),
            user_id: "u1".into(),
            server_id: "s1".into(),
            connected_at: datetime!(2025-03-01 10:00 UTC),
            disconnected_at: None,
            created_at: datetime!(2025-03-01 10:00 UTC),
            updated_at: datetime!(2025-03-01 10:00 UTC),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert!(json["disconnected_at"].is_null());
        assert_eq!(json["connected_at"], "2025-03-01T10:00:00Z");
        assert!(session.is_open());
    }
}
