//! HTTP client for the remote dashboard API.
//!
//! Every endpoint answers `GET` with `{ "success": bool, "data": <payload> }`.
//! The payload shape depends on the endpoint kind; each one is decoded into a
//! [`Contribution`], the part of a snapshot that endpoint is responsible for.

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Deserialize;

use crate::config::{Config, EndpointConfig, EndpointKind};
use crate::error::{Result, SyncError};
use crate::snapshot::{HolderEntry, RaceWin, Record};

/// Header understood by the tunnel provider in front of the API; without it
/// every request may be answered with an HTML interstitial.
const TUNNEL_WARNING_HEADER: &str = "ngrok-skip-browser-warning";

/// The slice of a snapshot produced by one endpoint. `None` fields are left
/// to other endpoints (or to the held snapshot).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contribution {
    pub items: Option<Vec<Record>>,
    pub total_count: Option<u64>,
    pub total_value: Option<f64>,
    pub last_update: Option<String>,
}

#[derive(Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RaceSummaryPayload {
    #[serde(default)]
    recent_winners: Option<Vec<RaceWin>>,
    #[serde(default)]
    total_races: Option<u64>,
    #[serde(default)]
    total_prizes: Option<f64>,
    #[serde(default)]
    last_updated: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsPayload {
    #[serde(default, alias = "totalHolders", alias = "totalRaces")]
    total_count: Option<u64>,
    #[serde(default, alias = "totalPrizes", alias = "totalSupply")]
    total_value: Option<f64>,
    #[serde(default, alias = "lastUpdated")]
    last_update: Option<String>,
}

#[derive(Deserialize)]
struct WalletCheckResponse {
    #[serde(rename = "isHolder", default)]
    is_holder: bool,
}

/// Decode an endpoint response body into its contribution.
pub fn decode_payload(kind: EndpointKind, body: &str) -> Result<Contribution> {
    let envelope: ApiEnvelope = serde_json::from_str(body)?;
    let data = match envelope.data {
        Some(data) if envelope.success && !data.is_null() => data,
        _ => return Err(SyncError::Api("server reported no data".into())),
    };

    let contribution = match kind {
        EndpointKind::RaceSummary => {
            // The summary replaces the snapshot wholesale: absent or null fields reset.
            let payload: RaceSummaryPayload = serde_json::from_value(data)?;
            let wins = payload.recent_winners.unwrap_or_default();
            Contribution {
                items: Some(wins.into_iter().map(Record::from).collect()),
                total_count: Some(payload.total_races.unwrap_or(0)),
                total_value: Some(payload.total_prizes.unwrap_or(0.0)),
                last_update: payload.last_updated,
            }
        }
        EndpointKind::Winners => {
            let wins: Vec<RaceWin> = serde_json::from_value(data)?;
            Contribution {
                items: Some(wins.into_iter().map(Record::from).collect()),
                ..Contribution::default()
            }
        }
        EndpointKind::Holders => {
            let holders: Vec<HolderEntry> = serde_json::from_value(data)?;
            Contribution {
                items: Some(holders.into_iter().map(Record::from).collect()),
                ..Contribution::default()
            }
        }
        EndpointKind::Stats => {
            let stats: StatsPayload = serde_json::from_value(data)?;
            Contribution {
                items: None,
                total_count: stats.total_count,
                total_value: stats.total_value,
                last_update: stats.last_update,
            }
        }
    };
    Ok(contribution)
}

/// Simple percent-encoding for a single URL path segment.
fn encode_segment(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{}/{}", base, path)
}

/// Client for the dashboard API.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    holders_api_url: Option<String>,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        crate::ensure_tls_provider();

        let mut headers = HeaderMap::new();
        if config.bypass_tunnel_warning {
            headers.insert(TUNNEL_WARNING_HEADER, HeaderValue::from_static("true"));
        }

        let mut builder = Client::builder()
            .user_agent(concat!("derbyscan/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.api_base_url.clone(),
            holders_api_url: config.holders_api_url.clone(),
        })
    }

    pub fn url_for(&self, endpoint: &EndpointConfig) -> String {
        join_url(&self.base_url, &endpoint.path)
    }

    /// Fetch one endpoint. Transport errors, non-2xx statuses, undecodable
    /// bodies and `success: false` all come back as `Err`.
    pub async fn fetch(&self, endpoint: &EndpointConfig) -> Result<Contribution> {
        let url = self.url_for(endpoint);
        tracing::debug!(endpoint = %endpoint.name, url = %url, "Fetching endpoint");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                endpoint: endpoint.name.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        decode_payload(endpoint.kind, &body)
    }

    /// Ask the holders API whether `address` currently holds the token.
    pub async fn check_wallet(&self, address: &str) -> Result<bool> {
        let base = self
            .holders_api_url
            .as_deref()
            .ok_or_else(|| SyncError::Config("holders_api_url is not configured".into()))?;
        let url = join_url(base, &format!("check-wallet/{}", encode_segment(address)));

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                endpoint: "check-wallet".into(),
                status: status.as_u16(),
            });
        }

        let result: WalletCheckResponse = response.json().await?;
        Ok(result.is_holder)
    }
}
