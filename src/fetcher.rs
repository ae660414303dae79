use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use serde_json::Value;
use url::Url;

use crate::config;
use crate::error::FetchError;
use crate::messages::{ControlAction, DeviceSnapshot, parse_roster};

/// Where snapshots come from and where control commands go.
pub trait SnapshotSource: Send + Sync + 'static {
    /// One round trip for the current roster. No retries.
    fn fetch(&self) -> impl Future<Output = Result<Vec<DeviceSnapshot>, FetchError>> + Send;

    fn control(
        &self,
        name: &str,
        action: ControlAction,
    ) -> impl Future<Output = Result<(), FetchError>> + Send;
}

/// HTTP client for the device status server.
#[derive(Debug)]
pub struct StatusClient {
    http: reqwest::Client,
    status_url: Url,
    control_url: Url,
    sequence: AtomicU64,
}

impl StatusClient {
    pub fn new(config: &config::ServerConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.base_url)?;
        let http = reqwest::Client::builder().build()?;
        Self::with_client(http, &base_url, config.status_path(), config.control_path())
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: &Url,
        status_path: &str,
        control_path: &str,
    ) -> Result<Self, FetchError> {
        Ok(StatusClient {
            http,
            status_url: base_url.join(status_path)?,
            control_url: base_url.join(control_path)?,
            sequence: AtomicU64::new(0),
        })
    }

    /// Unique per request so no intermediate cache can answer with a stale
    /// roster. Stale rosters would replay old update tokens.
    fn cache_buster(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", millis, seq)
    }
}

impl SnapshotSource for StatusClient {
    async fn fetch(&self) -> Result<Vec<DeviceSnapshot>, FetchError> {
        let mut url = self.status_url.clone();
        url.query_pairs_mut().append_pair("t", &self.cache_buster());

        let response = self
            .http
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FetchError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = serde_json::from_str(&body)?;
        let roster = parse_roster(payload);
        debug!("Fetched {} device snapshots", roster.len());
        Ok(roster)
    }

    async fn control(&self, name: &str, action: ControlAction) -> Result<(), FetchError> {
        let mut url = self.control_url.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(name)
            .push(action.verb());

        info!("Sending {:?} to {}", action, name);
        let response = self.http.post(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
