//! Real-Debrid API client

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::{Container, ContainerFile, DebridClient, TorrentFile, TorrentInfo};
use crate::config::DebridProviderSettings;
use crate::error::{CoreError, CoreResult};
use crate::services::rate_limiter::RateLimitedClient;

const BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";

#[derive(Debug, Deserialize)]
struct RdUser {
    #[serde(default)]
    premium: i64,
}

#[derive(Debug, Deserialize)]
struct RdAddMagnet {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RdTorrentInfo {
    id: String,
    hash: String,
    status: String,
    original_filename: Option<String>,
    filename: Option<String>,
    #[serde(default)]
    files: Vec<RdTorrentFile>,
}

#[derive(Debug, Deserialize)]
struct RdTorrentFile {
    id: i64,
    path: String,
    bytes: i64,
    #[serde(default)]
    selected: i64,
}

impl From<RdTorrentInfo> for TorrentInfo {
    fn from(info: RdTorrentInfo) -> Self {
        TorrentInfo {
            id: info.id,
            hash: info.hash.to_lowercase(),
            status: info.status,
            original_filename: info.original_filename,
            filename: info.filename,
            files: info
                .files
                .into_iter()
                .map(|f| TorrentFile {
                    file_id: f.id,
                    path: f.path,
                    bytes: f.bytes,
                    selected: f.selected == 1,
                })
                .collect(),
        }
    }
}

/// Instant availability payload: `{hash: {"rd": [{file_id: {filename,
/// filesize}}]}}`.
#[derive(Debug, Deserialize)]
struct RdAvailabilityFile {
    filename: String,
    filesize: i64,
}

pub struct RealDebridClient {
    http: RateLimitedClient,
    api_key: String,
    enabled: bool,
}

impl RealDebridClient {
    pub fn new(settings: &DebridProviderSettings) -> Self {
        Self {
            http: RateLimitedClient::for_debrid("realdebrid"),
            api_key: settings.api_key.clone(),
            enabled: settings.enabled,
        }
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> CoreResult<T> {
        let auth = self.auth();
        let response = self
            .http
            .get(url, &[("Authorization", auth.as_str())])
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("realdebrid: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::from_status(response.status(), "realdebrid"));
        }
        response
            .json()
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("realdebrid decode: {e}")))
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> CoreResult<T> {
        let auth = self.auth();
        let response = self
            .http
            .post_form(url, &[("Authorization", auth.as_str())], form)
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("realdebrid: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::from_status(response.status(), "realdebrid"));
        }
        response
            .json()
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("realdebrid decode: {e}")))
    }

    async fn post_form_empty(&self, url: &str, form: &[(&str, &str)]) -> CoreResult<()> {
        let auth = self.auth();
        let response = self
            .http
            .post_form(url, &[("Authorization", auth.as_str())], form)
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("realdebrid: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::from_status(response.status(), "realdebrid"));
        }
        Ok(())
    }
}

#[async_trait]
impl DebridClient for RealDebridClient {
    fn name(&self) -> &'static str {
        "RealDebrid"
    }

    fn host(&self) -> &str {
        "api.real-debrid.com"
    }

    async fn validate(&self) -> bool {
        if !self.enabled || self.api_key.is_empty() {
            return false;
        }
        match self.get_json::<RdUser>(&format!("{BASE_URL}/user")).await {
            Ok(user) => user.premium > 0,
            Err(e) => {
                warn!(error = %e, "Real-Debrid validation failed");
                false
            }
        }
    }

    async fn instant_availability(
        &self,
        hashes: &[String],
    ) -> CoreResult<HashMap<String, Vec<Container>>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        let url = format!(
            "{BASE_URL}/torrents/instantAvailability/{}",
            hashes.join("/")
        );
        let raw: HashMap<String, serde_json::Value> = self.get_json(&url).await?;

        let mut out: HashMap<String, Vec<Container>> = HashMap::new();
        for (hash, providers) in raw {
            let mut containers: Vec<Container> = Vec::new();
            if let Some(rd) = providers.get("rd").and_then(|v| v.as_array()) {
                for entry in rd {
                    let Some(map) = entry.as_object() else {
                        continue;
                    };
                    let container: Container = map
                        .iter()
                        .filter_map(|(file_id, file)| {
                            let parsed: RdAvailabilityFile =
                                serde_json::from_value(file.clone()).ok()?;
                            Some(ContainerFile {
                                file_id: file_id.parse().ok()?,
                                filename: parsed.filename,
                                filesize: parsed.filesize,
                            })
                        })
                        .collect();
                    if !container.is_empty() {
                        containers.push(container);
                    }
                }
            }
            out.insert(hash.to_lowercase(), containers);
        }
        Ok(out)
    }

    async fn add_magnet(&self, infohash: &str) -> CoreResult<String> {
        let magnet = format!("magnet:?xt=urn:btih:{infohash}");
        let added: RdAddMagnet = self
            .post_form(
                &format!("{BASE_URL}/torrents/addMagnet"),
                &[("magnet", magnet.as_str())],
            )
            .await?;
        Ok(added.id)
    }

    async fn select_files(&self, torrent_id: &str, file_ids: &[i64]) -> CoreResult<()> {
        let joined = file_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.post_form_empty(
            &format!("{BASE_URL}/torrents/selectFiles/{torrent_id}"),
            &[("files", joined.as_str())],
        )
        .await
    }

    async fn get_torrent_info(&self, torrent_id: &str) -> CoreResult<TorrentInfo> {
        let info: RdTorrentInfo = self
            .get_json(&format!("{BASE_URL}/torrents/info/{torrent_id}"))
            .await?;
        Ok(info.into())
    }

    async fn get_torrents(&self, limit: usize) -> CoreResult<HashMap<String, TorrentInfo>> {
        let url = format!("{BASE_URL}/torrents?limit={limit}");
        let infos: Vec<RdTorrentInfo> = self.get_json(&url).await?;
        Ok(infos
            .into_iter()
            .map(TorrentInfo::from)
            .map(|t| (t.hash.clone(), t))
            .collect())
    }
}
