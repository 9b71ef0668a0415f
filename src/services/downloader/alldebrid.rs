//! AllDebrid API client

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::{Container, ContainerFile, DebridClient, TorrentFile, TorrentInfo};
use crate::config::DebridProviderSettings;
use crate::error::{CoreError, CoreResult};
use crate::services::rate_limiter::RateLimitedClient;

const BASE_URL: &str = "https://api.alldebrid.com/v4";

#[derive(Debug, Deserialize)]
struct AdEnvelope<T> {
    status: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AdUserData {
    user: AdUser,
}

#[derive(Debug, Deserialize)]
struct AdUser {
    #[serde(rename = "isPremium", default)]
    is_premium: bool,
}

#[derive(Debug, Deserialize)]
struct AdMagnetsData {
    #[serde(default)]
    magnets: Vec<AdMagnet>,
}

#[derive(Debug, Deserialize)]
struct AdMagnetData {
    magnets: AdMagnet,
}

#[derive(Debug, Deserialize)]
struct AdMagnet {
    id: i64,
    hash: Option<String>,
    #[serde(default)]
    status: String,
    filename: Option<String>,
    #[serde(default)]
    instant: bool,
    #[serde(default)]
    links: Vec<AdLink>,
}

#[derive(Debug, Deserialize)]
struct AdLink {
    filename: String,
    size: i64,
}

impl From<AdMagnet> for TorrentInfo {
    fn from(m: AdMagnet) -> Self {
        TorrentInfo {
            id: m.id.to_string(),
            hash: m.hash.unwrap_or_default().to_lowercase(),
            status: m.status,
            original_filename: m.filename.clone(),
            filename: m.filename,
            files: m
                .links
                .into_iter()
                .enumerate()
                .map(|(i, link)| TorrentFile {
                    file_id: i as i64,
                    path: link.filename,
                    bytes: link.size,
                    selected: true,
                })
                .collect(),
        }
    }
}

pub struct AllDebridClient {
    http: RateLimitedClient,
    api_key: String,
    enabled: bool,
}

impl AllDebridClient {
    pub fn new(settings: &DebridProviderSettings) -> Self {
        Self {
            http: RateLimitedClient::for_debrid("alldebrid"),
            api_key: settings.api_key.clone(),
            enabled: settings.enabled,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path_and_query: &str) -> CoreResult<T> {
        let url = format!("{BASE_URL}/{path_and_query}&agent=curator&apikey={}", self.api_key);
        let response = self
            .http
            .get(&url, &[])
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("alldebrid: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::from_status(response.status(), "alldebrid"));
        }
        let envelope: AdEnvelope<T> = response
            .json()
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("alldebrid decode: {e}")))?;
        if envelope.status != "success" {
            return Err(CoreError::ExternalPermanent("alldebrid: request refused".into()));
        }
        envelope
            .data
            .ok_or_else(|| CoreError::NotFound("alldebrid: empty payload".into()))
    }
}

#[async_trait]
impl DebridClient for AllDebridClient {
    fn name(&self) -> &'static str {
        "AllDebrid"
    }

    fn host(&self) -> &str {
        "api.alldebrid.com"
    }

    async fn validate(&self) -> bool {
        if !self.enabled || self.api_key.is_empty() {
            return false;
        }
        match self.get_json::<AdUserData>("user?").await {
            Ok(data) => data.user.is_premium,
            Err(e) => {
                warn!(error = %e, "AllDebrid validation failed");
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
        let magnets = hashes
            .iter()
            .enumerate()
            .map(|(i, h)| format!("magnets[{i}]={h}"))
            .collect::<Vec<_>>()
            .join("&");
        let data: AdMagnetsData = self
            .get_json(&format!("magnet/instant?{magnets}"))
            .await?;

        let mut out: HashMap<String, Vec<Container>> = HashMap::new();
        for hash in hashes {
            out.insert(hash.to_lowercase(), Vec::new());
        }
        for magnet in data.magnets {
            if !magnet.instant {
                continue;
            }
            let Some(hash) = magnet.hash.as_deref() else {
                continue;
            };
            let container: Container = magnet
                .links
                .iter()
                .enumerate()
                .map(|(i, link)| ContainerFile {
                    file_id: i as i64,
                    filename: link.filename.clone(),
                    filesize: link.size,
                })
                .collect();
            if !container.is_empty() {
                out.entry(hash.to_lowercase()).or_default().push(container);
            }
        }
        Ok(out)
    }

    async fn add_magnet(&self, infohash: &str) -> CoreResult<String> {
        let data: AdMagnetsData = self
            .get_json(&format!("magnet/upload?magnets[]={infohash}"))
            .await?;
        data.magnets
            .first()
            .map(|m| m.id.to_string())
            .ok_or_else(|| CoreError::NotFound("alldebrid: magnet not accepted".into()))
    }

    async fn select_files(&self, _torrent_id: &str, _file_ids: &[i64]) -> CoreResult<()> {
        // AllDebrid materializes whole magnets; selection is filter-on-read.
        Ok(())
    }

    async fn get_torrent_info(&self, torrent_id: &str) -> CoreResult<TorrentInfo> {
        let data: AdMagnetData = self
            .get_json(&format!("magnet/status?id={torrent_id}"))
            .await?;
        Ok(data.magnets.into())
    }

    async fn get_torrents(&self, _limit: usize) -> CoreResult<HashMap<String, TorrentInfo>> {
        let data: AdMagnetsData = self.get_json("magnet/status?").await?;
        Ok(data
            .magnets
            .into_iter()
            .map(TorrentInfo::from)
            .map(|t| (t.hash.clone(), t))
            .collect())
    }
}
