//! Concrete search backends: a torrent indexer API and a cloud-pan search
//! service with its own login flow.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{SearchBackend, SearchResultItem};
use crate::config::{PanConfig, SearchConfig, TorrentConfig};
use crate::token::{IssuedToken, TokenCache};
use crate::utils::{http_client, join_url};

/// Pan results lead the merged message; torrents fill the remainder.
const PAN_ARTICLE_LIMIT: usize = 6;
const TORRENT_ARTICLE_LIMIT: usize = 2;

/// Pan login tokens are long-lived; refresh well before the service does.
const PAN_TOKEN_TTL: Duration = Duration::from_secs(6 * 3600);

pub fn build_backends(config: &SearchConfig) -> Vec<Arc<dyn SearchBackend>> {
    let mut backends: Vec<Arc<dyn SearchBackend>> = Vec::new();
    if config.pan.enabled && !config.pan.url.is_empty() {
        backends.push(Arc::new(PanBackend::new(&config.pan)));
    }
    if config.torrent.enabled && !config.torrent.url.is_empty() {
        backends.push(Arc::new(TorrentBackend::new(&config.torrent)));
    }
    backends
}

#[derive(Debug, Deserialize)]
struct TorrentHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    indexer: String,
    #[serde(default)]
    guid: String,
}

pub struct TorrentBackend {
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl TorrentBackend {
    pub fn new(config: &TorrentConfig) -> Self {
        Self {
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl SearchBackend for TorrentBackend {
    fn label(&self) -> &'static str {
        "BT"
    }

    fn article_limit(&self) -> usize {
        TORRENT_ARTICLE_LIMIT
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResultItem>> {
        let hits: Vec<TorrentHit> = self
            .client
            .get(&self.url)
            .query(&[("query", query), ("apikey", &self.api_key)])
            .send()
            .await
            .context("torrent search request failed")?
            .json()
            .await
            .context("torrent search response was not JSON")?;
        debug!("search: torrent returned {} hits", hits.len());
        Ok(hits
            .into_iter()
            .map(|hit| SearchResultItem {
                title: hit.title,
                link: if hit.guid.is_empty() {
                    self.url.clone()
                } else {
                    hit.guid
                },
                description: hit.indexer,
                image_url: String::new(),
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct PanLoginResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
    data: Option<PanLoginData>,
}

#[derive(Debug, Deserialize)]
struct PanLoginData {
    #[serde(default)]
    token: String,
}

#[derive(Debug, Deserialize)]
struct PanSearchResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Vec<PanChannel>,
}

#[derive(Debug, Deserialize)]
struct PanChannel {
    #[serde(default)]
    list: Vec<PanHit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PanHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    cloud_links: Vec<PanCloudLink>,
    #[serde(default)]
    magnet_link: String,
    #[serde(default)]
    channel: String,
}

#[derive(Debug, Deserialize)]
struct PanCloudLink {
    #[serde(default)]
    link: String,
}

pub struct PanBackend {
    base_url: String,
    username: String,
    password: String,
    tokens: TokenCache,
    client: reqwest::Client,
}

impl PanBackend {
    pub fn new(config: &PanConfig) -> Self {
        Self {
            base_url: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            tokens: TokenCache::new(),
            client: http_client(),
        }
    }

    async fn login(&self) -> Result<IssuedToken> {
        let url = join_url(&self.base_url, "api/user/login");
        let response: PanLoginResponse = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await
            .context("pan login request failed")?
            .json()
            .await
            .context("pan login response was not JSON")?;
        let token = response.data.map(|d| d.token).unwrap_or_default();
        if !response.success || token.is_empty() {
            return Err(anyhow!("pan login rejected: {}", response.message));
        }
        Ok(IssuedToken {
            value: token,
            ttl: PAN_TOKEN_TTL,
        })
    }
}

#[async_trait]
impl SearchBackend for PanBackend {
    fn label(&self) -> &'static str {
        "网盘"
    }

    fn article_limit(&self) -> usize {
        PAN_ARTICLE_LIMIT
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResultItem>> {
        let token = self.tokens.get(|| self.login()).await?;
        let url = join_url(&self.base_url, "api/search");
        let response: PanSearchResponse = self
            .client
            .get(&url)
            .query(&[("keyword", query)])
            .bearer_auth(&token)
            .send()
            .await
            .context("pan search request failed")?
            .json()
            .await
            .context("pan search response was not JSON")?;
        if !response.success {
            return Err(anyhow!("pan search rejected: {}", response.message));
        }

        let mut items = Vec::new();
        for channel in response.data {
            for hit in channel.list {
                let link = hit
                    .cloud_links
                    .iter()
                    .map(|l| l.link.clone())
                    .find(|l| !l.is_empty())
                    .or_else(|| (!hit.magnet_link.is_empty()).then(|| hit.magnet_link.clone()))
                    .unwrap_or_else(|| self.base_url.clone());
                items.push(SearchResultItem {
                    title: hit.title,
                    link,
                    description: hit.channel,
                    image_url: hit.image,
                });
            }
        }
        debug!("search: pan returned {} hits", items.len());
        Ok(items)
    }
}
