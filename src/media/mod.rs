//! Media-server library refresh (Emby-style API). Outcomes are always
//! textual so command replies never fail on a backend error.

use tracing::{error, info, warn};

use crate::config::MediaConfig;
use crate::utils::{http_client, join_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTarget {
    All,
    Movies,
    Tv,
    Anime,
}

impl RefreshTarget {
    pub fn label(self) -> &'static str {
        match self {
            Self::All => "全部",
            Self::Movies => "电影",
            Self::Tv => "电视剧",
            Self::Anime => "动漫",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub success: bool,
    pub message: String,
}

pub struct MediaService {
    enabled: bool,
    base_url: String,
    api_key: String,
    libraries: crate::config::LibraryIds,
    client: reqwest::Client,
}

impl MediaService {
    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            enabled: config.enabled,
            base_url: config.url.clone(),
            api_key: config.api_key.clone(),
            libraries: config.libraries.clone(),
            client: http_client(),
        }
    }

    fn library_id(&self, target: RefreshTarget) -> Option<&str> {
        match target {
            RefreshTarget::All => None,
            RefreshTarget::Movies => self.libraries.movie.as_deref(),
            RefreshTarget::Tv => self.libraries.tv.as_deref(),
            RefreshTarget::Anime => self.libraries.anime.as_deref(),
        }
    }

    /// Kick off a library scan. Never returns an error; failures fold into
    /// the outcome message so the caller can reply with it as-is.
    pub async fn refresh(&self, target: RefreshTarget) -> RefreshOutcome {
        let label = target.label();
        if !self.enabled {
            return RefreshOutcome {
                success: false,
                message: "媒体服务未启用".to_string(),
            };
        }
        if target != RefreshTarget::All && self.library_id(target).is_none() {
            warn!("media: no library id configured for {}", label);
            return RefreshOutcome {
                success: false,
                message: format!("未配置{}媒体库", label),
            };
        }

        let url = match self.library_id(target) {
            Some(id) => join_url(&self.base_url, &format!("emby/Items/{id}/Refresh")),
            None => join_url(&self.base_url, "emby/Library/Refresh"),
        };

        match self
            .client
            .post(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                info!("media: refresh {} accepted", label);
                RefreshOutcome {
                    success: true,
                    message: format!("{}媒体库更新任务已启动", label),
                }
            }
            Ok(response) => {
                warn!("media: refresh {} rejected: HTTP {}", label, response.status());
                RefreshOutcome {
                    success: false,
                    message: format!("{}媒体库更新失败 (HTTP {})", label, response.status().as_u16()),
                }
            }
            Err(err) => {
                error!("media: refresh {} request failed: {:#}", label, err);
                RefreshOutcome {
                    success: false,
                    message: format!("{}媒体库更新失败: 无法连接媒体服务器", label),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryIds;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(base: &str) -> MediaService {
        MediaService::from_config(&MediaConfig {
            enabled: true,
            url: base.to_string(),
            api_key: "mk".into(),
            libraries: LibraryIds {
                movie: Some("11".into()),
                tv: Some("22".into()),
                anime: None,
            },
        })
    }

    #[tokio::test]
    async fn refresh_all_hits_library_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emby/Library/Refresh"))
            .and(query_param("api_key", "mk"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let outcome = service(&server.uri()).refresh(RefreshTarget::All).await;
        assert!(outcome.success);
        assert!(outcome.message.contains("全部"));
    }

    #[tokio::test]
    async fn refresh_movies_targets_library_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emby/Items/11/Refresh"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        assert!(service(&server.uri()).refresh(RefreshTarget::Movies).await.success);
    }

    #[tokio::test]
    async fn missing_library_id_is_reported() {
        let outcome = service("http://127.0.0.1:1").refresh(RefreshTarget::Anime).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("未配置"));
    }

    #[tokio::test]
    async fn http_error_folds_into_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emby/Library/Refresh"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let outcome = service(&server.uri()).refresh(RefreshTarget::All).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("401"));
    }

    #[tokio::test]
    async fn disabled_service_declines() {
        let config = MediaConfig {
            url: "http://127.0.0.1:1".into(),
            ..MediaConfig::default()
        };
        let outcome = MediaService::from_config(&config).refresh(RefreshTarget::All).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("未启用"));
    }
}
