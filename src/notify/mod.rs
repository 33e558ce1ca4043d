//! Outbound messaging: platform-shaped send/recall requests over a
//! prioritized list of transports (relay first when configured, then the
//! platform API directly).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::WecomConfig;
use crate::token::{IssuedToken, TokenCache};
use crate::utils::{http_client, join_url};

/// Platform hard limit on articles per news message.
pub const ARTICLE_LIMIT: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    pub description: String,
    pub url: String,
    pub picurl: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextContent {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewsContent {
    pub articles: Vec<Article>,
}

/// Wire shape of a platform message-send call.
#[derive(Debug, Clone, Serialize)]
pub struct SendRequest {
    pub touser: String,
    pub msgtype: String,
    pub agentid: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub news: Option<NewsContent>,
    pub safe: u8,
}

impl SendRequest {
    pub fn text(content: &str, to: &str, agent_id: i64) -> Self {
        Self {
            touser: to.to_string(),
            msgtype: "text".to_string(),
            agentid: agent_id,
            text: Some(TextContent {
                content: content.to_string(),
            }),
            news: None,
            safe: 0,
        }
    }

    pub fn news(articles: Vec<Article>, to: &str, agent_id: i64) -> Self {
        Self {
            touser: to.to_string(),
            msgtype: "news".to_string(),
            agentid: agent_id,
            text: None,
            news: Some(NewsContent { articles }),
            safe: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    msgid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// Fetch a platform access token. Shared by the direct transport and the
/// menu client.
pub async fn fetch_access_token(
    client: &reqwest::Client,
    api_base: &str,
    corp_id: &str,
    corp_secret: &str,
) -> Result<IssuedToken> {
    let url = join_url(api_base, "cgi-bin/gettoken");
    let response: TokenResponse = client
        .get(&url)
        .query(&[("corpid", corp_id), ("corpsecret", corp_secret)])
        .send()
        .await
        .context("token request failed")?
        .json()
        .await
        .context("token response was not JSON")?;
    if response.errcode != 0 || response.access_token.is_empty() {
        return Err(anyhow!(
            "token endpoint returned errcode {}: {}",
            response.errcode,
            response.errmsg
        ));
    }
    Ok(IssuedToken {
        value: response.access_token,
        ttl: Duration::from_secs(response.expires_in),
    })
}

/// One way of getting a platform-shaped message out. Transports are tried in
/// order; the first success wins.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver; returns the platform message id when one was issued.
    async fn deliver(&self, request: &SendRequest) -> Result<Option<String>>;

    async fn recall(&self, msg_id: &str) -> Result<()>;
}

/// Sends through a relay host that holds the platform credentials itself, so
/// no access token is needed on this side.
pub struct RelayTransport {
    base_url: String,
    client: reqwest::Client,
}

impl RelayTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl MessageTransport for RelayTransport {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn deliver(&self, request: &SendRequest) -> Result<Option<String>> {
        let url = join_url(&self.base_url, "cgi-bin/message/send");
        let response: ApiResponse = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("relay send request failed")?
            .json()
            .await
            .context("relay send response was not JSON")?;
        if response.errcode != 0 {
            return Err(anyhow!(
                "relay returned errcode {}: {}",
                response.errcode,
                response.errmsg
            ));
        }
        Ok(response.msgid)
    }

    async fn recall(&self, msg_id: &str) -> Result<()> {
        let url = join_url(&self.base_url, "cgi-bin/message/recall");
        let response: ApiResponse = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "msgid": msg_id }))
            .send()
            .await
            .context("relay recall request failed")?
            .json()
            .await
            .context("relay recall response was not JSON")?;
        if response.errcode != 0 {
            return Err(anyhow!(
                "relay recall errcode {}: {}",
                response.errcode,
                response.errmsg
            ));
        }
        Ok(())
    }
}

/// Talks to the platform API directly, minting access tokens through the
/// shared cache.
pub struct DirectTransport {
    api_base: String,
    corp_id: String,
    corp_secret: String,
    tokens: Arc<TokenCache>,
    client: reqwest::Client,
}

impl DirectTransport {
    pub fn new(config: &WecomConfig, tokens: Arc<TokenCache>) -> Self {
        Self {
            api_base: config.api_base.clone(),
            corp_id: config.corp_id.clone(),
            corp_secret: config.corp_secret.clone(),
            tokens,
            client: http_client(),
        }
    }

    async fn token(&self) -> Result<String> {
        self.tokens
            .get(|| {
                fetch_access_token(&self.client, &self.api_base, &self.corp_id, &self.corp_secret)
            })
            .await
    }
}

#[async_trait]
impl MessageTransport for DirectTransport {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn deliver(&self, request: &SendRequest) -> Result<Option<String>> {
        let token = self.token().await?;
        let url = join_url(&self.api_base, "cgi-bin/message/send");
        let response: ApiResponse = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .json(request)
            .send()
            .await
            .context("platform send request failed")?
            .json()
            .await
            .context("platform send response was not JSON")?;
        if response.errcode != 0 {
            return Err(anyhow!(
                "platform returned errcode {}: {}",
                response.errcode,
                response.errmsg
            ));
        }
        Ok(response.msgid)
    }

    async fn recall(&self, msg_id: &str) -> Result<()> {
        let token = self.token().await?;
        let url = join_url(&self.api_base, "cgi-bin/message/recall");
        let response: ApiResponse = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .json(&serde_json::json!({ "msgid": msg_id }))
            .send()
            .await
            .context("platform recall request failed")?
            .json()
            .await
            .context("platform recall response was not JSON")?;
        if response.errcode != 0 {
            return Err(anyhow!(
                "platform recall errcode {}: {}",
                response.errcode,
                response.errmsg
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    pub success: bool,
    pub msg_id: Option<String>,
}

/// High-level send/recall API used by the rest of the gateway.
pub struct Notifier {
    transports: Vec<Arc<dyn MessageTransport>>,
    agent_id: i64,
}

impl Notifier {
    pub fn new(transports: Vec<Arc<dyn MessageTransport>>, agent_id: i64) -> Self {
        Self {
            transports,
            agent_id,
        }
    }

    /// Relay first when configured, platform API second.
    pub fn from_config(config: &crate::config::Config, tokens: Arc<TokenCache>) -> Self {
        let mut transports: Vec<Arc<dyn MessageTransport>> = Vec::new();
        if config.relay.enabled && !config.relay.url.is_empty() {
            transports.push(Arc::new(RelayTransport::new(&config.relay.url)));
        }
        transports.push(Arc::new(DirectTransport::new(&config.wecom, tokens)));
        Self::new(transports, config.wecom.agent_id)
    }

    async fn deliver(&self, request: SendRequest) -> SendOutcome {
        for transport in &self.transports {
            match transport.deliver(&request).await {
                Ok(msg_id) => {
                    info!("notify: sent {} via {}", request.msgtype, transport.name());
                    return SendOutcome {
                        success: true,
                        msg_id,
                    };
                }
                Err(err) => {
                    warn!("notify: {} transport failed: {:#}", transport.name(), err);
                }
            }
        }
        error!("notify: delivery failed on every transport");
        SendOutcome::default()
    }

    pub async fn send_text(&self, content: &str, to: &str) -> SendOutcome {
        self.deliver(SendRequest::text(content, to, self.agent_id)).await
    }

    /// News message, capped at the platform article limit.
    pub async fn send_articles(&self, mut articles: Vec<Article>, to: &str) -> bool {
        if articles.is_empty() {
            warn!("notify: refusing to send empty news message");
            return false;
        }
        if articles.len() > ARTICLE_LIMIT {
            warn!(
                "notify: truncating {} articles to the platform limit of {}",
                articles.len(),
                ARTICLE_LIMIT
            );
            articles.truncate(ARTICLE_LIMIT);
        }
        self.deliver(SendRequest::news(articles, to, self.agent_id))
            .await
            .success
    }

    /// Best-effort recall; failure is logged and swallowed.
    pub async fn recall(&self, msg_id: &str) -> bool {
        for transport in &self.transports {
            match transport.recall(msg_id).await {
                Ok(()) => return true,
                Err(err) => {
                    warn!("notify: {} recall failed: {:#}", transport.name(), err);
                }
            }
        }
        false
    }
}
