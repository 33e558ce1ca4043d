//! Custom-menu administration against the platform menu API.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::info;

use crate::config::{Config, WecomConfig};
use crate::notify::fetch_access_token;
use crate::token::TokenCache;
use crate::utils::{http_client, join_url};

#[derive(Debug, Clone, serde::Serialize)]
pub struct MenuOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub menu: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MenuResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    button: Option<serde_json::Value>,
}

pub struct MenuClient {
    api_base: String,
    corp_id: String,
    corp_secret: String,
    agent_id: i64,
    definition: Option<serde_json::Value>,
    tokens: Arc<TokenCache>,
    client: reqwest::Client,
}

impl MenuClient {
    pub fn new(wecom: &WecomConfig, definition: Option<serde_json::Value>, tokens: Arc<TokenCache>) -> Self {
        Self {
            api_base: wecom.api_base.clone(),
            corp_id: wecom.corp_id.clone(),
            corp_secret: wecom.corp_secret.clone(),
            agent_id: wecom.agent_id,
            definition,
            tokens,
            client: http_client(),
        }
    }

    pub fn from_config(config: &Config, tokens: Arc<TokenCache>) -> Self {
        Self::new(&config.wecom, config.menu.clone(), tokens)
    }

    async fn token(&self) -> Result<String> {
        self.tokens
            .get(|| {
                fetch_access_token(&self.client, &self.api_base, &self.corp_id, &self.corp_secret)
            })
            .await
    }

    /// Push the configured menu definition to the platform.
    pub async fn create(&self) -> Result<MenuOutcome> {
        let definition = self
            .definition
            .as_ref()
            .ok_or_else(|| anyhow!("no menu definition in config"))?;
        let token = self.token().await?;
        let agent = self.agent_id.to_string();
        let url = join_url(&self.api_base, "cgi-bin/menu/create");
        let response: MenuResponse = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str()), ("agentid", agent.as_str())])
            .json(definition)
            .send()
            .await
            .context("menu create request failed")?
            .json()
            .await
            .context("menu create response was not JSON")?;
        if response.errcode != 0 {
            return Ok(MenuOutcome {
                success: false,
                message: format!("创建菜单失败: {} ({})", response.errmsg, response.errcode),
                menu: None,
            });
        }
        info!("menu: created for agent {}", self.agent_id);
        Ok(MenuOutcome {
            success: true,
            message: "菜单创建成功".to_string(),
            menu: None,
        })
    }

    pub async fn get(&self) -> Result<MenuOutcome> {
        let token = self.token().await?;
        let agent = self.agent_id.to_string();
        let url = join_url(&self.api_base, "cgi-bin/menu/get");
        let response: MenuResponse = self
            .client
            .get(&url)
            .query(&[("access_token", token.as_str()), ("agentid", agent.as_str())])
            .send()
            .await
            .context("menu get request failed")?
            .json()
            .await
            .context("menu get response was not JSON")?;
        if response.errcode != 0 {
            return Ok(MenuOutcome {
                success: false,
                message: format!("查询菜单失败: {} ({})", response.errmsg, response.errcode),
                menu: None,
            });
        }
        Ok(MenuOutcome {
            success: true,
            message: "查询菜单成功".to_string(),
            menu: response.button,
        })
    }

    pub async fn delete(&self) -> Result<MenuOutcome> {
        let token = self.token().await?;
        let agent = self.agent_id.to_string();
        let url = join_url(&self.api_base, "cgi-bin/menu/delete");
        let response: MenuResponse = self
            .client
            .get(&url)
            .query(&[("access_token", token.as_str()), ("agentid", agent.as_str())])
            .send()
            .await
            .context("menu delete request failed")?
            .json()
            .await
            .context("menu delete response was not JSON")?;
        if response.errcode != 0 {
            return Ok(MenuOutcome {
                success: false,
                message: format!("删除菜单失败: {} ({})", response.errmsg, response.errcode),
                menu: None,
            });
        }
        info!("menu: deleted for agent {}", self.agent_id);
        Ok(MenuOutcome {
            success: true,
            message: "菜单删除成功".to_string(),
            menu: None,
        })
    }
}
