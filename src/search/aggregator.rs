//! Fan-out/fan-in over the configured search backends, with status messages
//! that are recalled once the real results are ready.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{SearchBackend, SearchResultItem};
use crate::notify::{ARTICLE_LIMIT, Article, Notifier};

/// Repeat of the same user+query inside this window is answered with a
/// please-wait reply instead of a second fan-out.
const INFLIGHT_WINDOW: Duration = Duration::from_secs(5);
/// The in-flight map is pruned once it grows past this many entries.
const INFLIGHT_PRUNE_SIZE: usize = 100;
const INFLIGHT_PRUNE_AGE: Duration = Duration::from_secs(30);

pub struct SearchAggregator {
    backends: Vec<Arc<dyn SearchBackend>>,
    notifier: Arc<Notifier>,
    placeholder_image: String,
    in_flight: Mutex<HashMap<String, Instant>>,
}

impl SearchAggregator {
    pub fn new(
        backends: Vec<Arc<dyn SearchBackend>>,
        notifier: Arc<Notifier>,
        placeholder_image: String,
    ) -> Self {
        Self {
            backends,
            notifier,
            placeholder_image,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// True when this user+query was already started within the window.
    async fn is_repeat(&self, key: &str) -> bool {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(started) = in_flight.get(key)
            && started.elapsed() < INFLIGHT_WINDOW
        {
            return true;
        }
        in_flight.insert(key.to_string(), Instant::now());
        if in_flight.len() > INFLIGHT_PRUNE_SIZE {
            in_flight.retain(|_, started| started.elapsed() < INFLIGHT_PRUNE_AGE);
        }
        false
    }

    async fn recall_statuses(&self, ids: &[String]) {
        for id in ids {
            if !self.notifier.recall(id).await {
                warn!("search: failed to recall status message {}", id);
            }
        }
    }

    /// Run a search for `user`, delivering results as messages; the returned
    /// string is a short textual summary for logs and the proxy endpoint.
    pub async fn run(&self, query: &str, user: &str) -> String {
        let query = query.trim();
        if query.is_empty() {
            let reply = "搜索内容不能为空，请重新输入".to_string();
            self.notifier.send_text(&reply, user).await;
            return reply;
        }
        if self.backends.is_empty() {
            let reply = "未配置任何搜索源".to_string();
            self.notifier.send_text(&reply, user).await;
            return reply;
        }

        let key = format!("{user}:{query}");
        if self.is_repeat(&key).await {
            info!("search: repeat request {:?} within window, not re-issued", key);
            return format!("正在处理\"{query}\"的搜索请求，请稍候...");
        }

        info!("search: {:?} for {}", query, user);
        let status_ids = Arc::new(Mutex::new(Vec::<String>::new()));
        let opening = self
            .notifier
            .send_text(&format!("正在查询\"{query}\"相关资源..."), user)
            .await;
        if let Some(id) = opening.msg_id {
            status_ids.lock().await.push(id);
        }

        // Each backend task sends its own completion status before the
        // barrier; ordering between backends is deliberately unconstrained.
        let mut tasks = JoinSet::new();
        for (priority, backend) in self.backends.iter().enumerate() {
            let backend = Arc::clone(backend);
            let notifier = Arc::clone(&self.notifier);
            let status_ids = Arc::clone(&status_ids);
            let query = query.to_string();
            let user = user.to_string();
            tasks.spawn(async move {
                let results = match backend.search(&query).await {
                    Ok(results) => results,
                    Err(err) => {
                        warn!("search: {} backend failed: {:#}", backend.label(), err);
                        Vec::new()
                    }
                };
                let status = notifier
                    .send_text(
                        &format!("{}查询完成，找到{}个结果", backend.label(), results.len()),
                        &user,
                    )
                    .await;
                if let Some(id) = status.msg_id {
                    status_ids.lock().await.push(id);
                }
                (priority, results)
            });
        }

        let mut collected: Vec<(usize, Vec<SearchResultItem>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => collected.push(pair),
                Err(err) => warn!("search: backend task aborted: {}", err),
            }
        }
        collected.sort_by_key(|(priority, _)| *priority);

        let status_ids = {
            let mut guard = status_ids.lock().await;
            std::mem::take(&mut *guard)
        };
        self.recall_statuses(&status_ids).await;

        let total: usize = collected.iter().map(|(_, results)| results.len()).sum();
        if total == 0 {
            let reply = format!("没有找到与\"{query}\"相关的资源");
            self.notifier.send_text(&reply, user).await;
            return reply;
        }

        let articles = self.merge_articles(&collected);
        let sent = articles.len();
        if !self.notifier.send_articles(articles, user).await {
            let reply = "搜索结果发送失败".to_string();
            self.notifier.send_text(&reply, user).await;
            return reply;
        }
        self.notifier
            .send_text(&format!("共找到{total}个结果，已发送前{sent}条"), user)
            .await;
        format!("已发送{sent}条搜索结果")
    }

    /// Merge by backend priority then arrival order, respecting per-backend
    /// limits and the platform article cap. Imageless articles borrow the
    /// first image any higher-priority result carried.
    fn merge_articles(&self, collected: &[(usize, Vec<SearchResultItem>)]) -> Vec<Article> {
        let fallback_image = collected
            .iter()
            .flat_map(|(_, results)| results.iter())
            .map(|item| item.image_url.as_str())
            .find(|image| !image.is_empty())
            .unwrap_or(&self.placeholder_image)
            .to_string();

        let mut articles = Vec::new();
        for (priority, results) in collected {
            let backend = &self.backends[*priority];
            for item in results.iter().take(backend.article_limit()) {
                if articles.len() == ARTICLE_LIMIT {
                    return articles;
                }
                let title = if item.title.is_empty() {
                    "未知标题"
                } else {
                    item.title.as_str()
                };
                articles.push(Article {
                    title: format!("{}. [{}] {}", articles.len() + 1, backend.label(), title),
                    description: item.description.clone(),
                    url: item.link.clone(),
                    picurl: if item.image_url.is_empty() {
                        fallback_image.clone()
                    } else {
                        item.image_url.clone()
                    },
                });
            }
        }
        articles
    }
}
