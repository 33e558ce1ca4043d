//! Command routing: the fixed command set, the search-prompt state machine,
//! and the fallback into implicit search.

use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use crate::codec::InboundEvent;
use crate::media::{MediaService, RefreshTarget};
use crate::notify::Notifier;
use crate::search::SearchAggregator;
use crate::session::{SessionState, SessionStore};

/// The wire strings are the platform menu keys and must not change.
const SYSTEM_COMMANDS: &[&str] = &[
    "UpdateEmbyAll",
    "UpdateEmbyMov",
    "UpdateEmbyTv",
    "UpdateEmbyAmi",
    "ServiceStatus",
    "SearchResource",
    "help",
    "帮助",
];

pub fn is_system_command(command: &str) -> bool {
    SYSTEM_COMMANDS.contains(&command)
}

fn help_message() -> String {
    "支持的命令列表:\n\
     - UpdateEmbyAll: 更新全部媒体库\n\
     - UpdateEmbyMov: 更新电影媒体库\n\
     - UpdateEmbyTv: 更新电视剧媒体库\n\
     - UpdateEmbyAmi: 更新动漫媒体库\n\
     - ServiceStatus: 查询服务状态\n\
     - SearchResource: 搜索资源\n\
     - help / 帮助: 显示本列表\n\
     直接发送任意文字也会作为资源搜索"
        .to_string()
}

pub struct CommandRouter {
    sessions: Arc<SessionStore>,
    notifier: Arc<Notifier>,
    media: Arc<MediaService>,
    aggregator: Arc<SearchAggregator>,
}

impl CommandRouter {
    pub fn new(
        sessions: Arc<SessionStore>,
        notifier: Arc<Notifier>,
        media: Arc<MediaService>,
        aggregator: Arc<SearchAggregator>,
    ) -> Self {
        Self {
            sessions,
            notifier,
            media,
            aggregator,
        }
    }

    /// Handle one decoded event and reply to the user. The returned string is
    /// the reply text (or a search summary) for logging and the proxy
    /// endpoint; nothing here can fail outward — every error becomes a
    /// best-effort text reply.
    pub async fn dispatch(&self, event: &InboundEvent) -> String {
        let command = event.content.trim();
        let user = event.from_user.as_str();
        if command.is_empty() {
            let reply = "收到空命令，请发送有效指令或 help 查看帮助".to_string();
            self.notifier.send_text(&reply, user).await;
            return reply;
        }

        // A pending search prompt consumes the next free-text message; a
        // recognized command always wins and cancels the prompt.
        if self.sessions.get(user).await == SessionState::AwaitingSearchInput {
            self.sessions.clear(user).await;
            if is_system_command(command) {
                info!("commands: {} cancelled search prompt with {}", user, command);
            } else {
                info!("commands: search input {:?} from {}", command, user);
                return self.aggregator.run(command, user).await;
            }
        }

        let reply = match command {
            "UpdateEmbyAll" => self.refresh_reply(RefreshTarget::All).await,
            "UpdateEmbyMov" => self.refresh_reply(RefreshTarget::Movies).await,
            "UpdateEmbyTv" => self.refresh_reply(RefreshTarget::Tv).await,
            "UpdateEmbyAmi" => self.refresh_reply(RefreshTarget::Anime).await,
            "ServiceStatus" => format!(
                "服务运行正常\n当前时间: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S")
            ),
            "SearchResource" => {
                self.sessions
                    .set(user, SessionState::AwaitingSearchInput)
                    .await;
                "请输入要搜索的资源名称，例如：海贼王".to_string()
            }
            "help" | "帮助" => help_message(),
            _ => {
                info!("commands: unknown input {:?}, treating as search", command);
                return self.aggregator.run(command, user).await;
            }
        };

        let outcome = self.notifier.send_text(&reply, user).await;
        if !outcome.success {
            warn!("commands: reply to {} was not delivered", user);
        }
        reply
    }

    async fn refresh_reply(&self, target: RefreshTarget) -> String {
        self.media.refresh(target).await.message
    }
}
