use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::aggregator::SearchAggregator;
use super::*;
use crate::notify::{MessageTransport, Notifier, SendRequest};
use std::sync::Arc;

/// In-memory transport that records every send and recall and issues
/// sequential message ids.
#[derive(Default)]
struct RecordingTransport {
    sends: StdMutex<Vec<SendRequest>>,
    recalls: StdMutex<Vec<String>>,
    counter: AtomicUsize,
}

#[async_trait::async_trait]
impl MessageTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, request: &SendRequest) -> anyhow::Result<Option<String>> {
        self.sends.lock().unwrap().push(request.clone());
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("m{id}")))
    }

    async fn recall(&self, msg_id: &str) -> anyhow::Result<()> {
        self.recalls.lock().unwrap().push(msg_id.to_string());
        Ok(())
    }
}

struct StaticBackend {
    label: &'static str,
    limit: usize,
    results: Vec<SearchResultItem>,
    fail: bool,
}

#[async_trait::async_trait]
impl SearchBackend for StaticBackend {
    fn label(&self) -> &'static str {
        self.label
    }

    fn article_limit(&self) -> usize {
        self.limit
    }

    async fn search(&self, _query: &str) -> anyhow::Result<Vec<SearchResultItem>> {
        if self.fail {
            anyhow::bail!("backend down");
        }
        Ok(self.results.clone())
    }
}

fn item(title: &str, image: &str) -> SearchResultItem {
    SearchResultItem {
        title: title.to_string(),
        link: format!("http://example.com/{title}"),
        description: String::new(),
        image_url: image.to_string(),
    }
}

fn harness(
    backends: Vec<Arc<dyn SearchBackend>>,
) -> (SearchAggregator, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let notifier = Arc::new(Notifier::new(vec![transport.clone()], 1));
    let aggregator = SearchAggregator::new(backends, notifier, "http://img/placeholder.png".into());
    (aggregator, transport)
}

#[tokio::test]
async fn merges_by_priority_and_sends_news_plus_summary() {
    let pan = Arc::new(StaticBackend {
        label: "网盘",
        limit: 6,
        results: vec![item("pan-a", "http://img/a.png"), item("pan-b", "")],
        fail: false,
    });
    let bt = Arc::new(StaticBackend {
        label: "BT",
        limit: 2,
        results: vec![item("bt-a", ""), item("bt-b", ""), item("bt-c", "")],
        fail: false,
    });
    let (aggregator, transport) = harness(vec![pan, bt]);

    let summary = aggregator.run("海贼王", "u1").await;
    assert_eq!(summary, "已发送4条搜索结果");

    let sends = transport.sends.lock().unwrap();
    let news = sends.iter().find(|s| s.msgtype == "news").unwrap();
    let articles = &news.news.as_ref().unwrap().articles;
    assert_eq!(articles.len(), 4);
    // Pan results first (priority 0), bt-c dropped by the per-backend limit.
    assert_eq!(articles[0].title, "1. [网盘] pan-a");
    assert_eq!(articles[1].title, "2. [网盘] pan-b");
    assert_eq!(articles[2].title, "3. [BT] bt-a");
    assert_eq!(articles[3].title, "4. [BT] bt-b");
    // Imageless articles borrow the first image seen.
    assert_eq!(articles[0].picurl, "http://img/a.png");
    assert_eq!(articles[3].picurl, "http://img/a.png");

    let summary_text = sends.last().unwrap();
    assert_eq!(summary_text.msgtype, "text");
    assert!(
        summary_text.text.as_ref().unwrap().content.contains("共找到5个结果")
    );
}

#[tokio::test]
async fn status_messages_are_recalled() {
    let pan = Arc::new(StaticBackend {
        label: "网盘",
        limit: 6,
        results: vec![item("pan-a", "")],
        fail: false,
    });
    let (aggregator, transport) = harness(vec![pan]);
    aggregator.run("q", "u1").await;

    // Opening status plus one backend status, both recalled.
    let recalls = transport.recalls.lock().unwrap();
    assert_eq!(recalls.len(), 2);
}

#[tokio::test]
async fn all_empty_sends_no_result_text() {
    let empty = Arc::new(StaticBackend {
        label: "网盘",
        limit: 6,
        results: vec![],
        fail: false,
    });
    let failing = Arc::new(StaticBackend {
        label: "BT",
        limit: 2,
        results: vec![],
        fail: true,
    });
    let (aggregator, transport) = harness(vec![empty, failing]);

    let summary = aggregator.run("nothing", "u1").await;
    assert!(summary.contains("没有找到"));

    let sends = transport.sends.lock().unwrap();
    assert!(sends.iter().all(|s| s.msgtype == "text"));
    assert!(
        sends
            .last()
            .unwrap()
            .text
            .as_ref()
            .unwrap()
            .content
            .contains("没有找到")
    );
    // Statuses (opening + two backends) recalled even on the empty path.
    assert_eq!(transport.recalls.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn article_cap_holds_across_backends() {
    let pan = Arc::new(StaticBackend {
        label: "网盘",
        limit: 6,
        results: (0..10).map(|i| item(&format!("p{i}"), "")).collect(),
        fail: false,
    });
    let bt = Arc::new(StaticBackend {
        label: "BT",
        limit: 4,
        results: (0..5).map(|i| item(&format!("b{i}"), "")).collect(),
        fail: false,
    });
    let (aggregator, transport) = harness(vec![pan, bt]);
    aggregator.run("big", "u1").await;

    let sends = transport.sends.lock().unwrap();
    let news = sends.iter().find(|s| s.msgtype == "news").unwrap();
    let articles = &news.news.as_ref().unwrap().articles;
    assert_eq!(articles.len(), 8);
    assert!(articles[5].title.contains("p5"));
    assert!(articles[6].title.contains("b0"));
}

#[tokio::test]
async fn missing_images_fall_back_to_placeholder() {
    let pan = Arc::new(StaticBackend {
        label: "网盘",
        limit: 6,
        results: vec![item("bare", "")],
        fail: false,
    });
    let (aggregator, transport) = harness(vec![pan]);
    aggregator.run("q", "u1").await;

    let sends = transport.sends.lock().unwrap();
    let news = sends.iter().find(|s| s.msgtype == "news").unwrap();
    assert_eq!(
        news.news.as_ref().unwrap().articles[0].picurl,
        "http://img/placeholder.png"
    );
}

#[tokio::test]
async fn repeat_query_within_window_is_not_reissued() {
    let pan = Arc::new(StaticBackend {
        label: "网盘",
        limit: 6,
        results: vec![item("a", "")],
        fail: false,
    });
    let (aggregator, transport) = harness(vec![pan]);

    aggregator.run("dup", "u1").await;
    let sends_after_first = transport.sends.lock().unwrap().len();

    let summary = aggregator.run("dup", "u1").await;
    assert!(summary.contains("正在处理"));
    assert_eq!(transport.sends.lock().unwrap().len(), sends_after_first);

    // A different user is not throttled by the first user's query.
    let summary = aggregator.run("dup", "u2").await;
    assert!(summary.contains("已发送"));
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let (aggregator, transport) = harness(vec![]);
    let summary = aggregator.run("   ", "u1").await;
    assert!(summary.contains("不能为空"));
    assert_eq!(transport.sends.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn no_backends_configured() {
    let (aggregator, _) = harness(vec![]);
    let summary = aggregator.run("q", "u1").await;
    assert!(summary.contains("未配置"));
}

mod backend_wire {
    use super::super::backends::{PanBackend, TorrentBackend};
    use super::*;
    use crate::config::{PanConfig, TorrentConfig};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn torrent_backend_normalizes_hits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("query", "one piece"))
            .and(query_param("apikey", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"title": "One Piece 1080p", "indexer": "idx1", "guid": "http://t/1"},
                {"title": "One Piece 720p", "indexer": "idx2", "guid": ""}
            ])))
            .mount(&server)
            .await;

        let backend = TorrentBackend::new(&TorrentConfig {
            enabled: true,
            url: server.uri(),
            api_key: "k".into(),
        });
        let items = backend.search("one piece").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].link, "http://t/1");
        assert_eq!(items[0].description, "idx1");
        // Missing guid falls back to the service URL.
        assert_eq!(items[1].link, server.uri());
    }

    #[tokio::test]
    async fn pan_backend_logs_in_once_and_flattens_channels() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "data": {"token": "PAN_TOKEN"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/search"))
            .and(query_param("keyword", "海贼王"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": [
                    {"channelInfo": {"name": "频道A"}, "list": [
                        {"title": "资源1", "image": "http://i/1.png", "channel": "频道A",
                         "cloudLinks": [{"link": "http://pan/1"}], "magnetLink": ""},
                        {"title": "资源2", "image": "", "channel": "频道A",
                         "cloudLinks": [], "magnetLink": "magnet:?xt=abc"}
                    ]},
                    {"list": [
                        {"title": "资源3", "cloudLinks": [], "magnetLink": ""}
                    ]}
                ]
            })))
            .mount(&server)
            .await;

        let backend = PanBackend::new(&PanConfig {
            enabled: true,
            url: server.uri(),
            username: "u".into(),
            password: "p".into(),
        });
        let items = backend.search("海贼王").await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].link, "http://pan/1");
        assert_eq!(items[1].link, "magnet:?xt=abc");
        // No link of any kind falls back to the service URL.
        assert_eq!(items[2].link, server.uri());

        // Second search reuses the cached login token.
        backend.search("海贼王").await.unwrap();
        let login_hits = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/api/user/login")
            .count();
        assert_eq!(login_hits, 1);
    }

    #[tokio::test]
    async fn pan_login_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false, "message": "bad credentials"
            })))
            .mount(&server)
            .await;
        let backend = PanBackend::new(&PanConfig {
            enabled: true,
            url: server.uri(),
            username: "u".into(),
            password: "wrong".into(),
        });
        assert!(backend.search("q").await.is_err());
    }
}
