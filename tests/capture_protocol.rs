use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use zgrwise::agents::{ActionOutcome, BackgroundAgent, PageAgent, Popup, SELECTION_SAVED};
use zgrwise::capture::{CaptureClient, CaptureError, Stage};
use zgrwise::config::{MemorySettingsStore, SettingKey, Settings, SettingsStore};
use zgrwise::dom::Document;
use zgrwise::messenger::{channel, serve};
use zgrwise::models::{CaptureRecord, RemoteId, SaveReply};
use zgrwise::notifier::{BannerNotifier, MemorySurface, NoticeKind};
use zgrwise::selector::PageSelector;

fn record(selection: &str) -> CaptureRecord {
    CaptureRecord {
        selection_text: selection.to_string(),
        page_title: "Ownership".to_string(),
        page_url: "https://blog.example.com/rust/ownership".to_string(),
        page_content: "Full article body.".to_string(),
        ..Default::default()
    }
}

fn store(server: &MockServer) -> Arc<MemorySettingsStore> {
    Arc::new(MemorySettingsStore::with_api(&server.uri(), "devkey"))
}

async fn mount_source(server: &MockServer, id: Value) {
    Mock::given(method("POST"))
        .and(path("/api/sources"))
        .and(header("X-API-Key", "devkey"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": id, "title": "Ownership" })),
        )
        .mount(server)
        .await;
}

async fn bodies(server: &MockServer) -> Vec<(String, String, Value)> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| {
            (
                r.method.to_string(),
                r.url.path().to_string(),
                serde_json::from_slice(&r.body).unwrap_or(Value::Null),
            )
        })
        .collect()
}

#[tokio::test]
async fn selection_creates_source_then_highlight() {
    let server = MockServer::start().await;
    mount_source(&server, json!(42)).await;
    Mock::given(method("POST"))
        .and(path("/api/highlights"))
        .and(header("X-API-Key", "devkey"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 7 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CaptureClient::new(store(&server));
    let reply = client.handle(&record("X is Y")).await;
    assert_eq!(reply, SaveReply::ok("Highlight saved successfully!"));

    let seen = bodies(&server).await;
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1, "/api/sources");
    assert_eq!(
        seen[0].2,
        json!({
            "type": "web",
            "url": "https://blog.example.com/rust/ownership",
            "origin": "blog.example.com",
            "title": "Ownership",
            "raw": "Full article body."
        })
    );
    assert_eq!(seen[1].1, "/api/highlights");
    assert_eq!(
        seen[1].2,
        json!({ "source_id": 42, "text": "X is Y", "note": "", "location": "" })
    );
}

#[tokio::test]
async fn empty_selection_saves_only_the_page() {
    let server = MockServer::start().await;
    mount_source(&server, json!(3)).await;
    Mock::given(method("POST"))
        .and(path("/api/highlights"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let client = CaptureClient::new(store(&server));
    let outcome = client.save_highlight(&record("")).await.unwrap();
    assert_eq!(outcome.source_id, RemoteId::Int(3));
    assert!(!outcome.highlight_created);

    let seen = bodies(&server).await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].2["raw"], "Full article body.");
}

#[tokio::test]
async fn missing_key_makes_no_requests() {
    let server = MockServer::start().await;
    let mut settings = Settings::default();
    settings.api.base = Some(server.uri());
    let client = CaptureClient::new(Arc::new(MemorySettingsStore::new(settings)));

    let err = client.save_highlight(&record("quote")).await.unwrap_err();
    assert!(matches!(err, CaptureError::Configuration));
    assert_eq!(err.to_string(), "API settings not configured");
    assert!(bodies(&server).await.is_empty());
}

#[tokio::test]
async fn rejected_source_stops_before_highlight() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sources"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/highlights"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let client = CaptureClient::new(store(&server));
    let reply = client.handle(&record("quote")).await;
    assert_eq!(reply, SaveReply::failed("Failed to create source"));
}

#[tokio::test]
async fn rejected_highlight_keeps_the_source() {
    let server = MockServer::start().await;
    mount_source(&server, json!(9)).await;
    Mock::given(method("POST"))
        .and(path("/api/highlights"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = CaptureClient::new(store(&server));
    let err = client.save_highlight(&record("quote")).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Highlight));
    assert!(err.is_partial_effect());
    assert_eq!(err.to_string(), "Failed to create highlight");

    let seen = bodies(&server).await;
    assert_eq!(seen.iter().filter(|r| r.1 == "/api/sources").count(), 1);
}

#[tokio::test]
async fn string_source_ids_pass_through() {
    let server = MockServer::start().await;
    mount_source(&server, json!("src_abc")).await;
    Mock::given(method("POST"))
        .and(path("/api/highlights"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = CaptureClient::new(store(&server));
    client.save_highlight(&record("quote")).await.unwrap();

    let seen = bodies(&server).await;
    assert_eq!(seen[1].2["source_id"], "src_abc");
}

#[tokio::test]
async fn settings_are_read_on_every_call() {
    let server = MockServer::start().await;
    mount_source(&server, json!(1)).await;
    Mock::given(method("POST"))
        .and(path("/api/sources"))
        .and(header("X-API-Key", "rotated"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 2 })))
        .mount(&server)
        .await;

    let settings = store(&server);
    let client = CaptureClient::new(settings.clone());
    let first = client.save_highlight(&record("")).await.unwrap();
    assert_eq!(first.source_id, RemoteId::Int(1));

    settings.set(SettingKey::ApiKey, "rotated").unwrap();
    let second = client.save_highlight(&record("")).await.unwrap();
    assert_eq!(second.source_id, RemoteId::Int(2));
}

#[tokio::test]
async fn trailing_slash_in_base_is_ignored() {
    let server = MockServer::start().await;
    mount_source(&server, json!(5)).await;
    let settings = Arc::new(MemorySettingsStore::with_api(
        &format!("{}/", server.uri()),
        "devkey",
    ));
    let client = CaptureClient::new(settings);
    client.save_highlight(&record("")).await.unwrap();
    assert_eq!(bodies(&server).await[0].1, "/api/sources");
}

#[tokio::test]
async fn health_check_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .and(header("X-API-Key", "devkey"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let client = CaptureClient::new(store(&server));
    client.check_connection().await.unwrap();

    let wrong_key = CaptureClient::new(Arc::new(MemorySettingsStore::with_api(
        &server.uri(),
        "nope",
    )));
    let err = wrong_key.check_connection().await.unwrap_err();
    assert_eq!(err.to_string(), "Connection failed: 404 Not Found");
}

const PAGE: &str = r#"<html><head><title>Ownership</title></head>
<body><article><p>Each value has <em>exactly one</em> owner.</p></article></body></html>"#;

#[tokio::test]
async fn shortcut_flow_goes_through_the_background_agent() {
    let server = MockServer::start().await;
    mount_source(&server, json!(11)).await;
    Mock::given(method("POST"))
        .and(path("/api/highlights"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let mut selector = PageSelector::new(
        Document::parse(PAGE),
        "https://blog.example.com/rust/ownership",
    );
    assert!(selector.select_text("exactly one owner"));

    let (messenger, inbox) = channel(4);
    let background = BackgroundAgent::new(Arc::new(CaptureClient::new(store(&server))));
    let worker = tokio::spawn(async move { serve(inbox, &background).await });

    let surface = Arc::new(MemorySurface::new());
    let notifier = Arc::new(BannerNotifier::new(surface.clone(), Default::default()));
    let agent = PageAgent::new(Arc::new(selector), notifier, Arc::new(messenger));

    let outcome = agent.shortcut_save().await;
    assert_eq!(
        outcome,
        ActionOutcome::Saved("Highlight saved successfully!".to_string())
    );
    drop(agent);
    assert_eq!(worker.await.unwrap(), 1);

    let banners = surface.banners();
    assert_eq!(banners.len(), 1);
    assert_eq!(banners[0].message, SELECTION_SAVED);
    assert_eq!(banners[0].kind, NoticeKind::Success);

    let seen = bodies(&server).await;
    assert_eq!(seen[0].2["title"], "Ownership");
    assert_eq!(seen[1].2["text"], "exactly one owner");
}

#[tokio::test]
async fn context_menu_flow_notifies_the_page() {
    let server = MockServer::start().await;
    mount_source(&server, json!(12)).await;
    Mock::given(method("POST"))
        .and(path("/api/highlights"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut selector = PageSelector::new(Document::parse(PAGE), "https://blog.example.com/p");
    assert!(selector.select_text("owner"));

    let surface = Arc::new(MemorySurface::new());
    let notifier = Arc::new(BannerNotifier::new(surface.clone(), Default::default()));
    let (unused, _unused_inbox) = channel(1);
    let page = PageAgent::new(Arc::new(selector), notifier, Arc::new(unused));

    let (to_page, page_inbox) = channel(4);
    let page_worker = tokio::spawn(async move { serve(page_inbox, &page).await });

    let background = BackgroundAgent::new(Arc::new(CaptureClient::new(store(&server))));
    let outcome = background.context_menu_save(&to_page).await;
    assert_eq!(
        outcome,
        ActionOutcome::Failed("Failed to create highlight".to_string())
    );

    drop(to_page);
    assert_eq!(page_worker.await.unwrap(), 2);
    let banners = surface.banners();
    assert_eq!(banners.len(), 1);
    assert_eq!(banners[0].message, "Failed to save selection");
    assert_eq!(banners[0].kind, NoticeKind::Error);
}

#[tokio::test]
async fn popup_save_page_ignores_the_selection() {
    let server = MockServer::start().await;
    mount_source(&server, json!(20)).await;
    Mock::given(method("POST"))
        .and(path("/api/highlights"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let mut selector = PageSelector::new(Document::parse(PAGE), "https://blog.example.com/p");
    assert!(selector.select_text("owner"));

    let settings: Arc<dyn SettingsStore> = store(&server);
    let surface = Arc::new(MemorySurface::new());
    let popup = Popup::new(
        settings.clone(),
        Arc::new(selector),
        Arc::new(CaptureClient::new(settings)),
        Arc::new(BannerNotifier::new(surface.clone(), Default::default())),
    );

    let outcome = popup.save_page().await;
    assert_eq!(outcome, ActionOutcome::Saved("Page saved successfully!".to_string()));
    assert_eq!(surface.banners()[0].message, "Page saved successfully!");
    assert!(bodies(&server).await[0].2["raw"]
        .as_str()
        .unwrap()
        .contains("Each value has exactly one owner."));
}

#[tokio::test]
async fn unreachable_api_becomes_a_failed_reply() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let base = format!("http://127.0.0.1:{}", port);
    let client = CaptureClient::new(Arc::new(MemorySettingsStore::with_api(&base, "devkey")));

    let reply = client.handle(&record("quote")).await;
    assert!(!reply.success);
    assert!(!reply.error.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn undecodable_source_reply_stops_before_highlight() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sources"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/highlights"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let client = CaptureClient::new(store(&server));
    let err = client.save_highlight(&record("quote")).await.unwrap_err();
    assert!(matches!(
        err,
        CaptureError::Transport {
            stage: Stage::Source,
            ..
        }
    ));
    assert!(!err.is_partial_effect());
    assert_eq!(bodies(&server).await.len(), 1);
}

#[tokio::test]
async fn highlight_timeout_is_a_partial_effect() {
    let server = MockServer::start().await;
    mount_source(&server, json!(5)).await;
    Mock::given(method("POST"))
        .and(path("/api/highlights"))
        .respond_with(ResponseTemplate::new(201).set_delay(std::time::Duration::from_secs(3)))
        .mount(&server)
        .await;

    let mut settings = Settings::default();
    settings.api.base = Some(server.uri());
    settings.api.key = Some("devkey".to_string());
    settings.http.timeout_secs = Some(1);
    let client = CaptureClient::new(Arc::new(MemorySettingsStore::new(settings)));

    let err = client.save_highlight(&record("quote")).await.unwrap_err();
    assert!(matches!(
        err,
        CaptureError::Transport {
            stage: Stage::Highlight,
            ..
        }
    ));
    assert!(err.is_partial_effect());
}
