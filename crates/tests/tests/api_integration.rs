use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use techai_agents::SupportAgent;
use techai_api::{build_app, build_router, ApiState, HealthCapabilities, IpRateLimiter};
use techai_classifier::IntentRouter;
use techai_gateway::{ReplyEngine, ScriptedEngine};
use techai_observability::AppMetrics;
use techai_storage::{MemoryStore, SessionRepository, Store};
use tower::ServiceExt;
use uuid::Uuid;

const API_KEY: &str = "dev-techai-key";

async fn app() -> Router {
    build_app().await.expect("app should build")
}

fn chat_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, parsed)
}

async fn send_chat(
    app: &Router,
    session_id: &str,
    message: &str,
    extra: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let mut body = json!({ "sessionId": session_id, "message": message });
    if let (Some(target), Some(source)) = (body.as_object_mut(), extra.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    send(app, chat_request("/v1/chat", body)).await
}

#[tokio::test]
async fn health_is_public() {
    let app = app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn chat_requires_api_key() {
    let app = app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "sessionId": "s1", "message": "Hallo" }).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn chat_rejects_missing_fields() {
    let app = app().await;

    let (status, body) = send(
        &app,
        chat_request("/v1/chat", json!({ "message": "Hallo" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = send(
        &app,
        chat_request("/v1/chat", json!({ "sessionId": "s1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn chat_returns_reply_and_quota() {
    let app = app().await;
    let session = Uuid::new_v4().to_string();

    let (status, body) = send_chat(
        &app,
        &session,
        "Meine Bluetooth-Kopfhörer verbinden sich nicht",
        json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(!body["reply"].as_str().unwrap().is_empty());
    assert_eq!(body["answerCount"], 1);
    assert_eq!(body["freeLimit"], 25);
    assert!(body["suggestions"].is_array());
    assert!(body["appShortcuts"].is_array());
}

#[tokio::test]
async fn vision_requires_an_image() {
    let app = app().await;
    let session = Uuid::new_v4().to_string();

    let (status, body) = send(
        &app,
        chat_request(
            "/v1/vision",
            json!({ "sessionId": &session, "message": "Was ist das für ein Kabel?" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = send(
        &app,
        chat_request(
            "/v1/vision",
            json!({
                "sessionId": &session,
                "message": "Was ist das für ein Kabel?",
                "imageDataUrl": "data:image/png;base64,aGFsbG8="
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answerCount"], 1);
}

#[tokio::test]
async fn intent_endpoint_is_stateless() {
    let app = app().await;
    let session = Uuid::new_v4().to_string();

    let (status, body) = send(
        &app,
        chat_request(
            "/v1/intent",
            json!({ "message": "Ich schicke dir ein Foto vom Kabel" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], "visual_help");

    // Quota untouched: the first chat answer is still number one.
    let (_, body) = send_chat(&app, &session, "Mein Router startet ständig neu", json!({})).await;
    assert_eq!(body["answerCount"], 1);
}

#[tokio::test]
async fn free_limit_crossing_grants_goodwill() {
    let app = app().await;
    let session = Uuid::new_v4().to_string();

    let (_, body) = send_chat(
        &app,
        &session,
        "Meine Bluetooth-Kopfhörer verbinden sich nicht",
        json!({}),
    )
    .await;
    assert_eq!(body["answerCount"], 1);

    for i in 2..25 {
        let (status, body) =
            send_chat(&app, &session, &format!("Schritt {i} klappt nicht"), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answerCount"], i);
        assert!(!body["reply"].as_str().unwrap().contains("25. kostenlose Antwort"));
    }

    // Answer 25 carries the one-time exhaustion notice.
    let (status, body) = send_chat(&app, &session, "Es klappt leider immer noch", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answerCount"], 25);
    let reply = body["reply"].as_str().unwrap();
    assert!(reply.contains("25. kostenlose Antwort"));
    assert!(reply.contains("Kulanz"));

    // Answer 26 is a plain goodwill answer for the same topic.
    let (status, body) =
        send_chat(&app, &session, "Die Kopfhörer blinken immer noch rot", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answerCount"], 26);
    assert!(!body["reply"].as_str().unwrap().contains("25. kostenlose Antwort"));
}

#[tokio::test]
async fn blocked_new_topics_warn_three_times_then_paywall() {
    let app = app().await;
    let session = Uuid::new_v4().to_string();

    send_chat(
        &app,
        &session,
        "Meine Bluetooth-Kopfhörer verbinden sich nicht",
        json!({}),
    )
    .await;
    for i in 2..=25 {
        send_chat(&app, &session, &format!("Schritt {i} klappt nicht"), json!({})).await;
    }

    // Three soft checks, then the paywall; no model answers on either path.
    for _ in 0..3 {
        let (status, body) = send_chat(
            &app,
            &session,
            "Mein Drucker streikt jetzt übrigens auch",
            json!({ "newTopic": true }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answerCount"], 25);
        assert_eq!(
            body["suggestions"],
            json!(["Ja, gleiches Problem", "Nein, neues Thema", "Ich brauche Preisvergleich"])
        );
    }

    let (status, body) = send_chat(
        &app,
        &session,
        "Mein Drucker streikt jetzt übrigens auch",
        json!({ "newTopic": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answerCount"], 25);
    assert!(body["reply"].as_str().unwrap().contains("2,99 €"));
    assert!(!body["appShortcuts"].as_array().unwrap().is_empty());

    // The original topic is still served under goodwill.
    let (status, body) = send_chat(&app, &session, "Zurück zu den Kopfhörern bitte", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answerCount"], 26);
}

#[tokio::test]
async fn off_topic_strikes_escalate_to_refusal() {
    let app = app().await;
    let session = Uuid::new_v4().to_string();

    send_chat(
        &app,
        &session,
        "Meine Bluetooth-Kopfhörer verbinden sich nicht",
        json!({}),
    )
    .await;

    let (_, body) = send_chat(
        &app,
        &session,
        "Mein Fernseher zeigt über HDMI überhaupt kein Signal mehr an",
        json!({}),
    )
    .await;
    assert_eq!(body["answerCount"], 2);
    assert!(body["reply"].as_str().unwrap().contains("neues Thema"));

    let (_, body) = send_chat(
        &app,
        &session,
        "Der Drucker druckt seit gestern nur noch leere Seiten heraus",
        json!({}),
    )
    .await;
    assert_eq!(body["answerCount"], 3);
    assert!(body["reply"].as_str().unwrap().contains("ausnahmsweise"));

    let (status, body) = send_chat(
        &app,
        &session,
        "Die Waschmaschine piept dauernd beim Schleudern ziemlich komisch",
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answerCount"], 3);
    assert!(body["reply"].as_str().unwrap().contains("beenden"));
    assert!(!body["appShortcuts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn mark_solved_leads_to_double_confirmed_closure() {
    let app = app().await;
    let session = Uuid::new_v4().to_string();

    send_chat(
        &app,
        &session,
        "Meine Bluetooth-Kopfhörer verbinden sich nicht",
        json!({}),
    )
    .await;

    let (status, body) = send(
        &app,
        chat_request("/v1/mark_solved", json!({ "sessionId": &session })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["solved"], true);
    assert_eq!(body["answerCount"], 1);

    // First confirmation: ask once more, no quota consumed.
    let (_, body) = send_chat(&app, &session, "Nein danke, alles gut", json!({})).await;
    assert_eq!(body["answerCount"], 1);
    assert!(body["reply"].as_str().unwrap().contains("ganz sicher"));

    // Second confirmation: closing message with subscription pricing.
    let (_, body) = send_chat(&app, &session, "Ja, ganz sicher", json!({})).await;
    assert_eq!(body["answerCount"], 1);
    let reply = body["reply"].as_str().unwrap();
    assert!(reply.contains("offiziell beendet"));
    assert!(reply.contains("2,99 €"));

    // A new subject after closure goes to the closure/paywall path.
    let (_, body) = send_chat(
        &app,
        &session,
        "Mein Drucker druckt seit gestern nur noch leere Seiten heraus",
        json!({}),
    )
    .await;
    assert_eq!(body["answerCount"], 1);
    assert_eq!(
        body["suggestions"],
        json!(["Ja, gleiches Problem", "Nein, neues Thema", "Ich brauche Preisvergleich"])
    );
}

#[tokio::test]
async fn mark_solved_requires_a_session() {
    let app = app().await;

    let (status, body) = send(&app, chat_request("/v1/mark_solved", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn voice_cap_notice_appears_once() {
    let app = app().await;
    let session = Uuid::new_v4().to_string();

    let (_, body) = send_chat(
        &app,
        &session,
        "Meine Bluetooth-Kopfhörer verbinden sich nicht",
        json!({ "fromVoice": true, "voiceSessionEnded": true }),
    )
    .await;
    assert_eq!(body["answerCount"], 1);
    assert!(body["reply"].as_str().unwrap().contains("8 Minuten"));

    let (_, body) = send_chat(
        &app,
        &session,
        "Die Kopfhörer blinken weiter rot",
        json!({ "fromVoice": true, "voiceSessionEnded": true }),
    )
    .await;
    assert_eq!(body["answerCount"], 2);
    assert!(!body["reply"].as_str().unwrap().contains("8 Minuten"));
}

#[tokio::test]
async fn gateway_failure_returns_500_and_keeps_quota() {
    // Hand-built state with an unavailable engine; the stock builder would
    // pick the working scripted engine.
    let memory = MemoryStore::new();
    let agent = SupportAgent::new(
        ReplyEngine::Scripted(ScriptedEngine::unavailable()),
        IntentRouter::Rules(techai_classifier::RuleIntentClassifier),
        Arc::new(Store::Memory(memory.clone())),
        AppMetrics::shared(),
        None,
        String::new(),
        PathBuf::from("learn_later_test.txt"),
    );

    let state = ApiState {
        agent: Arc::new(agent),
        metrics: AppMetrics::shared(),
        api_key: API_KEY.to_string(),
        limiter: IpRateLimiter::new(Duration::from_secs(60), 80),
        allowed_origins: Arc::new(vec!["http://localhost:3000".to_string()]),
        capabilities: HealthCapabilities {
            model_backed: false,
            web_search: false,
            sqlite: false,
        },
    };
    let app = build_router(state);

    let (status, body) = send(
        &app,
        chat_request(
            "/v1/chat",
            json!({ "sessionId": "s1", "message": "Mein Laptop startet nicht" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "assistant_unavailable");
    assert!(memory.load_session("s1").await.unwrap().is_none());
}
