mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use std::time::Duration;

use common::{TestApp, API_KEY};
use wagate::db::SessionStatus;
use wagate::error::GatewayError;

#[tokio::test]
async fn test_create_and_list() {
    let app = TestApp::new().await;

    let (status, json) = app.post("/sessions/create", json!({"name": "alpha"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["success"], true);
    assert!(json["timestamp"].is_string());

    let session = &json["data"];
    let id = session["id"].as_str().unwrap();
    assert_eq!(id.len(), 36);
    assert_eq!(session["name"], "alpha");
    assert_eq!(session["status"], "disconnected");
    assert_eq!(session["connected"], false);

    let (status, json) = app.get("/sessions/list").await;
    assert_eq!(status, StatusCode::OK);
    let sessions = json["data"]["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], id);
    assert!(sessions[0].get("qrCode").is_none());
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["limit"], 50);
    assert_eq!(json["data"]["offset"], 0);
}

#[tokio::test]
async fn test_list_pagination_is_clamped() {
    let app = TestApp::new().await;
    for name in ["one", "two", "three"] {
        app.create_session(json!({ "name": name })).await;
    }

    let (_, json) = app.get("/sessions/list?limit=2").await;
    assert_eq!(json["data"]["sessions"].as_array().unwrap().len(), 2);
    assert_eq!(json["data"]["total"], 3);

    let (_, json) = app.get("/sessions/list?limit=1000&offset=2").await;
    assert_eq!(json["data"]["limit"], 200);
    assert_eq!(json["data"]["sessions"].as_array().unwrap().len(), 1);

    let (status, json) = app.get("/sessions/list?limit=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_api_key_required() {
    let app = TestApp::new().await;

    let (status, body) = app
        .raw(Request::get("/sessions/list").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "unauthorized");

    let (status, _) = app
        .raw(
            Request::get("/sessions/list")
                .header("X-API-Key", "wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .raw(
            Request::get("/webhooks/events")
                .header("Authorization", format!("Bearer {}", API_KEY))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .raw(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn test_create_validation() {
    let app = TestApp::new().await;

    let (status, json) = app.post("/sessions/create", json!({"name": "   "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["field"], "name");

    let (status, json) = app.post("/sessions/create", json!({"name": "bad/name"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["field"], "name");

    let (status, json) = app
        .post(
            "/sessions/create",
            json!({"name": "proxied", "proxy": {"scheme": "socks5", "host": "10.0.0.1", "port": 1080, "username": "bob"}}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["field"], "proxy");

    let (status, json) = app.post("/sessions/create", json!({"nope": true})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "bad_request");

    let (_, json) = app.get("/sessions/list").await;
    assert_eq!(json["data"]["total"], 0);
}

#[tokio::test]
async fn test_proxy_password_is_masked() {
    let app = TestApp::new().await;
    let id = app
        .create_session(json!({
            "name": "proxied",
            "proxy": {"scheme": "http", "host": "proxy.local", "port": 3128, "username": "bob", "password": "hunter2"}
        }))
        .await;

    let info = app.info(&id).await;
    assert_eq!(info["proxy"]["host"], "proxy.local");
    assert_eq!(info["proxy"]["password"], "********");
    assert_eq!(app.client(&id).proxy().unwrap().password.as_deref(), Some("hunter2"));
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = TestApp::new().await;

    let (status, json) = app.get("/sessions/7d1d5c2e-4f7a-4b8e-9a3c-2f6e1b0c9d8a/info").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "not_found");

    let (status, _) = app.get("/sessions/not-a-uuid/info").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post_empty("/sessions/7d1d5c2e-4f7a-4b8e-9a3c-2f6e1b0c9d8a/connect")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_qr_pairing_flow() {
    let app = TestApp::new().await;
    let id = app.create_session(json!({"name": "alpha"})).await;

    let (status, json) = app.get(&format!("/sessions/{}/qr", id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "qr_not_available");

    let (status, json) = app.post_empty(&format!("/sessions/{}/connect", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "qr_code");
    assert!(json["data"]["qrCode"].as_str().unwrap().starts_with("2@"));

    // Connecting again while pairing is idempotent
    let (status, json) = app.post_empty(&format!("/sessions/{}/connect", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "qr_code");

    // No state change between reads: identical code and expiry
    let (_, first) = app.get(&format!("/sessions/{}/qr", id)).await;
    let (_, second) = app.get(&format!("/sessions/{}/qr", id)).await;
    assert_eq!(first["data"], second["data"]);
    assert_eq!(first["data"]["expired"], false);

    app.client(&id).simulate_scan("+15551234567").await.unwrap();
    let info = app.wait_for_info(&id, |s| s["status"] == "connected").await;
    assert_eq!(info["connected"], true);
    assert_eq!(info["deviceJid"], "15551234567@s.whatsapp.net");
    assert!(info.get("qrCode").is_none());
    assert!(info["connectedAt"].is_string());

    let (status, json) = app.get(&format!("/sessions/{}/qr", id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "already_connected");

    let (status, _) = app.post_empty(&format!("/sessions/{}/connect", id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_create_with_generate_qr() {
    let app = TestApp::new().await;

    let (status, json) = app
        .post("/sessions/create", json!({"name": "beta", "generateQR": true}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["status"], "qr_code");
    assert!(json["data"]["qrCode"].is_string());
    assert!(json["data"]["qrCodeExpiresAt"].is_string());
}

#[tokio::test]
async fn test_qr_expiry_and_refresh() {
    let app = TestApp::with_qr_lifetime(Duration::from_secs(1)).await;
    let id = app.create_session(json!({"name": "gamma"})).await;
    app.post_empty(&format!("/sessions/{}/connect", id)).await;

    let (_, json) = app.get(&format!("/sessions/{}/qr", id)).await;
    let code = json["data"]["qrCode"].as_str().unwrap().to_string();
    let expires_at = chrono::DateTime::parse_from_rfc3339(json["data"]["expiresAt"].as_str().unwrap()).unwrap();

    let info = app.wait_for_info(&id, |s| s["status"] == "error").await;
    assert_eq!(info["connectionError"], "qr expired");

    // The stored code stays readable until it is replaced
    let (status, json) = app.get(&format!("/sessions/{}/qr", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["qrCode"], code.as_str());
    assert_eq!(json["data"]["expired"], true);

    let (status, json) = app.post_empty(&format!("/sessions/{}/qr/refresh", id)).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_ne!(json["data"]["qrCode"], code.as_str());
    assert_eq!(json["data"]["expired"], false);
    let refreshed_at = chrono::DateTime::parse_from_rfc3339(json["data"]["expiresAt"].as_str().unwrap()).unwrap();
    assert!(refreshed_at > expires_at);

    let info = app.info(&id).await;
    assert_eq!(info["status"], "qr_code");
    assert!(info.get("connectionError").is_none());
}

#[tokio::test]
async fn test_refresh_without_pairing_starts_one() {
    let app = TestApp::new().await;
    let id = app.create_session(json!({"name": "delta"})).await;

    let (status, json) = app.post_empty(&format!("/sessions/{}/qr/refresh", id)).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert!(json["data"]["qrCode"].as_str().unwrap().starts_with("2@"));
}

#[tokio::test]
async fn test_disconnect_then_resume() {
    let app = TestApp::new().await;
    let id = app.paired_session("alpha", "15551234567").await;

    let (status, json) = app.post_empty(&format!("/sessions/{}/disconnect", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "disconnected");
    assert_eq!(json["data"]["deviceJid"], "15551234567@s.whatsapp.net");

    let (status, json) = app.post_empty(&format!("/sessions/{}/disconnect", id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "not_connected");

    // Credentials survive a disconnect
    let (status, json) = app.post_empty(&format!("/sessions/{}/connect", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "connected");
    assert!(json["data"].get("qrCode").is_none());
}

#[tokio::test]
async fn test_logout_purges_credentials() {
    let app = TestApp::new().await;
    let id = app.paired_session("alpha", "15551234567").await;

    let (status, json) = app.post_empty(&format!("/sessions/{}/logout", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "disconnected");
    assert!(json["data"].get("deviceJid").is_none());

    // Without credentials the next connect pairs again
    let (_, json) = app.post_empty(&format!("/sessions/{}/connect", id)).await;
    assert_eq!(json["data"]["status"], "qr_code");
}

#[tokio::test]
async fn test_pair_phone() {
    let app = TestApp::new().await;
    let id = app.create_session(json!({"name": "alpha"})).await;

    let (status, json) = app
        .post(&format!("/sessions/{}/pair", id), json!({"phone": "123"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["field"], "phone");

    let (status, json) = app
        .post(&format!("/sessions/{}/pair", id), json!({"phone": "+1 (555) 123-4567"}))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    let code = json["data"]["linkingCode"].as_str().unwrap();
    assert_eq!(code.len(), 8);
    assert_eq!(app.client(&id).link_requests(), vec!["15551234567"]);
}

#[tokio::test]
async fn test_pair_phone_when_connected() {
    let app = TestApp::new().await;
    let id = app.paired_session("alpha", "15551234567").await;

    let (status, json) = app
        .post(&format!("/sessions/{}/pair", id), json!({"phone": "15557654321"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "already_connected");
}

#[tokio::test]
async fn test_delete_session() {
    let app = TestApp::new().await;
    let id = app.paired_session("alpha", "15551234567").await;

    let (status, json) = app.delete(&format!("/sessions/{}/delete", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["deleted"], true);

    let (status, _) = app.get(&format!("/sessions/{}/info", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.delete(&format!("/sessions/{}/delete", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.manager.live_count(), 0);
}

#[tokio::test]
async fn test_library_logout_clears_device() {
    let app = TestApp::new().await;
    let id = app.paired_session("alpha", "15551234567").await;

    app.client(&id).simulate_unlink();
    let info = app.wait_for_info(&id, |s| s["status"] == "disconnected").await;
    assert!(info.get("deviceJid").is_none());

    let (_, json) = app.post_empty(&format!("/sessions/{}/connect", id)).await;
    assert_eq!(json["data"]["status"], "qr_code");
}

#[tokio::test]
async fn test_dropped_connection_keeps_device() {
    let app = TestApp::new().await;
    let id = app.paired_session("alpha", "15551234567").await;

    app.client(&id).simulate_drop();
    let info = app.wait_for_info(&id, |s| s["status"] == "disconnected").await;
    assert_eq!(info["deviceJid"], "15551234567@s.whatsapp.net");

    let (status, json) = app.post_empty(&format!("/sessions/{}/connect", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "connected");
}

#[tokio::test]
async fn test_connect_failure_is_recorded() {
    let app = TestApp::new().await;
    let id = app.create_session(json!({ "name": "alpha" })).await;

    app.client(&id).fail_next_connect("network down");
    let (status, json) = app.post_empty(&format!("/sessions/{}/connect", id)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"]["code"], "upstream_unavailable");

    let info = app.info(&id).await;
    assert_eq!(info["status"], "error");
    assert!(info["connectionError"]
        .as_str()
        .unwrap()
        .contains("network down"));

    let (status, json) = app.post_empty(&format!("/sessions/{}/connect", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "qr_code");
}

#[tokio::test]
async fn test_restore_after_restart() {
    let app = TestApp::new().await;
    let paired = app.paired_session("paired", "15551234567").await;
    let pairing = app.create_session(json!({"name": "pairing"})).await;
    app.post_empty(&format!("/sessions/{}/connect", pairing)).await;
    let idle = app.create_session(json!({"name": "idle"})).await;

    // No orderly shutdown: rows are left as the crash found them
    let restarted = app.restarted().await;
    let summary = restarted.manager.restore().await.unwrap();
    assert_eq!(summary.resumed, 1);
    assert_eq!(summary.reset, 1);
    assert_eq!(summary.failed, 0);

    let info = restarted.wait_for_info(&paired, |s| s["status"] == "connected").await;
    assert_eq!(info["deviceJid"], "15551234567@s.whatsapp.net");

    let info = restarted.info(&pairing).await;
    assert_eq!(info["status"], "disconnected");
    assert!(info.get("qrCode").is_none());

    assert_eq!(restarted.info(&idle).await["status"], "disconnected");
}

#[tokio::test]
async fn test_connect_resumes_stale_connected_row() {
    let app = TestApp::new().await;
    let id = app.paired_session("alpha", "15551234567").await;

    // The row still reads `connected`, but this process has no client for it
    let restarted = app.restarted().await;
    assert_eq!(restarted.info(&id).await["status"], "connected");

    let (status, json) = restarted
        .post_empty(&format!("/sessions/{}/connect", id))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["data"]["status"], "connected");
    assert_eq!(json["data"]["deviceJid"], "15551234567@s.whatsapp.net");
}

#[tokio::test]
async fn test_concurrent_connects_open_one_client() {
    let app = TestApp::new().await;
    let id = app.paired_session("alpha", "15551234567").await;

    let restarted = app.restarted().await;
    let (first, second) = tokio::join!(
        restarted.manager.connect(&id),
        restarted.manager.connect(&id)
    );
    // The second caller waits for the first and finds the session connected
    let (ok, err) = match (first, second) {
        (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
        other => panic!("expected one success and one rejection: {:?}", other),
    };
    assert_eq!(ok.status, SessionStatus::Connected);
    assert!(matches!(err, GatewayError::AlreadyConnected));
    assert_eq!(restarted.factory.opened(&id), 1);
    assert_eq!(restarted.manager.live_count(), 1);

    let info = restarted.wait_for_info(&id, |s| s["status"] == "connected").await;
    assert_eq!(info["deviceJid"], "15551234567@s.whatsapp.net");
}

#[tokio::test]
async fn test_shutdown_keeps_rows() {
    let app = TestApp::new().await;
    let id = app.paired_session("alpha", "15551234567").await;

    app.shutdown().await;
    assert_eq!(app.manager.live_count(), 0);

    let info = app.info(&id).await;
    assert_eq!(info["status"], "disconnected");
    assert_eq!(info["deviceJid"], "15551234567@s.whatsapp.net");
}
