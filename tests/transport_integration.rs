use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use actoolkit::ToolkitError;
use actoolkit::config::RestConfig;
use actoolkit::rest::{RestClient, ReqwestTransport, endpoints, media};

// ══════════════════════════════════════════════════════════════════
// HTTP transport against a local mock server
// ══════════════════════════════════════════════════════════════════

fn client(server: &MockServer, quiet: bool) -> RestClient {
    let config = RestConfig {
        project: "test".into(),
        account_id: "x".into(),
        headers: BTreeMap::from([("Authorization".to_string(), "Bearer tok".to_string())]),
        verify_ssl: true,
        base: format!("{}/accounts/x/", server.uri()),
    };
    let transport = ReqwestTransport::new(config.verify_ssl).unwrap();
    RestClient::new(&config, Arc::new(transport)).with_flags(false, quiet)
}

#[tokio::test]
async fn test_list_follows_continue_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/accounts/x/k8s/v2/apps"))
        .and(query_param("continue", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "b"}],
            "metadata": {},
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/x/k8s/v2/apps"))
        .and(header("Authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "a"}],
            "metadata": {"continue": "page-2"},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let listing = client(&server, true).list(endpoints::APPS, &[]).await.unwrap();

    let ids: Vec<&str> = listing["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["a", "b"]);
    assert!(listing["metadata"].get("continue").is_none());
}

#[tokio::test]
async fn test_post_stamps_media_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts/x/k8s/v1/appMirrors"))
        .and(header("content-type", "application/astra-appMirror+json"))
        .and(body_partial_json(json!({
            "type": "application/astra-appMirror",
            "version": "1.0",
            "sourceAppID": "app-1",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "m-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let created = client(&server, true)
        .post(endpoints::APP_MIRRORS, &media::APP_MIRROR, json!({"sourceAppID": "app-1"}))
        .await
        .unwrap();
    assert_eq!(created["id"], "m-1");
}

#[tokio::test]
async fn test_unauthorized_probe_reports_rejected_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/accounts/x/k8s/v2/apps"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/x/topology/v1/clouds"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, false)
        .get(endpoints::APPS, &[])
        .await
        .unwrap_err();
    match err {
        ToolkitError::AuthRejected { hint, .. } => assert!(hint.contains("Authorization")),
        other => panic!("expected an auth rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_remote_failure() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/accounts/x/k8s/v1/appMirrors/m-1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    let err = client(&server, true)
        .delete("k8s/v1/appMirrors/m-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolkitError::RemoteFailure { status: 503, .. }));
}

#[tokio::test]
async fn test_download_uses_content_disposition_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/accounts/x/core/v1/asups/a-1"))
        .and(header("accept", "application/gzip"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-disposition", "attachment; filename=\"asup-a-1.7z\"")
                .set_body_bytes(b"bundle".to_vec()),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let (_, saved) = client(&server, true)
        .download_file("core/v1/asups/a-1", "application/gzip", dir.path())
        .await
        .unwrap();
    assert_eq!(saved.file_name().unwrap(), "asup-a-1.7z");
    assert_eq!(std::fs::read(&saved).unwrap(), b"bundle");
}
