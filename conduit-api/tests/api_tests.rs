//! HTTP surface tests
//!
//! The router runs over a `TestHarness` engine; requests go through
//! `tower::ServiceExt::oneshot`, upstream APIs are wiremock servers.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use conduit_api::{create_api_router, AppState, RedirectAllowList};
use conduit_test_utils::fixtures::{HarnessOptions, TestHarness, API_KEY, NOW, OWNER};
use conduit_test_utils::{
    EntityIdType, LinkedAccountId, LinkedAccountKey, ProjectId, SecuritySchemeKind,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, header as header_eq, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REDIRECT_URI: &str = "http://conduit.test/v1/linked-accounts/oauth2/callback";

fn router(harness: &TestHarness) -> Router {
    create_api_router(
        AppState::new(harness.orchestrator.clone(), REDIRECT_URI)
            .with_redirect_origins(RedirectAllowList::new(["https://app.test"])),
    )
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("x-api-key", API_KEY)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", API_KEY)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// HEALTH AND AUTHENTICATION
// ============================================================================

#[tokio::test]
async fn test_health_is_public() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let response = router(&harness)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["functions"], 6);
}

#[tokio::test]
async fn test_missing_or_wrong_api_key_rejected() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let missing = router(&harness)
        .oneshot(Request::get("/v1/functions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = router(&harness)
        .oneshot(
            Request::get("/v1/functions")
                .header("x-api-key", "not-a-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(wrong).await["code"], "UNAUTHORIZED");
}

// ============================================================================
// FUNCTIONS
// ============================================================================

#[tokio::test]
async fn test_list_functions_filtered_by_app() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let response = router(&harness).oneshot(get("/v1/functions?app=Y")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Y__DELETE_X", "Y__LIST_X"]);
}

#[tokio::test]
async fn test_execute_returns_execution_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    harness.link_api_key(OWNER, None).await;

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            "/v1/functions/Y__LIST_X/execute",
            json!({"arguments": {}, "linked_account_owner_id": OWNER}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], json!([{"id": 1}]));
}

#[tokio::test]
async fn test_execute_failure_reported_in_result() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    harness
        .link_oauth2(OWNER, "live-token", Some(NOW + 3600), None)
        .await;

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            "/v1/functions/X__SEND_EMAIL/execute",
            json!({"arguments": {"body": {"body": "hi"}}, "linked_account_owner_id": OWNER}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "ValidationError");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("recipient"));
}

#[tokio::test]
async fn test_execute_requires_owner_id() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            "/v1/functions/Y__LIST_X/execute",
            json!({"linked_account_owner_id": "  "}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// OAUTH2 LINKING
// ============================================================================

#[tokio::test]
async fn test_oauth2_link_flow_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=provider-code"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "linked-token",
            "refresh_token": "linked-refresh",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/messages/m1"))
        .and(header_eq("authorization", "Bearer linked-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1"})))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let response = router(&harness)
        .oneshot(get(&format!(
            "/v1/linked-accounts/oauth2?app_name=X&linked_account_owner_id={}&after_redirect_url=https%3A%2F%2Fapp.test%2Fdone",
            OWNER
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let url = body_json(response).await["url"].as_str().unwrap().to_string();

    let url = reqwest::Url::parse(&url).unwrap();
    assert_eq!(url.path(), "/authorize");
    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };
    assert_eq!(param("redirect_uri").as_deref(), Some(REDIRECT_URI));
    assert_eq!(param("code_challenge_method").as_deref(), Some("S256"));
    assert_eq!(param("prompt").as_deref(), Some("consent"));
    let state = param("state").unwrap();

    // Unauthenticated: the provider redirect carries no API key.
    let callback = router(&harness)
        .oneshot(
            Request::get(format!(
                "/v1/linked-accounts/oauth2/callback?code=provider-code&state={}",
                state
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(callback.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        callback.headers().get(header::LOCATION).unwrap(),
        "https://app.test/done"
    );

    let result = harness
        .execute("X__GET_MESSAGE", json!({"path": {"message_id": "m1"}}), OWNER)
        .await;
    assert!(result.success, "{:?}", result.error);
}

#[tokio::test]
async fn test_oauth2_callback_provider_error() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let response = router(&harness)
        .oneshot(
            Request::get("/v1/linked-accounts/oauth2/callback?error=access_denied&state=abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "OAUTH2_DENIED");
    assert!(body["message"].as_str().unwrap().contains("access_denied"));
}

#[tokio::test]
async fn test_oauth2_callback_rejects_forged_state() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let response = router(&harness)
        .oneshot(
            Request::get("/v1/linked-accounts/oauth2/callback?code=c&state=not.a.jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "AUTHENTICATION_FAILED");
}

#[tokio::test]
async fn test_oauth2_authorize_rejects_unlisted_redirect() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    for target in [
        "https%3A%2F%2Fevil.example%2Fphish",
        "https%3A%2F%2Fapp.test.evil.example%2F",
        "javascript%3Aalert(1)",
    ] {
        let response = router(&harness)
            .oneshot(get(&format!(
                "/v1/linked-accounts/oauth2?app_name=X&linked_account_owner_id={}&after_redirect_url={}",
                OWNER, target
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", target);
        assert_eq!(body_json(response).await["code"], "INVALID_INPUT");
    }
}

#[tokio::test]
async fn test_oauth2_callback_rejects_redirect_no_longer_allowed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "linked-token",
            "expires_in": 3600
        })))
        .expect(0)
        .mount(&server)
        .await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let response = router(&harness)
        .oneshot(get(&format!(
            "/v1/linked-accounts/oauth2?app_name=X&linked_account_owner_id={}&after_redirect_url=https%3A%2F%2Fapp.test%2Fdone",
            OWNER
        )))
        .await
        .unwrap();
    let url = body_json(response).await["url"].as_str().unwrap().to_string();
    let url = reqwest::Url::parse(&url).unwrap();
    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    // Same engine, but a server that only trusts its own origin.
    let strict = create_api_router(AppState::new(harness.orchestrator.clone(), REDIRECT_URI));
    let callback = strict
        .oneshot(
            Request::get(format!(
                "/v1/linked-accounts/oauth2/callback?code=provider-code&state={}",
                state
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(callback.status(), StatusCode::BAD_REQUEST);
    assert!(callback.headers().get(header::LOCATION).is_none());
    assert!(harness.store.is_empty().await);
}

#[tokio::test]
async fn test_oauth2_authorize_rejects_non_oauth2_app() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let response = router(&harness)
        .oneshot(get("/v1/linked-accounts/oauth2?app_name=Y&linked_account_owner_id=u1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ============================================================================
// DIRECT LINKING
// ============================================================================

#[tokio::test]
async fn test_link_api_key_then_execute_with_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .and(header_eq("x-api-key", "owner-own-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            "/v1/linked-accounts/api-key",
            json!({"app_name": "Y", "linked_account_owner_id": OWNER, "api_key": "owner-own-key"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["app_name"], "Y");
    assert_eq!(body["linked_account_owner_id"], OWNER);
    assert_eq!(body["security_scheme"], "api_key");
    assert_eq!(body["enabled"], true);
    assert!(!body.to_string().contains("owner-own-key"));

    let result = harness.execute("Y__LIST_X", json!({}), OWNER).await;
    assert!(result.success, "{:?}", result.error);
}

#[tokio::test]
async fn test_link_api_key_twice_replaces_key() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    let link = |key: &str| {
        json_request(
            "POST",
            "/v1/linked-accounts/api-key",
            json!({"app_name": "Y", "linked_account_owner_id": OWNER, "api_key": key}),
        )
    };

    let first = body_json(router(&harness).oneshot(link("old-key")).await.unwrap()).await;
    let second = body_json(router(&harness).oneshot(link("new-key")).await.unwrap()).await;

    assert_eq!(first["id"], second["id"]);
    let listed = body_json(router(&harness).oneshot(get("/v1/linked-accounts")).await.unwrap()).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_link_routes_enforce_configured_scheme() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let cases = [
        (
            "/v1/linked-accounts/no-auth",
            json!({"app_name": "Y", "linked_account_owner_id": OWNER}),
            StatusCode::FORBIDDEN,
        ),
        (
            "/v1/linked-accounts/http-basic",
            json!({"app_name": "Y", "linked_account_owner_id": OWNER, "username": "u", "password": "p"}),
            StatusCode::FORBIDDEN,
        ),
        (
            "/v1/linked-accounts/api-key",
            json!({"app_name": "X", "linked_account_owner_id": OWNER, "api_key": "k"}),
            StatusCode::FORBIDDEN,
        ),
        (
            "/v1/linked-accounts/api-key",
            json!({"app_name": "NOPE", "linked_account_owner_id": OWNER, "api_key": "k"}),
            StatusCode::NOT_FOUND,
        ),
        (
            "/v1/linked-accounts/api-key",
            json!({"app_name": "Y", "linked_account_owner_id": " ", "api_key": "k"}),
            StatusCode::BAD_REQUEST,
        ),
    ];
    for (uri, body, expected) in cases {
        let response = router(&harness)
            .oneshot(json_request("POST", uri, body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), expected, "{} {}", uri, body);
    }

    let listed = body_json(router(&harness).oneshot(get("/v1/linked-accounts")).await.unwrap()).await;
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn test_link_default_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .and(header_eq("x-api-key", "y-default-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            "/v1/linked-accounts/default",
            json!({"app_name": "Y", "linked_account_owner_id": OWNER}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["security_scheme"], "api_key");

    let result = harness.execute("Y__LIST_X", json!({}), OWNER).await;
    assert!(result.success, "{:?}", result.error);

    // X ships no default credentials.
    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            "/v1/linked-accounts/default",
            json!({"app_name": "X", "linked_account_owner_id": OWNER}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// OWNER ACTIONS
// ============================================================================

#[tokio::test]
async fn test_list_and_get_linked_accounts() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    let y_one = harness.link_api_key(OWNER, Some("k1")).await;
    let y_two = harness.link_api_key("owner-2", Some("k2")).await;
    let x_one = harness
        .link_oauth2(OWNER, "live-token", Some(NOW + 3600), None)
        .await;

    let ids = |body: Value| -> Vec<String> {
        body.as_array()
            .unwrap()
            .iter()
            .map(|a| a["id"].as_str().unwrap().to_string())
            .collect()
    };

    let all = body_json(router(&harness).oneshot(get("/v1/linked-accounts")).await.unwrap()).await;
    assert_eq!(all.as_array().unwrap().len(), 3);
    assert!(!all.to_string().contains("live-token"));

    let y = body_json(
        router(&harness)
            .oneshot(get("/v1/linked-accounts?app_name=Y"))
            .await
            .unwrap(),
    )
    .await;
    let mut y_ids = ids(y);
    y_ids.sort();
    let mut expected = vec![y_one.id.to_string(), y_two.id.to_string()];
    expected.sort();
    assert_eq!(y_ids, expected);

    let mine = body_json(
        router(&harness)
            .oneshot(get(&format!(
                "/v1/linked-accounts?app_name=X&linked_account_owner_id={}",
                OWNER
            )))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(ids(mine), vec![x_one.id.to_string()]);

    let response = router(&harness)
        .oneshot(get(&format!("/v1/linked-accounts/{}", y_two.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], y_two.id.to_string());
    assert_eq!(body["linked_account_owner_id"], "owner-2");

    let missing = router(&harness)
        .oneshot(get(&format!("/v1/linked-accounts/{}", LinkedAccountId::now_v7())))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_disable_then_delete_linked_account() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    let account = harness.link_api_key(OWNER, None).await;
    let uri = format!("/v1/linked-accounts/{}", account.id);

    let response = router(&harness)
        .oneshot(json_request("PATCH", &uri, json!({"enabled": false})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["enabled"], false);
    assert!(body.get("credentials").is_none());

    let result = harness.execute("Y__LIST_X", json!({}), OWNER).await;
    assert!(!result.success);

    let delete = || {
        Request::delete(uri.as_str())
            .header("x-api-key", API_KEY)
            .body(Body::empty())
            .unwrap()
    };
    let response = router(&harness).oneshot(delete()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = router(&harness).oneshot(delete()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_other_projects_accounts_are_invisible() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    let app = harness.orchestrator.catalog().get_app("Y").unwrap();
    let foreign = harness
        .orchestrator
        .credentials()
        .link_account(
            &app,
            LinkedAccountKey::new(ProjectId::now_v7(), "Y", OWNER),
            SecuritySchemeKind::ApiKey,
            None,
        )
        .await
        .unwrap();

    let response = router(&harness)
        .oneshot(
            Request::delete(format!("/v1/linked-accounts/{}", foreign.id))
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_linked_account_id() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let response = router(&harness)
        .oneshot(json_request(
            "PATCH",
            "/v1/linked-accounts/not-a-uuid",
            json!({"enabled": true}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
