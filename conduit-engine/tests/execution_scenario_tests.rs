//! End-to-end execution scenarios
//!
//! Every test wires the full engine through `TestHarness` against a wiremock
//! server standing in for both the third-party API and its token endpoint.

use conduit_test_utils::assertions::{assert_error_kind, assert_error_mentions, assert_success};
use conduit_test_utils::fixtures::{HarnessOptions, TestHarness, NOW, OWNER};
use conduit_test_utils::{
    ErrorKind, FailingPolicyEvaluator, ManualClock, QuotaPeriod, QuotaPolicy, RecordingConnector,
    StaticPolicyEvaluator,
};
use async_trait::async_trait;
use conduit_core::ConnectorError;
use conduit_engine::{
    builtin_registry, ConnectorContext, ConnectorHandler, DispatchOutcome, PolicyFallback,
};
use futures_util::future::join_all;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn daily(limit: u32) -> Option<QuotaPolicy> {
    Some(QuotaPolicy {
        limit,
        period: QuotaPeriod::Daily,
    })
}

fn fresh_token_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": "fresh-token",
        "token_type": "Bearer",
        "expires_in": 3600
    }))
}

// ============================================================================
// SCHEMA RESOLUTION AND INJECTION
// ============================================================================

#[tokio::test]
async fn test_send_email_injects_hidden_authorization_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages/send"))
        .and(header("authorization", "Bearer live-token"))
        .and(body_json(json!({"recipient": "a@b.com", "body": "hi"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    harness
        .link_oauth2(OWNER, "live-token", Some(NOW + 3600), Some("refresh-1"))
        .await;

    let result = harness
        .execute(
            "X__SEND_EMAIL",
            json!({"body": {"recipient": "a@b.com", "body": "hi"}}),
            OWNER,
        )
        .await;

    assert_success(&result);
    assert_eq!(result.data, Some(json!({"id": "msg-1"})));
    assert_eq!(result.usage.units, 1);
}

#[tokio::test]
async fn test_missing_recipient_is_validation_error_and_refunds_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            quota: daily(5),
            ..Default::default()
        },
    );
    harness
        .link_oauth2(OWNER, "live-token", Some(NOW + 3600), None)
        .await;

    let result = harness
        .execute("X__SEND_EMAIL", json!({"body": {"body": "hi"}}), OWNER)
        .await;

    assert_error_kind(&result, ErrorKind::ValidationError);
    assert_error_mentions(&result, "recipient");
    assert_eq!(harness.quota_used(), 0);
}

#[tokio::test]
async fn test_caller_cannot_supply_hidden_header() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    harness
        .link_oauth2(OWNER, "live-token", Some(NOW + 3600), None)
        .await;

    let result = harness
        .execute(
            "X__SEND_EMAIL",
            json!({
                "header": {"authorization": "Bearer forged"},
                "body": {"recipient": "a@b.com", "body": "hi"}
            }),
            OWNER,
        )
        .await;

    assert_error_kind(&result, ErrorKind::ValidationError);
    assert_error_mentions(&result, "authorization");
}

#[tokio::test]
async fn test_path_and_default_query_rendered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages/abc%20123"))
        .and(query_param("format", "full"))
        .respond_with(ResponseTemplate::new(200).set_body_string("plain body"))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    harness
        .link_oauth2(OWNER, "live-token", Some(NOW + 3600), None)
        .await;

    let result = harness
        .execute(
            "X__GET_MESSAGE",
            json!({"path": {"message_id": "abc 123"}}),
            OWNER,
        )
        .await;

    assert_success(&result);
    assert_eq!(result.data, Some(json!("plain body")));
}

// ============================================================================
// CREDENTIAL REFRESH
// ============================================================================

#[tokio::test]
async fn test_expired_token_refreshed_once_for_concurrent_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(fresh_token_response().set_delay(Duration::from_millis(50)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/messages/m1"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1"})))
        .expect(2)
        .mount(&server)
        .await;

    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    let account = harness
        .link_oauth2(OWNER, "expired-token", Some(NOW - 1), Some("refresh-1"))
        .await;

    let args = json!({"path": {"message_id": "m1"}});
    let (first, second) = tokio::join!(
        harness.execute("X__GET_MESSAGE", args.clone(), OWNER),
        harness.execute("X__GET_MESSAGE", args.clone(), OWNER),
    );

    assert_success(&first);
    assert_success(&second);
    assert_eq!(
        harness.stored_access_token(&account).await.as_deref(),
        Some("fresh-token")
    );
}

#[tokio::test]
async fn test_rejected_refresh_fails_concurrent_calls_with_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": "invalid_grant"}))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/messages/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1"})))
        .expect(0)
        .mount(&server)
        .await;

    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    harness
        .link_oauth2(OWNER, "expired-token", Some(NOW - 1), Some("revoked-refresh"))
        .await;

    let args = json!({"path": {"message_id": "m1"}});
    let results = join_all(
        (0..5).map(|_| harness.execute("X__GET_MESSAGE", args.clone(), OWNER)),
    )
    .await;

    for result in &results {
        assert_error_kind(result, ErrorKind::AuthenticationError);
        assert_error_mentions(result, "invalid_grant");
    }

    // Stays failed without another token request until the account is relinked.
    let again = harness.execute("X__GET_MESSAGE", args, OWNER).await;
    assert_error_kind(&again, ErrorKind::AuthenticationError);
}

#[tokio::test]
async fn test_expired_token_without_refresh_token_needs_relink() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    harness
        .link_oauth2(OWNER, "expired-token", Some(NOW - 1), None)
        .await;

    let result = harness
        .execute("X__GET_MESSAGE", json!({"path": {"message_id": "m1"}}), OWNER)
        .await;

    assert_error_kind(&result, ErrorKind::AuthenticationError);
}

#[tokio::test]
async fn test_unauthorized_response_refreshes_and_retries_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages/m1"))
        .and(header("authorization", "Bearer revoked-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(fresh_token_response())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/messages/m1"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    harness
        .link_oauth2(OWNER, "revoked-token", Some(NOW + 3600), Some("refresh-1"))
        .await;

    let result = harness
        .execute("X__GET_MESSAGE", json!({"path": {"message_id": "m1"}}), OWNER)
        .await;

    assert_success(&result);
}

#[tokio::test]
async fn test_second_rejection_is_not_retried_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages/m1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(fresh_token_response())
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            quota: daily(5),
            ..Default::default()
        },
    );
    harness
        .link_oauth2(OWNER, "revoked-token", Some(NOW + 3600), Some("refresh-1"))
        .await;

    let result = harness
        .execute("X__GET_MESSAGE", json!({"path": {"message_id": "m1"}}), OWNER)
        .await;

    assert_error_kind(&result, ErrorKind::AuthenticationError);
    // Dispatch ran, so the call is charged.
    assert_eq!(harness.quota_used(), 1);
}

#[tokio::test]
async fn test_unauthorized_surfaces_as_upstream_error_when_retry_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "bad key"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    harness.link_api_key(OWNER, None).await;

    let result = harness.execute("Y__LIST_X", json!({}), OWNER).await;

    assert_error_kind(&result, ErrorKind::UpstreamError);
    let failure = result.error.as_ref().unwrap();
    assert_eq!(failure.upstream_status, Some(401));
    assert_eq!(failure.upstream_body, Some(json!({"message": "bad key"})));
}

#[tokio::test]
async fn test_app_default_api_key_used_when_account_has_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .and(header("x-api-key", "y-default-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    harness.link_api_key(OWNER, None).await;

    assert_success(&harness.execute("Y__LIST_X", json!(null), OWNER).await);
}

#[tokio::test]
async fn test_missing_linked_account_is_authentication_error() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let result = harness.execute("Y__LIST_X", json!({}), "nobody").await;

    assert_error_kind(&result, ErrorKind::AuthenticationError);
}

// ============================================================================
// QUOTA
// ============================================================================

#[tokio::test]
async fn test_six_concurrent_calls_against_quota_of_five() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(5)
        .mount(&server)
        .await;

    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            quota: daily(5),
            ..Default::default()
        },
    );
    harness.link_api_key(OWNER, None).await;

    let results = join_all((0..6).map(|_| harness.execute("Y__LIST_X", json!({}), OWNER))).await;

    let successes = results.iter().filter(|r| r.success).count();
    let exceeded = results
        .iter()
        .filter(|r| r.error_kind() == Some(ErrorKind::QuotaExceeded))
        .count();
    assert_eq!(successes, 5);
    assert_eq!(exceeded, 1);
    assert_eq!(harness.quota_used(), 5);
}

#[tokio::test]
async fn test_upstream_failure_still_consumes_quota() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            quota: daily(5),
            ..Default::default()
        },
    );
    harness.link_api_key(OWNER, None).await;

    let result = harness.execute("Y__LIST_X", json!({}), OWNER).await;

    assert_error_kind(&result, ErrorKind::UpstreamError);
    assert_eq!(harness.quota_used(), 1);
}

#[tokio::test]
async fn test_connector_units_charged_and_capped_at_limit() {
    let server = MockServer::start().await;
    let connector = Arc::new(RecordingConnector::new("mail.send").with_units(3));
    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            quota: daily(4),
            connectors: builtin_registry().with(connector.clone()),
            ..Default::default()
        },
    );
    harness
        .link_oauth2(OWNER, "live-token", Some(NOW + 3600), None)
        .await;
    let args = json!({"body": {"recipient": "a@b.com", "body": "hello"}});

    let first = harness.execute("X__SEND_RAW", args.clone(), OWNER).await;
    assert_success(&first);
    assert_eq!(first.usage.units, 3);
    assert_eq!(harness.quota_used(), 3);

    // One unit of budget left: the reservation fits, the extra two do not.
    let second = harness.execute("X__SEND_RAW", args.clone(), OWNER).await;
    assert_success(&second);
    assert_eq!(second.usage.units, 1);
    assert_eq!(harness.quota_used(), 4);

    let third = harness.execute("X__SEND_RAW", args, OWNER).await;
    assert_error_kind(&third, ErrorKind::QuotaExceeded);
    assert_eq!(connector.calls().len(), 2);

    let usage = harness.orchestrator.quota().usage(&harness.project);
    assert_eq!(usage.used, 4);
    assert_eq!(usage.remaining, Some(0));
    assert_eq!(usage.total_used, 4);
}

/// Rolls the clock into the next day mid-call, then holds the call open
/// until the test says the next day's traffic is done.
struct DayRollingConnector {
    clock: Arc<ManualClock>,
    rolled: Notify,
    release: Notify,
}

#[async_trait]
impl ConnectorHandler for DayRollingConnector {
    fn name(&self) -> &str {
        "mail.send"
    }

    async fn call(&self, _ctx: ConnectorContext<'_>) -> Result<DispatchOutcome, ConnectorError> {
        self.clock.advance(86_400);
        self.rolled.notify_one();
        self.release.notified().await;
        Ok(DispatchOutcome::new(json!({"sent": true}), None).with_units(3))
    }
}

#[tokio::test]
async fn test_commit_after_period_rollover_leaves_new_period_alone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    let clock = Arc::new(ManualClock::new(NOW));
    let connector = Arc::new(DayRollingConnector {
        clock: clock.clone(),
        rolled: Notify::new(),
        release: Notify::new(),
    });
    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            quota: daily(2),
            clock,
            connectors: builtin_registry().with(connector.clone()),
            ..Default::default()
        },
    );
    harness
        .link_oauth2(OWNER, "live-token", Some(NOW + 3600), None)
        .await;
    harness.link_api_key(OWNER, None).await;

    let late = harness.execute(
        "X__SEND_RAW",
        json!({"body": {"recipient": "a@b.com", "body": "hello"}}),
        OWNER,
    );
    let next_day = async {
        connector.rolled.notified().await;
        let result = harness.execute("Y__LIST_X", json!({}), OWNER).await;
        connector.release.notify_one();
        result
    };
    let (late, next_day) = tokio::join!(late, next_day);

    assert_success(&next_day);
    assert_success(&late);
    // Only the reservation from the finished day is kept; the extra units
    // are not charged to the new day.
    assert_eq!(late.usage.units, 1);

    let usage = harness.orchestrator.quota().usage(&harness.project);
    assert_eq!(usage.used, 1);
    assert_eq!(usage.remaining, Some(1));
    assert_eq!(usage.total_used, 2);
}

#[tokio::test]
async fn test_dispatch_timeout_flagged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            dispatch_timeout: Duration::from_millis(50),
            ..Default::default()
        },
    );
    harness.link_api_key(OWNER, None).await;

    let result = harness.execute("Y__LIST_X", json!({}), OWNER).await;

    assert_error_kind(&result, ErrorKind::UpstreamError);
    assert!(result.error.as_ref().unwrap().timed_out);
}

// ============================================================================
// ACCESS CONTROL
// ============================================================================

fn never_delete() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "Y__DELETE_X".to_string(),
        "never delete resources".to_string(),
    )])
}

#[tokio::test]
async fn test_custom_instruction_denies_regardless_of_arguments() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            quota: daily(5),
            custom_instructions: never_delete(),
            ..Default::default()
        },
    );
    harness.link_api_key(OWNER, None).await;

    let valid = harness
        .execute("Y__DELETE_X", json!({"path": {"id": "42"}}), OWNER)
        .await;
    let invalid = harness
        .execute("Y__DELETE_X", json!({"bogus": true}), OWNER)
        .await;

    assert_error_kind(&valid, ErrorKind::AuthorizationError);
    assert_error_kind(&invalid, ErrorKind::AuthorizationError);
    assert_eq!(harness.quota_used(), 0);
}

#[tokio::test]
async fn test_instruction_only_applies_to_its_function() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            custom_instructions: never_delete(),
            ..Default::default()
        },
    );
    harness.link_api_key(OWNER, None).await;

    assert_success(&harness.execute("Y__LIST_X", json!({}), OWNER).await);
}

#[tokio::test]
async fn test_app_outside_agent_allow_list_denied() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            allowed_apps: BTreeSet::from(["X".to_string()]),
            ..Default::default()
        },
    );

    let result = harness.execute("Y__LIST_X", json!({}), OWNER).await;

    assert_error_kind(&result, ErrorKind::AuthorizationError);
}

#[tokio::test]
async fn test_unknown_function_is_validation_error() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let result = harness.execute("X__NOPE", json!({}), OWNER).await;

    assert_error_kind(&result, ErrorKind::ValidationError);
}

#[tokio::test]
async fn test_external_evaluator_consulted_only_with_instruction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let evaluator = Arc::new(StaticPolicyEvaluator::deny_all("blocked by reviewer"));
    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            custom_instructions: never_delete(),
            policy: Some(evaluator.clone()),
            ..Default::default()
        },
    );
    harness.link_api_key(OWNER, None).await;

    assert_success(&harness.execute("Y__LIST_X", json!({}), OWNER).await);
    assert_eq!(evaluator.calls(), 0);

    let denied = harness
        .execute("Y__DELETE_X", json!({"path": {"id": "1"}}), OWNER)
        .await;
    assert_error_kind(&denied, ErrorKind::AuthorizationError);
    assert_error_mentions(&denied, "blocked by reviewer");
    assert_eq!(evaluator.calls(), 1);
}

#[tokio::test]
async fn test_unavailable_evaluator_fails_closed() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            custom_instructions: BTreeMap::from([(
                "Y__LIST_X".to_string(),
                "only list things on weekdays".to_string(),
            )]),
            policy: Some(Arc::new(FailingPolicyEvaluator)),
            fallback: PolicyFallback::FailClosed,
            ..Default::default()
        },
    );
    harness.link_api_key(OWNER, None).await;

    let result = harness.execute("Y__LIST_X", json!({}), OWNER).await;

    assert_error_kind(&result, ErrorKind::AuthorizationError);
}

#[tokio::test]
async fn test_unavailable_evaluator_uses_rule_based_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::start(
        &server.uri(),
        HarnessOptions {
            custom_instructions: BTreeMap::from([(
                "Y__LIST_X".to_string(),
                "never delete resources".to_string(),
            )]),
            policy: Some(Arc::new(FailingPolicyEvaluator)),
            fallback: PolicyFallback::RuleBased,
            ..Default::default()
        },
    );
    harness.link_api_key(OWNER, None).await;

    assert_success(&harness.execute("Y__LIST_X", json!({}), OWNER).await);
}

// ============================================================================
// CONNECTORS AND DISCOVERY
// ============================================================================

#[tokio::test]
async fn test_mail_connector_posts_raw_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mail/send"))
        .and(header("authorization", "Bearer live-token"))
        .and(body_string_contains("\"raw\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "sent-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());
    harness
        .link_oauth2(OWNER, "live-token", Some(NOW + 3600), None)
        .await;

    let result = harness
        .execute(
            "X__SEND_RAW",
            json!({"body": {"recipient": "a@b.com", "subject": "Hi", "body": "hello"}}),
            OWNER,
        )
        .await;

    assert_success(&result);
    assert_eq!(result.data, Some(json!({"id": "sent-1"})));
}

#[tokio::test]
async fn test_discover_lists_only_visible_parameters() {
    let server = MockServer::start().await;
    let harness = TestHarness::start(&server.uri(), HarnessOptions::default());

    let all = harness
        .orchestrator
        .discover(harness.agent.id, None)
        .unwrap();
    assert_eq!(all.len(), 6);

    let y_only = harness
        .orchestrator
        .discover(harness.agent.id, Some("Y"))
        .unwrap();
    let names: Vec<&str> = y_only.iter().filter_map(|d| d["name"].as_str()).collect();
    assert_eq!(names, vec!["Y__DELETE_X", "Y__LIST_X"]);

    let send = all
        .iter()
        .find(|d| d["name"] == "X__SEND_EMAIL")
        .unwrap();
    assert!(send["parameters"]["properties"].get("header").is_none());
}
