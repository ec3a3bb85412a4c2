//! Integration tests for the RouterOS enforcer with Wiremock
//!
//! Tests the address-list PUT request and status handling.

use knockgate::adapters::outbound::{RouterOsEnforcer, RouterOsSettings};
use knockgate::domain::errors::EnforcementError;
use knockgate::Enforcer;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use wiremock::matchers::{basic_auth, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LIST_PATH: &str = "/rest/ip/firewall/address-list";
const KNOCKER: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

fn create_enforcer(mock_server: &MockServer) -> RouterOsEnforcer {
    RouterOsEnforcer::new(RouterOsSettings {
        url: format!("{}{}", mock_server.uri(), LIST_PATH),
        username: "api".to_string(),
        password: "hunter2".to_string(),
        post_payload: r#"{"address":"$IP","list":"$LIST","timeout":"$TIMEOUT"}"#.to_string(),
        insecure_skip_verify: false,
        timeout: Duration::from_secs(2),
    })
    .unwrap()
}

/// Test the request shape of a successful add
#[tokio::test]
async fn test_add_puts_templated_payload() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(LIST_PATH))
        .and(basic_auth("api", "hunter2"))
        .and(header("content-type", "application/json"))
        .and(body_string(
            r#"{"address":"203.0.113.7","list":"knock_allow","timeout":"3600"}"#,
        ))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let enforcer = create_enforcer(&mock_server);
    let result = enforcer.add(KNOCKER, "knock_allow", 3600).await;

    assert!(result.is_ok());
}

/// Test that "already present" (400) counts as success
#[tokio::test]
async fn test_add_existing_entry_is_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(LIST_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "detail": "failure: already have such entry",
            "error": 400,
            "message": "Bad Request"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let enforcer = create_enforcer(&mock_server);
    assert!(enforcer.add(KNOCKER, "knock_allow", 60).await.is_ok());
}

/// Test that other failures are reported
#[tokio::test]
async fn test_add_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let enforcer = create_enforcer(&mock_server);
    let result = enforcer.add(KNOCKER, "knock_allow", 60).await;

    assert_eq!(result, Err(EnforcementError::Rejected(401)));
}

/// Test that an empty list name never reaches the router
#[tokio::test]
async fn test_empty_list_sends_nothing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let enforcer = create_enforcer(&mock_server);
    assert!(enforcer.add(KNOCKER, "", 60).await.is_ok());
}

/// Test that the gateway placeholder is resolved before the request
#[tokio::test]
async fn test_gateway_placeholder_resolved() {
    let mock_server = MockServer::start().await;
    let port = mock_server.address().port();

    Mock::given(method("PUT"))
        .and(path(LIST_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    fn loopback_gateway() -> Result<Ipv4Addr, EnforcementError> {
        Ok(Ipv4Addr::LOCALHOST)
    }

    let enforcer = RouterOsEnforcer::new(RouterOsSettings {
        url: format!("http://$GATEWAY:{}{}", port, LIST_PATH),
        username: "api".to_string(),
        password: "hunter2".to_string(),
        post_payload: r#"{"address":"$IP"}"#.to_string(),
        insecure_skip_verify: false,
        timeout: Duration::from_secs(2),
    })
    .unwrap()
    .with_gateway_discovery(loopback_gateway);

    enforcer.add(KNOCKER, "allow", 60).await.unwrap();
    assert_eq!(enforcer.url(), format!("http://127.0.0.1:{}{}", port, LIST_PATH));

    enforcer.add(KNOCKER, "allow", 60).await.unwrap();
}
