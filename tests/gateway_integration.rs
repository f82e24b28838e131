use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use unifi_gateway::gateway::{
    AuthScheme, Gateway, GatewayConfig, GatewayError, GatewayRequest,
};
use unifi_gateway::security::session::SessionState;
use unifi_gateway::tools::ToolRegistry;
use unifi_gateway::transport::ReqwestTransport;

const WLAN_PATH: &str = "/proxy/network/api/s/default/rest/wlanconf/w1";

fn gateway_for(server: &ServerGuard, config: GatewayConfig) -> Gateway {
    let transport = ReqwestTransport::new(&server.url(), Duration::from_secs(5), true).unwrap();
    Gateway::with_transport(&config, Arc::new(transport))
}

fn dual_config() -> GatewayConfig {
    GatewayConfig {
        host: "unifi.test".to_string(),
        api_key: Some("sk_test_key".to_string()),
        username: Some("admin".to_string()),
        password: Some("hunter2".to_string()),
        ..GatewayConfig::default()
    }
}

#[tokio::test]
async fn api_key_rejection_falls_back_to_cookie_session() {
    let mut server = Server::new_async().await;
    let api_key_attempt = server
        .mock("POST", WLAN_PATH)
        .match_header("x-api-key", "sk_test_key")
        .with_status(401)
        .with_body(r#"{"error":"Unauthorized"}"#)
        .expect(1)
        .create_async()
        .await;
    let login = server
        .mock("POST", "/api/auth/login")
        .match_body(Matcher::PartialJson(json!({"username": "admin", "password": "hunter2"})))
        .with_status(200)
        .with_header("set-cookie", "TOKEN=session-abc; Path=/; HttpOnly")
        .with_header("x-csrf-token", "csrf-xyz")
        .with_body(r#"{"username":"admin"}"#)
        .expect(1)
        .create_async()
        .await;
    let cookie_attempt = server
        .mock("POST", WLAN_PATH)
        .match_header("cookie", "TOKEN=session-abc")
        .match_header("x-csrf-token", "csrf-xyz")
        .match_body(Matcher::Json(json!({"_id": "w1", "enabled": false})))
        .with_status(200)
        .with_body(r#"{"meta":{"rc":"ok"},"data":[{"_id":"w1","enabled":false,"x_passphrase":"wifi-pass"}]}"#)
        .expect(1)
        .create_async()
        .await;

    let gateway = gateway_for(&server, dual_config());
    let result = ToolRegistry::with_defaults()
        .invoke(
            &gateway.dispatcher,
            "wlan_set_enabled",
            &json!({"site_id": "default", "wlan_id": "w1", "enabled": false}),
        )
        .await
        .unwrap();

    assert_eq!(result["success"], true);
    assert_eq!(result["auth"], "legacy");
    assert_eq!(result["data"]["data"][0]["x_passphrase"], "[REDACTED]");

    api_key_attempt.assert_async().await;
    login.assert_async().await;
    cookie_attempt.assert_async().await;

    let info = gateway.dispatcher.sessions().info().await;
    assert!(info.active);
    assert_eq!(info.state, SessionState::Active);
}

#[tokio::test]
async fn established_session_is_reused_across_calls() {
    let mut server = Server::new_async().await;
    let _api_key_attempt = server
        .mock("GET", "/proxy/protect/api/cameras")
        .match_header("x-api-key", "sk_test_key")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;
    let login = server
        .mock("POST", "/api/auth/login")
        .with_status(200)
        .with_header("set-cookie", "TOKEN=session-abc; Path=/")
        .expect(1)
        .create_async()
        .await;
    let _cookie_attempt = server
        .mock("GET", "/proxy/protect/api/cameras")
        .match_header("cookie", "TOKEN=session-abc")
        .with_status(200)
        .with_body("[]")
        .expect(2)
        .create_async()
        .await;

    let gateway = gateway_for(&server, dual_config());
    for _ in 0..2 {
        let resp = gateway
            .dispatcher
            .execute(GatewayRequest::get("/proxy/protect/api/cameras", "protect/cameras"))
            .await
            .unwrap();
        assert_eq!(resp.auth_scheme, AuthScheme::Legacy);
        assert_eq!(resp.body, json!([]));
    }
    login.assert_async().await;
}

#[tokio::test]
async fn bad_legacy_credentials_surface_as_auth_failure() {
    let mut server = Server::new_async().await;
    let _api_key_attempt = server
        .mock("GET", "/proxy/protect/api/cameras")
        .with_status(401)
        .create_async()
        .await;
    let _login = server
        .mock("POST", "/api/auth/login")
        .with_status(401)
        .with_body(r#"{"code":"AUTHENTICATION_FAILED_INVALID_CREDENTIALS"}"#)
        .create_async()
        .await;

    let gateway = gateway_for(&server, dual_config());
    let err = gateway
        .dispatcher
        .execute(GatewayRequest::get("/proxy/protect/api/cameras", "protect/cameras"))
        .await
        .unwrap_err();
    match err {
        GatewayError::AuthenticationFailed { scheme, status, .. } => {
            assert_eq!(scheme, AuthScheme::Legacy);
            assert_eq!(status, Some(401));
        }
        other => panic!("expected authentication failure, got {other:?}"),
    }

    let events = gateway.audit_trail.recent(10);
    let printed = serde_json::to_string(&events).unwrap();
    assert!(!printed.contains("hunter2"));
    assert!(!printed.contains("sk_test_key"));
}

#[tokio::test]
async fn query_parameters_reach_the_controller() {
    let mut server = Server::new_async().await;
    let page = server
        .mock("GET", "/proxy/network/integrations/v1/sites/default/devices")
        .match_header("x-api-key", "sk_test_key")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("limit".into(), "200".into()),
            Matcher::UrlEncoded("offset".into(), "0".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"offset":0,"limit":200,"count":2,"totalCount":2,"data":[{"id":"a"},{"id":"b"}]}"#)
        .expect(1)
        .create_async()
        .await;

    let gateway = gateway_for(&server, dual_config());
    let result = ToolRegistry::with_defaults()
        .invoke(&gateway.dispatcher, "list_devices", &json!({"site_id": "default"}))
        .await
        .unwrap();
    assert_eq!(result["count"], 2);
    assert_eq!(result["auth"], "api_key");
    page.assert_async().await;
}
