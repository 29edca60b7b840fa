mod common;

use authplane::app::{build_router, build_state_with_store};
use authplane::store::memory::InMemoryStore;
use axum::http::StatusCode;
use common::{TestApp, claims, host, identity_config, mint, read_json, request, test_config};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

#[tokio::test]
async fn health_is_public() {
    let app = TestApp::spawn().await;
    let response = app
        .send(request("GET", "/v1/system/health", "anything", None, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "memory");
}

#[tokio::test]
async fn unknown_hosts_are_not_found() {
    let app = TestApp::spawn().await;
    let token = app.token("alice", Some("t1"));
    for unknown in ["unregistered.example", common::PLATFORM_DOMAIN, "www.platform.test"] {
        let response = app
            .send(request("GET", "/v1/me", unknown, Some(&token), None))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{unknown}");
        let body = read_json(response).await;
        assert_eq!(body["message"], "not found");
    }
}

#[tokio::test]
async fn missing_or_invalid_tokens_are_unauthorized() {
    let app = TestApp::spawn().await;
    app.grant("alice", "t1", "user").await;

    let missing = app
        .send(request("GET", "/v1/me", &host("t1"), None, None))
        .await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let expired = mint("k1", &claims(&app.jwks.issuer(), "alice", Some("t1"), -600));
    let response = app
        .send(request("GET", "/v1/me", &host("t1"), Some(&expired), None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let foreign_issuer = mint(
        "k1",
        &claims("https://other.example/realms/test", "alice", Some("t1"), 300),
    );
    let response = app
        .send(request("GET", "/v1/me", &host("t1"), Some(&foreign_issuer), None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = read_json(response).await;
    assert_eq!(body["message"], "unauthorized");
}

#[tokio::test]
async fn token_for_another_tenant_is_forbidden() {
    let app = TestApp::spawn().await;
    app.grant("alice", "t1", "admin").await;
    app.grant("alice", "t2", "admin").await;

    let token = app.token("alice", Some("t2"));
    let response = app
        .send(request("GET", "/v1/me", &host("t1"), Some(&token), None))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_permission_is_forbidden() {
    let app = TestApp::spawn().await;
    app.grant("bob", "t1", "user").await;
    let token = app.token("bob", Some("t1"));

    let allowed = app
        .send(request("GET", "/v1/me", &host("t1"), Some(&token), None))
        .await;
    assert_eq!(allowed.status(), StatusCode::OK);

    let denied = app
        .send(request("GET", "/v1/roles", &host("t1"), Some(&token), None))
        .await;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    let body = read_json(denied).await;
    assert_eq!(body["message"], "forbidden");
}

#[tokio::test]
async fn me_reports_live_permissions() {
    let app = TestApp::spawn().await;
    app.grant("carol", "t1", "manager").await;
    let token = app.token("carol", Some("t1"));

    let response = app
        .send(request("GET", "/v1/me", &host("t1"), Some(&token), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["tenant_id"], "t1");
    assert_eq!(body["subject"], "carol");
    let permissions = body["permissions"].as_array().expect("permissions");
    assert!(permissions.contains(&json!("users:manage")));
    assert!(!permissions.contains(&json!("roles:manage")));
}

#[tokio::test]
async fn token_without_tenant_claim_is_rejected_on_tenant_routes() {
    let app = TestApp::spawn().await;
    app.grant("dave", "t1", "user").await;
    let token = app.token("dave", None);

    let response = app
        .send(request("GET", "/v1/me", &host("t1"), Some(&token), None))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn trusted_override_selects_tenant() {
    let app = TestApp::spawn().await;
    app.grant("erin", "t2", "user").await;
    let token = app.token("erin", Some("t2"));

    let mut trusted = request("GET", "/v1/me", &host("t1"), Some(&token), None);
    trusted
        .headers_mut()
        .insert("x-tenant-id", "t2".parse().expect("header"));
    trusted
        .headers_mut()
        .insert("x-service-token", common::SERVICE_TOKEN.parse().expect("header"));
    let response = app.send(trusted).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["tenant_id"], "t2");

    let mut untrusted = request("GET", "/v1/me", &host("t1"), Some(&token), None);
    untrusted
        .headers_mut()
        .insert("x-tenant-id", "t2".parse().expect("header"));
    untrusted
        .headers_mut()
        .insert("x-service-token", "guess".parse().expect("header"));
    let response = app.send(untrusted).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn platform_routes_require_system_admin_role() {
    let app = TestApp::spawn().await;

    let plain = app.token("frank", None);
    let response = app
        .send(request("POST", "/v1/platform/sync", "ops.internal", Some(&plain), None))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin = app.admin_token("root");
    let response = app
        .send(request("POST", "/v1/platform/sync", "ops.internal", Some(&admin), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = read_json(response).await;
    assert!(report["policies"].as_u64().expect("policies") > 0);
}

#[tokio::test]
async fn platform_seeds_default_roles_for_new_tenant() {
    let app = TestApp::spawn().await;
    app.add_tenant("t3").await;
    let admin = app.admin_token("root");

    let response = app
        .send(request(
            "POST",
            "/v1/platform/tenants/t3/default-roles",
            "ops.internal",
            Some(&admin),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["tenant_id"], "t3");
    let names: Vec<_> = body["roles"]
        .as_array()
        .expect("roles")
        .iter()
        .map(|role| role["name"].as_str().expect("name").to_string())
        .collect();
    assert_eq!(names, ["admin", "manager", "user", "viewer"]);

    let missing = app
        .send(request(
            "POST",
            "/v1/platform/tenants/nope/default-roles",
            "ops.internal",
            Some(&admin),
            None,
        ))
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unreachable_key_endpoint_is_service_unavailable() {
    let identity = identity_config(
        "http://127.0.0.1:1".to_string(),
        "http://127.0.0.1:1/jwks".to_string(),
    );
    let issuer = identity.issuer();
    let config = test_config(identity);
    let state = build_state_with_store(&config, Arc::new(InMemoryStore::new()))
        .await
        .expect("state");
    let router = build_router(state);

    let token = mint("k1", &claims(&issuer, "alice", Some("t1"), 300));
    let response = router
        .oneshot(request("GET", "/v1/me", &host("t1"), Some(&token), None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = read_json(response).await;
    assert_eq!(body["code"], "upstream_unavailable");
}
