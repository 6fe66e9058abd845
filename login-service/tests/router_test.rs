mod common;

use common::*;
use http_body_util::BodyExt;
use login_service::build_router;
use serde_json::json;
use service_core::axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use tower::ServiceExt;

fn router(h: &Harness) -> Router {
    build_router(app_state(h))
}

async fn get(app: Router, uri: &str, cookie: Option<&str>) -> Response<Body> {
    let mut request = Request::builder().uri(uri).header("cf-ipcountry", "fr");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    app.oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn set_cookie(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .expect("set-cookie header")
        .to_str()
        .unwrap()
        .to_string()
}

/// `auth-session=<value>` from a Set-Cookie header.
fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().trim().to_string()
}

#[tokio::test]
async fn init_redirects_and_sets_session_cookie() {
    let h = Harness::new().await;
    let response = get(router(&h), "/api/oauth/sso?host=blog.example.com", None).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://blog.example.com/sso/login?token="));

    let cookie = set_cookie(&response);
    assert!(cookie.starts_with("auth-session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=900"));
    assert!(!cookie.contains("Secure"));
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn init_errors_are_json() {
    let h = Harness::new().await;
    let response = get(router(&h), "/api/oauth/myspace", None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"], "Unknown identity provider");
}

#[tokio::test]
async fn full_sso_round_trip_through_http() {
    let h = Harness::new().await;

    let init = get(router(&h), "/api/oauth/sso?host=blog.example.com", None).await;
    let cookie = cookie_pair(&set_cookie(&init));
    let location = init.headers()[header::LOCATION].to_str().unwrap().to_string();
    let token = query_param(&location, "token").unwrap();

    let (payload, hmac) = signed_payload(&json!({
        "token": token,
        "email": "john@x.com",
        "name": "John",
    }));
    let uri = format!("/api/oauth/sso/callback?payload={}&hmac={}", payload, hmac);
    let response = get(router(&h), &uri, Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let removal = set_cookie(&response);
    assert!(removal.starts_with("auth-session=;"));
    assert!(removal.contains("Max-Age=0"));
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));

    let body = body_text(response).await;
    assert!(body.contains("window.close()"));

    let users = h.store.users().await;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].signup_country, "FR");

    // Replaying the cookie gets the error page, and the cookie is stripped again.
    let replay = get(router(&h), &uri, Some(&cookie)).await;
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookie(&replay).starts_with("auth-session=;"));
    assert!(body_text(replay).await.contains("Login failed"));
}

#[tokio::test]
async fn callback_without_cookie_renders_error_and_strips_cookie() {
    let h = Harness::new().await;
    let response = get(router(&h), "/api/oauth/sso/callback?payload=00&hmac=00", None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookie(&response).starts_with("auth-session=;"));
    assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
    let body = body_text(response).await;
    assert!(body.contains("Login session is missing or no longer valid"));
}

#[tokio::test]
async fn non_interactive_callback_posts_result_to_parent() {
    let h = Harness::new().await;
    let mut domain = h.domain(SSO_HOST).await;
    domain.sso_non_interactive = true;
    h.store.insert_domain(domain).await;

    let init = get(router(&h), "/api/oauth/sso?host=blog.example.com", None).await;
    let cookie = cookie_pair(&set_cookie(&init));
    let location = init.headers()[header::LOCATION].to_str().unwrap().to_string();
    let token = query_param(&location, "token").unwrap();

    let (payload, hmac) = signed_payload(&json!({
        "token": token,
        "email": "john@x.com",
        "name": "John",
    }));
    let uri = format!(
        "/api/oauth/sso/callback?payload={}&hmac={}",
        payload,
        tamper(&hmac)
    );
    let response = get(router(&h), &uri, Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::X_FRAME_OPTIONS).is_none());
    assert!(response.headers()[header::CONTENT_SECURITY_POLICY]
        .to_str()
        .unwrap()
        .contains("frame-ancestors *"));
    let body = body_text(response).await;
    assert!(body.contains(r#""type":"auth.sso.result","success":false"#));
    assert!(body.contains("postMessage"));
    assert!(h.store.users().await.is_empty());
}

#[tokio::test]
async fn health_reports_store_status() {
    let h = Harness::new().await;
    let response = get(router(&h), "/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"], "disabled");
    assert_eq!(body["checks"]["session_store"], "up");
}

#[tokio::test]
async fn api_responses_carry_default_security_headers() {
    let h = Harness::new().await;
    let response = get(router(&h), "/health", None).await;

    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
}

#[tokio::test]
async fn secure_sso_cookie_is_removed_with_matching_attributes() {
    let h = Harness::with_options(HarnessOptions {
        settings: login_service::services::HandshakeSettings {
            secure_cookies: true,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;

    let init = get(router(&h), "/api/oauth/sso?host=blog.example.com", None).await;
    let set = set_cookie(&init);
    assert!(set.contains("SameSite=None"));
    assert!(set.contains("Secure"));

    let uri = "/api/oauth/sso/callback?payload=00&hmac=00";
    let response = get(router(&h), uri, Some(&cookie_pair(&set))).await;
    let removal = set_cookie(&response);
    assert!(removal.starts_with("auth-session=;"));
    assert!(removal.contains("Max-Age=0"));
    assert!(removal.contains("SameSite=None"));
    assert!(removal.contains("Secure"));
    assert!(removal.contains("Path=/"));
}

#[tokio::test]
async fn oauth_cookie_removal_stays_lax() {
    let h = Harness::new().await;
    let response = get(router(&h), "/api/oauth/github/callback?state=x&code=y", None).await;

    let removal = set_cookie(&response);
    assert!(removal.starts_with("auth-session=;"));
    assert!(removal.contains("SameSite=Lax"));
    assert!(!removal.contains("Secure"));
}
