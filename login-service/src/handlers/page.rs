//! The HTML page that ends a callback.
//!
//! The page runs in the login popup (interactive) or in a hidden frame on the
//! embedding site (non-interactive SSO), so it carries its own CSP instead of
//! the API default.

use serde::Serialize;
use service_core::axum::{
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};

use crate::services::{AuthError, LoginResult, ResponseMode};

pub const SSO_RESULT_MESSAGE: &str = "auth.sso.result";

const POPUP_CSP: &str =
    "default-src 'none'; script-src 'unsafe-inline'; style-src 'unsafe-inline'; frame-ancestors 'none'";
const FRAME_CSP: &str =
    "default-src 'none'; script-src 'unsafe-inline'; frame-ancestors *";

#[derive(Debug, Serialize)]
pub struct SsoResultMessage<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
}

pub fn render(mode: ResponseMode, result: &Result<LoginResult, AuthError>) -> Response {
    let (status, body, csp) = match (mode, result) {
        (ResponseMode::NonInteractive, result) => {
            let error = result.as_ref().err().map(AuthError::user_message);
            (StatusCode::OK, sso_result_page(error.as_deref()), FRAME_CSP)
        }
        (ResponseMode::Interactive, Err(e)) => {
            (status_for(e), error_page(&e.user_message()), POPUP_CSP)
        }
        (ResponseMode::Interactive, Ok(_)) => (StatusCode::OK, close_page(), POPUP_CSP),
    };

    let mut response = (status, Html(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_SECURITY_POLICY, HeaderValue::from_static(csp));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if mode == ResponseMode::Interactive {
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    }
    response
}

fn status_for(err: &AuthError) -> StatusCode {
    if err.is_internal() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    }
}

fn close_page() -> String {
    page("Logged in", "<script>window.close();</script>")
}

fn error_page(message: &str) -> String {
    page(
        "Login failed",
        &format!(
            "<h1>Login failed</h1><p>{}</p><p>You can close this window and try again.</p>",
            escape_html(message)
        ),
    )
}

/// Posts the outcome to whichever window embedded or opened this one. The
/// embedding origin is not known here, hence the `*` target; the message
/// carries no account data.
fn sso_result_page(error: Option<&str>) -> String {
    let message = SsoResultMessage {
        kind: SSO_RESULT_MESSAGE,
        success: error.is_none(),
        error,
    };
    let json = script_json(&message);
    page(
        "Login",
        &format!(
            "<script>(function(){{var m={};var t=window.opener||window.parent;\
             if(t&&t!==window){{t.postMessage(m,'*');}}}})();</script>",
            json
        ),
    )
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title></head><body>{}</body></html>",
        escape_html(title),
        body
    )
}

/// JSON safe to inline in a `<script>` block.
fn script_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "{}".to_string())
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
