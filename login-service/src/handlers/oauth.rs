use std::net::SocketAddr;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use service_core::{
    axum::{
        extract::{ConnectInfo, Path, Query, State},
        http::HeaderMap,
        response::{IntoResponse, Redirect, Response},
    },
    error::AppError,
};

use super::page;
use crate::services::{CallbackParams, CallbackRequest, ClientInfo, CookieSameSite, InitRequest};
use crate::utils::ip::{client_ip, country_from_header};
use crate::AppState;

pub const AUTH_SESSION_COOKIE: &str = "auth-session";

#[derive(Debug, Default, Deserialize)]
pub struct InitQuery {
    pub host: Option<String>,
    pub token: Option<String>,
}

/// `GET /api/oauth/:provider`: start a login and send the browser to the
/// identity provider (or the site's SSO endpoint).
pub async fn init(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<InitQuery>,
    jar: CookieJar,
) -> Result<(CookieJar, Response), AppError> {
    let started = state
        .handshake
        .init(InitRequest {
            provider,
            host: query.host,
            token: query.token,
        })
        .await?;

    let cookie = Cookie::build((AUTH_SESSION_COOKIE, started.session_id.to_string()))
        .path("/")
        .http_only(true)
        .secure(started.secure)
        .same_site(same_site(started.same_site))
        .max_age(time::Duration::seconds(started.session_ttl.num_seconds()))
        .build();

    Ok((
        jar.add(cookie),
        Redirect::temporary(&started.redirect_url).into_response(),
    ))
}

/// `GET /api/oauth/:provider/callback`: finish the login. Always answers with
/// an HTML page and always strips the auth-session cookie, whatever the
/// outcome.
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    params: Option<Query<CallbackParams>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Response) {
    let session_cookie = jar.get(AUTH_SESSION_COOKIE).map(|c| c.value().to_string());

    let client = ClientInfo {
        ip: client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr)),
        country: state
            .config
            .handshake
            .country_header
            .as_deref()
            .and_then(|name| country_from_header(&headers, name)),
    };

    let (cookie_same_site, secure) = state.handshake.cookie_attributes(&provider);
    let outcome = state
        .handshake
        .callback(CallbackRequest {
            provider,
            session_cookie,
            // Unparseable query strings fall through to the handshake's
            // own missing-parameter errors.
            params: params.map(|Query(p)| p).unwrap_or_default(),
            client,
        })
        .await;

    (
        jar.add(removal_cookie(cookie_same_site, secure)),
        page::render(outcome.mode, &outcome.result),
    )
}

fn same_site(value: CookieSameSite) -> SameSite {
    match value {
        CookieSameSite::Lax => SameSite::Lax,
        CookieSameSite::None => SameSite::None,
    }
}

/// `CookieJar::remove` only emits a removal for cookies the request carried,
/// so the expired cookie is built by hand, with the attributes Init used.
fn removal_cookie(same_site_attr: CookieSameSite, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::build((AUTH_SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(same_site(same_site_attr))
        .build();
    cookie.make_removal();
    cookie
}
