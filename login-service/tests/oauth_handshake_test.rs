mod common;

use std::sync::atomic::Ordering;

use common::*;
use login_service::services::{AuthError, CallbackParams, InitRequest, ResponseMode};
use service_core::tasks::TaskOutcome;

#[tokio::test]
async fn oauth_login_creates_idp_bound_user() {
    let h = Harness::new().await;
    let init = h.oauth_init(None).await;
    assert!(init.redirect_url.starts_with("https://idp.test/authorize?state="));

    let state = query_param(&init.redirect_url, "state").unwrap();
    let outcome = h
        .oauth_callback(
            &init,
            CallbackParams {
                state: Some(state),
                code: Some(GOOD_CODE.into()),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(outcome.mode, ResponseMode::Interactive);
    let login = outcome.result.expect("login succeeds");
    assert!(login.created);
    assert_eq!(login.domain_role, None);
    assert_eq!(login.user.federated_idp.as_deref(), Some("github"));
    assert!(!login.user.federated_sso);
    assert_eq!(login.user.name, "The Octocat");
    assert_eq!(login.user.website_url, "https://github.test/octocat");

    let stored = h.store.users().await.pop().unwrap();
    assert_eq!(stored.federated_id, "583231");
    assert!(stored.confirmed);
    assert!(h.store.domain_users().await.is_empty());

    let task = login.avatar_task.expect("avatar refresh dispatched");
    assert_eq!(task.await.unwrap(), TaskOutcome::Completed);
    assert_eq!(
        h.avatars.calls(),
        vec![AvatarCall::Url(login.user.id, "https://avatars.github.test/u/583231".into())]
    );
}

#[tokio::test]
async fn second_oauth_login_finds_the_same_user() {
    let h = Harness::new().await;
    let first = h.oauth_login(None).await.result.unwrap();
    let second = h.oauth_login(None).await.result.unwrap();

    assert!(!second.created);
    assert_eq!(first.user.id, second.user.id);
    assert_eq!(h.store.users().await.len(), 1);
}

#[tokio::test]
async fn state_mismatch_is_rejected_before_code_exchange() {
    let h = Harness::new().await;
    let init = h.oauth_init(None).await;

    let outcome = h
        .oauth_callback(
            &init,
            CallbackParams {
                state: Some("forged".into()),
                code: Some(GOOD_CODE.into()),
                ..Default::default()
            },
        )
        .await;

    assert!(matches!(outcome.result, Err(AuthError::StateMismatch)));
    assert_eq!(h.provider.exchanges.load(Ordering::SeqCst), 0);
    assert!(h.store.users().await.is_empty());
}

#[tokio::test]
async fn missing_state_is_a_mismatch() {
    let h = Harness::new().await;
    let init = h.oauth_init(None).await;

    let outcome = h
        .oauth_callback(
            &init,
            CallbackParams {
                code: Some(GOOD_CODE.into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(outcome.result, Err(AuthError::StateMismatch)));
}

#[tokio::test]
async fn provider_error_parameter_is_provider_rejected() {
    let h = Harness::new().await;
    let init = h.oauth_init(None).await;
    let state = query_param(&init.redirect_url, "state").unwrap();

    let outcome = h
        .oauth_callback(
            &init,
            CallbackParams {
                state: Some(state),
                error: Some("access_denied".into()),
                error_description: Some("The user denied access".into()),
                ..Default::default()
            },
        )
        .await;

    assert!(matches!(outcome.result, Err(AuthError::ProviderRejected(_))));
    assert_eq!(h.provider.exchanges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_code_exchange_is_provider_rejected() {
    let h = Harness::new().await;
    let init = h.oauth_init(None).await;
    let state = query_param(&init.redirect_url, "state").unwrap();

    let outcome = h
        .oauth_callback(
            &init,
            CallbackParams {
                state: Some(state),
                code: Some("expired-code".into()),
                ..Default::default()
            },
        )
        .await;

    assert!(matches!(outcome.result, Err(AuthError::ProviderRejected(_))));
    assert_eq!(h.provider.exchanges.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_code_is_invalid_input() {
    let h = Harness::new().await;
    let init = h.oauth_init(None).await;
    let state = query_param(&init.redirect_url, "state").unwrap();

    let outcome = h
        .oauth_callback(
            &init,
            CallbackParams {
                state: Some(state),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(outcome.result, Err(AuthError::InvalidInput(_))));
}

#[tokio::test]
async fn profile_without_email_is_rejected() {
    let h = Harness::new().await;
    h.provider.set_profile(login_service::models::FederatedUser {
        email: String::new(),
        ..octocat()
    });

    let outcome = h.oauth_login(None).await;
    assert!(matches!(outcome.result, Err(AuthError::InvalidFederatedProfile(f)) if f == "email"));
}

#[tokio::test]
async fn unknown_and_unconfigured_providers() {
    let h = Harness::new().await;

    let unknown = h
        .service
        .init(InitRequest {
            provider: "myspace".into(),
            ..Default::default()
        })
        .await;
    assert!(matches!(unknown, Err(AuthError::UnknownProvider)));

    let unconfigured = h
        .service
        .init(InitRequest {
            provider: "google".into(),
            ..Default::default()
        })
        .await;
    assert!(matches!(unconfigured, Err(AuthError::ProviderNotConfigured)));

    assert_eq!(h.store.session_count().await, 0);
}

#[tokio::test]
async fn callback_on_another_provider_route_fails() {
    let h = Harness::new().await;
    let init = h.oauth_init(None).await;

    let outcome = h
        .service
        .callback(login_service::services::CallbackRequest {
            provider: "google".into(),
            session_cookie: Some(init.session_id.to_string()),
            params: CallbackParams::default(),
            client: client(),
        })
        .await;
    assert!(matches!(outcome.result, Err(AuthError::SessionInvalid)));

    // The session was spent on the failed attempt.
    assert_eq!(h.store.session_count().await, 0);
}

#[tokio::test]
async fn callback_on_another_configured_provider_is_rejected_before_exchange() {
    let h = Harness::new().await;
    let init = h.oauth_init(None).await;
    let state = query_param(&init.redirect_url, "state").unwrap();

    let outcome = h
        .service
        .callback(login_service::services::CallbackRequest {
            provider: SECOND_OAUTH_PROVIDER.into(),
            session_cookie: Some(init.session_id.to_string()),
            params: CallbackParams {
                state: Some(state.clone()),
                code: Some(GOOD_CODE.into()),
                ..Default::default()
            },
            client: client(),
        })
        .await;

    assert!(matches!(outcome.result, Err(AuthError::SessionInvalid)));
    assert_eq!(h.provider.exchanges.load(Ordering::SeqCst), 0);
    assert_eq!(h.second_provider.exchanges.load(Ordering::SeqCst), 0);
    assert!(h.store.users().await.is_empty());

    // Retrying on the right route is too late: the session is gone.
    let retry = h
        .oauth_callback(
            &init,
            CallbackParams {
                state: Some(state),
                code: Some(GOOD_CODE.into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(retry.result, Err(AuthError::SessionInvalid)));
}

#[tokio::test]
async fn sso_session_cannot_complete_on_an_oauth_route() {
    let h = Harness::new().await;
    let init = h.sso_init().await;

    let outcome = h
        .service
        .callback(login_service::services::CallbackRequest {
            provider: OAUTH_PROVIDER.into(),
            session_cookie: Some(init.session_id.to_string()),
            params: CallbackParams {
                state: Some("anything".into()),
                code: Some(GOOD_CODE.into()),
                ..Default::default()
            },
            client: client(),
        })
        .await;

    assert!(matches!(outcome.result, Err(AuthError::SessionInvalid)));
    assert_eq!(h.provider.exchanges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn oauth_init_with_unknown_host_is_invalid_input() {
    let h = Harness::new().await;
    let result = h
        .service
        .init(InitRequest {
            provider: OAUTH_PROVIDER.into(),
            host: Some("nowhere.example.com".into()),
            token: None,
        })
        .await;
    assert!(matches!(result, Err(AuthError::InvalidInput(_))));
}

#[tokio::test]
async fn oauth_login_on_domain_binds_commenter() {
    let h = Harness::new().await;
    let login = h.oauth_login(Some("Blog.Example.com ")).await.result.unwrap();

    assert_eq!(
        login.domain_role,
        Some(login_service::models::DomainRole::Commenter)
    );
    let stored = h.store.users().await.pop().unwrap();
    assert_eq!(stored.signup_host, SSO_HOST);
}

#[tokio::test]
async fn supplied_token_is_reused_for_init() {
    let h = Harness::new().await;
    let first = h.oauth_init(None).await;

    // Start a fresh login carrying an anonymous token the client already holds.
    let held = {
        use login_service::models::TokenScope;
        use login_service::services::TokenStore;
        h.store
            .issue_anonymous(TokenScope::Login, chrono::Duration::minutes(5), true)
            .await
            .unwrap()
    };
    let init = h
        .service
        .init(InitRequest {
            provider: OAUTH_PROVIDER.into(),
            host: None,
            token: Some(held.value.clone()),
        })
        .await
        .unwrap();
    assert_ne!(init.session_id, first.session_id);

    let state = query_param(&init.redirect_url, "state").unwrap();
    let login = h
        .oauth_callback(
            &init,
            CallbackParams {
                state: Some(state),
                code: Some(GOOD_CODE.into()),
                ..Default::default()
            },
        )
        .await
        .result
        .unwrap();

    assert_eq!(h.store.token(&held.value).await.unwrap().owner, login.user.id);
}

#[tokio::test]
async fn expired_supplied_token_is_rejected() {
    let h = Harness::new().await;
    let mut token = login_service::models::Token::new_anonymous(
        login_service::models::TokenScope::Login,
        chrono::Duration::minutes(5),
        false,
    );
    token.expires_at = chrono::Utc::now() - chrono::Duration::minutes(1);
    h.store.insert_token(token.clone()).await;

    let result = h
        .service
        .init(InitRequest {
            provider: OAUTH_PROVIDER.into(),
            host: None,
            token: Some(token.value),
        })
        .await;
    assert!(matches!(result, Err(AuthError::Expired)));

    let result = h
        .service
        .init(InitRequest {
            provider: OAUTH_PROVIDER.into(),
            host: None,
            token: Some("ff".repeat(32)),
        })
        .await;
    assert!(matches!(result, Err(AuthError::BadToken)));
}
