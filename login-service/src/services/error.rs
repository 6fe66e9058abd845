use service_core::error::AppError;
use thiserror::Error;

/// Everything a login handshake can fail with.
///
/// The `Display` text is for logs. Callers only ever see [`AuthError::user_message`].
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown identity provider")]
    UnknownProvider,

    #[error("Identity provider is not configured")]
    ProviderNotConfigured,

    #[error("Token expired")]
    Expired,

    #[error("Bad token")]
    BadToken,

    #[error("Login session is missing or no longer valid")]
    SessionInvalid,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("OAuth state mismatch")]
    StateMismatch,

    #[error("SSO is not properly configured: {0}")]
    SsoMisconfigured(String),

    #[error("Invalid federated profile: {0}")]
    InvalidFederatedProfile(String),

    #[error("Identity provider rejected the login: {0}")]
    ProviderRejected(String),

    #[error("Account uses local login")]
    LoginLocally,

    #[error("Account uses SSO login")]
    LoginUsingSso,

    #[error("Account uses identity provider {0}")]
    LoginUsingIdp(String),

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Signups are forbidden")]
    SignupsForbidden,

    #[error("User is banned")]
    UserBanned,

    #[error("User is locked")]
    UserLocked,

    #[error("Internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable identifier, used in metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidInput(_) => "invalid_input",
            AuthError::UnknownProvider => "unknown_provider",
            AuthError::ProviderNotConfigured => "provider_not_configured",
            AuthError::Expired => "token_expired",
            AuthError::BadToken => "bad_token",
            AuthError::SessionInvalid => "session_invalid",
            AuthError::SignatureInvalid => "signature_invalid",
            AuthError::StateMismatch => "state_mismatch",
            AuthError::SsoMisconfigured(_) => "sso_misconfigured",
            AuthError::InvalidFederatedProfile(_) => "invalid_federated_profile",
            AuthError::ProviderRejected(_) => "provider_rejected",
            AuthError::LoginLocally => "login_locally",
            AuthError::LoginUsingSso => "login_using_sso",
            AuthError::LoginUsingIdp(_) => "login_using_idp",
            AuthError::EmailAlreadyExists => "email_already_exists",
            AuthError::SignupsForbidden => "signups_forbidden",
            AuthError::UserBanned => "user_banned",
            AuthError::UserLocked => "user_locked",
            AuthError::Internal(_) => "internal",
        }
    }

    /// Short, non-sensitive text safe to show in the browser.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidInput(msg) => format!("Invalid input: {}", msg),
            AuthError::SsoMisconfigured(_) => "SSO is not properly configured for this site".to_string(),
            AuthError::ProviderRejected(_) => "The identity provider rejected the login".to_string(),
            AuthError::InvalidFederatedProfile(field) => {
                format!("The identity provider did not supply a valid {}", field)
            }
            AuthError::LoginLocally => {
                "There is already an account with this email. Please log in with your email and password".to_string()
            }
            AuthError::LoginUsingSso => {
                "This account uses single sign-on. Please log in using SSO".to_string()
            }
            AuthError::LoginUsingIdp(idp) => {
                format!("This account is bound to another identity provider. Please log in using {}", idp)
            }
            AuthError::EmailAlreadyExists => {
                "This email is already registered to another account".to_string()
            }
            AuthError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the failure points at our side rather than at the caller.
    pub fn is_internal(&self) -> bool {
        matches!(self, AuthError::Internal(_))
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let msg = anyhow::anyhow!(err.user_message());
        match err {
            AuthError::Internal(e) => AppError::InternalError(e),
            AuthError::InvalidInput(_)
            | AuthError::UnknownProvider
            | AuthError::ProviderNotConfigured
            | AuthError::SsoMisconfigured(_)
            | AuthError::InvalidFederatedProfile(_) => AppError::BadRequest(msg),
            AuthError::Expired
            | AuthError::BadToken
            | AuthError::SessionInvalid
            | AuthError::SignatureInvalid
            | AuthError::StateMismatch => AppError::Unauthorized(msg),
            AuthError::LoginLocally
            | AuthError::LoginUsingSso
            | AuthError::LoginUsingIdp(_)
            | AuthError::SignupsForbidden
            | AuthError::UserBanned
            | AuthError::UserLocked => AppError::Forbidden(msg),
            AuthError::EmailAlreadyExists => AppError::Conflict(msg),
            AuthError::ProviderRejected(_) => AppError::BadGateway(msg.to_string()),
        }
    }
}
