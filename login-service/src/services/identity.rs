//! Mapping a verified federated identity onto a platform account.

use chrono::Utc;

use super::error::AuthError;
use super::signup_policy::{SignupKind, SignupPolicy};
use super::store::DirectoryTransaction;
use super::verifier::Verifier;
use crate::models::{AuthMode, Domain, FederatedUser, User};

/// Stamped on accounts created by a federated signup.
#[derive(Debug, Clone, Default)]
pub struct SignupMeta {
    pub ip: String,
    pub country: String,
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedUser {
    pub user: User,
    pub created: bool,
}

pub struct IdentityResolver<'a> {
    pub verifier: &'a dyn Verifier,
    pub signup: &'a dyn SignupPolicy,
}

impl IdentityResolver<'_> {
    /// Find, create or refresh the account behind `federated`. The checks
    /// run in a fixed order, each one narrower than the last.
    pub async fn resolve(
        &self,
        tx: &mut dyn DirectoryTransaction,
        mode: AuthMode<'_>,
        kind: SignupKind,
        federated: &FederatedUser,
        domain: Option<&Domain>,
        meta: &SignupMeta,
    ) -> Result<ResolvedUser, AuthError> {
        let existing = match tx
            .find_user_by_federated_id(mode.clone(), &federated.external_id)
            .await?
        {
            Some(user) => Some(user),
            // Legacy and imported accounts carry no federated id yet.
            None => tx.find_user_by_email(&federated.email).await?,
        };

        let Some(mut user) = existing else {
            return self.sign_up(tx, mode, kind, federated, domain, meta).await;
        };

        if user.is_local() {
            return Err(AuthError::LoginLocally);
        }

        let attempt_is_sso = mode == AuthMode::Sso;
        if user.federated_sso && !attempt_is_sso {
            return Err(AuthError::LoginUsingSso);
        }

        if let Some(stored_idp) = user.federated_idp.clone() {
            let same_idp = matches!(mode, AuthMode::Idp(id) if id == stored_idp);
            if attempt_is_sso || !same_idp {
                return Err(AuthError::LoginUsingIdp(stored_idp));
            }
        }

        if !user.federated_id.is_empty() && !same_external_id(&mode, &user.federated_id, &federated.external_id) {
            tracing::warn!(
                user_id = %user.id,
                stored_federated_id = %user.federated_id,
                presented_federated_id = %federated.external_id,
                "Federated id mismatch for existing account"
            );
            return Err(AuthError::EmailAlreadyExists);
        }

        self.verifier.user_can_authenticate(&user)?;

        if !user.email.eq_ignore_ascii_case(&federated.email) {
            if let Some(other) = tx.find_user_by_email(&federated.email).await? {
                if other.id != user.id {
                    return Err(AuthError::EmailAlreadyExists);
                }
            }
            user.email = federated.email.clone();
        }

        if let Some(name) = federated.display_name() {
            user.name = name.to_string();
        }
        user.bind_federation(mode, federated.external_id.clone());
        if let Some(url) = &federated.profile_url {
            user.website_url = url.clone();
        }
        user.last_login_at = Some(Utc::now());

        tx.update_user(&user).await?;
        Ok(ResolvedUser { user, created: false })
    }

    async fn sign_up(
        &self,
        tx: &mut dyn DirectoryTransaction,
        mode: AuthMode<'_>,
        kind: SignupKind,
        federated: &FederatedUser,
        domain: Option<&Domain>,
        meta: &SignupMeta,
    ) -> Result<ResolvedUser, AuthError> {
        if !self.signup.is_enabled(domain, kind).await? {
            return Err(AuthError::SignupsForbidden);
        }

        // The email is free: the fallback lookup above came back empty on
        // this same transaction.
        let mut user = User::new_federated(
            federated.email.clone(),
            federated.display_name().unwrap_or_default().to_string(),
            mode,
            federated.external_id.clone(),
        );
        user.website_url = federated.profile_url.clone().unwrap_or_default();
        user.signup_ip = meta.ip.clone();
        user.signup_country = meta.country.clone();
        user.signup_host = meta.host.clone();

        tx.create_user(&user).await?;
        tracing::info!(user_id = %user.id, host = %meta.host, "Federated user signed up");
        Ok(ResolvedUser { user, created: true })
    }
}

/// SSO ids are email addresses and compare without regard to case; IdP
/// subjects are opaque.
fn same_external_id(mode: &AuthMode<'_>, stored: &str, presented: &str) -> bool {
    match mode {
        AuthMode::Sso => stored.eq_ignore_ascii_case(presented),
        _ => stored == presented,
    }
}
