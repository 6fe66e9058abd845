//! Profile asserted by an identity provider. Transient; never stored as-is.

use crate::models::DomainRole;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FederatedUser {
    pub external_id: String,
    pub email: String,
    pub name: String,
    /// Login/handle, used when the provider has no display name.
    pub nick_name: String,
    pub avatar_url: Option<String>,
    pub profile_url: Option<String>,
}

impl FederatedUser {
    /// Display name, falling back to the nickname.
    pub fn display_name(&self) -> Option<&str> {
        [self.name.trim(), self.nick_name.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
    }

    /// First required field that is missing, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.external_id.trim().is_empty() {
            Some("user ID")
        } else if self.email.trim().is_empty() {
            Some("email")
        } else if self.display_name().is_none() {
            Some("name")
        } else {
            None
        }
    }
}

/// Outcome of provider-specific verification: who the provider says this is,
/// plus a role when the provider is allowed to assert one (SSO only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user: FederatedUser,
    pub role: Option<DomainRole>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> FederatedUser {
        FederatedUser {
            external_id: "42".into(),
            email: "john@x.com".into(),
            name: "John".into(),
            nick_name: "johnny".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_display_name_fallback() {
        let mut user = profile();
        assert_eq!(user.display_name(), Some("John"));

        user.name = "  ".into();
        assert_eq!(user.display_name(), Some("johnny"));

        user.nick_name.clear();
        assert_eq!(user.display_name(), None);
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(profile().missing_field(), None);

        let mut user = profile();
        user.external_id.clear();
        assert_eq!(user.missing_field(), Some("user ID"));

        let mut user = profile();
        user.email.clear();
        assert_eq!(user.missing_field(), Some("email"));

        let mut user = profile();
        user.name.clear();
        user.nick_name.clear();
        assert_eq!(user.missing_field(), Some("name"));
    }
}
