pub mod auth_session;
pub mod domain;
pub mod federated_user;
pub mod token;
pub mod user;

pub use auth_session::AuthSession;
pub use domain::{Domain, DomainRole, DomainUser};
pub use federated_user::{FederatedUser, VerifiedIdentity};
pub use token::{Token, TokenScope, ANONYMOUS_USER_ID};
pub use user::{AuthMode, User, UserResponse};
