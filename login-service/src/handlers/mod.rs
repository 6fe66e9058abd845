pub mod metrics;
pub mod oauth;
mod page;

pub use oauth::AUTH_SESSION_COOKIE;
pub use page::SSO_RESULT_MESSAGE;
