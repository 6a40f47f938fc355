pub mod auth;
pub mod rate_limit;

pub use auth::{AuthenticatedUser, require_admin, require_session_from_headers, validate_session};
pub use rate_limit::{enforce_rate_limit, rate_limit_key};
