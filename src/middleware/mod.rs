pub mod auth;
pub mod tenant;

pub use auth::AuthUser;
pub use tenant::{ClientIp, TENANT_HEADER};
