pub mod credentials;
pub mod oauth;
pub mod otp;
pub mod outbound;
pub mod session;
