pub mod challenge;
pub mod health;
pub mod oauth;
pub mod signup;
pub mod token;
pub mod user;
pub mod verify;
