use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// An account within a tenant. Referenced by at least one identity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub role: String,
    pub user_metadata: Value,
    pub banned: bool,
    #[serde(skip_serializing, default)]
    pub confirmation_token: Option<String>,
    pub email_confirmed_at: Option<DateTime<Utc>>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }
}

/// One login method bound to a user. `(provider, identifier)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Identity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub identifier: String,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub provider_data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One link in a session's rotation chain. Only the SHA-256 digest of the
/// raw secret is ever stored.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub revoked: bool,
    pub parent_token: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A short-lived passwordless or link-based credential.
///
/// `code_hash` always holds a SHA-256 digest, whether the raw credential
/// was a short challenge code or a long link token.
#[derive(Debug, Clone, FromRow)]
pub struct OtpCode {
    pub id: Uuid,
    pub provider: String,
    pub identifier: String,
    pub code_hash: String,
    pub otp_type: String,
    pub attempts: i32,
    pub metadata: Value,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Kind tag for OTP/challenge rows and verify links. Signup confirmation
/// does not go through this table; its token lives on the user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpType {
    Recovery,
    Magiclink,
    Otp,
}

impl OtpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpType::Recovery => "recovery",
            OtpType::Magiclink => "magiclink",
            OtpType::Otp => "otp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recovery" => Some(OtpType::Recovery),
            "magiclink" => Some(OtpType::Magiclink),
            "otp" => Some(OtpType::Otp),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_type_round_trips() {
        for t in [OtpType::Recovery, OtpType::Magiclink, OtpType::Otp] {
            assert_eq!(OtpType::parse(t.as_str()), Some(t));
        }
        assert_eq!(OtpType::parse("signup"), None);
    }
}
