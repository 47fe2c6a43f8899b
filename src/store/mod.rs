//! Per-tenant SQL access for the `auth` namespace.
//!
//! Every multi-step mutation runs in one transaction; partial state is never
//! user-visible. Queries are runtime-bound so the crate builds without a
//! live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::database::models::{Identity, OtpCode, OtpType, RefreshToken, User};
use crate::error::AuthError;

const USER_COLUMNS: &str = "id, email, role, user_metadata, banned, confirmation_token, \
     email_confirmed_at, last_sign_in_at, created_at, updated_at";

const IDENTITY_COLUMNS: &str =
    "id, user_id, provider, identifier, password_hash, provider_data, created_at, updated_at";

const TOKEN_COLUMNS: &str =
    "id, user_id, token_hash, revoked, parent_token, expires_at, created_at";

const OTP_COLUMNS: &str =
    "id, provider, identifier, code_hash, otp_type, attempts, metadata, expires_at, created_at";

/// Parameters for a transactional user + identity insert.
pub struct NewAccount<'a> {
    pub email: &'a str,
    pub password_hash: Option<&'a str>,
    pub metadata: Value,
    pub provider: &'a str,
    pub identifier: &'a str,
    pub provider_data: Value,
    pub confirmation_token: Option<&'a str>,
    pub confirmed: bool,
}

/// Persistence port for the credential, session, and challenge lifecycle.
///
/// `AuthStore` is the Postgres implementation; the services only see this
/// trait, so the lifecycle state machines can also run against an
/// in-memory implementation under test.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn find_identity(
        &self,
        provider: &str,
        identifier: &str,
    ) -> Result<Option<Identity>, AuthError>;

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, AuthError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    /// Insert user and identity atomically. A concurrent insert of the same
    /// `(provider, identifier)` loses on the unique constraint and maps to
    /// `AlreadyExists`.
    async fn create_account(&self, account: NewAccount<'_>) -> Result<User, AuthError>;

    /// OAuth upsert: match by `(provider, identifier)` first, else attach a
    /// new identity to a user previously seen under the same email, else
    /// create a fresh account. Existing linkage is never downgraded.
    async fn upsert_external_identity(
        &self,
        provider: &str,
        identifier: &str,
        email: Option<&str>,
        provider_data: Value,
    ) -> Result<User, AuthError>;

    async fn update_last_sign_in(&self, user_id: Uuid) -> Result<(), AuthError>;

    async fn update_password(&self, user_id: Uuid, hash: &str) -> Result<(), AuthError>;

    async fn update_metadata(&self, user_id: Uuid, metadata: &Value) -> Result<(), AuthError>;

    /// Confirm an email via the signup token persisted on the user row.
    async fn confirm_email(&self, token: &str) -> Result<User, AuthError>;

    async fn insert_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken, AuthError>;

    /// Atomic rotation step: revoke the presented link and mint its
    /// successor. A presented link that is already revoked is a reuse
    /// event; the caller treats the chain as compromised.
    async fn rotate_refresh_token(
        &self,
        presented_hash: &str,
        successor_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken, AuthError>;

    async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, AuthError>;

    /// Insert a new challenge, superseding any prior code for the pair.
    async fn replace_otp(
        &self,
        provider: &str,
        identifier: &str,
        code_hash: &str,
        otp_type: OtpType,
        metadata: Value,
        expires_at: DateTime<Utc>,
    ) -> Result<OtpCode, AuthError>;

    async fn find_active_otp(
        &self,
        provider: &str,
        identifier: &str,
        otp_type: OtpType,
    ) -> Result<Option<OtpCode>, AuthError>;

    /// Lookup a magic-link/recovery row by its stored token digest.
    async fn find_otp_by_hash(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> Result<Option<OtpCode>, AuthError>;

    async fn increment_otp_attempts(&self, id: Uuid) -> Result<i32, AuthError>;

    async fn delete_otp(&self, id: Uuid) -> Result<(), AuthError>;
}

pub struct AuthStore {
    pool: PgPool,
}

impl AuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Platform-wide per-route traffic policies; feeds the in-process rule
    /// cache. Runs against the control database, not a tenant database.
    pub async fn load_rate_rules(&self) -> Result<Vec<crate::guard::rules::RateRule>, AuthError> {
        let rows: Vec<(Uuid, String, String, i32, i32, i64, Option<String>)> = sqlx::query_as(
            "SELECT id, route_pattern, method, steady_rate, burst_allowance, window_secs, custom_message \
             FROM platform.rate_rules",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, pattern, method, steady, burst, window, message)| {
                    crate::guard::rules::RateRule {
                        id,
                        pattern,
                        method,
                        steady_rate: steady.max(0) as u32,
                        burst_allowance: burst.max(0) as u32,
                        window_secs: window.max(1) as u64,
                        custom_message: message,
                    }
                },
            )
            .collect())
    }
}

#[async_trait]
impl AuthBackend for AuthStore {
    async fn find_identity(
        &self,
        provider: &str,
        identifier: &str,
    ) -> Result<Option<Identity>, AuthError> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM auth.identities WHERE provider = $1 AND identifier = $2"
        );
        let identity = sqlx::query_as::<_, Identity>(&sql)
            .bind(provider)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
        Ok(identity)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM auth.users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM auth.users WHERE email = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create_account(&self, account: NewAccount<'_>) -> Result<User, AuthError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO auth.users (id, email, role, user_metadata, banned, confirmation_token, email_confirmed_at) \
             VALUES ($1, $2, 'authenticated', $3, false, $4, $5) \
             RETURNING {USER_COLUMNS}"
        );
        let confirmed_at: Option<DateTime<Utc>> = account.confirmed.then(Utc::now);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(account.email)
            .bind(&account.metadata)
            .bind(account.confirmation_token)
            .bind(confirmed_at)
            .fetch_one(&mut *tx)
            .await?;

        let result = sqlx::query(
            "INSERT INTO auth.identities (id, user_id, provider, identifier, password_hash, provider_data) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(account.provider)
        .bind(account.identifier)
        .bind(account.password_hash)
        .bind(&account.provider_data)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            tx.rollback().await.ok();
            return Err(map_unique_violation(e));
        }

        tx.commit().await?;
        Ok(user)
    }

    async fn upsert_external_identity(
        &self,
        provider: &str,
        identifier: &str,
        email: Option<&str>,
        provider_data: Value,
    ) -> Result<User, AuthError> {
        if let Some(identity) = self.find_identity(provider, identifier).await? {
            sqlx::query("UPDATE auth.identities SET provider_data = $1, updated_at = now() WHERE id = $2")
                .bind(&provider_data)
                .bind(identity.id)
                .execute(&self.pool)
                .await?;
            return self
                .find_user(identity.user_id)
                .await?
                .ok_or(AuthError::InvalidCredentials);
        }

        if let Some(email) = email {
            if let Some(user) = self.find_user_by_email(email).await? {
                let insert = sqlx::query(
                    "INSERT INTO auth.identities (id, user_id, provider, identifier, provider_data) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(Uuid::new_v4())
                .bind(user.id)
                .bind(provider)
                .bind(identifier)
                .bind(&provider_data)
                .execute(&self.pool)
                .await;
                if let Err(e) = insert {
                    return Err(map_unique_violation(e));
                }
                return Ok(user);
            }
        }

        self.create_account(NewAccount {
            email: email.unwrap_or(identifier),
            password_hash: None,
            metadata: Value::Object(Default::default()),
            provider,
            identifier,
            provider_data,
            confirmation_token: None,
            // Provider-asserted identities are treated as confirmed.
            confirmed: true,
        })
        .await
    }

    async fn update_last_sign_in(&self, user_id: Uuid) -> Result<(), AuthError> {
        sqlx::query("UPDATE auth.users SET last_sign_in_at = now(), updated_at = now() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_password(&self, user_id: Uuid, hash: &str) -> Result<(), AuthError> {
        sqlx::query(
            "UPDATE auth.identities SET password_hash = $1, updated_at = now() \
             WHERE user_id = $2 AND provider = 'email'",
        )
        .bind(hash)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_metadata(&self, user_id: Uuid, metadata: &Value) -> Result<(), AuthError> {
        sqlx::query("UPDATE auth.users SET user_metadata = $1, updated_at = now() WHERE id = $2")
            .bind(metadata)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn confirm_email(&self, token: &str) -> Result<User, AuthError> {
        let sql = format!(
            "UPDATE auth.users \
             SET email_confirmed_at = now(), confirmation_token = NULL, updated_at = now() \
             WHERE confirmation_token = $1 AND email_confirmed_at IS NULL \
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)
    }

    // --- refresh tokens -------------------------------------------------

    async fn insert_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken, AuthError> {
        let sql = format!(
            "INSERT INTO auth.refresh_tokens (id, user_id, token_hash, revoked, expires_at) \
             VALUES ($1, $2, $3, false, $4) RETURNING {TOKEN_COLUMNS}"
        );
        let token = sqlx::query_as::<_, RefreshToken>(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(token_hash)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(token)
    }

    async fn rotate_refresh_token(
        &self,
        presented_hash: &str,
        successor_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken, AuthError> {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;

        let sql = format!(
            "SELECT {TOKEN_COLUMNS} FROM auth.refresh_tokens \
             WHERE token_hash = $1 AND expires_at > now() FOR UPDATE"
        );
        let current = sqlx::query_as::<_, RefreshToken>(&sql)
            .bind(presented_hash)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        if current.revoked {
            tx.rollback().await.ok();
            return Err(AuthError::TokenReused);
        }

        sqlx::query("UPDATE auth.refresh_tokens SET revoked = true WHERE id = $1")
            .bind(current.id)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            "INSERT INTO auth.refresh_tokens (id, user_id, token_hash, revoked, parent_token, expires_at) \
             VALUES ($1, $2, $3, false, $4, $5) RETURNING {TOKEN_COLUMNS}"
        );
        let successor = sqlx::query_as::<_, RefreshToken>(&sql)
            .bind(Uuid::new_v4())
            .bind(current.user_id)
            .bind(successor_hash)
            .bind(current.id)
            .bind(expires_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(successor)
    }

    async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let result =
            sqlx::query("UPDATE auth.refresh_tokens SET revoked = true WHERE user_id = $1 AND NOT revoked")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    // --- OTP / challenge codes ------------------------------------------

    async fn replace_otp(
        &self,
        provider: &str,
        identifier: &str,
        code_hash: &str,
        otp_type: OtpType,
        metadata: Value,
        expires_at: DateTime<Utc>,
    ) -> Result<OtpCode, AuthError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM auth.otp_codes WHERE provider = $1 AND identifier = $2 AND otp_type = $3",
        )
        .bind(provider)
        .bind(identifier)
        .bind(otp_type.as_str())
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "INSERT INTO auth.otp_codes (id, provider, identifier, code_hash, otp_type, attempts, metadata, expires_at) \
             VALUES ($1, $2, $3, $4, $5, 0, $6, $7) RETURNING {OTP_COLUMNS}"
        );
        let code = sqlx::query_as::<_, OtpCode>(&sql)
            .bind(Uuid::new_v4())
            .bind(provider)
            .bind(identifier)
            .bind(code_hash)
            .bind(otp_type.as_str())
            .bind(&metadata)
            .bind(expires_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(code)
    }

    async fn find_active_otp(
        &self,
        provider: &str,
        identifier: &str,
        otp_type: OtpType,
    ) -> Result<Option<OtpCode>, AuthError> {
        let sql = format!(
            "SELECT {OTP_COLUMNS} FROM auth.otp_codes \
             WHERE provider = $1 AND identifier = $2 AND otp_type = $3 AND expires_at > now()"
        );
        let code = sqlx::query_as::<_, OtpCode>(&sql)
            .bind(provider)
            .bind(identifier)
            .bind(otp_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(code)
    }

    async fn find_otp_by_hash(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> Result<Option<OtpCode>, AuthError> {
        let sql = format!(
            "SELECT {OTP_COLUMNS} FROM auth.otp_codes \
             WHERE code_hash = $1 AND otp_type = $2 AND expires_at > now()"
        );
        let code = sqlx::query_as::<_, OtpCode>(&sql)
            .bind(token_hash)
            .bind(otp_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(code)
    }

    async fn increment_otp_attempts(&self, id: Uuid) -> Result<i32, AuthError> {
        let (attempts,): (i32,) = sqlx::query_as(
            "UPDATE auth.otp_codes SET attempts = attempts + 1 WHERE id = $1 RETURNING attempts",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn delete_otp(&self, id: Uuid) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM auth.otp_codes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn map_unique_violation(e: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return AuthError::AlreadyExists;
        }
    }
    AuthError::Database(e)
}
