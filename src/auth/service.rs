//! Authentication service
//!
//! Core business logic for credential, session, and single-use token
//! flows. Every public operation runs under a timeout; multi-step
//! writes share a transaction, so an abandoned operation rolls back
//! instead of committing halfway.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::models::{
    AuthTokensResponse, PaginatedResponse, RegisterRequest, RegisterResponse,
    UpdateProfileRequest, User, UserResponse, UserRole,
};

use super::jwt::{issue_access_token, JwtError};
use super::login_guard::LoginGuard;
use super::password::{self, PasswordError};
use super::refresh_tokens::{RedeemOutcome, RefreshTokenLedger};

/// Auth service errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked for {retry_after_minutes} more minutes")]
    AccountLocked { retry_after_minutes: i64 },

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("Username already taken")]
    DuplicateUsername,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("User not found")]
    UserNotFound,

    #[error("Token error: {0}")]
    Token(String),

    #[error("Password hashing error: {0}")]
    Hash(String),

    #[error("Operation timed out")]
    Timeout,
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        AuthError::Database(e.to_string())
    }
}

impl From<JwtError> for AuthError {
    fn from(e: JwtError) -> Self {
        match e {
            JwtError::InvalidToken => AuthError::InvalidOrExpiredToken,
            other => AuthError::Token(other.to_string()),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(e: PasswordError) -> Self {
        AuthError::Hash(e.to_string())
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    db_pool: PgPool,
    jwt_secret: String,
    access_token_ttl_seconds: i64,
    reset_token_ttl: Duration,
    op_timeout: std::time::Duration,
    refresh_tokens: RefreshTokenLedger,
    login_guard: LoginGuard,
}

impl AuthService {
    /// Create a new AuthService from application configuration
    pub fn new(db_pool: PgPool, config: &Config) -> Self {
        Self {
            db_pool,
            jwt_secret: config.jwt_secret.clone(),
            access_token_ttl_seconds: config.access_token_ttl_seconds,
            reset_token_ttl: Duration::minutes(config.reset_token_ttl_minutes),
            op_timeout: std::time::Duration::from_secs(config.operation_timeout_seconds),
            refresh_tokens: RefreshTokenLedger::new(config.refresh_token_ttl_days),
            login_guard: LoginGuard::new(config.lockout_threshold, config.lockout_window_minutes),
        }
    }

    /// Register a new account
    ///
    /// No session is issued; the account starts unverified and the
    /// verification token is handed back for delivery.
    pub async fn register(&self, req: RegisterRequest) -> Result<RegisterResponse, AuthError> {
        self.bounded(async {
            let email_taken: Option<(Uuid,)> = sqlx::query_as(
                r#"
                SELECT id FROM users WHERE email = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(&req.email)
            .fetch_optional(&self.db_pool)
            .await?;

            if email_taken.is_some() {
                return Err(AuthError::DuplicateEmail);
            }

            let username_taken: Option<(Uuid,)> = sqlx::query_as(
                r#"
                SELECT id FROM users WHERE username = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(&req.username)
            .fetch_optional(&self.db_pool)
            .await?;

            if username_taken.is_some() {
                return Err(AuthError::DuplicateUsername);
            }

            let password_hash = password::hash_password(&req.password).await?;
            let verification_token = generate_single_use_token();

            let user_id = Uuid::new_v4();
            let now = Utc::now();

            // The partial unique indexes are the authority; a losing
            // racer surfaces here as a unique violation.
            sqlx::query(
                r#"
                INSERT INTO users (id, username, email, password_hash, role, email_verified,
                                   verification_token, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7, $8)
                "#,
            )
            .bind(user_id)
            .bind(&req.username)
            .bind(&req.email)
            .bind(&password_hash)
            .bind(UserRole::User)
            .bind(&verification_token)
            .bind(now)
            .bind(now)
            .execute(&self.db_pool)
            .await
            .map_err(map_unique_violation)?;

            tracing::info!(user_id = %user_id, "Account registered");

            let user = User {
                id: user_id,
                username: req.username,
                email: req.email,
                password_hash,
                role: UserRole::User,
                email_verified: false,
                verification_token: Some(verification_token.clone()),
                password_reset_token: None,
                password_reset_expires_at: None,
                failed_login_attempts: 0,
                locked_until: None,
                deleted_at: None,
                created_at: now,
                updated_at: now,
            };

            Ok(RegisterResponse {
                user: user.into(),
                verification_token,
            })
        })
        .await
    }

    /// Authenticate with email or username plus password, issuing a
    /// token pair on success
    pub async fn login(
        &self,
        identifier: &str,
        password_input: &str,
    ) -> Result<AuthTokensResponse, AuthError> {
        self.bounded(async {
            let user: Option<User> = sqlx::query_as(
                r#"
                SELECT id, username, email, password_hash, role, email_verified,
                       verification_token, password_reset_token, password_reset_expires_at,
                       failed_login_attempts, locked_until, deleted_at, created_at, updated_at
                FROM users
                WHERE (email = $1 OR username = $1) AND deleted_at IS NULL
                "#,
            )
            .bind(identifier)
            .fetch_optional(&self.db_pool)
            .await?;

            let user = match user {
                Some(user) => user,
                None => {
                    // Burn a hash verification so an unknown identifier
                    // takes as long as a wrong password.
                    password::verify_against_dummy(password_input).await;
                    return Err(AuthError::InvalidCredentials);
                }
            };

            // A locked account rejects even correct credentials.
            if let Some(minutes) = self
                .login_guard
                .remaining_lockout_minutes(user.locked_until)
            {
                return Err(AuthError::AccountLocked {
                    retry_after_minutes: minutes,
                });
            }

            if !password::verify_password(password_input, &user.password_hash).await {
                let state = self.login_guard.record_failure(&self.db_pool, user.id).await?;
                if state.is_locked() {
                    tracing::warn!(
                        user_id = %user.id,
                        attempts = state.failed_attempts,
                        "Account locked after repeated failed logins"
                    );
                }
                return Err(AuthError::InvalidCredentials);
            }

            if user.failed_login_attempts > 0 || user.locked_until.is_some() {
                self.login_guard.record_success(&self.db_pool, user.id).await?;
            }

            self.issue_session(user).await
        })
        .await
    }

    /// Rotate a refresh token: revoke the presented token and issue a
    /// replacement pair in one transaction
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthTokensResponse, AuthError> {
        self.bounded(async {
            let mut tx = self.db_pool.begin().await?;

            let outcome = self.refresh_tokens.redeem(&mut tx, refresh_token).await?;
            let user_id = match outcome {
                RedeemOutcome::Valid { user_id } => user_id,
                other => {
                    tx.rollback().await?;
                    if other == RedeemOutcome::Revoked {
                        tracing::warn!(outcome = other.label(), "Refresh token replay rejected");
                    } else {
                        tracing::debug!(outcome = other.label(), "Refresh token rejected");
                    }
                    return Err(AuthError::InvalidOrExpiredToken);
                }
            };

            let user: Option<User> = sqlx::query_as(
                r#"
                SELECT id, username, email, password_hash, role, email_verified,
                       verification_token, password_reset_token, password_reset_expires_at,
                       failed_login_attempts, locked_until, deleted_at, created_at, updated_at
                FROM users
                WHERE id = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

            let user = match user {
                Some(user) => user,
                None => {
                    // Account deleted since the token was issued
                    tx.rollback().await?;
                    return Err(AuthError::InvalidOrExpiredToken);
                }
            };

            let (new_refresh_token, _) = self.refresh_tokens.issue(&mut *tx, user.id).await?;
            let (access_token, _) =
                issue_access_token(&user, &self.jwt_secret, self.access_token_ttl_seconds)?;

            tx.commit().await?;

            Ok(AuthTokensResponse {
                access_token,
                refresh_token: new_refresh_token,
                token_type: "Bearer".to_string(),
                expires_in: self.access_token_ttl_seconds,
                user: user.into(),
            })
        })
        .await
    }

    /// Revoke a refresh token (logout)
    ///
    /// Unknown or already-revoked tokens succeed silently; logout never
    /// confirms whether a token was live.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        self.bounded(async {
            let revoked = self.refresh_tokens.revoke(&self.db_pool, refresh_token).await?;
            if !revoked {
                tracing::debug!("Logout with unknown or already-revoked token");
            }
            Ok(())
        })
        .await
    }

    /// Consume a verification token and mark the account verified
    pub async fn verify_email(&self, token: &str) -> Result<(), AuthError> {
        self.bounded(async {
            let rows_affected = sqlx::query(
                r#"
                UPDATE users
                SET email_verified = TRUE, verification_token = NULL, updated_at = NOW()
                WHERE verification_token = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(token)
            .execute(&self.db_pool)
            .await?
            .rows_affected();

            if rows_affected == 0 {
                return Err(AuthError::InvalidOrExpiredToken);
            }

            Ok(())
        })
        .await
    }

    /// Start a password reset
    ///
    /// Succeeds whether or not the email matches an account; only a
    /// matching account gets a token stored.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        self.bounded(async {
            let user: Option<(Uuid,)> = sqlx::query_as(
                r#"
                SELECT id FROM users WHERE email = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(email)
            .fetch_optional(&self.db_pool)
            .await?;

            match user {
                Some((user_id,)) => {
                    let token = generate_single_use_token();
                    let expires_at = Utc::now() + self.reset_token_ttl;

                    sqlx::query(
                        r#"
                        UPDATE users
                        SET password_reset_token = $1, password_reset_expires_at = $2,
                            updated_at = NOW()
                        WHERE id = $3
                        "#,
                    )
                    .bind(&token)
                    .bind(expires_at)
                    .bind(user_id)
                    .execute(&self.db_pool)
                    .await?;

                    tracing::info!(user_id = %user_id, "Password reset token issued");
                }
                None => {
                    tracing::debug!("Password reset requested for unknown email");
                }
            }

            Ok(())
        })
        .await
    }

    /// Complete a password reset and revoke every live session
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.bounded(async {
            // Fail fast before paying for a hash; the conditional update
            // below remains the authoritative single-use check.
            let candidate: Option<(Uuid,)> = sqlx::query_as(
                r#"
                SELECT id FROM users
                WHERE password_reset_token = $1
                  AND password_reset_expires_at > NOW()
                  AND deleted_at IS NULL
                "#,
            )
            .bind(token)
            .fetch_optional(&self.db_pool)
            .await?;

            if candidate.is_none() {
                return Err(AuthError::InvalidOrExpiredToken);
            }

            let password_hash = password::hash_password(new_password).await?;

            let mut tx = self.db_pool.begin().await?;

            let updated: Option<(Uuid,)> = sqlx::query_as(
                r#"
                UPDATE users
                SET password_hash = $1, password_reset_token = NULL,
                    password_reset_expires_at = NULL,
                    failed_login_attempts = 0, locked_until = NULL,
                    updated_at = NOW()
                WHERE password_reset_token = $2
                  AND password_reset_expires_at > NOW()
                  AND deleted_at IS NULL
                RETURNING id
                "#,
            )
            .bind(&password_hash)
            .bind(token)
            .fetch_optional(&mut *tx)
            .await?;

            let user_id = match updated {
                Some((user_id,)) => user_id,
                None => {
                    tx.rollback().await?;
                    return Err(AuthError::InvalidOrExpiredToken);
                }
            };

            let revoked = self
                .refresh_tokens
                .revoke_all_for_user(&mut *tx, user_id)
                .await?;

            tx.commit().await?;

            tracing::info!(
                user_id = %user_id,
                revoked_sessions = revoked,
                "Password reset completed"
            );

            Ok(())
        })
        .await
    }

    /// Change the password of an authenticated account and revoke every
    /// live session
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.bounded(async {
            let user = self.fetch_user(user_id).await?;

            if !password::verify_password(current_password, &user.password_hash).await {
                return Err(AuthError::InvalidCredentials);
            }

            let password_hash = password::hash_password(new_password).await?;

            let mut tx = self.db_pool.begin().await?;

            sqlx::query(
                r#"
                UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2
                "#,
            )
            .bind(&password_hash)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

            let revoked = self
                .refresh_tokens
                .revoke_all_for_user(&mut *tx, user_id)
                .await?;

            tx.commit().await?;

            tracing::info!(
                user_id = %user_id,
                revoked_sessions = revoked,
                "Password changed"
            );

            Ok(())
        })
        .await
    }

    /// Get a user by ID
    pub async fn get_user_by_id(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.bounded(self.fetch_user(user_id)).await
    }

    /// Update profile fields; absent fields are left unchanged
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        req: UpdateProfileRequest,
    ) -> Result<User, AuthError> {
        self.bounded(async {
            let user: Option<User> = sqlx::query_as(
                r#"
                UPDATE users
                SET username = COALESCE($2, username),
                    email = COALESCE($3, email),
                    updated_at = NOW()
                WHERE id = $1 AND deleted_at IS NULL
                RETURNING id, username, email, password_hash, role, email_verified,
                          verification_token, password_reset_token, password_reset_expires_at,
                          failed_login_attempts, locked_until, deleted_at, created_at, updated_at
                "#,
            )
            .bind(user_id)
            .bind(&req.username)
            .bind(&req.email)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(map_unique_violation)?;

            user.ok_or(AuthError::UserNotFound)
        })
        .await
    }

    /// Soft-delete an account and revoke every live session
    ///
    /// The row is kept with `deleted_at` set; the partial unique
    /// indexes free the email and username for re-registration.
    pub async fn soft_delete_account(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.bounded(async {
            let mut tx = self.db_pool.begin().await?;

            let rows_affected = sqlx::query(
                r#"
                UPDATE users
                SET deleted_at = NOW(), updated_at = NOW()
                WHERE id = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if rows_affected == 0 {
                tx.rollback().await?;
                return Err(AuthError::UserNotFound);
            }

            let revoked = self
                .refresh_tokens
                .revoke_all_for_user(&mut *tx, user_id)
                .await?;

            tx.commit().await?;

            tracing::info!(
                user_id = %user_id,
                revoked_sessions = revoked,
                "Account deactivated"
            );

            Ok(())
        })
        .await
    }

    /// Search live accounts by username or email fragment, optionally
    /// filtered by role
    pub async fn search_users(
        &self,
        filter: Option<&str>,
        role: Option<UserRole>,
        page: i32,
        limit: i32,
    ) -> Result<PaginatedResponse<UserResponse>, AuthError> {
        self.bounded(async {
            let page = page.max(1);
            let limit = limit.clamp(1, 100);
            let offset = i64::from(page - 1) * i64::from(limit);
            let pattern = filter.map(|s| format!("%{}%", s));

            let users: Vec<User> = sqlx::query_as(
                r#"
                SELECT id, username, email, password_hash, role, email_verified,
                       verification_token, password_reset_token, password_reset_expires_at,
                       failed_login_attempts, locked_until, deleted_at, created_at, updated_at
                FROM users
                WHERE deleted_at IS NULL
                  AND ($1::text IS NULL OR username ILIKE $1 OR email ILIKE $1)
                  AND ($2::user_role IS NULL OR role = $2)
                ORDER BY created_at DESC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(&pattern)
            .bind(role)
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(&self.db_pool)
            .await?;

            let total: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM users
                WHERE deleted_at IS NULL
                  AND ($1::text IS NULL OR username ILIKE $1 OR email ILIKE $1)
                  AND ($2::user_role IS NULL OR role = $2)
                "#,
            )
            .bind(&pattern)
            .bind(role)
            .fetch_one(&self.db_pool)
            .await?;

            Ok(PaginatedResponse {
                data: users.into_iter().map(Into::into).collect(),
                total,
                page,
                limit,
            })
        })
        .await
    }

    /// Delete expired refresh tokens; called by the background purge task
    pub async fn purge_expired_tokens(&self) -> Result<u64, AuthError> {
        let purged = self.refresh_tokens.purge_expired(&self.db_pool).await?;
        Ok(purged)
    }

    /// Get JWT secret (for middleware access)
    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }

    /// Issue an access/refresh pair for an authenticated user
    async fn issue_session(&self, user: User) -> Result<AuthTokensResponse, AuthError> {
        let (access_token, _) =
            issue_access_token(&user, &self.jwt_secret, self.access_token_ttl_seconds)?;
        let (refresh_token, _) = self.refresh_tokens.issue(&self.db_pool, user.id).await?;

        Ok(AuthTokensResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_ttl_seconds,
            user: user.into(),
        })
    }

    /// Fetch a live user row
    async fn fetch_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        let user: Option<User> = sqlx::query_as(
            r#"
            SELECT id, username, email, password_hash, role, email_verified,
                   verification_token, password_reset_token, password_reset_expires_at,
                   failed_login_attempts, locked_until, deleted_at, created_at, updated_at
            FROM users
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?;

        user.ok_or(AuthError::UserNotFound)
    }

    /// Run an operation under the configured time budget.
    ///
    /// A timed-out operation is dropped mid-flight; any open transaction
    /// rolls back with it, so no partial state is ever committed.
    async fn bounded<T, F>(&self, op: F) -> Result<T, AuthError>
    where
        F: std::future::Future<Output = Result<T, AuthError>>,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout),
        }
    }
}

/// Generate a single-use token for email verification or password reset
fn generate_single_use_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

/// Map a unique index violation to the matching duplicate error
fn map_unique_violation(e: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23505") {
            return match db_err.constraint() {
                Some("users_username_live_idx") => AuthError::DuplicateUsername,
                _ => AuthError::DuplicateEmail,
            };
        }
    }
    AuthError::Database(e.to_string())
}
