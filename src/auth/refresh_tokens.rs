//! Refresh token ledger
//!
//! Opaque 256-bit tokens, stored only as SHA-256 digests. Redemption
//! revokes the presented token in the same statement that validates it,
//! so two concurrent redemptions of one token cannot both succeed.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

/// Outcome of a redemption attempt.
///
/// Callers collapse every non-valid arm into one generic error for the
/// client; the tag exists so logs can tell replay from expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    Valid { user_id: Uuid },
    Expired,
    Revoked,
    NotFound,
}

impl RedeemOutcome {
    /// Short label for log fields
    pub fn label(&self) -> &'static str {
        match self {
            RedeemOutcome::Valid { .. } => "valid",
            RedeemOutcome::Expired => "expired",
            RedeemOutcome::Revoked => "revoked",
            RedeemOutcome::NotFound => "not_found",
        }
    }
}

/// Ledger of issued refresh tokens
#[derive(Debug, Clone)]
pub struct RefreshTokenLedger {
    ttl: Duration,
}

impl RefreshTokenLedger {
    /// Create a ledger issuing tokens with the given lifetime
    pub fn new(ttl_days: i64) -> Self {
        Self {
            ttl: Duration::days(ttl_days),
        }
    }

    /// Issue a fresh token for a user
    ///
    /// Returns the plaintext token and its expiry; only the digest is
    /// persisted.
    pub async fn issue<'e>(
        &self,
        executor: impl PgExecutor<'e>,
        user_id: Uuid,
    ) -> Result<(String, DateTime<Utc>), sqlx::Error> {
        let token = generate_opaque_token();
        let expires_at = Utc::now() + self.ttl;

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_hash, user_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(expires_at)
        .execute(executor)
        .await?;

        Ok((token, expires_at))
    }

    /// Redeem a token, revoking it in the same statement that checks it.
    ///
    /// Runs inside the caller's rotation transaction; if anything later
    /// in that transaction fails, the revocation rolls back with it.
    pub async fn redeem(
        &self,
        conn: &mut PgConnection,
        token: &str,
    ) -> Result<RedeemOutcome, sqlx::Error> {
        let token_hash = hash_token(token);

        let redeemed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = NOW()
            WHERE token_hash = $1 AND revoked = FALSE AND expires_at > NOW()
            RETURNING user_id
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some((user_id,)) = redeemed {
            return Ok(RedeemOutcome::Valid { user_id });
        }

        // Classify the failure for observability
        let row: Option<(bool, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT revoked, expires_at FROM refresh_tokens WHERE token_hash = $1
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(match row {
            None => RedeemOutcome::NotFound,
            Some((_, expires_at)) if expires_at <= Utc::now() => RedeemOutcome::Expired,
            // A live row the update missed means a concurrent redemption
            // committed between the two statements.
            Some(_) => RedeemOutcome::Revoked,
        })
    }

    /// Revoke a single token; unknown or already-revoked tokens are a no-op
    pub async fn revoke<'e>(
        &self,
        executor: impl PgExecutor<'e>,
        token: &str,
    ) -> Result<bool, sqlx::Error> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = NOW()
            WHERE token_hash = $1 AND revoked = FALSE
            "#,
        )
        .bind(hash_token(token))
        .execute(executor)
        .await?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Revoke every live token belonging to a user
    pub async fn revoke_all_for_user<'e>(
        &self,
        executor: impl PgExecutor<'e>,
        user_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = NOW()
            WHERE user_id = $1 AND revoked = FALSE
            "#,
        )
        .bind(user_id)
        .execute(executor)
        .await?
        .rows_affected();

        Ok(rows_affected)
    }

    /// Delete tokens past their expiry
    pub async fn purge_expired<'e>(
        &self,
        executor: impl PgExecutor<'e>,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = sqlx::query(
            r#"
            DELETE FROM refresh_tokens WHERE expires_at < NOW()
            "#,
        )
        .execute(executor)
        .await?
        .rows_affected();

        Ok(rows_affected)
    }
}

/// Generate a cryptographically secure opaque token
fn generate_opaque_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
