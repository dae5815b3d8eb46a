//! Brute-force login protection
//!
//! Failure counters and lockout deadlines live on the users row, so the
//! state survives restarts and is shared by every instance. The
//! increment and the lock decision happen in one UPDATE; concurrent
//! failures cannot under-count past the threshold.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

/// Counter state after a recorded failure
#[derive(Debug, Clone)]
pub struct LockoutState {
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    /// True when this failure left the account locked
    pub fn is_locked(&self) -> bool {
        self.locked_until.map(|t| t > Utc::now()).unwrap_or(false)
    }
}

/// Per-account failed login tracking
#[derive(Debug, Clone)]
pub struct LoginGuard {
    threshold: i32,
    window: Duration,
}

impl LoginGuard {
    /// Create a guard locking accounts after `threshold` failures for
    /// `window_minutes`
    pub fn new(threshold: i32, window_minutes: i64) -> Self {
        Self {
            threshold,
            window: Duration::minutes(window_minutes),
        }
    }

    /// Minutes left on an active lock, rounded up; `None` when not locked.
    ///
    /// A lock that expired in the past is treated as absent; the stale
    /// deadline is cleared lazily on the next successful login.
    pub fn remaining_lockout_minutes(&self, locked_until: Option<DateTime<Utc>>) -> Option<i64> {
        let until = locked_until?;
        let remaining = until - Utc::now();
        if remaining <= Duration::zero() {
            return None;
        }
        Some(((remaining.num_seconds() + 59) / 60).max(1))
    }

    /// Record a failed attempt, locking the account when the threshold
    /// is reached
    ///
    /// The counter arithmetic runs inside the row update, so parallel
    /// failures serialize on the row lock and each one is counted.
    pub async fn record_failure<'e>(
        &self,
        executor: impl PgExecutor<'e>,
        user_id: Uuid,
    ) -> Result<LockoutState, sqlx::Error> {
        let lock_until = Utc::now() + self.window;

        let (failed_attempts, locked_until): (i32, Option<DateTime<Utc>>) = sqlx::query_as(
            r#"
            UPDATE users
            SET failed_login_attempts = failed_login_attempts + 1,
                locked_until = CASE
                    WHEN failed_login_attempts + 1 >= $2 THEN $3
                    ELSE locked_until
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING failed_login_attempts, locked_until
            "#,
        )
        .bind(user_id)
        .bind(self.threshold)
        .bind(lock_until)
        .fetch_one(executor)
        .await?;

        Ok(LockoutState {
            failed_attempts,
            locked_until,
        })
    }

    /// Clear the counter and any lock after a successful login
    pub async fn record_success<'e>(
        &self,
        executor: impl PgExecutor<'e>,
        user_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = 0, locked_until = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(executor)
        .await?;

        Ok(())
    }
}
