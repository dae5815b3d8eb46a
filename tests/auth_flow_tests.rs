//! End-to-end auth flow tests against a real database
//!
//! Covers the security-critical state machines: lockout, refresh token
//! rotation, and the single-use verification and reset tokens.

#[cfg(test)]
mod tests {
    use sqlx::PgPool;
    use uuid::Uuid;
    use validator::Validate;

    use localai_server::auth::{AuthError, AuthService};
    use localai_server::config::{Config, Environment};
    use localai_server::models::RegisterRequest;

    /// Helper to create a test database pool
    async fn setup_test_db() -> PgPool {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/localai_test".to_string());

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&database_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    fn test_config(database_url: &str) -> Config {
        Config {
            database_url: database_url.to_string(),
            environment: Environment::Development,
            port: 0,
            db_max_connections: 2,
            auth_rate_limit_rps: 1000,
            cors_allowed_origins: None,
            log_level: "error".to_string(),
            jwt_secret: "auth-flow-test-secret".to_string(),
            access_token_ttl_seconds: 900,
            refresh_token_ttl_days: 7,
            lockout_threshold: 5,
            lockout_window_minutes: 15,
            reset_token_ttl_minutes: 60,
            operation_timeout_seconds: 30,
        }
    }

    async fn setup_service() -> (AuthService, PgPool) {
        let pool = setup_test_db().await;
        let config = test_config("postgresql://localhost/localai_test");
        (AuthService::new(pool.clone(), &config), pool)
    }

    /// Unique credentials per test run so tests can share one database
    fn unique_account() -> (String, String) {
        let suffix = Uuid::new_v4().simple().to_string();
        let username = format!("u_{}", &suffix[..10]);
        let email = format!("{}@example.com", &suffix[..12]);
        (username, email)
    }

    fn register_request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    const PASSWORD: &str = "Str0ng!pass";

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_register_verify_login_flow() {
        let (service, pool) = setup_service().await;
        let (username, email) = unique_account();

        let registered = service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .expect("registration should succeed");

        assert_eq!(registered.user.email, email);
        assert!(!registered.user.email_verified);
        assert!(!registered.verification_token.is_empty());

        // Verify the email with the issued token
        service
            .verify_email(&registered.verification_token)
            .await
            .expect("verification should succeed");

        let (verified,): (bool,) =
            sqlx::query_as("SELECT email_verified FROM users WHERE id = $1")
                .bind(registered.user.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(verified);

        // Log in with the email
        let tokens = service.login(&email, PASSWORD).await.expect("login");
        assert!(!tokens.access_token.is_empty());
        assert!(!tokens.refresh_token.is_empty());
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.user.id, registered.user.id);

        // And with the username
        let tokens = service.login(&username, PASSWORD).await.expect("login");
        assert_eq!(tokens.user.id, registered.user.id);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_verification_token_is_single_use() {
        let (service, _pool) = setup_service().await;
        let (username, email) = unique_account();

        let registered = service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .unwrap();

        service
            .verify_email(&registered.verification_token)
            .await
            .unwrap();

        // Second redemption must fail; the token was cleared on first use
        let replay = service.verify_email(&registered.verification_token).await;
        assert!(matches!(replay, Err(AuthError::InvalidOrExpiredToken)));
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_duplicate_email_rejected() {
        let (service, _pool) = setup_service().await;
        let (username, email) = unique_account();

        service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .unwrap();

        let (other_username, _) = unique_account();
        let result = service
            .register(register_request(&other_username, &email, PASSWORD))
            .await;
        assert!(matches!(result, Err(AuthError::DuplicateEmail)));
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_unknown_identifier_and_wrong_password_look_alike() {
        let (service, _pool) = setup_service().await;
        let (username, email) = unique_account();

        service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .unwrap();

        let unknown = service.login("nobody@example.com", PASSWORD).await;
        let wrong = service.login(&email, "Wr0ng!pass").await;

        assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_lockout_after_repeated_failures() {
        let (service, _pool) = setup_service().await;
        let (username, email) = unique_account();

        service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .unwrap();

        // Five wrong passwords lock the account
        for _ in 0..5 {
            let result = service.login(&email, "Wr0ng!pass").await;
            assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        }

        // The sixth attempt is rejected as locked even with the correct
        // password
        let locked = service.login(&email, PASSWORD).await;
        match locked {
            Err(AuthError::AccountLocked { retry_after_minutes }) => {
                assert!(retry_after_minutes >= 1);
                assert!(retry_after_minutes <= 15);
            }
            other => panic!("expected AccountLocked, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_successful_login_resets_failure_counter() {
        let (service, pool) = setup_service().await;
        let (username, email) = unique_account();

        let registered = service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .unwrap();

        // A few failures, but below the threshold
        for _ in 0..3 {
            let _ = service.login(&email, "Wr0ng!pass").await;
        }

        let (attempts,): (i32,) =
            sqlx::query_as("SELECT failed_login_attempts FROM users WHERE id = $1")
                .bind(registered.user.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(attempts, 3);

        service.login(&email, PASSWORD).await.unwrap();

        let (attempts,): (i32,) =
            sqlx::query_as("SELECT failed_login_attempts FROM users WHERE id = $1")
                .bind(registered.user.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(attempts, 0);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_refresh_rotation_rejects_replay() {
        let (service, _pool) = setup_service().await;
        let (username, email) = unique_account();

        service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .unwrap();

        let first = service.login(&email, PASSWORD).await.unwrap();

        // First redemption succeeds and hands back a different token
        let second = service.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        // Replaying the consumed token fails and issues nothing
        let replay = service.refresh(&first.refresh_token).await;
        assert!(matches!(replay, Err(AuthError::InvalidOrExpiredToken)));

        // The rotated-in token is still live
        let third = service.refresh(&second.refresh_token).await.unwrap();
        assert_ne!(third.refresh_token, second.refresh_token);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_logout_revokes_refresh_token() {
        let (service, _pool) = setup_service().await;
        let (username, email) = unique_account();

        service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .unwrap();

        let tokens = service.login(&email, PASSWORD).await.unwrap();

        service.logout(&tokens.refresh_token).await.unwrap();

        let after = service.refresh(&tokens.refresh_token).await;
        assert!(matches!(after, Err(AuthError::InvalidOrExpiredToken)));

        // Logging out an unknown token is still a success
        service.logout("never-issued-token").await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_password_reset_revokes_all_sessions() {
        let (service, pool) = setup_service().await;
        let (username, email) = unique_account();

        service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .unwrap();

        // Two live sessions
        let session_a = service.login(&email, PASSWORD).await.unwrap();
        let session_b = service.login(&email, PASSWORD).await.unwrap();

        service.forgot_password(&email).await.unwrap();

        let (reset_token,): (Option<String>,) =
            sqlx::query_as("SELECT password_reset_token FROM users WHERE email = $1")
                .bind(&email)
                .fetch_one(&pool)
                .await
                .unwrap();
        let reset_token = reset_token.expect("reset token should be stored");

        let new_password = "N3w!password";
        service
            .reset_password(&reset_token, new_password)
            .await
            .unwrap();

        // Every previously issued refresh token is now dead
        let a = service.refresh(&session_a.refresh_token).await;
        let b = service.refresh(&session_b.refresh_token).await;
        assert!(matches!(a, Err(AuthError::InvalidOrExpiredToken)));
        assert!(matches!(b, Err(AuthError::InvalidOrExpiredToken)));

        // Old password no longer works, new one does
        let old = service.login(&email, PASSWORD).await;
        assert!(matches!(old, Err(AuthError::InvalidCredentials)));
        service.login(&email, new_password).await.unwrap();

        // The reset token was consumed
        let replay = service.reset_password(&reset_token, "An0ther!pass").await;
        assert!(matches!(replay, Err(AuthError::InvalidOrExpiredToken)));
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_reset_clears_lockout() {
        let (service, pool) = setup_service().await;
        let (username, email) = unique_account();

        service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .unwrap();

        // Lock the account
        for _ in 0..5 {
            let _ = service.login(&email, "Wr0ng!pass").await;
        }
        assert!(matches!(
            service.login(&email, PASSWORD).await,
            Err(AuthError::AccountLocked { .. })
        ));

        // Complete a password reset
        service.forgot_password(&email).await.unwrap();
        let (reset_token,): (Option<String>,) =
            sqlx::query_as("SELECT password_reset_token FROM users WHERE email = $1")
                .bind(&email)
                .fetch_one(&pool)
                .await
                .unwrap();
        service
            .reset_password(&reset_token.unwrap(), "N3w!password")
            .await
            .unwrap();

        // The lock and counter were cleared along with the password
        service.login(&email, "N3w!password").await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_forgot_password_hides_account_existence() {
        let (service, _pool) = setup_service().await;
        let (username, email) = unique_account();

        service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .unwrap();

        // Both calls succeed identically; only the stored state differs
        service.forgot_password(&email).await.unwrap();
        service
            .forgot_password("no-such-account@example.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_soft_delete_frees_email_and_kills_sessions() {
        let (service, _pool) = setup_service().await;
        let (username, email) = unique_account();

        let registered = service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .unwrap();

        let tokens = service.login(&email, PASSWORD).await.unwrap();

        service.soft_delete_account(registered.user.id).await.unwrap();

        // The deleted account cannot log in or refresh
        let login = service.login(&email, PASSWORD).await;
        assert!(matches!(login, Err(AuthError::InvalidCredentials)));
        let refresh = service.refresh(&tokens.refresh_token).await;
        assert!(matches!(refresh, Err(AuthError::InvalidOrExpiredToken)));

        // The email and username are free for a new registration
        service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .expect("re-registration after soft delete should succeed");
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_change_password_requires_current() {
        let (service, _pool) = setup_service().await;
        let (username, email) = unique_account();

        let registered = service
            .register(register_request(&username, &email, PASSWORD))
            .await
            .unwrap();

        let tokens = service.login(&email, PASSWORD).await.unwrap();

        let wrong = service
            .change_password(registered.user.id, "Wr0ng!pass", "N3w!password")
            .await;
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));

        service
            .change_password(registered.user.id, PASSWORD, "N3w!password")
            .await
            .unwrap();

        // Sessions from before the change are revoked
        let refresh = service.refresh(&tokens.refresh_token).await;
        assert!(matches!(refresh, Err(AuthError::InvalidOrExpiredToken)));

        service.login(&email, "N3w!password").await.unwrap();
    }

    #[tokio::test]
    async fn test_register_request_validation() {
        let mut request = register_request("valid_name", "a@example.com", PASSWORD);
        assert!(request.validate().is_ok());

        // Weak password
        request.password = "weak".to_string();
        assert!(request.validate().is_err());

        // Reset password, break the username
        request.password = PASSWORD.to_string();
        request.username = "x".to_string();
        assert!(request.validate().is_err());
    }
}
