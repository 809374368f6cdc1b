use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use crate::auth::clock::Clock;
use crate::auth::dto::{LoginRequest, RegisterRequest, TokenPair};
use crate::auth::jwt::JwtKeys;
use crate::auth::password;
use crate::auth::store::{Role, StoreError, User, UserStore};
use crate::error::ApiError;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::EmailTaken => ApiError::conflict("Email already registered."),
            StoreError::UnknownUser => ApiError::not_found("User not found."),
            StoreError::Backend(e) => ApiError::Internal(e),
        }
    }
}

/// Orchestrates registration, login and refresh over an injected user store
/// and clock. Each operation performs exactly one user write on success and
/// none on failure.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
    keys: JwtKeys,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, clock: Arc<dyn Clock>, keys: JwtKeys) -> Self {
        Self { users, clock, keys }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<TokenPair, ApiError> {
        if req.email.trim().is_empty()
            || req.password.trim().is_empty()
            || req.role.trim().is_empty()
        {
            return Err(ApiError::invalid_input("All fields are required."));
        }

        if self.users.find_by_email(&req.email).await?.is_some() {
            warn!(email = %req.email, "email already registered");
            return Err(ApiError::conflict("Email already registered."));
        }

        if !is_valid_email(&req.email) {
            return Err(ApiError::invalid_input("Invalid email format."));
        }

        let role: Role = req
            .role
            .parse()
            .map_err(|_| ApiError::invalid_input("Invalid role"))?;

        let hash = password::hash_password(&req.password)?;
        let mut user = User::new(req.email, hash, role);

        let now = self.clock.now();
        let access_token = self.keys.sign_access(&user, now)?;
        let refresh = self.keys.issue_refresh(now);
        user.refresh_token = Some(refresh.token.clone());
        user.refresh_token_expires_at = Some(refresh.expires_at);

        self.users.insert(&user).await?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(TokenPair {
            access_token,
            refresh_token: refresh.token,
        })
    }

    pub async fn login(&self, req: LoginRequest) -> Result<TokenPair, ApiError> {
        let mut user = match self.users.find_by_email(&req.email).await? {
            Some(user) => user,
            None => {
                // Keep the miss path as slow as a mismatch so responses do
                // not reveal whether the email exists.
                password::verify_dummy(&req.password);
                warn!(email = %req.email, "login unknown email");
                return Err(ApiError::forbidden("Invalid email or password."));
            }
        };

        if !password::verify_password(&req.password, &user.password_hash)? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(ApiError::forbidden("Invalid email or password."));
        }

        let now = self.clock.now();
        let access_token = self.keys.sign_access(&user, now)?;
        let refresh = self.keys.issue_refresh(now);
        user.refresh_token = Some(refresh.token.clone());
        user.refresh_token_expires_at = Some(refresh.expires_at);

        self.users.update(&user).await?;

        info!(user_id = %user.id, "user logged in");
        Ok(TokenPair {
            access_token,
            refresh_token: refresh.token,
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let now = self.clock.now();
        let mut user = match self.users.find_by_refresh_token(refresh_token).await? {
            // A token is live only strictly before its expiry.
            Some(user) if user.refresh_token_expires_at.is_some_and(|exp| exp > now) => user,
            _ => {
                warn!("refresh token unknown or expired");
                return Err(ApiError::invalid_input("Refresh Token is invalid."));
            }
        };

        let access_token = self.keys.sign_access(&user, now)?;
        let refresh = self.keys.issue_refresh(now);
        user.refresh_token = Some(refresh.token.clone());
        user.refresh_token_expires_at = Some(refresh.expires_at);

        self.users.update(&user).await?;

        info!(user_id = %user.id, "refresh token rotated");
        Ok(TokenPair {
            access_token,
            refresh_token: refresh.token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::test_clock::ManualClock;
    use crate::auth::store::memory::InMemoryUserStore;
    use crate::config::JwtConfig;
    use time::{Duration, OffsetDateTime};

    fn test_keys() -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            access_ttl_minutes: 120,
            refresh_ttl_days: 7,
        })
    }

    fn setup() -> (AuthService, Arc<InMemoryUserStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryUserStore::new());
        let clock = Arc::new(ManualClock::starting_at(OffsetDateTime::now_utc()));
        let service = AuthService::new(store.clone(), clock.clone(), test_keys());
        (service, store, clock)
    }

    fn register_req(email: &str, password: &str, role: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: password.into(),
            role: role.into(),
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    fn assert_invalid_input(err: ApiError, message: &str) {
        match err {
            ApiError::InvalidInput(m) => assert_eq!(m, message),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_rejects_blank_fields_without_creating_a_user() {
        let (service, store, _) = setup();
        for req in [
            register_req("", "pw", "Author"),
            register_req("a@b.com", "", "Author"),
            register_req("a@b.com", "pw", ""),
            register_req("   ", "pw", "Author"),
        ] {
            let err = service.register(req).await.unwrap_err();
            assert_invalid_input(err, "All fields are required.");
        }
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn register_rejects_invalid_email_format() {
        let (service, store, _) = setup();
        let err = service
            .register(register_req("not-an-email", "pw", "Author"))
            .await
            .unwrap_err();
        assert_invalid_input(err, "Invalid email format.");
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn register_rejects_unknown_role() {
        let (service, store, _) = setup();
        let err = service
            .register(register_req("a@b.com", "pw", "Admin"))
            .await
            .unwrap_err();
        assert_invalid_input(err, "Invalid role");
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn register_enforces_email_uniqueness() {
        let (service, store, _) = setup();
        service
            .register(register_req("a@b.com", "pw", "Author"))
            .await
            .expect("first register");
        let err = service
            .register(register_req("a@b.com", "other", "Reader"))
            .await
            .unwrap_err();
        match err {
            ApiError::Conflict(m) => assert_eq!(m, "Email already registered."),
            other => panic!("expected Conflict, got {other:?}"),
        }
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn register_returns_verifiable_tokens_and_persists_refresh_state() {
        let (service, store, clock) = setup();
        let pair = service
            .register(register_req("a@b.com", "pw", "Author"))
            .await
            .expect("register");

        let claims = test_keys().verify(&pair.access_token).expect("verify");
        assert_eq!(claims.email, "a@b.com");
        assert_eq!(claims.role, Role::Author);

        let user = store
            .find_by_email("a@b.com")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(claims.sub, user.id);
        assert_eq!(user.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));
        assert_eq!(
            user.refresh_token_expires_at,
            Some(clock.now() + Duration::days(7))
        );
        assert_ne!(user.password_hash, "pw");
    }

    #[tokio::test]
    async fn login_succeeds_with_correct_credentials_and_rotates_refresh() {
        let (service, store, _) = setup();
        let first = service
            .register(register_req("a@b.com", "pw", "Reader"))
            .await
            .expect("register");

        let second = service.login(login_req("a@b.com", "pw")).await.expect("login");
        assert_ne!(second.refresh_token, first.refresh_token);

        let user = store
            .find_by_email("a@b.com")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(
            user.refresh_token.as_deref(),
            Some(second.refresh_token.as_str())
        );
    }

    #[tokio::test]
    async fn login_fails_identically_for_unknown_email_and_wrong_password() {
        let (service, _, _) = setup();
        service
            .register(register_req("a@b.com", "pw", "Reader"))
            .await
            .expect("register");

        for req in [login_req("a@b.com", "wrong"), login_req("x@y.com", "pw")] {
            match service.login(req).await.unwrap_err() {
                ApiError::Forbidden(m) => assert_eq!(m, "Invalid email or password."),
                other => panic!("expected Forbidden, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn refresh_rotates_and_supersedes_the_old_token() {
        let (service, _, _) = setup();
        service
            .register(register_req("a@b.com", "pw", "Author"))
            .await
            .expect("register");
        let login = service.login(login_req("a@b.com", "pw")).await.expect("login");

        let rotated = service
            .refresh(&login.refresh_token)
            .await
            .expect("refresh");
        assert_ne!(rotated.refresh_token, login.refresh_token);

        // The superseded token must no longer be exchangeable.
        let err = service.refresh(&login.refresh_token).await.unwrap_err();
        assert_invalid_input(err, "Refresh Token is invalid.");

        service
            .refresh(&rotated.refresh_token)
            .await
            .expect("latest token still valid");
    }

    #[tokio::test]
    async fn refresh_rejects_unknown_token() {
        let (service, _, _) = setup();
        let err = service.refresh("no-such-token").await.unwrap_err();
        assert_invalid_input(err, "Refresh Token is invalid.");
    }

    #[tokio::test]
    async fn refresh_expiry_boundary_is_strict() {
        let (service, _, clock) = setup();
        let pair = service
            .register(register_req("a@b.com", "pw", "Reader"))
            .await
            .expect("register");

        // One second short of expiry: still valid.
        clock.advance(Duration::days(7) - Duration::seconds(1));
        let rotated = service.refresh(&pair.refresh_token).await.expect("refresh");

        // Exactly at expiry: invalid.
        clock.advance(Duration::days(7));
        let err = service.refresh(&rotated.refresh_token).await.unwrap_err();
        assert_invalid_input(err, "Refresh Token is invalid.");
    }
}
