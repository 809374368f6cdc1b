use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::auth::store::{Role, User};
use crate::config::JwtConfig;

/// Claims carried by an access token. Self-contained: the request layer can
/// authorize without a store lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub jti: Uuid,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

/// Opaque refresh credential. Carries no claims; only a store lookup gives it
/// meaning, which bounds a leak to one revocable record.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// JWT signing/verification keys plus token lifetimes.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::minutes(cfg.access_ttl_minutes),
            refresh_ttl: Duration::days(cfg.refresh_ttl_days),
        }
    }

    /// Sign an HS256 access token for `user`, expiring `access_ttl` after `now`.
    pub fn sign_access(&self, user: &User, now: OffsetDateTime) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            jti: Uuid::new_v4(),
            iat: now.unix_timestamp() as usize,
            exp: (now + self.access_ttl).unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user.id, "access token signed");
        Ok(token)
    }

    /// Validate signature, issuer, audience and expiry.
    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, "access token verified");
        Ok(data.claims)
    }

    /// Generate an opaque refresh token: 256 bits from the OS RNG, URL-safe
    /// base64, expiring `refresh_ttl` after `now`.
    pub fn issue_refresh(&self, now: OffsetDateTime) -> RefreshToken {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        RefreshToken {
            token: URL_SAFE_NO_PAD.encode(bytes),
            expires_at: now + self.refresh_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys() -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            secret: "dev-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            access_ttl_minutes: 120,
            refresh_ttl_days: 7,
        })
    }

    fn make_user() -> User {
        User::new(
            "author@example.com".into(),
            "$argon2id$unused".into(),
            Role::Author,
        )
    }

    #[test]
    fn sign_and_verify_access_token_claims() {
        let keys = make_keys();
        let user = make_user();
        let now = OffsetDateTime::now_utc();

        let token = keys.sign_access(&user, now).expect("sign access");
        let claims = keys.verify(&token).expect("verify token");

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.role, Role::Author);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp, (now + Duration::hours(2)).unix_timestamp() as usize);
    }

    #[test]
    fn each_access_token_gets_a_fresh_jti() {
        let keys = make_keys();
        let user = make_user();
        let now = OffsetDateTime::now_utc();

        let a = keys.sign_access(&user, now).expect("sign");
        let b = keys.sign_access(&user, now).expect("sign");
        assert_ne!(
            keys.verify(&a).expect("verify").jti,
            keys.verify(&b).expect("verify").jti
        );
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let keys = make_keys();
        let other = JwtKeys::from_config(&JwtConfig {
            secret: "dev-secret".into(),
            issuer: "other-issuer".into(),
            audience: "other-aud".into(),
            access_ttl_minutes: 120,
            refresh_ttl_days: 7,
        });
        let token = keys
            .sign_access(&make_user(), OffsetDateTime::now_utc())
            .expect("sign");
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_expired_token() {
        let keys = make_keys();
        let issued = OffsetDateTime::now_utc() - Duration::hours(3);
        let token = keys.sign_access(&make_user(), issued).expect("sign");
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn refresh_tokens_are_opaque_and_unique() {
        let keys = make_keys();
        let now = OffsetDateTime::now_utc();

        let a = keys.issue_refresh(now);
        let b = keys.issue_refresh(now);
        assert_ne!(a.token, b.token);
        assert_eq!(a.expires_at, now + Duration::days(7));
        // 32 random bytes in unpadded base64
        assert_eq!(a.token.len(), 43);
    }
}
