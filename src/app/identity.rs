use anyhow::{anyhow, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::{local, version4::V4, Local};
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::user::{Caller, User};
use crate::infra::db::Db;

/// Identity store plus session minting. Session tokens are PASETO v4.local,
/// carried by the caller in a cookie; they hold the user id only — the admin
/// flag is read from the store on every request.
#[derive(Clone)]
pub struct IdentityService {
    db: Db,
    session_key: [u8; 32],
    session_ttl_hours: u64,
}

impl IdentityService {
    pub fn new(db: Db, session_key: [u8; 32], session_ttl_hours: u64) -> Self {
        Self {
            db,
            session_key,
            session_ttl_hours,
        }
    }

    pub async fn register(&self, username: String, email: String, password: String) -> Result<User> {
        let password_hash = hash_password(&password)?;
        let row = sqlx::query(
            "INSERT INTO users (username, email, password_hash) \
             VALUES ($1, $2, $3) \
             RETURNING id, username, email, password_hash, is_admin, created_at",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .fetch_one(self.db.pool())
        .await?;

        Ok(user_from_row(&row))
    }

    /// Fails uniformly on unknown email and wrong password.
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, is_admin, created_at \
             FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(self.db.pool())
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let user = user_from_row(&row);
        if !verify_password(password, &user.password_hash)? {
            return Ok(None);
        }

        Ok(Some(user))
    }

    /// Provision the well-known admin identity if absent. Idempotent: keyed
    /// by the admin email, so reruns are no-ops.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> Result<()> {
        let password_hash = hash_password(password)?;
        sqlx::query(
            "INSERT INTO users (username, email, password_hash, is_admin) \
             VALUES ('admin', $1, $2, TRUE) \
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(email)
        .bind(password_hash)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn caller(&self, user_id: Uuid) -> Result<Option<Caller>> {
        let row = sqlx::query("SELECT id, is_admin FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(|row| Caller {
            user_id: row.get("id"),
            is_admin: row.get("is_admin"),
        }))
    }

    pub fn issue_session_token(&self, user_id: Uuid) -> Result<(String, OffsetDateTime)> {
        let duration = std::time::Duration::from_secs(self.session_ttl_hours * 60 * 60);
        let mut claims = Claims::new_expires_in(&duration)?;
        claims.issuer("ajali")?;
        claims.audience("ajali")?;
        claims.subject(&user_id.to_string())?;
        claims.add_additional("typ", "session")?;

        let key = SymmetricKey::<V4>::from(&self.session_key)?;
        let token = local::encrypt(&key, &claims, None, None)?;
        let expires_at =
            OffsetDateTime::now_utc() + time::Duration::hours(self.session_ttl_hours as i64);
        Ok((token, expires_at))
    }

    pub fn authenticate_session_token(&self, token: &str) -> Result<Option<Uuid>> {
        let key = SymmetricKey::<V4>::from(&self.session_key)?;
        let mut rules = ClaimsValidationRules::new();
        rules.validate_issuer_with("ajali");
        rules.validate_audience_with("ajali");

        let untrusted = match UntrustedToken::<Local, V4>::try_from(token) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        let trusted = match local::decrypt(&key, &untrusted, &rules, None, None) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        let claims = match trusted.payload_claims() {
            Some(claims) => claims,
            None => return Ok(None),
        };

        if !has_token_type(claims, "session") {
            return Ok(None);
        }
        Ok(Some(claim_uuid(claims, "sub")?))
    }
}

pub(crate) fn user_from_row(row: &sqlx::postgres::PgRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        is_admin: row.get("is_admin"),
        created_at: row.get("created_at"),
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {}", err))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|err| anyhow!("failed to parse password hash: {}", err))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn claim_uuid(claims: &Claims, name: &str) -> Result<Uuid> {
    let value = claims
        .get_claim(name)
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("missing {} claim", name))?;
    Ok(Uuid::parse_str(value)?)
}

fn has_token_type(claims: &Claims, expected: &str) -> bool {
    claims
        .get_claim("typ")
        .and_then(|value| value.as_str())
        .map(|value| value == expected)
        .unwrap_or(false)
}
