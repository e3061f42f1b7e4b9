//! Challenge-response authentication.
//!
//! The server never sees a password. A login challenge is a SecretBox
//! ciphertext of `{timestamp, userId}` under a key derived from the server
//! secret and the user's salt; the client proves possession of the derived
//! key by returning the decrypted challenge inside a response it signs
//! with its Ed25519 login key.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::codec;
use crate::config::Config;
use crate::crypto;
use crate::db;
use crate::error::{Error, Result};
use crate::models::User;
use crate::wire::{
    ChallengeData, LoginChallengeOut, LoginOut, LoginRequest, LoginResponseData, SignupRequest,
    UserOut,
};

const ACTION_LOGIN: &str = "login";
const ACTION_CHANGE_PASSWORD: &str = "changePassword";

/// A user row joined with its crypto profile; the profile is missing for
/// accounts that never finished setup.
#[derive(Debug, sqlx::FromRow)]
struct UserWithCrypto {
    id: i64,
    username: String,
    first_name: String,
    email: String,
    version: Option<i64>,
    login_pubkey: Option<Vec<u8>>,
    pubkey: Option<Vec<u8>>,
    encrypted_content: Option<Vec<u8>>,
    salt: Option<Vec<u8>>,
}

#[derive(Clone)]
pub struct AuthService {
    pool: SqlitePool,
    config: Arc<Config>,
}

impl AuthService {
    pub fn new(pool: SqlitePool, config: Arc<Config>) -> Self {
        Self { pool, config }
    }

    async fn user_with_crypto(&self, username: &str) -> Result<Option<UserWithCrypto>> {
        let mut conn = self.pool.acquire().await?;
        Ok(sqlx::query_as::<_, UserWithCrypto>(
            "SELECT u.id, u.username, u.first_name, u.email, \
                    ui.version, ui.loginPubkey AS login_pubkey, ui.pubkey, \
                    ui.encryptedContent AS encrypted_content, ui.salt \
             FROM myauth_user u \
             LEFT JOIN django_userinfo ui ON ui.owner_id = u.id \
             WHERE u.username = ? AND u.is_active = 1",
        )
        .bind(username.to_lowercase())
        .fetch_optional(&mut *conn)
        .await?)
    }

    /// Issue a login challenge for the user.
    pub async fn login_challenge(&self, username: &str) -> Result<LoginChallengeOut> {
        let user = self
            .user_with_crypto(username)
            .await?
            .ok_or(Error::UserNotFound)?;
        let salt = user.salt.clone().ok_or(Error::UserNotInit)?;
        let version = user.version.ok_or(Error::UserNotInit)?;

        let key = crypto::derive_encryption_key(&self.config.encryption_secret, &salt)
            .map_err(|e| Error::Internal(e.into()))?;
        let challenge_data = ChallengeData {
            timestamp: Utc::now().timestamp(),
            user_id: user.id,
        };
        let challenge = crypto::encrypt(&key, &codec::to_vec(&challenge_data)?)
            .map_err(|e| Error::Internal(e.into()))?;

        Ok(LoginChallengeOut {
            salt,
            challenge,
            version,
        })
    }

    /// Validate a signed login response and mint an auth token.
    pub async fn login(&self, req: &LoginRequest, host: &str) -> Result<LoginOut> {
        let response: LoginResponseData = codec::from_slice(&req.response)?;
        let user = self
            .user_with_crypto(&response.username)
            .await?
            .ok_or(Error::UserNotFound)?;

        self.validate_login(&response, req, &user, ACTION_LOGIN, host)?;

        let token = self.create_token(user.id).await?;
        tracing::info!(username = %user.username, "user logged in");
        Ok(login_out(token, &user))
    }

    /// Same envelope as login with action `changePassword`; on success the
    /// user's login key and encrypted key material are replaced in place.
    pub async fn change_password(
        &self,
        user: &User,
        req: &LoginRequest,
        host: &str,
    ) -> Result<()> {
        let response: LoginResponseData = codec::from_slice(&req.response)?;
        let row = self
            .user_with_crypto(&user.username)
            .await?
            .ok_or(Error::UserNotFound)?;

        self.validate_login(&response, req, &row, ACTION_CHANGE_PASSWORD, host)?;

        let login_pubkey = response
            .login_pubkey
            .ok_or_else(|| Error::MissingField("missing field `loginPubkey`".into()))?;
        let encrypted_content = response
            .encrypted_content
            .ok_or_else(|| Error::MissingField("missing field `encryptedContent`".into()))?;

        let mut conn = self.pool.acquire().await?;
        sqlx::query(
            "UPDATE django_userinfo SET loginPubkey = ?, encryptedContent = ? WHERE owner_id = ?",
        )
        .bind(&login_pubkey)
        .bind(&encrypted_content)
        .bind(row.id)
        .execute(&mut *conn)
        .await?;

        tracing::info!(username = %row.username, "password changed");
        Ok(())
    }

    fn validate_login(
        &self,
        response: &LoginResponseData,
        req: &LoginRequest,
        user: &UserWithCrypto,
        expected_action: &str,
        host: &str,
    ) -> Result<()> {
        let salt = user.salt.as_deref().ok_or(Error::UserNotInit)?;
        let login_pubkey = user.login_pubkey.as_deref().ok_or(Error::UserNotInit)?;

        let key = crypto::derive_encryption_key(&self.config.encryption_secret, salt)
            .map_err(|e| Error::Internal(e.into()))?;
        let challenge =
            crypto::decrypt(&key, &response.challenge).map_err(|_| Error::BadSignature)?;

        let (timestamp, challenge_user_id) = decode_challenge(&challenge)?;

        if response.action != expected_action {
            return Err(Error::WrongAction {
                expected: expected_action.to_string(),
            });
        }

        if Utc::now().timestamp() - timestamp > self.config.challenge_valid_seconds {
            return Err(Error::ChallengeExpired);
        }

        if challenge_user_id != user.id {
            return Err(Error::WrongUser);
        }

        if !self.config.debug {
            let expected = strip_port(host);
            let got = strip_port(&response.host);
            if got != expected {
                return Err(Error::WrongHost {
                    expected: expected.to_string(),
                    got: got.to_string(),
                });
            }
        }

        crypto::verify_signature(login_pubkey, &req.response, &req.signature)
            .map_err(|_| Error::BadSignature)
    }

    /// Create an account plus its crypto profile and a first token.
    pub async fn signup(&self, req: &SignupRequest) -> Result<LoginOut> {
        validate_username(&req.user.username)?;
        validate_email(&req.user.email)?;

        let username = req.user.username.to_lowercase();
        let email = req.user.email.to_lowercase();

        let mut conn = self.pool.acquire().await?;
        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM myauth_user WHERE username = ? OR email = ?",
        )
        .bind(&username)
        .bind(&email)
        .fetch_optional(&mut *conn)
        .await?;
        if existing.is_some() {
            return Err(Error::UserExists);
        }
        drop(conn);

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO myauth_user (username, email, first_name, is_active, date_joined) \
             VALUES (?, ?, ?, 1, ?)",
        )
        .bind(&username)
        .bind(&email)
        .bind(&req.user.username)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                Error::UserExists
            } else {
                Error::Database(e)
            }
        })?;
        let user_id = result.last_insert_rowid();

        sqlx::query(
            "INSERT INTO django_userinfo \
             (owner_id, version, loginPubkey, pubkey, encryptedContent, salt) \
             VALUES (?, 1, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&req.login_pubkey)
        .bind(&req.pubkey)
        .bind(&req.encrypted_content)
        .bind(&req.salt)
        .execute(&mut *tx)
        .await?;

        let token = crypto::generate_token_key();
        sqlx::query(
            "INSERT INTO django_authtoken_authtoken (key, user_id, created) VALUES (?, ?, ?)",
        )
        .bind(&token)
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(username = %username, "user signed up");
        Ok(LoginOut {
            token,
            user: UserOut {
                username: req.user.username.clone(),
                email: req.user.email.clone(),
                pubkey: req.pubkey.clone(),
                encrypted_content: req.encrypted_content.clone(),
            },
        })
    }

    async fn create_token(&self, user_id: i64) -> Result<String> {
        let token = crypto::generate_token_key();
        let mut conn = self.pool.acquire().await?;
        sqlx::query(
            "INSERT INTO django_authtoken_authtoken (key, user_id, created) VALUES (?, ?, ?)",
        )
        .bind(&token)
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;
        Ok(token)
    }

    /// Token lookup for the auth middleware.
    pub async fn user_by_token(&self, token: &str) -> Result<User> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query_as::<_, User>(
            "SELECT u.id, u.username, u.email, u.first_name, u.is_active \
             FROM django_authtoken_authtoken t \
             JOIN myauth_user u ON u.id = t.user_id \
             WHERE t.key = ? AND u.is_active = 1",
        )
        .bind(token)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(Error::InvalidToken)
    }

    pub async fn logout(&self, token: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("DELETE FROM django_authtoken_authtoken WHERE key = ?")
            .bind(token)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

fn login_out(token: String, user: &UserWithCrypto) -> LoginOut {
    LoginOut {
        token,
        user: UserOut {
            // first_name preserves the signup casing for display
            username: user.first_name.clone(),
            email: user.email.clone(),
            pubkey: user.pubkey.clone().unwrap_or_default(),
            encrypted_content: user.encrypted_content.clone().unwrap_or_default(),
        },
    }
}

/// Decode the challenge plaintext into `(timestamp, userId)`. Client
/// msgpack libraries pick whatever integer width fits (or a float), so the
/// values go through generic coercion rather than a fixed-width struct.
fn decode_challenge(plain: &[u8]) -> Result<(i64, i64)> {
    let value = rmpv::decode::read_value(&mut &plain[..])
        .map_err(|_| Error::InvalidRequest("Failed to decode challenge data".into()))?;
    let rmpv::Value::Map(entries) = value else {
        return Err(Error::InvalidRequest("Failed to decode challenge data".into()));
    };

    let mut timestamp = None;
    let mut user_id = None;
    for (key, val) in &entries {
        match key.as_str() {
            Some("timestamp") => timestamp = value_as_i64(val),
            Some("userId") => user_id = value_as_i64(val),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| Error::InvalidRequest("Invalid timestamp in challenge".into()))?;
    let user_id =
        user_id.ok_or_else(|| Error::InvalidRequest("Invalid userId in challenge".into()))?;
    Ok((timestamp, user_id))
}

fn value_as_i64(value: &rmpv::Value) -> Option<i64> {
    match value {
        rmpv::Value::Integer(i) => i.as_i64(),
        rmpv::Value::F32(f) => Some(*f as i64),
        rmpv::Value::F64(f) => Some(*f as i64),
        _ => None,
    }
}

fn strip_port(host: &str) -> &str {
    host.split(':').next().unwrap_or("")
}

fn validate_username(username: &str) -> Result<()> {
    let ok = !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::Validation {
            field: "username",
            detail: "Enter a valid username.".into(),
        })
    }
}

fn validate_email(email: &str) -> Result<()> {
    if email.contains('@') && !email.starts_with('@') && !email.ends_with('@') {
        Ok(())
    } else {
        Err(Error::Validation {
            field: "email",
            detail: "Enter a valid email address.".into(),
        })
    }
}
