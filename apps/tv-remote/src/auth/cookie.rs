use std::{sync::Arc, time::Duration};

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::{distributions::Alphanumeric, Rng};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use super::UserIdentity;

type HmacSha256 = Hmac<sha2::Sha256>;

pub const SESSION_COOKIE: &str = "tv_session";
pub const LOGIN_COOKIE: &str = "tv_login";
pub const LOGIN_STATE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie value is malformed")]
    Malformed,
    #[error("cookie signature mismatch")]
    BadSignature,
    #[error("cookie has expired")]
    Expired,
    #[error("invalid signing key")]
    Key,
    #[error("cookie payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct SignedSession {
    user: UserIdentity,
    issued_at: i64,
}

/// CSRF `state` and replay `nonce` remembered between login and callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    pub state: String,
    pub nonce: String,
    pub issued_at: i64,
}

impl LoginState {
    pub fn generate() -> Self {
        Self {
            state: random_token(32),
            nonce: random_token(32),
            issued_at: Utc::now().timestamp(),
        }
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(len)
        .collect()
}

/// Signs cookie payloads as `base64url(json).base64url(hmac-sha256)`.
#[derive(Clone)]
pub struct CookieSigner {
    key: Arc<[u8]>,
    secure: bool,
}

impl CookieSigner {
    pub fn new(secret: &str, secure: bool) -> Self {
        Self {
            key: Arc::from(secret.as_bytes()),
            secure,
        }
    }

    fn mac(&self) -> Result<HmacSha256, CookieError> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| CookieError::Key)
    }

    pub fn sign<T: Serialize>(&self, value: &T) -> Result<String, CookieError> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(value)?);
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    pub fn verify<T: DeserializeOwned>(&self, raw: &str) -> Result<T, CookieError> {
        let (payload, signature) = raw.split_once('.').ok_or(CookieError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| CookieError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| CookieError::BadSignature)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| CookieError::Malformed)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn issue_session(&self, user: &UserIdentity) -> Result<String, CookieError> {
        self.issue_session_at(user, Utc::now().timestamp())
    }

    pub fn issue_session_at(&self, user: &UserIdentity, issued_at: i64) -> Result<String, CookieError> {
        self.sign(&SignedSession {
            user: user.clone(),
            issued_at,
        })
    }

    pub fn open_session(&self, raw: &str, ttl: Duration) -> Result<UserIdentity, CookieError> {
        let session: SignedSession = self.verify(raw)?;
        check_age(session.issued_at, ttl)?;
        Ok(session.user)
    }

    pub fn issue_login(&self, login: &LoginState) -> Result<String, CookieError> {
        self.sign(login)
    }

    pub fn open_login(&self, raw: &str) -> Result<LoginState, CookieError> {
        let login: LoginState = self.verify(raw)?;
        check_age(login.issued_at, LOGIN_STATE_TTL)?;
        Ok(login)
    }

    pub fn set_cookie(&self, name: &str, value: &str, max_age: Duration) -> String {
        let mut cookie = format!(
            "{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            max_age.as_secs()
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    pub fn clear_cookie(&self, name: &str) -> String {
        self.set_cookie(name, "", Duration::ZERO)
    }
}

fn check_age(issued_at: i64, ttl: Duration) -> Result<(), CookieError> {
    let now = Utc::now().timestamp();
    let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    // Small allowance for clock skew between issue and check.
    if issued_at > now + 60 || now.saturating_sub(issued_at) > ttl {
        return Err(CookieError::Expired);
    }
    Ok(())
}

/// Value of the first cookie called `name` across all `Cookie` headers.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}
