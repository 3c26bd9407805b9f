//! Download tokens.
//!
//! A token is a short-lived capability to fetch either the CA bundle or one
//! certificate bundle without re-authenticating. Only the blake3 hash of a
//! token value is kept; the plaintext is returned once, at issue time.

use std::collections::HashMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::SerialNumber;

/// Random bytes per token value.
const TOKEN_BYTES: usize = 32;

/// What a token authorizes fetching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "serial", rename_all = "snake_case")]
pub enum TokenSubject {
    /// The CA certificate chain.
    Ca,
    /// One issued certificate bundle.
    Certificate(SerialNumber),
}

impl fmt::Display for TokenSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ca => f.write_str("ca"),
            Self::Certificate(serial) => write!(f, "certificate:{serial}"),
        }
    }
}

/// A freshly issued token.
#[derive(Clone, Serialize, Deserialize)]
pub struct DownloadToken {
    /// Opaque token value to hand to the client.
    pub token: String,
    /// What the token unlocks.
    pub subject: TokenSubject,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Whether the token is invalidated by its first redemption.
    pub single_use: bool,
}

impl fmt::Debug for DownloadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadToken")
            .field("token", &"[REDACTED]")
            .field("subject", &self.subject)
            .field("expires_at", &self.expires_at)
            .field("single_use", &self.single_use)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TokenHash([u8; 32]);

impl TokenHash {
    fn of(token: &str) -> Self {
        Self(*blake3::hash(token.as_bytes()).as_bytes())
    }
}

#[derive(Debug)]
struct TokenEntry {
    subject: TokenSubject,
    expires_at: DateTime<Utc>,
    single_use: bool,
    redeemed: bool,
}

/// Issues and redeems download tokens.
pub struct DownloadTokenManager {
    ttl: Duration,
    single_use: bool,
    tokens: Mutex<HashMap<TokenHash, TokenEntry>>,
}

impl DownloadTokenManager {
    /// Creates a manager issuing tokens valid for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration, single_use: bool) -> Self {
        Self {
            ttl,
            single_use,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Issues a token bound to `subject`.
    #[must_use]
    pub fn issue(&self, subject: TokenSubject) -> DownloadToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);
        let expires_at = Utc::now() + self.ttl;

        self.tokens.lock().insert(
            TokenHash::of(&token),
            TokenEntry {
                subject: subject.clone(),
                expires_at,
                single_use: self.single_use,
                redeemed: false,
            },
        );
        info!(subject = %subject, expires_at = %expires_at, "download token issued");

        DownloadToken {
            token,
            subject,
            expires_at,
            single_use: self.single_use,
        }
    }

    /// Redeems a token, returning the subject it is bound to.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidToken`] for unknown or empty tokens,
    /// [`Error::ExpiredToken`] past expiry, [`Error::AlreadyRedeemed`] for a
    /// second use of a single-use token.
    pub fn redeem(&self, token: &str) -> Result<TokenSubject> {
        self.redeem_checked(token, None)
    }

    /// Redeems a token only if it is bound to `expected`.
    ///
    /// A token presented for the wrong subject is rejected without being
    /// consumed.
    ///
    /// # Errors
    ///
    /// As [`DownloadTokenManager::redeem`]; a subject mismatch is
    /// [`Error::InvalidToken`].
    pub fn redeem_for(&self, token: &str, expected: &TokenSubject) -> Result<()> {
        self.redeem_checked(token, Some(expected)).map(|_| ())
    }

    fn redeem_checked(&self, token: &str, expected: Option<&TokenSubject>) -> Result<TokenSubject> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::InvalidToken);
        }
        let hash = TokenHash::of(token);
        let now = Utc::now();

        let mut tokens = self.tokens.lock();
        let Some(entry) = tokens.get_mut(&hash) else {
            debug!("unknown download token presented");
            return Err(Error::InvalidToken);
        };
        if entry.expires_at <= now {
            tokens.remove(&hash);
            return Err(Error::ExpiredToken);
        }
        if entry.single_use && entry.redeemed {
            return Err(Error::AlreadyRedeemed);
        }
        if expected.is_some_and(|subject| *subject != entry.subject) {
            debug!(subject = %entry.subject, "download token presented for another subject");
            return Err(Error::InvalidToken);
        }
        entry.redeemed = true;
        debug!(subject = %entry.subject, "download token redeemed");
        Ok(entry.subject.clone())
    }

    /// Drops every expired token, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, entry| entry.expires_at > now);
        let purged = before - tokens.len();
        if purged > 0 {
            debug!(purged, remaining = tokens.len(), "expired download tokens purged");
        }
        purged
    }

    /// Number of tokens currently held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Returns `true` if no tokens are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

impl fmt::Debug for DownloadTokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTokenManager")
            .field("ttl", &self.ttl)
            .field("single_use", &self.single_use)
            .field("tokens", &self.len())
            .finish()
    }
}
