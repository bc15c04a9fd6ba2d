//! CSRF token generation, expiry and verification.
//!
//! Tokens have the form `{id}:{secret}`. Only a salted slow hash of the
//! secret is kept server-side. Each token expires after its TTL; expiry is
//! driven by a single background reaper task per manager rather than a task
//! per token.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use parking_lot::Mutex;
use rand::RngCore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

use crate::config::{CsrfConfig, MAX_TTL_SECS};
use crate::error::CsrfError;

/// Number of random bytes in a token secret (128 bits).
const SECRET_BYTES: usize = 16;

/// One-way hashing of token secrets.
pub trait SecretHasher: Send + Sync {
    /// Hash a secret for storage.
    fn hash(&self, secret: &str) -> Result<String, CsrfError>;

    /// Check a presented secret against a stored hash.
    fn verify(&self, hash: &str, secret: &str) -> bool;
}

/// Argon2id with a random salt per secret.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Hasher;

impl SecretHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> Result<String, CsrfError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| CsrfError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }

    fn verify(&self, hash: &str, secret: &str) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(secret.as_bytes(), &parsed_hash)
            .is_ok()
    }
}

/// Server-side token state.
#[derive(Debug, Default)]
struct TokenStore {
    next_id: u64,
    live: HashSet<u64>,
    hashed_secrets: HashMap<u64, String>,
    deadlines: HashMap<u64, Instant>,
}

impl TokenStore {
    fn expire(&mut self, id: u64) {
        self.live.remove(&id);
        self.hashed_secrets.remove(&id);
        self.deadlines.remove(&id);
    }

    /// Stored hash for a live token whose deadline has not passed.
    fn live_hash(&self, id: u64, now: Instant) -> Option<&str> {
        if !self.live.contains(&id) {
            return None;
        }
        match self.deadlines.get(&id) {
            Some(deadline) if *deadline > now => {}
            _ => return None,
        }
        self.hashed_secrets.get(&id).map(String::as_str)
    }
}

/// Issues, expires and verifies CSRF tokens.
///
/// Cheap to clone; clones share the same token store. The reaper task stops
/// on [`shutdown`](Self::shutdown) or when the last clone is dropped.
#[derive(Clone)]
pub struct CsrfManager {
    inner: Arc<CsrfManagerInner>,
}

struct CsrfManagerInner {
    config: CsrfConfig,
    hasher: Arc<dyn SecretHasher>,
    store: Arc<Mutex<TokenStore>>,
    expiries: mpsc::UnboundedSender<(u64, Instant)>,
    reaper: JoinHandle<()>,
    stopped: AtomicBool,
}

impl Drop for CsrfManagerInner {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

impl CsrfManager {
    /// Create a manager hashing secrets with Argon2.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: CsrfConfig) -> Result<Self, CsrfError> {
        Self::with_hasher(config, Arc::new(Argon2Hasher))
    }

    /// Create a manager with a custom secret hasher.
    pub fn with_hasher(
        config: CsrfConfig,
        hasher: Arc<dyn SecretHasher>,
    ) -> Result<Self, CsrfError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CsrfError::NoRuntime)?;

        let store = Arc::new(Mutex::new(TokenStore {
            next_id: 1,
            ..TokenStore::default()
        }));
        let (expiries, rx) = mpsc::unbounded_channel();
        let reaper = runtime.spawn(run_reaper(Arc::clone(&store), rx));

        info!(
            ttl_secs = config.ttl.as_secs(),
            max_live_tokens = config.max_live_tokens,
            "CSRF manager started"
        );

        Ok(Self {
            inner: Arc::new(CsrfManagerInner {
                config,
                hasher,
                store,
                expiries,
                reaper,
                stopped: AtomicBool::new(false),
            }),
        })
    }

    /// Issue a new token valid for `ttl`, or the configured default.
    pub fn issue(&self, ttl: Option<Duration>) -> Result<String, CsrfError> {
        if self.inner.stopped.load(Ordering::Acquire) || self.inner.expiries.is_closed() {
            return Err(CsrfError::ReaperStopped);
        }

        let ttl = ttl.unwrap_or(self.inner.config.ttl);
        if ttl > Duration::from_secs(MAX_TTL_SECS) {
            warn!(ttl_secs = ttl.as_secs(), "refusing to issue CSRF token, lifetime too long");
            return Err(CsrfError::TtlTooLong(ttl));
        }

        let max = self.inner.config.max_live_tokens;
        if self.live_tokens() >= max {
            warn!(limit = max, "refusing to issue CSRF token, too many live tokens");
            return Err(CsrfError::CapacityExceeded(max));
        }

        let mut secret_bytes = [0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        let secret = hex::encode(secret_bytes);
        let hashed = self.inner.hasher.hash(&secret)?;

        let deadline = Instant::now()
            .checked_add(ttl)
            .ok_or(CsrfError::TtlTooLong(ttl))?;
        let id = {
            let mut store = self.inner.store.lock();
            if store.live.len() >= max {
                return Err(CsrfError::CapacityExceeded(max));
            }
            let id = store.next_id;
            store.next_id += 1;
            store.live.insert(id);
            store.hashed_secrets.insert(id, hashed);
            store.deadlines.insert(id, deadline);
            id
        };

        if self.inner.expiries.send((id, deadline)).is_err() {
            self.inner.store.lock().expire(id);
            return Err(CsrfError::ReaperStopped);
        }

        debug!(token_id = id, ttl_secs = ttl.as_secs_f64(), "issued CSRF token");
        Ok(format!("{id}:{secret}"))
    }

    /// Check a presented token. Malformed, unknown and expired tokens are
    /// simply invalid.
    pub fn verify(&self, token: &str) -> bool {
        let Some((id, secret)) = token.split_once(':') else {
            debug!("rejected CSRF token without separator");
            return false;
        };
        let Ok(id) = id.trim().parse::<u64>() else {
            debug!("rejected CSRF token with non-numeric id");
            return false;
        };

        // Clone the hash out so the slow verification runs unlocked.
        let hashed = self
            .inner
            .store
            .lock()
            .live_hash(id, Instant::now())
            .map(str::to_owned);
        let Some(hashed) = hashed else {
            debug!(token_id = id, "rejected unknown or expired CSRF token");
            return false;
        };

        let valid = self.inner.hasher.verify(&hashed, secret);
        if !valid {
            warn!(token_id = id, "CSRF secret mismatch");
        }
        valid
    }

    /// Number of tokens currently live.
    pub fn live_tokens(&self) -> usize {
        self.inner.store.lock().live.len()
    }

    /// Lifetime applied when `issue` is not given one.
    pub fn default_ttl(&self) -> Duration {
        self.inner.config.ttl
    }

    /// Stop the reaper and refuse further issuance. Tokens already issued
    /// still verify until their deadline.
    pub fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.reaper.abort();
        info!("CSRF manager shut down");
    }
}

impl std::fmt::Debug for CsrfManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfManager")
            .field("config", &self.inner.config)
            .field("live_tokens", &self.live_tokens())
            .finish()
    }
}

/// Remove each token from the store once its deadline passes.
async fn run_reaper(
    store: Arc<Mutex<TokenStore>>,
    mut expiries: mpsc::UnboundedReceiver<(u64, Instant)>,
) {
    let mut queue: DelayQueue<u64> = DelayQueue::new();

    loop {
        tokio::select! {
            scheduled = expiries.recv() => {
                let Some((id, deadline)) = scheduled else {
                    debug!("CSRF reaper stopping");
                    break;
                };
                queue.insert_at(id, deadline);
            }
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let id = expired.into_inner();
                store.lock().expire(id);
                debug!(token_id = id, "expired CSRF token");
            }
        }
    }
}
