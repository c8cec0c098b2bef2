//! Per-session CSRF tokens.
//!
//! Two policies are supported. [`CsrfMode::SingleUse`] keeps one token per
//! session; it is consumed by a successful verification and a fresh one is
//! issued on the next render. [`CsrfMode::Pool`] keeps a small set of
//! tokens, each reusable until it expires, so several open tabs can post
//! independently.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfMode {
    SingleUse,
    Pool { capacity: usize, ttl_secs: i64 },
}

impl CsrfMode {
    pub const DEFAULT_POOL: CsrfMode = CsrfMode::Pool {
        capacity: 10,
        ttl_secs: 3600,
    };
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CsrfTokens {
    tokens: Vec<IssuedToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IssuedToken {
    token: String,
    issued: Timestamp,
}

pub fn generate_token() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

impl CsrfTokens {
    /// The token to embed in forms rendered now, issuing one if needed.
    pub fn current(&mut self, mode: CsrfMode, now: Timestamp) -> String {
        self.prune(mode, now);

        if let CsrfMode::Pool { capacity, .. } = mode {
            let capacity = capacity.max(1);
            // one new token per render, oldest evicted
            if self.tokens.len() >= capacity {
                let excess = self.tokens.len() + 1 - capacity;
                self.tokens.drain(..excess);
            }
            return self.issue(now);
        }

        match self.tokens.last() {
            Some(t) => t.token.clone(),
            None => self.issue(now),
        }
    }

    /// Verify a submitted token. Single-use tokens are consumed on success.
    pub fn verify(&mut self, mode: CsrfMode, presented: Option<&str>, now: Timestamp) -> bool {
        let Some(presented) = presented.filter(|p| !p.is_empty()) else {
            warn!("csrf: no token presented");
            return false;
        };

        self.prune(mode, now);

        let found = self
            .tokens
            .iter()
            .position(|t| constant_time_eq(t.token.as_bytes(), presented.as_bytes()));

        match (found, mode) {
            (None, _) => {
                warn!("csrf: token mismatch");
                false
            }
            (Some(i), CsrfMode::SingleUse) => {
                self.tokens.remove(i);
                debug!("csrf: single-use token consumed");
                true
            }
            (Some(_), CsrfMode::Pool { .. }) => true,
        }
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn issue(&mut self, now: Timestamp) -> String {
        let token = generate_token();
        self.tokens.push(IssuedToken {
            token: token.clone(),
            issued: now,
        });
        token
    }

    fn prune(&mut self, mode: CsrfMode, now: Timestamp) {
        if let CsrfMode::Pool { ttl_secs, .. } = mode {
            self.tokens.retain(|t| now.since(t.issued) <= ttl_secs);
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
