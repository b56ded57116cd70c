use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ProviderResult;

/// Token issued by a vendor identity service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    /// Project scope returned alongside the token, where the vendor has one.
    pub project_id: Option<String>,
}

#[derive(Debug)]
struct Cached {
    token: Token,
    issued: Instant,
}

/// Holds one token for a fixed lifetime.
#[derive(Debug)]
pub struct TokenCache {
    ttl: Duration,
    slot: Mutex<Option<Cached>>,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached token, or call `issue` if there is none or it has expired.
    pub fn get_or_issue<F>(&self, issue: F) -> ProviderResult<Token>
    where
        F: FnOnce() -> ProviderResult<Token>,
    {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cached) = slot.as_ref() {
            if cached.issued.elapsed() < self.ttl {
                return Ok(cached.token.clone());
            }
            debug!("cached token expired");
        }

        let token = issue()?;
        *slot = Some(Cached {
            token: token.clone(),
            issued: Instant::now(),
        });
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use std::cell::Cell;

    fn token(value: &str) -> Token {
        Token {
            value: value.to_string(),
            project_id: None,
        }
    }

    #[test]
    fn test_token_reused_within_ttl() {
        let cache = TokenCache::new(Duration::from_secs(3600));
        let issued = Cell::new(0);

        for _ in 0..3 {
            let t = cache
                .get_or_issue(|| {
                    issued.set(issued.get() + 1);
                    Ok(token("abc"))
                })
                .unwrap();
            assert_eq!(t.value, "abc");
        }
        assert_eq!(issued.get(), 1);
    }

    #[test]
    fn test_expired_token_reissued() {
        let cache = TokenCache::new(Duration::ZERO);
        cache.get_or_issue(|| Ok(token("first"))).unwrap();
        let t = cache.get_or_issue(|| Ok(token("second"))).unwrap();
        assert_eq!(t.value, "second");
    }

    #[test]
    fn test_failed_issue_not_cached() {
        let cache = TokenCache::new(Duration::from_secs(3600));
        let err = cache
            .get_or_issue(|| Err(ProviderError::MissingToken("X-Subject-Token")))
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingToken(_)));

        let t = cache.get_or_issue(|| Ok(token("ok"))).unwrap();
        assert_eq!(t.value, "ok");
    }
}
