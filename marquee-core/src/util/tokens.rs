use std::{hash::Hash, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type TokenMap<K> = Arc<DashMap<K, Arc<Mutex<()>>>>;

/// A guard proving exclusive access to a key. Released when dropped.
pub struct Token<K>
where
    K: Eq + Hash,
{
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    tokens: TokenMap<K>,
}

impl<K> Drop for Token<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        drop(self.guard.take());

        // Nobody holds or waits for the token anymore
        self.tokens
            .remove_if(&self.key, |_, token| Arc::strong_count(token) == 1);
    }
}

/// Mutual-exclusion tokens, one per key.
///
/// The tokens are async aware, so a holder may keep one across suspension points,
/// for example while waiting for an external service to respond.
pub struct KeyedTokens<K> {
    tokens: TokenMap<K>,
}

impl<K> KeyedTokens<K>
where
    K: Eq + Hash + Copy,
{
    /// Takes the token for the key, if nobody else is holding it.
    pub fn try_acquire(&self, key: K) -> Option<Token<K>> {
        let guard = self.token(key).try_lock_owned().ok();

        match guard {
            Some(guard) => Some(self.wrap(key, guard)),
            None => {
                self.forget_unused(key);
                None
            }
        }
    }

    /// Waits until the token for the key is free, then takes it.
    pub async fn acquire(&self, key: K) -> Token<K> {
        let guard = self.token(key).lock_owned().await;
        self.wrap(key, guard)
    }

    /// Returns true if someone is holding the token for the key.
    pub fn is_held(&self, key: K) -> bool {
        self.tokens
            .get(&key)
            .is_some_and(|token| token.try_lock().is_err())
    }

    fn token(&self, key: K) -> Arc<Mutex<()>> {
        // The map guard must not outlive this call, since holders await on the token.
        self.tokens.entry(key).or_default().clone()
    }

    fn wrap(&self, key: K, guard: OwnedMutexGuard<()>) -> Token<K> {
        Token {
            guard: Some(guard),
            key,
            tokens: self.tokens.clone(),
        }
    }

    /// The holder may have let go between the failed attempt and now.
    fn forget_unused(&self, key: K) {
        self.tokens
            .remove_if(&key, |_, token| Arc::strong_count(token) == 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tokens.len()
    }
}

impl<K> Default for KeyedTokens<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            tokens: Default::default(),
        }
    }
}
