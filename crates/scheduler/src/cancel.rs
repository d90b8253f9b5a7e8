//! Cancellation tokens for render requests
//!
//! Every request carries a token owned by its requester. The scheduler only
//! inspects the token when a task is dequeued; work that already reached the
//! backend runs to completion and the requester simply ignores its result.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;

/// Cancellation token for cooperative request cancellation
///
/// Clones share the same cancellation state, so a view can keep one clone
/// and hand another to the scheduler.
///
/// # Example
///
/// ```
/// use pdf_reader_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let queued = token.clone();
///
/// // The view was unmounted.
/// token.cancel();
/// assert!(queued.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token
    ///
    /// All clones observe the cancellation. Calling it twice is a no-op.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check if this token (or any clone of it) has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    /// Create a child token that is cancelled together with this one
    ///
    /// Cancelling the child does not affect the parent.
    pub fn child_token(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }
}

/// Registry of live tokens keyed by logical request identity
///
/// Issuing a token for a key cancels whatever token was previously issued
/// for the same key, so a newer request for the same logical resource
/// supersedes the older one.
///
/// # Example
///
/// ```
/// use pdf_reader_scheduler::CancellationRegistry;
///
/// let registry = CancellationRegistry::new();
/// let first = registry.issue("doc-a:3");
/// let second = registry.issue("doc-a:3");
///
/// assert!(first.is_cancelled());
/// assert!(!second.is_cancelled());
/// ```
pub struct CancellationRegistry<K> {
    tokens: Mutex<HashMap<K, CancellationToken>>,
}

impl<K> CancellationRegistry<K>
where
    K: Eq + Hash,
{
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh token for `key`, cancelling any previous one
    pub fn issue(&self, key: K) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.tokens.lock().insert(key, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel and forget the token for `key`
    ///
    /// Returns `true` if a token was registered.
    pub fn cancel(&self, key: &K) -> bool {
        match self.tokens.lock().remove(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and forget every token whose key matches the predicate
    ///
    /// Returns the number of tokens cancelled.
    pub fn cancel_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|key, token| {
            if predicate(key) {
                token.cancel();
                false
            } else {
                true
            }
        });
        before - tokens.len()
    }

    /// Cancel and forget every registered token
    pub fn cancel_all(&self) -> usize {
        let mut tokens = self.tokens.lock();
        let count = tokens.len();
        for (_, token) in tokens.drain() {
            token.cancel();
        }
        count
    }

    /// Forget the token for `key` without cancelling it
    ///
    /// Called once a request settles. Returns `true` if the key was present.
    pub fn release(&self, key: &K) -> bool {
        self.tokens.lock().remove(key).is_some()
    }

    /// Number of registered tokens
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

impl<K> Default for CancellationRegistry<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}
