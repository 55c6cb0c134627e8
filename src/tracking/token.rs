//! Identity tokens.
//!
//! The injected code identifies objects by a Java `int`. With the default configuration that is
//! `System.identityHashCode`, which is not unique: two live objects can share a hash, and a
//! hash is reused once its object is collected. Trackers that want exact correlation hand out
//! tokens from a [`TokenAllocator`] instead and keep them next to the object.

use std::sync::atomic::{AtomicI32, Ordering};

/// Token correlating a creation event with the later disposal of the same object.
pub type IdentityToken = i32;

/// Allocates monotonically increasing identity tokens.
///
/// Tokens start at 1; 0 is never handed out so it can mean "no token". After `i32::MAX`
/// tokens the sequence wraps to `i32::MIN` and continues, skipping 0.
#[derive(Debug)]
pub struct TokenAllocator {
    next: AtomicI32,
}

impl Default for TokenAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenAllocator {
    /// Creates an allocator whose first token is 1.
    #[must_use]
    pub fn new() -> Self {
        TokenAllocator {
            next: AtomicI32::new(1),
        }
    }

    /// Returns the next token.
    pub fn allocate(&self) -> IdentityToken {
        loop {
            let token = self.next.fetch_add(1, Ordering::Relaxed);
            if token != 0 {
                return token;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use super::*;

    #[test]
    fn tokens_are_sequential() {
        let allocator = TokenAllocator::new();
        assert_eq!(allocator.allocate(), 1);
        assert_eq!(allocator.allocate(), 2);
    }

    #[test]
    fn zero_is_skipped_on_wrap() {
        let allocator = TokenAllocator {
            next: AtomicI32::new(-1),
        };
        assert_eq!(allocator.allocate(), -1);
        assert_eq!(allocator.allocate(), 1);
    }

    #[test]
    fn concurrent_tokens_are_unique() {
        let allocator = Arc::new(TokenAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || (0..500).map(|_| allocator.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for token in handle.join().unwrap() {
                assert!(seen.insert(token));
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
