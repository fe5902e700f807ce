//! Cooperative cancellation shared between the coordinator and its workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable cancellation flag.
///
/// Clones share one flag. A child token has its own flag and also reports cancellation
/// when any of its ancestors is cancelled; cancelling a child leaves its parent running.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of this token, its clones and its children.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether this token or one of its ancestors was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self
                .ancestors
                .iter()
                .any(|ancestor| ancestor.load(Ordering::Acquire))
    }

    /// Creates a token that is cancelled together with this one.
    pub fn child_token(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.flag.clone());
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_children_observe_ancestors() {
        let root = CancellationToken::new();
        let child = root.child_token();
        let grandchild = child.child_token();

        grandchild.cancel();
        assert!(!child.is_cancelled());
        assert!(!root.is_cancelled());

        let sibling = child.child_token();
        root.cancel();
        assert!(child.is_cancelled());
        assert!(sibling.is_cancelled());
    }

    #[test]
    fn test_cancellation_crosses_threads() {
        let token = CancellationToken::new();
        let child = token.child_token();
        let handle = std::thread::spawn(move || {
            while !child.is_cancelled() {
                std::thread::yield_now();
            }
        });
        token.cancel();
        assert!(handle.join().is_ok());
    }
}
