//! Thread reconstruction over the parent-pointer tree.

use std::collections::HashSet;

use tracing::{debug, instrument, warn};

use chippy_core::{Message, MessageId};

use crate::error::StoreError;
use crate::messages::MessageRepo;

/// Default bound on ancestor hops.
pub const DEFAULT_MAX_DEPTH: usize = 1_000;

#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    /// The starting message is not stored.
    #[error("message {0} not found")]
    NotFound(MessageId),

    /// A parent along the chain is not stored yet. Usually a delivery race,
    /// so callers may retry.
    #[error("parent {missing} of message {child} is not stored yet")]
    Gap { child: MessageId, missing: MessageId },

    /// The chain revisits `at`; the stored tree is corrupt.
    #[error("parent chain loops back to message {at}")]
    Cycle { at: MessageId },

    #[error("parent chain exceeds {limit} messages")]
    TooDeep { limit: usize },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ThreadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ThreadError::Gap { .. })
    }
}

/// Walks parent pointers through the store, one read per hop.
#[derive(Clone)]
pub struct ThreadResolver {
    repo: MessageRepo,
    max_depth: usize,
}

impl ThreadResolver {
    pub fn new(repo: MessageRepo) -> Self {
        Self {
            repo,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn repo(&self) -> &MessageRepo {
        &self.repo
    }

    /// Resolve the thread ending at `id`, root first.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn resolve(&self, id: MessageId) -> Result<Vec<Message>, ThreadError> {
        let mut chain: Vec<Message> = Vec::new();
        let mut visited = HashSet::new();
        let mut current = id;
        let mut child: Option<MessageId> = None;

        loop {
            if !visited.insert(current) {
                warn!(at = %current, "cycle in parent chain");
                return Err(ThreadError::Cycle { at: current });
            }
            if chain.len() >= self.max_depth {
                warn!(limit = self.max_depth, "parent chain too deep");
                return Err(ThreadError::TooDeep { limit: self.max_depth });
            }

            let message = match self.repo.find(current)? {
                Some(m) => m,
                None => {
                    return Err(match child {
                        None => ThreadError::NotFound(current),
                        Some(child) => ThreadError::Gap {
                            child,
                            missing: current,
                        },
                    });
                }
            };

            let parent = message.parent_id;
            chain.push(message);
            match parent {
                Some(p) => {
                    child = Some(current);
                    current = p;
                }
                None => break,
            }
        }

        chain.reverse();
        debug!(len = chain.len(), "thread resolved");
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use chippy_core::Role;

    fn id(n: i64) -> MessageId {
        MessageId::new(n)
    }

    fn resolver() -> ThreadResolver {
        ThreadResolver::new(MessageRepo::new(Database::in_memory().unwrap()))
    }

    fn ids(thread: &[Message]) -> Vec<i64> {
        thread.iter().map(|m| m.id.get()).collect()
    }

    #[test]
    fn resolves_root_first() {
        let r = resolver();
        r.repo().upsert(id(0), None, Role::System, "ctx").unwrap();
        r.repo().upsert(id(1), Some(id(0)), Role::User, "hi").unwrap();
        r.repo().upsert(id(2), Some(id(1)), Role::Assistant, "hello").unwrap();

        let thread = r.resolve(id(2)).unwrap();
        assert_eq!(ids(&thread), [0, 1, 2]);
        assert_eq!(thread[0].role, Role::System);
        assert_eq!(thread[1].content, "hi");
        assert_eq!(thread[2].role, Role::Assistant);
    }

    #[test]
    fn root_alone_is_a_thread() {
        let r = resolver();
        r.repo().upsert(id(5), None, Role::User, "solo").unwrap();
        assert_eq!(ids(&r.resolve(id(5)).unwrap()), [5]);
    }

    #[test]
    fn only_ancestors_are_included() {
        let r = resolver();
        r.repo().upsert(id(0), None, Role::System, "ctx").unwrap();
        r.repo().upsert(id(1), Some(id(0)), Role::User, "a").unwrap();
        r.repo().upsert(id(2), Some(id(0)), Role::User, "sibling").unwrap();
        r.repo().upsert(id(3), Some(id(1)), Role::Assistant, "b").unwrap();
        assert_eq!(ids(&r.resolve(id(3)).unwrap()), [0, 1, 3]);
    }

    #[test]
    fn two_node_cycle_is_detected() {
        let r = resolver();
        r.repo().upsert(id(10), Some(id(11)), Role::User, "a").unwrap();
        r.repo().upsert(id(11), Some(id(10)), Role::User, "b").unwrap();
        assert!(matches!(r.resolve(id(10)), Err(ThreadError::Cycle { at }) if at == id(10)));
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let r = resolver();
        r.repo().upsert(id(4), Some(id(4)), Role::User, "me").unwrap();
        assert!(matches!(r.resolve(id(4)), Err(ThreadError::Cycle { .. })));
    }

    #[test]
    fn cycle_behind_a_tail_is_detected() {
        let r = resolver();
        r.repo().upsert(id(1), Some(id(2)), Role::User, "").unwrap();
        r.repo().upsert(id(2), Some(id(3)), Role::User, "").unwrap();
        r.repo().upsert(id(3), Some(id(2)), Role::User, "").unwrap();
        r.repo().upsert(id(9), Some(id(1)), Role::User, "").unwrap();
        assert!(matches!(r.resolve(id(9)), Err(ThreadError::Cycle { at }) if at == id(2)));
    }

    #[test]
    fn missing_start_is_not_found() {
        let r = resolver();
        assert!(matches!(r.resolve(id(77)), Err(ThreadError::NotFound(m)) if m == id(77)));
    }

    #[test]
    fn missing_parent_is_a_gap() {
        let r = resolver();
        r.repo().upsert(id(2), Some(id(1)), Role::User, "reply").unwrap();
        let err = r.resolve(id(2)).unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(
            err,
            ThreadError::Gap { child, missing } if child == id(2) && missing == id(1)
        ));
    }

    #[test]
    fn gap_heals_once_parent_arrives() {
        let r = resolver();
        r.repo().upsert(id(2), Some(id(1)), Role::User, "reply").unwrap();
        assert!(r.resolve(id(2)).is_err());
        r.repo().upsert(id(1), None, Role::System, "you are terse").unwrap();
        assert_eq!(ids(&r.resolve(id(2)).unwrap()), [1, 2]);
    }

    #[test]
    fn depth_is_bounded() {
        let r = resolver().with_max_depth(5);
        r.repo().upsert(id(0), None, Role::System, "ctx").unwrap();
        for n in 1..10 {
            r.repo().upsert(id(n), Some(id(n - 1)), Role::User, "x").unwrap();
        }
        assert_eq!(ids(&r.resolve(id(4)).unwrap()), [0, 1, 2, 3, 4]);
        assert!(matches!(r.resolve(id(9)), Err(ThreadError::TooDeep { limit: 5 })));
    }

    #[test]
    fn storage_error_is_not_transient() {
        let err = ThreadError::from(StoreError::Database("disk I/O error".into()));
        assert!(!err.is_transient());
        assert!(!ThreadError::Cycle { at: id(1) }.is_transient());
    }
}
