//! Conversations waiting for a reply once the offline backlog is delivered.

use dashmap::DashSet;

use parley_types::conversation::ConversationId;

/// Set of conversations that received messages while the connection was syncing.
///
/// Sessions only report into it; the orchestrator drains it exactly once when
/// the connection becomes synced. Safe for concurrent writers.
#[derive(Debug, Default)]
pub struct PendingSet {
    conversations: DashSet<ConversationId>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `conversation_id` needs a reply after sync. Idempotent.
    pub fn report(&self, conversation_id: &ConversationId) {
        self.conversations.insert(conversation_id.clone());
    }

    /// Remove and return every reported conversation.
    pub fn drain(&self) -> Vec<ConversationId> {
        let mut drained = Vec::with_capacity(self.conversations.len());
        self.conversations.retain(|id| {
            drained.push(id.clone());
            false
        });
        drained.sort();
        drained
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_is_idempotent() {
        let pending = PendingSet::new();
        let id = ConversationId::from("alice");
        pending.report(&id);
        pending.report(&id);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_drain_empties_the_set() {
        let pending = PendingSet::new();
        pending.report(&ConversationId::from("bob"));
        pending.report(&ConversationId::from("alice"));

        let drained = pending.drain();
        assert_eq!(
            drained,
            vec![ConversationId::from("alice"), ConversationId::from("bob")]
        );
        assert!(pending.is_empty());
        assert!(pending.drain().is_empty());
    }

    #[test]
    fn test_concurrent_reporters() {
        let pending = std::sync::Arc::new(PendingSet::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pending = pending.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        pending.report(&ConversationId::new(format!("c{}", (i * 50 + j) % 100)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pending.len(), 100);
    }
}
