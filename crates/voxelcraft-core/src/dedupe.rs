//! Act-id dedupe: the first acknowledgement for an act wins for
//! [`DEDUPE_TTL_TICKS`].

use std::collections::BTreeMap;

use voxelcraft_types::ActAck;

/// How long a remembered acknowledgement is replayed.
pub const DEDUPE_TTL_TICKS: u64 = 3000;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DedupeKey {
    agent_id: String,
    world_id: String,
    act_id: String,
}

#[derive(Debug, Clone)]
struct DedupeEntry {
    ack: ActAck,
    expires_tick: u64,
}

/// Remembered acknowledgements keyed by `(agent, world, act_id)`.
#[derive(Debug, Clone, Default)]
pub struct ActDedupe {
    entries: BTreeMap<DedupeKey, DedupeEntry>,
}

impl ActDedupe {
    /// Return the stored ack for the key and `true`, or remember
    /// `proposed` and return it with `false`.
    ///
    /// An empty `act_id` is never remembered.
    pub fn check_or_remember(
        &mut self,
        agent_id: &str,
        world_id: &str,
        act_id: &str,
        proposed: ActAck,
        now: u64,
    ) -> (ActAck, bool) {
        if act_id.is_empty() {
            return (proposed, false);
        }
        self.entries.retain(|_, e| now < e.expires_tick);
        let key = DedupeKey {
            agent_id: agent_id.to_owned(),
            world_id: world_id.to_owned(),
            act_id: act_id.to_owned(),
        };
        if let Some(entry) = self.entries.get(&key) {
            return (entry.ack.clone(), true);
        }
        self.entries.insert(
            key,
            DedupeEntry {
                ack: proposed.clone(),
                expires_tick: now.saturating_add(DEDUPE_TTL_TICKS),
            },
        );
        (proposed, false)
    }

    /// Number of remembered acks, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(msg: &str) -> ActAck {
        ActAck {
            act_id: "ACT_1".to_owned(),
            accepted: true,
            tick: 0,
            msg: msg.to_owned(),
        }
    }

    #[test]
    fn first_ack_wins() {
        let mut d = ActDedupe::default();
        let (first, dup) = d.check_or_remember("A1", "W1", "ACT_1", ack(""), 10);
        assert!(!dup);
        assert_eq!(first.msg, "");
        let (second, dup) = d.check_or_remember("A1", "W1", "ACT_1", ack("ignored"), 11);
        assert!(dup);
        assert_eq!(second.msg, "");
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut d = ActDedupe::default();
        d.check_or_remember("A1", "W1", "ACT_1", ack("a"), 0);
        let (_, dup) = d.check_or_remember("A1", "W1", "ACT_1", ack("b"), DEDUPE_TTL_TICKS - 1);
        assert!(dup);
        let (again, dup) = d.check_or_remember("A1", "W1", "ACT_1", ack("c"), DEDUPE_TTL_TICKS);
        assert!(!dup);
        assert_eq!(again.msg, "c");
    }

    #[test]
    fn keys_are_scoped_by_world_and_agent() {
        let mut d = ActDedupe::default();
        d.check_or_remember("A1", "W1", "ACT_1", ack("a"), 0);
        assert!(!d.check_or_remember("A2", "W1", "ACT_1", ack("b"), 0).1);
        assert!(!d.check_or_remember("A1", "W2", "ACT_1", ack("c"), 0).1);
        assert!(!d.check_or_remember("A1", "W1", "", ack("d"), 0).1);
        assert_eq!(d.len(), 3);
    }
}
