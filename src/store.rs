//! Event Store (spec.md section 4.1): the canonical, content-addressed
//! repository of live events.
use crate::error::{Diagnostic, Error, InvalidEventKind};
use crate::event::{Event, EventIndex, HashedData, NewEvent};
use crate::hash::Hash;
use std::collections::HashMap;

/// Canonical repository of events, indexed by `(creator, sequence)` and by
/// hash. Owns event memory and tracks, per creator, the last event that
/// reached consensus so late-arriving events from that creator can still
/// be ancestry-checked after everything else of theirs has expired.
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
    by_hash: HashMap<Hash, EventIndex>,
    by_creator_seq: HashMap<(u32, u32), EventIndex>,
    last_consensus_by_creator: Vec<Option<EventIndex>>,
    /// Events retained solely as a creator's last-consensus event: their
    /// outbound references have already been cleared, but they stay in
    /// `by_creator_seq`/`by_hash` so late ancestry checks still resolve.
    retained_cleared: Vec<EventIndex>,
}

impl EventStore {
    /// An empty store sized for `member_count` creators.
    pub fn new(member_count: u32) -> Self {
        Self {
            events: Vec::new(),
            by_hash: HashMap::new(),
            by_creator_seq: HashMap::new(),
            last_consensus_by_creator: vec![None; member_count as usize],
            retained_cleared: Vec::new(),
        }
    }

    /// Number of members this store was sized for.
    pub fn member_count(&self) -> u32 {
        self.last_consensus_by_creator.len() as u32
    }

    /// Look up a live event, or a creator's retained last-consensus event
    /// if its sequence matches, by `(creator, sequence)`.
    pub fn get(&self, creator: u32, sequence: u32) -> Option<EventIndex> {
        self.by_creator_seq.get(&(creator, sequence)).copied()
    }

    /// Look up an event by hash.
    pub fn get_by_hash(&self, hash: &Hash) -> Option<EventIndex> {
        self.by_hash.get(hash).copied()
    }

    /// The arena index of `creator`'s most recent consensus event, if any.
    pub fn last_consensus(&self, creator: u32) -> Option<EventIndex> {
        self.last_consensus_by_creator[creator as usize]
    }

    /// Borrow an event by arena index.
    pub fn event(&self, idx: EventIndex) -> &Event {
        &self.events[idx]
    }

    /// Mutably borrow an event by arena index.
    pub fn event_mut(&mut self, idx: EventIndex) -> &mut Event {
        &mut self.events[idx]
    }

    /// Mutably borrow two distinct events at once (needed by the voting
    /// engine, which must read one event's caches while writing
    /// another's).
    pub fn event_pair_mut(&mut self, a: EventIndex, b: EventIndex) -> (&mut Event, &mut Event) {
        assert_ne!(a, b, "event_pair_mut requires distinct indices");
        if a < b {
            let (left, right) = self.events.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.events.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    /// Total number of events ever inserted (live or cleared).
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the store holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterate all events currently known (spec.md `get-all-events`).
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Record a validated event. Fails with `Duplicate` if
    /// `(creator, sequence)` already exists, or `InvalidAncestry` if the
    /// self-parent's sequence doesn't precede this one, or if a declared
    /// parent hash is unknown to the store.
    pub fn insert(&mut self, new: NewEvent) -> Result<EventIndex, Error> {
        if self.by_creator_seq.contains_key(&(new.creator, new.sequence)) {
            return Err(InvalidEventKind::Duplicate {
                creator: new.creator,
                sequence: new.sequence,
            }
            .into());
        }

        let self_parent = match &new.self_parent_hash {
            Some(hash) => {
                let idx = self.get_by_hash(hash).ok_or_else(|| {
                    Error::from(InvalidEventKind::InvalidAncestry {
                        creator: new.creator,
                        sequence: new.sequence,
                        detail: "self-parent hash not known to the store".into(),
                    })
                })?;
                let parent = self.event(idx);
                if parent.creator != new.creator || parent.sequence + 1 != new.sequence {
                    return Err(InvalidEventKind::InvalidAncestry {
                        creator: new.creator,
                        sequence: new.sequence,
                        detail: format!(
                            "self-parent is (creator={}, sequence={}), expected (creator={}, sequence={})",
                            parent.creator, parent.sequence, new.creator, new.sequence.wrapping_sub(1)
                        ),
                    }
                    .into());
                }
                Some(idx)
            }
            None => {
                if new.sequence != 0 {
                    return Err(InvalidEventKind::InvalidAncestry {
                        creator: new.creator,
                        sequence: new.sequence,
                        detail: "missing self-parent for non-zero sequence".into(),
                    }
                    .into());
                }
                None
            }
        };

        let other_parent = match &new.other_parent_hash {
            Some(hash) => Some(self.get_by_hash(hash).ok_or_else(|| {
                Error::from(InvalidEventKind::InvalidAncestry {
                    creator: new.creator,
                    sequence: new.sequence,
                    detail: "other-parent hash not known to the store".into(),
                })
            })?),
            None => None,
        };

        let self_parent_gen = self_parent.map(|i| self.event(i).generation).unwrap_or(-1);
        let other_parent_gen = other_parent.map(|i| self.event(i).generation).unwrap_or(-1);
        let generation = 1 + self_parent_gen.max(other_parent_gen);
        let generation = if self_parent.is_none() && other_parent.is_none() {
            0
        } else {
            generation
        };

        let hashed = HashedData {
            creator: new.creator,
            self_parent_hash: new.self_parent_hash,
            other_parent_hash: new.other_parent_hash,
            self_parent_gen,
            other_parent_gen,
            timestamp_created: new.timestamp_created,
            transactions: new.transactions.clone(),
        };
        let hash = hashed.hash();

        let event = Event {
            creator: new.creator,
            sequence: new.sequence,
            self_parent,
            other_parent,
            self_parent_hash: new.self_parent_hash,
            other_parent_hash: new.other_parent_hash,
            timestamp_created: new.timestamp_created,
            transactions: new.transactions,
            signature: new.signature,
            hash,
            generation,
            round_created: -1,
            witness: false,
            famous: None,
            round_received: None,
            consensus_timestamp: None,
            consensus_order: None,
            stale: false,
            frozen: false,
            last_see: None,
            first_self_witness: None,
            first_witness: None,
            strongly_see_parent: None,
            earliest_open_election: None,
            traversal_mark: 0,
            rec_times: Vec::new(),
            children: Vec::new(),
        };

        let idx = self.events.len();
        self.by_hash.insert(hash, idx);
        self.by_creator_seq.insert((new.creator, new.sequence), idx);
        if let Some(p) = self_parent {
            self.events[p].children.push(idx);
        }
        if let Some(p) = other_parent {
            self.events[p].children.push(idx);
        }
        self.events.push(event);
        Ok(idx)
    }

    /// Mark `idx` as this creator's new last-consensus event, draining
    /// whatever was retained for that creator before.
    pub(crate) fn set_last_consensus(&mut self, idx: EventIndex) {
        let creator = self.event(idx).creator as usize;
        self.last_consensus_by_creator[creator] = Some(idx);
        self.retained_cleared.retain(|&i| i != idx);
    }

    /// `expire(min-generation-non-ancient)`: any event with generation
    /// strictly below the threshold that is not its creator's retained
    /// last-consensus event has its parent/child references nulled and is
    /// unlinked from the hash/sequence indexes.
    pub fn expire(&mut self, min_generation_non_ancient: i64) {
        let mut to_clear = Vec::new();
        for (idx, event) in self.events.iter().enumerate() {
            if event.generation >= min_generation_non_ancient {
                continue;
            }
            let is_retained = self.last_consensus_by_creator[event.creator as usize] == Some(idx);
            if is_retained {
                continue;
            }
            to_clear.push(idx);
        }
        for idx in to_clear {
            let (hash, creator, sequence) = {
                let e = &self.events[idx];
                (e.hash, e.creator, e.sequence)
            };
            self.events[idx].clear_references();
            self.by_hash.remove(&hash);
            self.by_creator_seq.remove(&(creator, sequence));
        }
    }

    /// Diagnostic snapshot of an event for fatal-error reporting (spec.md
    /// section 7: creator, sequence, round-created, generation).
    pub fn diagnostic(&self, idx: EventIndex, min_round: i64, detail: impl Into<String>) -> Diagnostic {
        let e = self.event(idx);
        Diagnostic {
            creator: Some(e.creator),
            sequence: Some(e.sequence),
            round_created: Some(e.round_created),
            generation: Some(e.generation),
            min_round,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Signature;

    fn genesis(creator: u32) -> NewEvent {
        NewEvent {
            creator,
            sequence: 0,
            self_parent_hash: None,
            other_parent_hash: None,
            timestamp_created: 0,
            transactions: Vec::new(),
            signature: Signature::from_bytes(&[creator as u8]),
        }
    }

    #[test]
    fn insert_genesis_sets_generation_zero() {
        let mut store = EventStore::new(4);
        let idx = store.insert(genesis(0)).unwrap();
        assert_eq!(store.event(idx).generation, 0);
    }

    #[test]
    fn duplicate_sequence_is_rejected() {
        let mut store = EventStore::new(4);
        store.insert(genesis(0)).unwrap();
        let err = store.insert(genesis(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidEvent(InvalidEventKind::Duplicate { .. })));
    }

    #[test]
    fn self_parent_sequence_mismatch_is_rejected() {
        let mut store = EventStore::new(4);
        let g = store.insert(genesis(0)).unwrap();
        let hash = store.event(g).hash;
        let bad = NewEvent {
            creator: 0,
            sequence: 5,
            self_parent_hash: Some(hash),
            other_parent_hash: None,
            timestamp_created: 1,
            transactions: Vec::new(),
            signature: Signature::from_bytes(&[1]),
        };
        let err = store.insert(bad).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidEvent(InvalidEventKind::InvalidAncestry { .. })
        ));
    }

    #[test]
    fn expire_clears_non_retained_low_generation_events() {
        let mut store = EventStore::new(1);
        let g = store.insert(genesis(0)).unwrap();
        let hash = store.event(g).hash;
        let child = NewEvent {
            creator: 0,
            sequence: 1,
            self_parent_hash: Some(hash),
            other_parent_hash: None,
            timestamp_created: 1,
            transactions: Vec::new(),
            signature: Signature::from_bytes(&[1]),
        };
        store.insert(child).unwrap();
        store.expire(10);
        assert!(store.get(0, 0).is_none());
    }

    #[test]
    fn expire_keeps_retained_last_consensus_event() {
        let mut store = EventStore::new(1);
        let g = store.insert(genesis(0)).unwrap();
        store.set_last_consensus(g);
        store.expire(10);
        assert!(store.get(0, 0).is_some());
    }
}
