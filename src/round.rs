//! Round Index & Election List (spec.md section 4.2).
use crate::election::{Election, ElectionIndex};
use crate::event::EventIndex;
use crate::hash::Whitening;
use crate::store::EventStore;
use std::collections::BTreeMap;

/// Per-round metadata: witnesses, judges, fame-decided state, and the
/// minimum generation of events created in this round.
#[derive(Clone, Debug)]
pub struct RoundInfo {
    /// This round's number.
    pub round: i64,
    /// Witnesses created in this round, in arrival order.
    pub witnesses: Vec<EventIndex>,
    /// Famous witnesses chosen as this round's canonical representatives,
    /// set once fame is fully decided (ordering engine populates this,
    /// indexed canonically by creator id; see `ordering.rs`).
    pub judges: Vec<EventIndex>,
    /// Set once every witness's fame is known.
    pub fame_decided: bool,
    /// Count of witnesses in this round whose fame is still unknown.
    pub num_unknown_fame: usize,
    /// Minimum generation across all events created in this round.
    pub min_generation: i64,
    /// XOR of judge signatures, truncated to the configured whitening
    /// length; filled in by the ordering engine once judges are chosen.
    pub whitening: Whitening,
    /// Head of the intra-round election linked list (across all target
    /// witnesses elected on in this round).
    first_election_in_round: Option<ElectionIndex>,
}

impl RoundInfo {
    fn new(round: i64, whitening_length: usize) -> Self {
        Self {
            round,
            witnesses: Vec::new(),
            judges: Vec::new(),
            fame_decided: false,
            num_unknown_fame: 0,
            min_generation: i64::MAX,
            whitening: Whitening::zero(whitening_length),
            first_election_in_round: None,
        }
    }

    /// Note an event's generation for this round's running minimum.
    fn observe_generation(&mut self, generation: i64) {
        if generation < self.min_generation {
            self.min_generation = generation;
        }
    }
}

/// Owns every active round's metadata and the election arena, and
/// propagates elections forward one round at a time.
#[derive(Debug, Default)]
pub struct RoundIndex {
    rounds: BTreeMap<i64, RoundInfo>,
    elections: Vec<Election>,
    whitening_length: usize,
}

impl RoundIndex {
    /// An empty index; `whitening_length` sizes every round's whitening
    /// buffer.
    pub fn new(whitening_length: usize) -> Self {
        Self {
            rounds: BTreeMap::new(),
            elections: Vec::new(),
            whitening_length,
        }
    }

    /// Lowest round number with metadata still held.
    pub fn min_round(&self) -> i64 {
        self.rounds.keys().next().copied().unwrap_or(0)
    }

    /// Highest round number with metadata held.
    pub fn max_round(&self) -> i64 {
        self.rounds.keys().next_back().copied().unwrap_or(0)
    }

    /// Borrow a round's metadata.
    pub fn get(&self, round: i64) -> Option<&RoundInfo> {
        self.rounds.get(&round)
    }

    /// Mutably borrow a round's metadata.
    pub fn get_mut(&mut self, round: i64) -> Option<&mut RoundInfo> {
        self.rounds.get_mut(&round)
    }

    /// Whether round metadata exists for `round`.
    pub fn contains(&self, round: i64) -> bool {
        self.rounds.contains_key(&round)
    }

    /// Borrow an election by arena index.
    pub fn election(&self, idx: ElectionIndex) -> &Election {
        &self.elections[idx]
    }

    /// Mutably borrow an election by arena index.
    pub fn election_mut(&mut self, idx: ElectionIndex) -> &mut Election {
        &mut self.elections[idx]
    }

    /// Arena indices of every election open in `round`, walking the
    /// intra-round linked list.
    pub fn elections_in_round(&self, round: i64) -> Vec<ElectionIndex> {
        let mut out = Vec::new();
        let mut cur = self.rounds.get(&round).and_then(|r| r.first_election_in_round);
        while let Some(idx) = cur {
            out.push(idx);
            cur = self.elections[idx].next_in_round;
        }
        out
    }

    /// `get-or-create(round)`: creates the round if absent and, if the
    /// previous round exists, seeds it with a new election for each of
    /// the previous round's witnesses plus a continuation of every still-
    /// open election from the previous round.
    pub fn get_or_create(&mut self, round: i64, store: &mut EventStore) {
        if self.rounds.contains_key(&round) {
            return;
        }
        let whitening_length = self.whitening_length;
        self.rounds.insert(round, RoundInfo::new(round, whitening_length));

        if self.rounds.contains_key(&(round - 1)) {
            let prev_witnesses = self.rounds.get(&(round - 1)).unwrap().witnesses.clone();
            let prev_open: Vec<ElectionIndex> = self
                .elections_in_round(round - 1)
                .into_iter()
                .filter(|&idx| !self.elections[idx].decided)
                .collect();
            for witness in prev_witnesses {
                self.open_election(round, witness, store);
            }
            for election_idx in prev_open {
                self.continue_election(round, election_idx, store);
            }
        }
    }

    /// Opens a brand new election in `round` targeting `witness`,
    /// extending its vote bitmap to match the round's current witness
    /// count and linking it into both orthogonal lists.
    pub fn open_election(&mut self, round: i64, witness: EventIndex, store: &mut EventStore) -> ElectionIndex {
        let target_round_created = store.event(witness).round_created;
        let mut election = Election::new(round, witness, target_round_created);
        let existing_witness_count = self.rounds.get(&round).map(|r| r.witnesses.len()).unwrap_or(0);
        for _ in 0..existing_witness_count {
            election.extend_votes();
        }
        let idx = self.elections.len();
        self.elections.push(election);
        self.link_in_round(round, idx);
        self.link_for_target(witness, idx, store);
        idx
    }

    /// Continues an open election from the previous round into `round`
    /// unchanged in target, linking the round-chain pointer.
    fn continue_election(&mut self, round: i64, prev_election: ElectionIndex, store: &mut EventStore) -> ElectionIndex {
        let (target, target_round_created) = {
            let e = &self.elections[prev_election];
            (e.target, store.event(e.target).round_created)
        };
        let mut election = Election::new(round, target, target_round_created);
        let existing_witness_count = self.rounds.get(&round).map(|r| r.witnesses.len()).unwrap_or(0);
        for _ in 0..existing_witness_count {
            election.extend_votes();
        }
        let idx = self.elections.len();
        self.elections.push(election);
        self.elections[idx].prev_round_election = Some(prev_election);
        self.elections[prev_election].next_round_election = Some(idx);
        self.link_in_round(round, idx);
        idx
    }

    fn link_in_round(&mut self, round: i64, idx: ElectionIndex) {
        let head = self.rounds.get(&round).and_then(|r| r.first_election_in_round);
        self.elections[idx].next_in_round = head;
        if let Some(head_idx) = head {
            self.elections[head_idx].prev_in_round = Some(idx);
        }
        self.rounds.get_mut(&round).unwrap().first_election_in_round = Some(idx);
    }

    fn link_for_target(&mut self, witness: EventIndex, idx: ElectionIndex, store: &mut EventStore) {
        // The witness's earliest open election is whichever has not yet
        // been unlinked; a freshly opened election always becomes it
        // because nothing earlier can exist for a brand new target.
        if store.event(witness).earliest_open_election.is_none() {
            store.event_mut(witness).earliest_open_election = Some(idx);
        }
    }

    /// `record-witness(round, event)`: appends `event` to the round's
    /// witness list, increments `num-unknown-fame`, and extends every
    /// open election's vote bitmap in that round by one slot.
    pub fn record_witness(&mut self, round: i64, event: EventIndex, store: &mut EventStore) {
        let generation = store.event(event).generation;
        let info = self.rounds.get_mut(&round).expect("round must exist before recording a witness");
        info.witnesses.push(event);
        info.num_unknown_fame += 1;
        info.observe_generation(generation);

        for election_idx in self.elections_in_round(round) {
            self.elections[election_idx].extend_votes();
        }
    }

    /// Decrements `round`'s unknown-fame counter by one (the bookkeeping
    /// half of `set-famous(event, famous?)`; the caller is responsible
    /// for setting the event's own `famous`/`fame_decided` fields first).
    /// Marks the round's fame as decided once the counter reaches zero,
    /// returning whether that just happened.
    pub fn decrement_unknown_fame(&mut self, round: i64) -> bool {
        let info = self.rounds.get_mut(&round).expect("round must exist to decide fame in it");
        info.num_unknown_fame = info.num_unknown_fame.saturating_sub(1);
        if info.num_unknown_fame == 0 && !info.fame_decided {
            info.fame_decided = true;
            true
        } else {
            false
        }
    }

    /// Insert a round's metadata directly, for bootstrap from a persisted
    /// state: fame is already known and no elections need opening.
    pub fn restore(&mut self, round: i64, min_generation: i64) {
        let whitening_length = self.whitening_length;
        let mut info = RoundInfo::new(round, whitening_length);
        info.fame_decided = true;
        info.min_generation = min_generation;
        self.rounds.insert(round, info);
    }

    /// Drop a round's metadata and every election it anchored in its
    /// intra-round list (used by garbage collection once every event
    /// with `round-received = round` has been emitted and the round is
    /// older than the expiry horizon).
    pub fn remove_round(&mut self, round: i64) {
        self.rounds.remove(&round);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Signature;
    use crate::event::NewEvent;

    fn make_store_with_genesis() -> (EventStore, EventIndex) {
        let mut store = EventStore::new(4);
        let idx = store
            .insert(NewEvent {
                creator: 0,
                sequence: 0,
                self_parent_hash: None,
                other_parent_hash: None,
                timestamp_created: 0,
                transactions: Vec::new(),
                signature: Signature::from_bytes(&[0]),
            })
            .unwrap();
        store.event_mut(idx).round_created = 1;
        store.event_mut(idx).witness = true;
        (store, idx)
    }

    #[test]
    fn record_witness_increments_unknown_fame() {
        let (mut store, witness) = make_store_with_genesis();
        let mut rounds = RoundIndex::new(32);
        rounds.get_or_create(1, &mut store);
        rounds.record_witness(1, witness, &mut store);
        assert_eq!(rounds.get(1).unwrap().num_unknown_fame, 1);
    }

    #[test]
    fn set_famous_decides_round_when_counter_hits_zero() {
        let (mut store, witness) = make_store_with_genesis();
        let mut rounds = RoundIndex::new(32);
        rounds.get_or_create(1, &mut store);
        rounds.record_witness(1, witness, &mut store);
        assert!(rounds.decrement_unknown_fame(1));
        assert!(rounds.get(1).unwrap().fame_decided);
    }
}
