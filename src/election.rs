//! Elections: the virtual-voting ballots cast over witness fame.
//!
//! Per the Design Notes (spec.md section 9), elections are modeled as two
//! intrusive doubly linked lists realized as index pairs into an
//! `Election` arena rather than as per-link heap allocations: one list
//! runs across rounds for a fixed target witness, the other runs across
//! all target witnesses within a fixed round.
use crate::event::EventIndex;

/// Stable index of an `Election` inside its arena.
pub type ElectionIndex = usize;

/// `(round-of-election, target-witness, age, prev-round-election,
/// vote-bitmap)` from spec.md section 3, plus the linked-list pointers
/// that realize the two orthogonal chains described in section 9.
#[derive(Clone, Debug)]
pub struct Election {
    /// The round casting votes in this election.
    pub round_of_election: i64,
    /// The witness whose fame is being decided.
    pub target: EventIndex,
    /// `round_of_election - target.round_created`.
    pub age: i64,
    /// `vote_bitmap[i]` is the vote cast by the i-th witness of
    /// `round_of_election`, extended by one slot each time that round
    /// records a new witness.
    pub votes: Vec<Option<bool>>,
    /// Set once a majority/supermajority decision has been reached.
    pub decided: bool,

    /// Same target, one round earlier (the chain `record-witness`
    /// advances through `get-or-create`).
    pub prev_round_election: Option<ElectionIndex>,
    /// Same target, one round later.
    pub next_round_election: Option<ElectionIndex>,

    /// Next election (different target) opened in the same round.
    pub next_in_round: Option<ElectionIndex>,
    /// Previous election (different target) opened in the same round.
    pub prev_in_round: Option<ElectionIndex>,
}

impl Election {
    /// A freshly opened election with no votes cast yet.
    pub fn new(round_of_election: i64, target: EventIndex, target_round_created: i64) -> Self {
        Self {
            round_of_election,
            target,
            age: round_of_election - target_round_created,
            votes: Vec::new(),
            decided: false,
            prev_round_election: None,
            next_round_election: None,
            next_in_round: None,
            prev_in_round: None,
        }
    }

    /// Extend the vote bitmap by one uninitialized slot, as
    /// `record-witness` requires of every open election in a round.
    pub fn extend_votes(&mut self) {
        self.votes.push(None);
    }
}
