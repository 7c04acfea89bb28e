//! Defines an event and its derived consensus properties.
//!
//! Per the Design Notes (spec.md section 9) this models the reference
//! algorithm's per-event mutable caches as an arena-of-events: events live
//! in `EventStore`'s slab and are referenced by a stable `EventIndex`
//! rather than by pointer or by hash, so the memoized graph functions
//! (`last-see`, `strongly-see-parent`, `first-witness`,
//! `first-self-witness`) can be fixed-width arrays sized to the member
//! count instead of per-node allocations.
use crate::election::ElectionIndex;
use crate::hash::{hash_bytes, Hash, Signature};
use serde::{Deserialize, Serialize};

/// Stable index of an event inside an `EventStore`'s arena.
pub type EventIndex = usize;

/// The *hashed-data* region of the wire format (spec.md section 6):
/// exactly the fields that feed the event hash. *unhashed-data*
/// (signature, other-id) is deliberately excluded, preserving the split
/// existing signed-state files rely on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HashedData {
    /// Creator member id.
    pub creator: u32,
    /// Hash of the creator's previous event, if any.
    pub self_parent_hash: Option<Hash>,
    /// Hash of the cross-creator parent, if any.
    pub other_parent_hash: Option<Hash>,
    /// Generation of the self-parent, -1 if absent.
    pub self_parent_gen: i64,
    /// Generation of the other-parent, -1 if absent.
    pub other_parent_gen: i64,
    /// Creator-asserted creation time, nanoseconds since an epoch fixed by
    /// the caller.
    pub timestamp_created: i64,
    /// Opaque transaction payloads, in order.
    pub transactions: Vec<Box<[u8]>>,
}

impl HashedData {
    /// The event hash: a hash over exactly this region, bincode-encoded.
    pub fn hash(&self) -> Hash {
        let bytes = bincode::serialize(self).expect("HashedData is always serializable");
        hash_bytes(&bytes)
    }
}

/// A caller-constructed event, not yet admitted to the store.
///
/// Represents a signed event as it arrives from gossip: the hashed-data
/// region plus the unhashed-data region (signature). The store computes
/// `generation` and the event hash from the looked-up parents and the
/// hashed-data region, respectively.
#[derive(Clone, Debug)]
pub struct NewEvent {
    /// Creator member id.
    pub creator: u32,
    /// Monotonically increasing sequence number for this creator, from 0.
    pub sequence: u32,
    /// Hash of the creator's previous event, if any.
    pub self_parent_hash: Option<Hash>,
    /// Hash of the cross-creator parent, if any.
    pub other_parent_hash: Option<Hash>,
    /// Creator-asserted creation time.
    pub timestamp_created: i64,
    /// Opaque transaction payloads, in order.
    pub transactions: Vec<Box<[u8]>>,
    /// Creator's signature over the hashed-data region (unhashed-data).
    pub signature: Signature,
}

/// A hashgraph event, with its derived consensus state.
#[derive(Clone, Debug)]
pub struct Event {
    // --- essential attributes (spec.md section 3), immutable post-insert ---
    /// Creator member id.
    pub creator: u32,
    /// Per-creator monotonically increasing sequence number, from 0.
    pub sequence: u32,
    /// Arena index of the creator's previous event.
    pub self_parent: Option<EventIndex>,
    /// Arena index of the cross-creator parent.
    pub other_parent: Option<EventIndex>,
    /// Hash of the self-parent, retained even after `self_parent` is
    /// cleared by expiry.
    pub self_parent_hash: Option<Hash>,
    /// Hash of the other-parent, retained even after `other_parent` is
    /// cleared by expiry.
    pub other_parent_hash: Option<Hash>,
    /// Creator-asserted creation time.
    pub timestamp_created: i64,
    /// Opaque transaction payloads, in order.
    pub transactions: Vec<Box<[u8]>>,
    /// Creator's signature over the hashed-data region.
    pub signature: Signature,
    /// Hash of the hashed-data region; this event's content address.
    pub hash: Hash,
    /// `1 + max(self_parent.generation, other_parent.generation)`, with
    /// missing parents contributing -1.
    pub generation: i64,

    // --- derived / consensus attributes, mutated by the engine ---
    /// Round assigned by the virtual voting engine, or -1 if unassigned.
    pub round_created: i64,
    /// Whether this event is the first by its creator in `round_created`.
    pub witness: bool,
    /// `None` until fame is decided; `Some(famous)` once decided.
    pub famous: Option<bool>,
    /// Round in which this event was first witnessed by all judges.
    pub round_received: Option<i64>,
    /// Median-derived consensus timestamp, once `round_received` is set.
    pub consensus_timestamp: Option<i64>,
    /// Monotonic global order, once consensus is reached.
    pub consensus_order: Option<u64>,
    /// Permanently excluded from consensus (fell behind the expiry window).
    pub stale: bool,
    /// Ancestor of a committed judge; `round_created` will not be
    /// recomputed on subsequent member-table updates.
    pub frozen: bool,

    // --- memoized graph functions (spec.md section 4.3 / section 9) ---
    /// `last-see(self, m)` for every member `m`, filled in one pass.
    pub(crate) last_see: Option<Vec<Option<EventIndex>>>,
    /// `first-self-witness(self)`.
    pub(crate) first_self_witness: Option<EventIndex>,
    /// `first-witness(self)`.
    pub(crate) first_witness: Option<EventIndex>,
    /// `strongly-see-parent(self, m)` for every member `m`.
    pub(crate) strongly_see_parent: Option<Vec<Option<EventIndex>>>,

    /// Earliest still-open election whose target is this witness.
    pub(crate) earliest_open_election: Option<ElectionIndex>,

    /// Stamp from the ordering engine's ancestor traversal, used instead
    /// of per-pass visited-set clearing (Design Notes: current-mark).
    pub(crate) traversal_mark: u64,
    /// First-receipt instants recorded for this event's consensus
    /// timestamp, keyed by the traversal that is currently filling them.
    pub(crate) rec_times: Vec<i64>,

    /// Children, tracked only so expiry can unlink references in both
    /// directions; cleared on expiry.
    pub(crate) children: Vec<EventIndex>,
}

impl Event {
    /// Whether this event has fame decided (derived from `famous`).
    pub fn fame_decided(&self) -> bool {
        self.famous.is_some()
    }

    /// Whether this event has neither parent: a genesis event.
    pub fn is_genesis(&self) -> bool {
        self.self_parent.is_none() && self.other_parent.is_none()
    }

    /// Whether this event has reached consensus.
    pub fn is_consensus(&self) -> bool {
        self.consensus_order.is_some()
    }

    /// Clear outbound references so the arena slot's heavy data can be
    /// reclaimed, per spec.md section 4.1 `expire`. Identity, hash, and
    /// already-decided consensus fields are preserved: late-arriving
    /// queries about an event's consensus status must keep working even
    /// after its ancestry is gone.
    pub(crate) fn clear_references(&mut self) {
        self.self_parent = None;
        self.other_parent = None;
        self.children.clear();
        self.transactions.clear();
        self.last_see = None;
        self.strongly_see_parent = None;
        self.first_self_witness = None;
        self.first_witness = None;
        self.rec_times.clear();
    }
}
