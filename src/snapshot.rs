//! Bootstrap from a persisted state (spec.md section 6): reconstructing an
//! engine from a previously committed consensus order instead of replaying
//! every event from genesis.
use crate::config::Config;
use crate::error::Error;
use crate::event::NewEvent;
use crate::graph::Hashgraph;
use crate::hash::{Hash, Signature};
use crate::member::MemberTable;
use std::collections::BTreeMap;

/// One previously committed event, as carried in a signed state file.
#[derive(Clone, Debug)]
pub struct SnapshotEvent {
    /// Creator member id.
    pub creator: u32,
    /// Per-creator sequence number.
    pub sequence: u32,
    /// Hash of the creator's previous event, if any.
    pub self_parent_hash: Option<Hash>,
    /// Hash of the cross-creator parent, if any.
    pub other_parent_hash: Option<Hash>,
    /// Creator-asserted creation time.
    pub timestamp_created: i64,
    /// Opaque transaction payloads, in order.
    pub transactions: Vec<Box<[u8]>>,
    /// Creator's signature over the hashed-data region.
    pub signature: Signature,
    /// Round this event was created in.
    pub round_created: i64,
    /// Round in which this event was received by consensus.
    pub round_received: i64,
    /// Median-derived consensus timestamp.
    pub consensus_timestamp: i64,
    /// Monotonic global order assigned to this event.
    pub consensus_order: u64,
}

/// A persisted consensus state: every event that has reached consensus,
/// ordered by `consensus_order`, plus the bookkeeping the engine needs to
/// resume issuing new `consensus_order`/`min_timestamp` values without
/// replaying history.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Events that reached consensus, in ascending `consensus_order`.
    pub events: Vec<SnapshotEvent>,
    /// Highest `round_received` among `events`.
    pub last_round_received: i64,
    /// Highest consensus timestamp assigned to any transaction in `events`.
    pub last_transaction_timestamp: i64,
    /// Minimum generation observed for each round still relevant to
    /// expiry bookkeeping.
    pub min_generation_by_round: BTreeMap<i64, i64>,
}

/// Reconstruct an engine from `snapshot`: every event is admitted with its
/// previously decided fields intact (no re-election), rounds up to
/// `last_round_received` are marked fame-decided directly, and the
/// lock-free counters resume exactly where the snapshot left off.
pub fn bootstrap(members: MemberTable, config: Config, snapshot: Snapshot) -> Result<Hashgraph, Error> {
    config.validate()?;
    let engine = Hashgraph::new(members, config)?;

    let mut ordered = snapshot.events;
    ordered.sort_by_key(|e| e.consensus_order);

    for (round, min_generation) in &snapshot.min_generation_by_round {
        engine.restore_round(*round, *min_generation);
    }

    for e in &ordered {
        let new = NewEvent {
            creator: e.creator,
            sequence: e.sequence,
            self_parent_hash: e.self_parent_hash,
            other_parent_hash: e.other_parent_hash,
            timestamp_created: e.timestamp_created,
            transactions: e.transactions.clone(),
            signature: e.signature.clone(),
        };
        engine.restore_event(
            new,
            e.round_created,
            e.round_received,
            e.consensus_timestamp,
            e.consensus_order,
        )?;
    }

    engine.restore_counters(
        snapshot.last_round_received,
        ordered.last().map(|e| e.consensus_order + 1).unwrap_or(0),
        snapshot.last_transaction_timestamp,
    );

    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_from_empty_snapshot_starts_at_zero() {
        let snapshot = Snapshot {
            events: Vec::new(),
            last_round_received: 0,
            last_transaction_timestamp: 0,
            min_generation_by_round: BTreeMap::new(),
        };
        let engine = bootstrap(MemberTable::uniform(4), Config::default(), snapshot).unwrap();
        assert_eq!(engine.get_num_consensus(), 0);
        assert_eq!(engine.get_last_round_decided(), 0);
    }

    #[test]
    fn bootstrap_replays_one_committed_event() {
        let snapshot = Snapshot {
            events: vec![SnapshotEvent {
                creator: 0,
                sequence: 0,
                self_parent_hash: None,
                other_parent_hash: None,
                timestamp_created: 10,
                transactions: Vec::new(),
                signature: Signature::from_bytes(&[0, 1, 2, 3]),
                round_created: 1,
                round_received: 1,
                consensus_timestamp: 10,
                consensus_order: 0,
            }],
            last_round_received: 1,
            last_transaction_timestamp: 10,
            min_generation_by_round: {
                let mut m = BTreeMap::new();
                m.insert(1, 0);
                m
            },
        };
        let engine = bootstrap(MemberTable::uniform(4), Config::default(), snapshot).unwrap();
        assert_eq!(engine.get_num_consensus(), 1);
        assert_eq!(engine.get_last_round_decided(), 1);
    }
}
