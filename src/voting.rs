//! Virtual Voting Engine (spec.md section 4.3): round-created assignment,
//! witness detection, and the fame election protocol.
use crate::config::Config;
use crate::election::ElectionIndex;
use crate::event::EventIndex;
use crate::member::MemberTable;
use crate::round::RoundIndex;
use crate::store::EventStore;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process a freshly inserted event through round-created assignment,
/// witness detection, and voting, returning the rounds (ascending,
/// deduplicated) whose fame was just fully decided as a result.
pub fn process_new_event(
    store: &mut EventStore,
    rounds: &mut RoundIndex,
    members: &MemberTable,
    config: &Config,
    current_mark: &AtomicU64,
    idx: EventIndex,
) -> Vec<i64> {
    let last_see = compute_last_see(store, idx, members.len());
    store.event_mut(idx).last_see = Some(last_see);

    assign_round_created(store, rounds, members, current_mark, idx);

    let is_witness = {
        let e = store.event(idx);
        match e.self_parent {
            None => true,
            Some(sp) => e.round_created > store.event(sp).round_created,
        }
    };
    store.event_mut(idx).witness = is_witness;

    let fsw = compute_first_self_witness(store, idx);
    store.event_mut(idx).first_self_witness = Some(fsw);
    let fw = compute_first_witness(store, idx);
    store.event_mut(idx).first_witness = Some(fw);

    let mut decided_rounds = Vec::new();

    if is_witness {
        let round = store.event(idx).round_created;
        rounds.get_or_create(round, store);
        rounds.record_witness(round, idx, store);

        if rounds.contains(round + 2) {
            // Theorem (spec.md 4.3): no round-(round+2) event can strongly
            // see a witness this late; this also implements the
            // late-witness rule of spec.md 4.2 (a witness discovered after
            // its round's fame is already decided is always not famous).
            if let Some(r) = decide_fame(store, rounds, idx, false) {
                decided_rounds.push(r);
            }
        } else if rounds.contains(round + 1) {
            rounds.open_election(round + 1, idx, store);
        }

        for election_idx in rounds.elections_in_round(round) {
            if let Some(r) = cast_vote(store, rounds, members, config, current_mark, idx, election_idx) {
                decided_rounds.push(r);
            }
        }
    }

    decided_rounds.sort_unstable();
    decided_rounds.dedup();
    decided_rounds
}

/// `parent-round(x)`: `max(round(self-parent), round(other-parent))`;
/// 0 if both parents are null. Not memoized (spec.md section 4.3).
fn parent_round(store: &EventStore, x: EventIndex) -> i64 {
    let e = store.event(x);
    match (e.self_parent, e.other_parent) {
        (None, None) => 0,
        (sp, op) => {
            let sp_round = sp.map(|i| store.event(i).round_created).unwrap_or(-1);
            let op_round = op.map(|i| store.event(i).round_created).unwrap_or(-1);
            sp_round.max(op_round)
        }
    }
}

/// Round-created assignment (spec.md section 4.3, steps 1-5).
fn assign_round_created(
    store: &mut EventStore,
    rounds: &RoundIndex,
    members: &MemberTable,
    current_mark: &AtomicU64,
    x: EventIndex,
) {
    let (sp, op) = {
        let e = store.event(x);
        (e.self_parent, e.other_parent)
    };

    if sp.is_none() && op.is_none() {
        store.event_mut(x).round_created = 1;
        store.event_mut(x).strongly_see_parent = Some(vec![None; members.len() as usize]);
        return;
    }

    let sp_round = sp.map(|i| store.event(i).round_created).unwrap_or(-1);
    let op_round = op.map(|i| store.event(i).round_created).unwrap_or(-1);
    let p = sp_round.max(op_round);

    if sp_round != op_round {
        store.event_mut(x).round_created = p;
        store.event_mut(x).strongly_see_parent = Some(vec![None; members.len() as usize]);
        return;
    }

    if p == -1 {
        store.event_mut(x).round_created = -1;
        store.event_mut(x).strongly_see_parent = Some(vec![None; members.len() as usize]);
        return;
    }

    let cache = strongly_seen_witnesses(store, current_mark, members, rounds, x, p);
    let yes_stake: u64 = members
        .ids()
        .filter(|&m| cache[m as usize].is_some())
        .map(|m| members.stake(m))
        .sum();
    store.event_mut(x).strongly_see_parent = Some(cache);
    store.event_mut(x).round_created = if members.is_supermajority(yes_stake) { p + 1 } else { p };
}

/// For every member with a witness in `round`, whether `x` strongly sees
/// that witness: `x` strongly sees `w` iff the creators of intermediate
/// events by which `x` reaches `w` hold a supermajority of total stake.
fn strongly_seen_witnesses(
    store: &mut EventStore,
    current_mark: &AtomicU64,
    members: &MemberTable,
    rounds: &RoundIndex,
    x: EventIndex,
    round: i64,
) -> Vec<Option<EventIndex>> {
    let witnesses = rounds.get(round).map(|r| r.witnesses.clone()).unwrap_or_default();
    let mut out = vec![None; members.len() as usize];
    for w in witnesses {
        let m = store.event(w).creator;
        if strongly_sees(store, current_mark, members, x, w) {
            out[m as usize] = Some(w);
        }
    }
    out
}

/// `x` strongly sees `w`: the set of creators `c` such that `w` is an
/// ancestor of `last-see(x, c)` (i.e. some ancestor of `x` created by `c`
/// has already seen `w`) holds a supermajority of total stake.
fn strongly_sees(store: &mut EventStore, current_mark: &AtomicU64, members: &MemberTable, x: EventIndex, w: EventIndex) -> bool {
    let last_see = store.event(x).last_see.clone().expect("last_see must be computed before strongly_sees");
    let mut yes_stake = 0u64;
    for c in members.ids() {
        if let Some(e) = last_see[c as usize] {
            if is_ancestor_or_self(store, current_mark, w, e) {
                yes_stake += members.stake(c);
            }
        }
    }
    members.is_supermajority(yes_stake)
}

/// Whether `maybe_ancestor` is `descendant` itself or a strict ancestor of
/// it, via an explicit-stack DFS stamped with the shared `current-mark`
/// counter (spec.md section 9: avoids a fresh visited-set per traversal
/// and tolerates DAGs deeper than any thread's default stack).
fn is_ancestor_or_self(
    store: &mut EventStore,
    current_mark: &AtomicU64,
    maybe_ancestor: EventIndex,
    descendant: EventIndex,
) -> bool {
    if maybe_ancestor == descendant {
        return true;
    }
    let mark = current_mark.fetch_add(1, Ordering::Relaxed) + 1;
    let mut stack = vec![descendant];
    while let Some(cur) = stack.pop() {
        if cur == maybe_ancestor {
            return true;
        }
        let (already_visited, sp, op) = {
            let e = store.event_mut(cur);
            if e.traversal_mark == mark {
                (true, None, None)
            } else {
                e.traversal_mark = mark;
                (false, e.self_parent, e.other_parent)
            }
        };
        if already_visited {
            continue;
        }
        if let Some(sp) = sp {
            stack.push(sp);
        }
        if let Some(op) = op {
            stack.push(op);
        }
    }
    false
}

/// `last-see(x, m)` for every member `m`, filled in one pass.
fn compute_last_see(store: &EventStore, x: EventIndex, member_count: u32) -> Vec<Option<EventIndex>> {
    let e = store.event(x);
    let creator = e.creator;
    let sp_ls = e.self_parent.map(|i| store.event(i).last_see.clone().expect("last_see must be computed before children are processed"));
    let op_ls = e.other_parent.map(|i| store.event(i).last_see.clone().expect("last_see must be computed before children are processed"));

    let mut out = Vec::with_capacity(member_count as usize);
    for m in 0..member_count {
        if m == creator {
            out.push(Some(x));
            continue;
        }
        let a = sp_ls.as_ref().and_then(|v| v[m as usize]);
        let b = op_ls.as_ref().and_then(|v| v[m as usize]);
        out.push(combine_last_see(store, a, b, m));
    }
    out
}

/// Combine two `last-see(_, m)` candidates inherited from self-parent and
/// other-parent: prefer the one with the greater round, breaking ties by
/// generation. A round tie with divergent `first-see(_, m)` anchors
/// indicates a fork; generation remains a stable, deterministic tiebreak
/// in that case too (see DESIGN.md for why this is safe).
fn combine_last_see(
    store: &EventStore,
    a: Option<EventIndex>,
    b: Option<EventIndex>,
    m: u32,
) -> Option<EventIndex> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => {
            let rx = store.event(x).round_created;
            let ry = store.event(y).round_created;
            if rx != ry {
                return Some(if rx > ry { x } else { y });
            }
            let _ = m; // first-see anchors only motivate *why* the generation
                       // tiebreak is safe here; they do not gate it (see DESIGN.md).
            let gx = store.event(x).generation;
            let gy = store.event(y).generation;
            Some(if gx >= gy { x } else { y })
        }
    }
}

/// `first-self-witness(x)`: the earliest self-ancestor of `x` in the same
/// round as `x`.
fn compute_first_self_witness(store: &EventStore, x: EventIndex) -> EventIndex {
    let e = store.event(x);
    match e.self_parent {
        None => x,
        Some(sp) => {
            if e.round_created > store.event(sp).round_created {
                x
            } else {
                store.event(sp).first_self_witness.expect("self-parent's first_self_witness must already be memoized")
            }
        }
    }
}

/// `first-witness(x)`: the earliest ancestor of `x` (self or other path)
/// that is a witness in the same round as `x`.
fn compute_first_witness(store: &EventStore, x: EventIndex) -> EventIndex {
    let e = store.event(x);
    if e.witness {
        return x;
    }
    let sp = e.self_parent.expect("a non-witness always has a self-parent in the same round");
    let sp_fw = store.event(sp).first_witness.expect("self-parent's first_witness must already be memoized");
    if let Some(op) = e.other_parent {
        let op_round = store.event(op).round_created;
        if op_round == e.round_created {
            let op_fw = store.event(op).first_witness.expect("other-parent's first_witness must already be memoized");
            let g_sp = store.event(sp_fw).generation;
            let g_op = store.event(op_fw).generation;
            return if g_op < g_sp { op_fw } else { sp_fw };
        }
    }
    sp_fw
}

/// `first-see(x, m) = first-self-witness(last-see(x, m))`.
fn first_see(store: &EventStore, x: EventIndex, m: u32) -> Option<EventIndex> {
    let candidate = store.event(x).last_see.as_ref().expect("last_see must be computed")[m as usize]?;
    Some(store.event(candidate).first_self_witness.expect("candidate's first_self_witness must already be memoized"))
}

/// Age-1 vote: `x` votes TRUE iff `t` is a self-ancestor of
/// `first-see(x, t.creator)`, walked back through self-parents until
/// `round-created <= t.round-created`.
fn vote_age_one(store: &EventStore, voter: EventIndex, target: EventIndex) -> bool {
    let target_creator = store.event(target).creator;
    let target_round = store.event(target).round_created;
    let mut cur = match first_see(store, voter, target_creator) {
        Some(c) => c,
        None => return false,
    };
    loop {
        let round_created = store.event(cur).round_created;
        if round_created <= target_round {
            break;
        }
        match store.event(cur).self_parent {
            Some(sp) => cur = sp,
            None => return false,
        }
    }
    cur == target
}

/// Sum the stake of witnesses in `round` that `voter` strongly sees,
/// split by the vote each cast (in the election with the same target, one
/// round earlier); an unknown/missing vote index counts as NO.
fn tally_strongly_seen_votes(
    store: &mut EventStore,
    rounds: &RoundIndex,
    members: &MemberTable,
    current_mark: &AtomicU64,
    voter: EventIndex,
    prior_round: i64,
    prev_election_idx: ElectionIndex,
) -> (u64, u64) {
    let witnesses = rounds.get(prior_round).map(|r| r.witnesses.clone()).unwrap_or_default();
    let mut yes = 0u64;
    let mut no = 0u64;
    for w in witnesses {
        let m = store.event(w).creator;
        if !strongly_sees(store, current_mark, members, voter, w) {
            continue;
        }
        let slot = rounds
            .get(prior_round)
            .unwrap()
            .witnesses
            .iter()
            .position(|&e| e == w)
            .expect("witness must be recorded in its own round");
        let vote = rounds.election(prev_election_idx).votes.get(slot).copied().flatten();
        match vote {
            Some(true) => yes += members.stake(m),
            Some(false) | None => no += members.stake(m),
        }
    }
    (yes, no)
}

/// Cast `voter`'s vote in `election_idx`, applying majority, supermajority,
/// and coin-round rules. Returns the round whose fame was just fully
/// decided, if this vote did so.
fn cast_vote(
    store: &mut EventStore,
    rounds: &mut RoundIndex,
    members: &MemberTable,
    config: &Config,
    current_mark: &AtomicU64,
    voter: EventIndex,
    election_idx: ElectionIndex,
) -> Option<i64> {
    let round = store.event(voter).round_created;
    let (target, age, already_decided) = {
        let e = rounds.election(election_idx);
        (e.target, e.age, e.decided)
    };
    if already_decided {
        return None;
    }
    let slot = rounds
        .get(round)
        .unwrap()
        .witnesses
        .iter()
        .position(|&w| w == voter)
        .expect("voter must already be recorded as a witness of its own round");

    if age == 1 {
        let vote = vote_age_one(store, voter, target);
        rounds.election_mut(election_idx).votes[slot] = Some(vote);
        return None;
    }

    let prev_election_idx = rounds
        .election(election_idx)
        .prev_round_election
        .expect("an age>=2 election must chain from a prior round's election");
    let (yes_stake, no_stake) = tally_strongly_seen_votes(
        store,
        rounds,
        members,
        current_mark,
        voter,
        round - 1,
        prev_election_idx,
    );

    let is_coin_round = age % config.coin_freq as i64 == 0;

    if is_coin_round {
        let vote = if members.is_supermajority(yes_stake) {
            true
        } else if members.is_supermajority(no_stake) {
            false
        } else {
            let coin_round_number = age / config.coin_freq as i64;
            if coin_round_number % 2 == 1 {
                store.event(voter).signature.coin_bit()
            } else {
                true
            }
        };
        rounds.election_mut(election_idx).votes[slot] = Some(vote);
        return None;
    }

    let vote = yes_stake >= no_stake;
    rounds.election_mut(election_idx).votes[slot] = Some(vote);
    let decided = if vote {
        members.is_supermajority(yes_stake)
    } else {
        members.is_supermajority(no_stake)
    };
    if decided {
        rounds.election_mut(election_idx).decided = true;
        decide_fame(store, rounds, target, vote)
    } else {
        None
    }
}

/// Sets `target`'s fame and decrements its round's unknown-fame counter,
/// returning the round if that decrement just fully decided it.
fn decide_fame(store: &mut EventStore, rounds: &mut RoundIndex, target: EventIndex, famous: bool) -> Option<i64> {
    store.event_mut(target).famous = Some(famous);
    let round = store.event(target).round_created;
    log::trace!("witness {:?} decided famous={} in round {}", store.event(target).hash, famous, round);
    if rounds.decrement_unknown_fame(round) {
        log::debug!("round {} fame fully decided", round);
        Some(round)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NewEvent;
    use crate::hash::Signature;

    fn new_event(creator: u32, sequence: u32, self_parent_hash: Option<crate::hash::Hash>, other_parent_hash: Option<crate::hash::Hash>) -> NewEvent {
        NewEvent {
            creator,
            sequence,
            self_parent_hash,
            other_parent_hash,
            timestamp_created: sequence as i64,
            transactions: Vec::new(),
            signature: Signature::from_bytes(&[creator as u8, sequence as u8]),
        }
    }

    #[test]
    fn genesis_event_is_witness_in_round_one() {
        let mut store = EventStore::new(4);
        let mut rounds = RoundIndex::new(32);
        let members = MemberTable::uniform(4);
        let config = Config::default();
        let mark = AtomicU64::new(0);

        let g = store.insert(new_event(0, 0, None, None)).unwrap();
        let decided = process_new_event(&mut store, &mut rounds, &members, &config, &mark, g);
        assert!(decided.is_empty());
        assert_eq!(store.event(g).round_created, 1);
        assert!(store.event(g).witness);
        assert_eq!(rounds.get(1).unwrap().num_unknown_fame, 1);
    }

    #[test]
    fn round_advances_on_strongly_seen_supermajority() {
        // Four creators each produce a round-1 witness; a fifth event by
        // creator 0, with other-parent reaching creators 1 and 2's
        // witnesses, then strongly sees 3/4 of round-1 witnesses
        // (including its own via self-parent), a 3/4 > 2/3 supermajority.
        let mut store = EventStore::new(4);
        let mut rounds = RoundIndex::new(32);
        let members = MemberTable::uniform(4);
        let config = Config::default();
        let mark = AtomicU64::new(0);

        let g0 = store.insert(new_event(0, 0, None, None)).unwrap();
        process_new_event(&mut store, &mut rounds, &members, &config, &mark, g0);
        let h0 = store.event(g0).hash;

        let g1 = store.insert(new_event(1, 0, None, None)).unwrap();
        process_new_event(&mut store, &mut rounds, &members, &config, &mark, g1);
        let h1 = store.event(g1).hash;

        let g2 = store.insert(new_event(2, 0, None, None)).unwrap();
        process_new_event(&mut store, &mut rounds, &members, &config, &mark, g2);
        let h2 = store.event(g2).hash;

        let g3 = store.insert(new_event(3, 0, None, None)).unwrap();
        process_new_event(&mut store, &mut rounds, &members, &config, &mark, g3);

        // creator 0's second event syncs with creator 1.
        let e_0_1 = store.insert(new_event(0, 1, Some(h0), Some(h1))).unwrap();
        process_new_event(&mut store, &mut rounds, &members, &config, &mark, e_0_1);
        let h_0_1 = store.event(e_0_1).hash;

        // creator 0's third event syncs with creator 2: now it can see
        // round-1 witnesses from creators 0, 1, 2 — a 3/4 supermajority.
        let e_0_2 = store.insert(new_event(0, 2, Some(h_0_1), Some(h2))).unwrap();
        process_new_event(&mut store, &mut rounds, &members, &config, &mark, e_0_2);

        assert_eq!(store.event(e_0_2).round_created, 2);
        assert!(store.event(e_0_2).witness);
    }

    #[test]
    fn exact_two_thirds_does_not_advance_round() {
        let mut store = EventStore::new(4);
        let mut rounds = RoundIndex::new(32);
        let members = MemberTable::uniform(4);
        let config = Config::default();
        let mark = AtomicU64::new(0);

        let g0 = store.insert(new_event(0, 0, None, None)).unwrap();
        process_new_event(&mut store, &mut rounds, &members, &config, &mark, g0);
        let h0 = store.event(g0).hash;

        let g1 = store.insert(new_event(1, 0, None, None)).unwrap();
        process_new_event(&mut store, &mut rounds, &members, &config, &mark, g1);
        let h1 = store.event(g1).hash;

        store.insert(new_event(2, 0, None, None)).unwrap();
        store.insert(new_event(3, 0, None, None)).unwrap();

        // creator 0 only ever reaches creators 0 and 1: exactly 2/4 stake,
        // not a supermajority (2*2 == 4, not > 4).
        let e = store.insert(new_event(0, 1, Some(h0), Some(h1))).unwrap();
        process_new_event(&mut store, &mut rounds, &members, &config, &mark, e);
        assert_eq!(store.event(e).round_created, 1);
        assert!(!store.event(e).witness);
    }

    #[test]
    fn first_coin_round_votes_the_signature_bit_not_unconditional_true() {
        // spec.md section 8 scenario 3: age == coin_freq (here 12), no
        // supermajority either way, so coin_round_number == 1 (odd) and the
        // vote must be the voter's own coin_bit(), not an unconditional true.
        let mut store = EventStore::new(4);
        let mut rounds = RoundIndex::new(32);
        let members = MemberTable::uniform(4);
        let config = Config::default();

        let target = store.insert(new_event(0, 0, None, None)).unwrap();
        store.event_mut(target).round_created = 1;
        store.event_mut(target).witness = true;
        rounds.get_or_create(1, &mut store);
        rounds.record_witness(1, target, &mut store);
        rounds.open_election(2, target, &mut store);
        for round in 3..=13 {
            rounds.get_or_create(round, &mut store);
        }

        let voter = store.insert(new_event(1, 0, None, None)).unwrap();
        store.event_mut(voter).round_created = 13;
        store.event_mut(voter).witness = true;
        rounds.record_witness(13, voter, &mut store);

        let election_idx = rounds.elections_in_round(13)[0];
        assert_eq!(rounds.election(election_idx).age, 12);

        let mark = AtomicU64::new(0);
        let decided = cast_vote(&mut store, &mut rounds, &members, &config, &mark, voter, election_idx);
        assert!(decided.is_none());
        assert_eq!(
            rounds.election(election_idx).votes[0],
            Some(store.event(voter).signature.coin_bit())
        );
    }
}
