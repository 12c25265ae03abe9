//! The steady-state write path, optimistic-concurrency conflicts, and
//! primary failover (spec §4.7). Grounded on
//! `original_source/.../VoterStore.cpp`'s read/write/catch-up async
//! operations, adapted from its callback-chained `AsyncOperation`s to
//! direct calls over a single lock — this crate has no transport of its
//! own, so quorum acknowledgement is driven by the caller (`ack_secondary`)
//! rather than by outbound sends this crate would otherwise own.

use crate::replica::{Replica, ReplicaPhase, ReplicaSet};
use crate::value::StoreValue;
use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use federation_ring::NodeInstance;
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};
use std::time::Instant;

/// A write that could not start immediately because another write on the
/// same key is still awaiting secondary acknowledgement.
#[derive(Clone, Debug)]
struct QueuedWrite {
    value: StoreValue,
    check_sequence: Option<i64>,
    request_id: u64,
}

/// A write that has been assigned a sequence and is waiting for every live
/// secondary captured at the moment it started to acknowledge it.
#[derive(Clone, Debug)]
struct PendingWrite {
    value: StoreValue,
    sequence: i64,
    request_id: u64,
    required: HashSet<NodeInstance>,
    acked_by: HashSet<NodeInstance>,
}

#[derive(Default)]
struct StoreEntry {
    sequence: i64,
    current: Option<StoreValue>,
    pending: Option<PendingWrite>,
    queue: VecDeque<QueuedWrite>,
}

/// The outcome of a single `write` call.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    /// Committed without waiting: either there were no live secondaries to
    /// wait on, or the replica set has only this primary.
    Committed { value: StoreValue, sequence: i64 },
    /// `check_sequence` no longer matched the committed sequence; the
    /// caller gets the current value and sequence to retry against.
    Conflict { current: Option<StoreValue>, sequence: i64 },
    /// A write on this key is already pending; this one was appended to
    /// the per-key queue and starts once the pending write commits.
    Queued,
}

struct VoterStoreState {
    phase: ReplicaPhase,
    replica_set: ReplicaSet,
    highest_sequence: i64,
    entries: std::collections::HashMap<String, StoreEntry>,
    down_voters: HashSet<federation_ring::NodeId>,
}

/// A single voter's view of the replicated key-value store (spec §4.7).
///
/// Holds no transport or timers of its own: membership transitions,
/// quorum acknowledgement, and retries are driven by the caller (the node
/// wiring this crate together with `federation-membership` and
/// `federation-transport`).
pub struct VoterStore {
    state: RwLock<VoterStoreState>,
    self_instance: NodeInstance,
}

fn readiness_error(phase: ReplicaPhase, needs_write: bool) -> Option<ErrorCode> {
    match phase {
        ReplicaPhase::Primary => None,
        ReplicaPhase::BecomePrimary | ReplicaPhase::Secondary | ReplicaPhase::BecomeSecondary | ReplicaPhase::Bootstrap => {
            if needs_write {
                Some(ErrorCode::NotPrimary)
            } else {
                Some(ErrorCode::NotReady)
            }
        }
        ReplicaPhase::Uninitialized | ReplicaPhase::None | ReplicaPhase::Invalid | ReplicaPhase::Introduce => {
            Some(ErrorCode::NotReady)
        }
    }
}

impl VoterStore {
    pub fn new(self_instance: NodeInstance) -> Self {
        Self {
            state: RwLock::new(VoterStoreState {
                phase: ReplicaPhase::Uninitialized,
                replica_set: ReplicaSet {
                    generation: 0,
                    epoch: 0,
                    replicas: Vec::new(),
                },
                highest_sequence: 0,
                entries: std::collections::HashMap::new(),
                down_voters: HashSet::new(),
            }),
            self_instance,
        }
    }

    pub fn phase(&self) -> ReplicaPhase {
        self.state.read().phase
    }

    pub fn generation_epoch(&self) -> (u64, u64) {
        let state = self.state.read();
        (state.replica_set.generation, state.replica_set.epoch)
    }

    pub fn replica_count(&self) -> usize {
        self.state.read().replica_set.replicas.len()
    }

    /// A point-in-time clone of the replica set, for handing to a
    /// would-be secondary via a config-query reply (spec §4.7).
    pub fn replica_set_snapshot(&self) -> ReplicaSet {
        self.state.read().replica_set.clone()
    }

    /// The primary's own view of the global write-log watermark, for a
    /// failover candidate's `ProgressRequest` reply.
    pub fn highest_sequence(&self) -> i64 {
        self.state.read().highest_sequence
    }

    /// Every committed entry, for catching up a newly admitted secondary
    /// (spec §4.7's bootstrap catch-up collapsed into one config-query
    /// reply rather than a separate `Sync`).
    pub fn entries_snapshot(&self) -> (Vec<(String, StoreValue, i64)>, i64) {
        let state = self.state.read();
        let entries = state
            .entries
            .iter()
            .filter_map(|(key, entry)| entry.current.clone().map(|value| (key.clone(), value, entry.sequence)))
            .collect();
        (entries, state.highest_sequence)
    }

    /// Applies a primary's per-write `Sync` push directly (spec §4.7's
    /// steady-state replication): a secondary has no quorum of its own to
    /// wait on, it just records what the primary already committed. A
    /// lower sequence than what's already on file is ignored rather than
    /// rejected, since a retransmitted or reordered push is expected, not
    /// an error.
    pub fn apply_replicated_write(&self, key: &str, value: StoreValue, sequence: i64) {
        let mut state = self.state.write();
        state.highest_sequence = state.highest_sequence.max(sequence);
        let entry = state.entries.entry(key.to_string()).or_default();
        if sequence >= entry.sequence {
            entry.sequence = sequence;
            entry.current = Some(value);
        }
    }

    /// Fast path for a solo voter winning the bootstrap race with nobody
    /// else yet to copy from: becomes `Primary` of a brand-new,
    /// single-member replica set immediately (spec §4.7's bootstrap race,
    /// collapsed — see `bootstrap::next_generation`).
    pub fn bootstrap_as_primary(&self, leader_instance_tick: u64, now: Instant) {
        let mut state = self.state.write();
        let generation = crate::bootstrap::next_generation(leader_instance_tick, state.replica_set.generation);
        state.replica_set = ReplicaSet {
            generation,
            epoch: 1,
            replicas: vec![Replica::new(self.self_instance, now)],
        };
        state.phase = ReplicaPhase::Primary;
        state.entries.clear();
        state.highest_sequence = 0;
    }

    /// Collapses the copy-then-catch-up sequence (`Bootstrap` →
    /// `BecomeSecondary` → `Secondary`) into one call: accepts a
    /// replica-set view and a snapshot of committed key/value pairs handed
    /// down by the primary, and becomes a caught-up secondary.
    pub fn accept_secondary_bootstrap(
        &self,
        replica_set: ReplicaSet,
        snapshot: Vec<(String, StoreValue, i64)>,
        highest_sequence: i64,
    ) -> Result<()> {
        let mut state = self.state.write();
        if state.replica_set.is_stale_against(replica_set.generation, replica_set.epoch) {
            return Err(FederationError::new(ErrorCode::StaleRequest, "bootstrap source is behind our generation/epoch"));
        }
        state.entries.clear();
        for (key, value, sequence) in snapshot {
            state.entries.insert(
                key,
                StoreEntry {
                    sequence,
                    current: Some(value),
                    pending: None,
                    queue: VecDeque::new(),
                },
            );
        }
        state.highest_sequence = highest_sequence;
        state.replica_set = replica_set;
        state.phase = ReplicaPhase::Secondary;
        Ok(())
    }

    /// Primary failover (spec §4.7): the new primary adopts the highest
    /// sequence any surviving replica reports, bumps the epoch so stale
    /// in-flight requests from the old primary are rejected by comparison
    /// alone, and drops replicas reported down.
    ///
    /// `local_index` is this candidate's position among the surviving
    /// replicas at the moment of failover (not a persistent id), so two
    /// failovers of the same generation never collide on the same epoch
    /// value even if they occur in quick succession.
    pub fn promote_to_primary(&self, local_index: u64, progress: &[(NodeInstance, i64)], down: &[NodeInstance]) -> Result<()> {
        let mut state = self.state.write();
        if state.phase != ReplicaPhase::BecomePrimary && state.phase != ReplicaPhase::Secondary {
            return Err(FederationError::new(
                ErrorCode::InvalidConfiguration,
                "only a secondary entering BecomePrimary may complete a failover",
            ));
        }
        let adopted = progress
            .iter()
            .map(|(_, seq)| *seq)
            .chain(std::iter::once(state.highest_sequence))
            .max()
            .unwrap_or(state.highest_sequence);
        state.highest_sequence = adopted;
        state.replica_set.epoch += local_index * 0x1_0000_0000 + 1;
        state
            .replica_set
            .replicas
            .retain(|r| !down.iter().any(|d| d.is_same_node(r.instance)));
        if let Some(primary) = state.replica_set.replicas.first_mut() {
            primary.instance = self.self_instance;
        } else {
            state.replica_set.replicas.push(Replica::new(self.self_instance, Instant::now()));
        }
        state.phase = ReplicaPhase::Primary;
        Ok(())
    }

    /// Admits a new voter into the replica set. Primary-only; the new
    /// replica starts at sequence 0 and is caught up out of band via
    /// `accept_secondary_bootstrap` on its side.
    pub fn admit_replica(&self, instance: NodeInstance, now: Instant) -> Result<()> {
        let mut state = self.state.write();
        if state.phase != ReplicaPhase::Primary {
            return Err(FederationError::from_code(ErrorCode::NotPrimary));
        }
        if state.replica_set.replicas.iter().any(|r| r.instance.is_same_node(instance)) {
            return Err(FederationError::from_code(ErrorCode::AlreadyExists));
        }
        state.replica_set.replicas.push(Replica::new(instance, now));
        Ok(())
    }

    pub fn mark_down(&self, instance: NodeInstance) {
        let mut state = self.state.write();
        if let Some(replica) = state.replica_set.find_mut(instance) {
            replica.is_down = true;
        }
        state.down_voters.insert(instance.id);
    }

    pub fn mark_up(&self, instance: NodeInstance, now: Instant) {
        let mut state = self.state.write();
        if let Some(replica) = state.replica_set.find_mut(instance) {
            replica.is_down = false;
            replica.last_contact = now;
        }
        state.down_voters.remove(&instance.id);
    }

    pub fn down_voters(&self) -> Vec<federation_ring::NodeId> {
        self.state.read().down_voters.iter().copied().collect()
    }

    pub fn merge_down_voters(&self, incoming: &[federation_ring::NodeId]) {
        let mut state = self.state.write();
        state.down_voters.extend(incoming.iter().copied());
    }

    pub fn read(&self, key: &str) -> Result<(Option<StoreValue>, i64)> {
        let state = self.state.read();
        if let Some(code) = readiness_error(state.phase, false) {
            return Err(FederationError::from_code(code));
        }
        match state.entries.get(key) {
            Some(entry) => Ok((entry.current.clone(), entry.sequence)),
            None => Ok((None, 0)),
        }
    }

    /// Starts a write. `check_sequence`, when given, must match the key's
    /// currently committed sequence or the write is rejected with
    /// `WriteOutcome::Conflict` rather than applied — the optimistic
    /// concurrency control a read-modify-write loop relies on.
    pub fn write(&self, key: &str, value: StoreValue, check_sequence: Option<i64>, request_id: u64) -> Result<WriteOutcome> {
        let mut state = self.state.write();
        if let Some(code) = readiness_error(state.phase, true) {
            return Err(FederationError::from_code(code));
        }
        let replica_count = state.replica_set.replicas.len();
        let highest_sequence = state.highest_sequence;
        let entry = state.entries.entry(key.to_string()).or_default();

        if let Some(pending) = &entry.pending {
            if pending.request_id == request_id {
                return Ok(WriteOutcome::Queued);
            }
            entry.queue.push_back(QueuedWrite {
                value,
                check_sequence,
                request_id,
            });
            return Ok(WriteOutcome::Queued);
        }
        if let Some(expected) = check_sequence {
            if expected != entry.sequence {
                return Ok(WriteOutcome::Conflict {
                    current: entry.current.clone(),
                    sequence: entry.sequence,
                });
            }
        }

        let required: HashSet<NodeInstance> = state
            .replica_set
            .secondaries()
            .iter()
            .filter(|r| !r.is_down)
            .map(|r| r.instance)
            .collect();
        if replica_count > 1 && required.is_empty() {
            return Err(FederationError::from_code(ErrorCode::NoWriteQuorum));
        }

        let sequence = highest_sequence + 1;
        state.highest_sequence = sequence;
        let entry = state.entries.get_mut(key).expect("entry was just inserted above");
        if required.is_empty() {
            entry.sequence = sequence;
            entry.current = Some(value.clone());
            Ok(WriteOutcome::Committed { value, sequence })
        } else {
            entry.pending = Some(PendingWrite {
                value,
                sequence,
                request_id,
                required,
                acked_by: HashSet::new(),
            });
            Ok(WriteOutcome::Queued)
        }
    }

    /// Records a secondary's acknowledgement of the pending write on `key`.
    /// Returns `Some(Committed)` the moment every required secondary has
    /// acknowledged; the caller should then call `drain_queue` to start
    /// the next queued write, if any.
    pub fn ack_secondary(&self, key: &str, replica: NodeInstance, acked_sequence: i64) -> Option<WriteOutcome> {
        let mut state = self.state.write();
        let entry = state.entries.get_mut(key)?;
        let pending = entry.pending.as_mut()?;
        if acked_sequence < pending.sequence || !pending.required.contains(&replica) {
            return None;
        }
        pending.acked_by.insert(replica);
        if pending.acked_by.len() < pending.required.len() {
            return None;
        }
        let pending = entry.pending.take().unwrap();
        entry.sequence = pending.sequence;
        entry.current = Some(pending.value.clone());
        Some(WriteOutcome::Committed {
            value: pending.value,
            sequence: pending.sequence,
        })
    }

    /// Starts the next queued write on `key`, if the previous one just
    /// committed and left the queue non-empty. Writes that need no
    /// secondary acknowledgement (or hit a conflict) commit immediately
    /// and are returned; the caller stops draining at the first write that
    /// is now itself pending.
    pub fn drain_queue(&self, key: &str) -> Vec<(u64, WriteOutcome)> {
        let mut drained = Vec::new();
        loop {
            let next = {
                let mut state = self.state.write();
                let Some(entry) = state.entries.get_mut(key) else { break };
                if entry.pending.is_some() {
                    break;
                }
                entry.queue.pop_front()
            };
            let Some(queued) = next else { break };
            match self.write(key, queued.value, queued.check_sequence, queued.request_id) {
                Ok(outcome @ (WriteOutcome::Committed { .. } | WriteOutcome::Conflict { .. })) => {
                    drained.push((queued.request_id, outcome));
                }
                Ok(WriteOutcome::Queued) => break,
                Err(_) => break,
            }
        }
        drained
    }

    /// Optimistic read-modify-write: re-reads the key, applies `f` to the
    /// current value, and retries on `Conflict` up to `max_retries` times.
    /// `request_id` must be fresh on each retry so a stale retry can't be
    /// mistaken for the original request by `write`'s dedup check.
    pub fn read_modify_write<F>(&self, key: &str, mut f: F, max_retries: u32, mut next_request_id: impl FnMut() -> u64) -> Result<(StoreValue, i64)>
    where
        F: FnMut(Option<&StoreValue>) -> StoreValue,
    {
        for _ in 0..max_retries {
            let (current, sequence) = self.read(key)?;
            let candidate = f(current.as_ref());
            match self.write(key, candidate, Some(sequence), next_request_id())? {
                WriteOutcome::Committed { value, sequence } => return Ok((value, sequence)),
                WriteOutcome::Conflict { .. } | WriteOutcome::Queued => continue,
            }
        }
        Err(FederationError::new(
            ErrorCode::Timeout,
            "read-modify-write did not converge within the retry budget",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federation_ring::NodeId;

    fn instance(v: u128) -> NodeInstance {
        NodeInstance::new(NodeId::new(v), 1)
    }

    #[test]
    fn solo_primary_commits_writes_immediately() {
        let store = VoterStore::new(instance(1));
        store.bootstrap_as_primary(10, Instant::now());
        let outcome = store.write("k", StoreValue::Sequence(1), None, 1).unwrap();
        assert_eq!(outcome, WriteOutcome::Committed { value: StoreValue::Sequence(1), sequence: 1 });
        assert_eq!(store.read("k").unwrap(), (Some(StoreValue::Sequence(1)), 1));
    }

    #[test]
    fn write_without_quorum_fails_with_no_write_quorum() {
        let store = VoterStore::new(instance(1));
        store.bootstrap_as_primary(10, Instant::now());
        store.admit_replica(instance(2), Instant::now()).unwrap();
        store.mark_down(instance(2));
        let err = store.write("k", StoreValue::Sequence(1), None, 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoWriteQuorum);
    }

    #[test]
    fn write_waits_for_secondary_ack_before_committing() {
        let store = VoterStore::new(instance(1));
        store.bootstrap_as_primary(10, Instant::now());
        store.admit_replica(instance(2), Instant::now()).unwrap();
        let outcome = store.write("k", StoreValue::Sequence(5), None, 1).unwrap();
        assert_eq!(outcome, WriteOutcome::Queued);
        assert_eq!(store.read("k").unwrap(), (None, 0));
        let committed = store.ack_secondary("k", instance(2), 1).unwrap();
        assert_eq!(committed, WriteOutcome::Committed { value: StoreValue::Sequence(5), sequence: 1 });
        assert_eq!(store.read("k").unwrap(), (Some(StoreValue::Sequence(5)), 1));
    }

    #[test]
    fn conflicting_check_sequence_is_rejected_with_current_value() {
        let store = VoterStore::new(instance(1));
        store.bootstrap_as_primary(10, Instant::now());
        store.write("k", StoreValue::Sequence(1), None, 1).unwrap();
        let outcome = store.write("k", StoreValue::Sequence(2), Some(99), 2).unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::Conflict {
                current: Some(StoreValue::Sequence(1)),
                sequence: 1
            }
        );
    }

    #[test]
    fn second_write_on_the_same_key_queues_until_the_first_commits() {
        let store = VoterStore::new(instance(1));
        store.bootstrap_as_primary(10, Instant::now());
        store.admit_replica(instance(2), Instant::now()).unwrap();
        store.write("k", StoreValue::Sequence(1), None, 1).unwrap();
        let queued = store.write("k", StoreValue::Sequence(2), None, 2).unwrap();
        assert_eq!(queued, WriteOutcome::Queued);
        store.ack_secondary("k", instance(2), 1).unwrap();
        let drained = store.drain_queue("k");
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, 2);
    }

    #[test]
    fn read_modify_write_retries_through_a_conflicting_writer() {
        let store = VoterStore::new(instance(1));
        store.bootstrap_as_primary(10, Instant::now());
        store.write("counter", StoreValue::Sequence(0), None, 1).unwrap();
        let mut next_id = 2;
        let (value, sequence) = store
            .read_modify_write(
                "counter",
                |current| StoreValue::Sequence(current.and_then(|v| v.as_sequence()).unwrap_or(0) + 1),
                5,
                || {
                    let id = next_id;
                    next_id += 1;
                    id
                },
            )
            .unwrap();
        assert_eq!(value, StoreValue::Sequence(1));
        assert_eq!(sequence, 2);
    }

    #[test]
    fn primary_failover_adopts_highest_surviving_sequence_and_bumps_epoch() {
        let store = VoterStore::new(instance(2));
        {
            let mut state = store.state.write();
            state.replica_set = ReplicaSet {
                generation: 7,
                epoch: 1,
                replicas: vec![Replica::new(instance(1), Instant::now()), Replica::new(instance(2), Instant::now())],
            };
            state.phase = ReplicaPhase::Secondary;
            state.highest_sequence = 3;
        }
        store.promote_to_primary(1, &[(instance(2), 9)], &[instance(1)]).unwrap();
        assert_eq!(store.phase(), ReplicaPhase::Primary);
        let (generation, epoch) = store.generation_epoch();
        assert_eq!(generation, 7);
        assert_eq!(epoch, 0x1_0000_0002);
        assert_eq!(store.replica_count(), 1);
    }

    #[test]
    fn reads_before_primary_is_ready_return_not_ready() {
        let store = VoterStore::new(instance(1));
        let err = store.read("k").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotReady);
    }
}
