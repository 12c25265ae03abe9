//! `GlobalTimeManager` (spec §4.12): a bounded `(lower_limit, upper_limit)`
//! estimate of global wall-clock time relative to the local clock, widened
//! by drift and periodically tightened by an elected leader bumping a
//! VoterStore-backed epoch. Grounded on
//! `original_source/.../GlobalTimeManager.{h,cpp}`.

use federation_core::time::Clock;
use federation_transport::headers::GlobalTimeExchangeHeader;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const CLOCK_MARGIN: Duration = Duration::from_millis(1);

/// A signed offset from "now", in nanoseconds, with `i64::MIN`/`i64::MAX`
/// standing in for the original's `TimeSpan::MinValue`/`MaxValue`
/// sentinels (an unbounded limit in that direction).
type OffsetNanos = i64;

fn is_unbounded_low(offset: OffsetNanos) -> bool {
    offset == i64::MIN
}

fn is_unbounded_high(offset: OffsetNanos) -> bool {
    offset == i64::MAX
}

struct State {
    epoch: u64,
    lower_offset: OffsetNanos,
    upper_offset: OffsetNanos,
    last_refresh: Option<Instant>,
    is_authority: bool,
    is_updating_epoch: bool,
    leader_start: Option<Instant>,
}

pub struct GlobalTimeManagerConfig {
    pub clock_drift_ratio: f64,
    pub uncertainty_max_increase: Duration,
    pub uncertainty_max_decrease: Duration,
    pub uncertainty_interval_upper_bound: Duration,
    pub new_epoch_wait_interval: Duration,
}

pub struct GlobalTimeManager {
    clock: Arc<dyn Clock>,
    config: GlobalTimeManagerConfig,
    state: parking_lot::RwLock<State>,
}

/// A snapshot of the current estimate, returned by `info()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalTimeInfo {
    pub epoch: u64,
    /// Nanoseconds offset from "now"; `i64::MIN` means unbounded below.
    pub lower_offset: OffsetNanos,
    /// Nanoseconds offset from "now"; `i64::MAX` means unbounded above.
    pub upper_offset: OffsetNanos,
    pub is_authority: bool,
}

impl GlobalTimeManager {
    pub fn new(clock: Arc<dyn Clock>, config: GlobalTimeManagerConfig) -> Self {
        Self {
            clock,
            config,
            state: parking_lot::RwLock::new(State {
                epoch: 0,
                lower_offset: i64::MIN,
                upper_offset: i64::MAX,
                last_refresh: None,
                is_authority: false,
                is_updating_epoch: false,
                leader_start: None,
            }),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.state.read().epoch
    }

    pub fn is_leader(&self) -> bool {
        self.state.read().leader_start.is_some()
    }

    pub fn become_leader(&self) {
        let mut state = self.state.write();
        if state.leader_start.is_none() {
            state.leader_start = Some(self.clock.instant_now());
        }
    }

    /// Widens the interval by elapsed-time/drift-ratio since the last
    /// refresh, unless this node is currently the authority (an authority's
    /// interval only narrows via `apply_new_epoch`, never drifts).
    pub fn refresh(&self) {
        let mut state = self.state.write();
        self.refresh_locked(&mut state);
    }

    fn refresh_locked(&self, state: &mut State) {
        if state.is_authority {
            return;
        }
        let now = self.clock.instant_now();
        let last = match state.last_refresh {
            Some(last) => last,
            None => {
                state.last_refresh = Some(now);
                return;
            }
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed.is_zero() {
            return;
        }
        let delta_nanos = (elapsed.as_nanos() as f64 / self.config.clock_drift_ratio) as i64;
        if delta_nanos <= 0 {
            return;
        }
        if !is_unbounded_high(state.upper_offset) {
            state.upper_offset = state.upper_offset.saturating_add(delta_nanos);
        }
        if !is_unbounded_low(state.lower_offset) {
            state.lower_offset = state.lower_offset.saturating_sub(delta_nanos);
        }
        state.last_refresh = Some(now);
    }

    /// Integrates an inbound `GlobalTimeExchangeHeader` (spec §4.12:
    /// piggy-backed on every routed reply). Stale headers (lower epoch than
    /// ours) are ignored outright.
    pub fn update_range(&self, header: &GlobalTimeExchangeHeader, received_lower_offset: OffsetNanos, received_upper_offset: OffsetNanos) {
        let mut state = self.state.write();
        if header.epoch < state.epoch {
            return;
        }
        self.refresh_locked(&mut state);

        if header.epoch > state.epoch {
            self.increase_epoch_locked(&mut state, header.epoch);
        }

        if !is_unbounded_high(received_upper_offset) && received_upper_offset < state.upper_offset {
            if received_upper_offset >= state.lower_offset || is_unbounded_low(state.lower_offset) {
                state.upper_offset = received_upper_offset;
            } else if !state.is_authority {
                state.lower_offset = i64::MIN;
            }
        }

        if !is_unbounded_low(received_lower_offset) {
            let margin = CLOCK_MARGIN.as_nanos() as i64;
            let candidate_lower = received_lower_offset.saturating_sub(margin);
            if candidate_lower > state.lower_offset {
                if is_unbounded_high(state.upper_offset) || state.upper_offset >= candidate_lower {
                    state.lower_offset = candidate_lower;
                } else if !state.is_authority {
                    state.upper_offset = i64::MAX;
                }
            }
        }
    }

    fn increase_epoch_locked(&self, state: &mut State, new_epoch: u64) {
        if !is_unbounded_high(state.upper_offset) {
            let delta = self.config.uncertainty_max_increase.as_nanos() as i64 * (new_epoch - state.epoch) as i64;
            state.upper_offset = state.upper_offset.saturating_add(delta);
        }
        info!(old_epoch = state.epoch, new_epoch, "global time epoch increased");
        state.epoch = new_epoch;
        state.is_authority = false;
    }

    /// Current estimate, refreshed against the clock first.
    pub fn info(&self) -> GlobalTimeInfo {
        let mut state = self.state.write();
        self.refresh_locked(&mut state);
        GlobalTimeInfo {
            epoch: state.epoch,
            lower_offset: state.lower_offset,
            upper_offset: state.upper_offset,
            is_authority: state.is_authority,
        }
    }

    /// Whether this node's interval has widened past the configured
    /// tolerance and, being the elected leader, it is due to run a
    /// VoterStore read-modify-write bumping the shared epoch (spec §4.12).
    /// Returns `false` while an update is already outstanding.
    pub fn due_for_epoch_update(&self) -> bool {
        let mut state = self.state.write();
        self.refresh_locked(&mut state);
        if state.leader_start.is_none() || state.is_updating_epoch {
            return false;
        }
        let leader_start = state.leader_start.unwrap();
        let now = self.clock.instant_now();
        if now.saturating_duration_since(leader_start) < self.config.new_epoch_wait_interval {
            return false;
        }
        if is_unbounded_high(state.upper_offset) || is_unbounded_low(state.lower_offset) {
            return true;
        }
        let interval = Duration::from_nanos((state.upper_offset - state.lower_offset).max(0) as u64);
        interval > self.config.uncertainty_interval_upper_bound
    }

    /// The value to write into the `GlobalTimestampEpochName` VoterStore key
    /// via a read-modify-write (`VoterStoreReadWriteAsyncOperation`'s
    /// `GenerateValue`), given the currently stored epoch. A non-positive
    /// result means "do not write" (the store's epoch already moved past
    /// what we'd propose).
    pub fn generate_epoch(&self, current_stored_epoch: i64) -> i64 {
        let mut state = self.state.write();
        self.refresh_locked(&mut state);
        if current_stored_epoch > state.epoch as i64 {
            self.increase_epoch_locked(&mut state, current_stored_epoch as u64);
        } else if current_stored_epoch < state.epoch as i64 {
            return 0;
        }

        if is_unbounded_high(state.upper_offset) || is_unbounded_low(state.lower_offset) {
            state.epoch as i64 + 1
        } else {
            let range_nanos = state.upper_offset - state.lower_offset;
            let decrease = self.config.uncertainty_max_decrease.as_nanos() as i64;
            state.epoch as i64 + (range_nanos / decrease.max(1)) + 1
        }
    }

    pub fn begin_epoch_update(&self) {
        self.state.write().is_updating_epoch = true;
    }

    /// Applies the result of a successful epoch write (`OnUpdateCompleted`):
    /// narrows the uncertainty interval and marks this node authoritative.
    pub fn apply_new_epoch(&self, new_epoch: u64) {
        let mut state = self.state.write();
        state.is_updating_epoch = false;
        if new_epoch <= state.epoch {
            return;
        }
        self.refresh_locked(&mut state);

        if is_unbounded_high(state.upper_offset) && is_unbounded_low(state.lower_offset) {
            state.upper_offset = 0;
            state.lower_offset = 0;
        } else {
            if is_unbounded_high(state.upper_offset) {
                state.upper_offset = state.lower_offset.saturating_add(self.config.uncertainty_max_decrease.as_nanos() as i64);
            }
            let decrease = self.config.uncertainty_max_decrease.as_nanos() as i64;
            let delta = (decrease.saturating_mul((new_epoch - state.epoch) as i64)).min(state.upper_offset - state.lower_offset);
            state.lower_offset = state.lower_offset.saturating_add(delta);
        }

        state.epoch = new_epoch;
        state.is_authority = true;
        info!(new_epoch, "global time epoch update completed, now authoritative");
    }

    /// Builds the header a node attaches to an outbound routed reply (spec
    /// §4.12), translating its own now-relative offsets into absolute
    /// wall-clock milliseconds a peer can compare against its own clock.
    /// An unbounded offset is encoded as the sentinel millis value rather
    /// than as a translated timestamp.
    pub fn exchange_header(&self) -> GlobalTimeExchangeHeader {
        let info = self.info();
        let now_millis = wall_clock_millis();
        GlobalTimeExchangeHeader {
            epoch: info.epoch,
            send_time_millis: now_millis,
            sender_lower_limit_millis: offset_to_absolute_millis(info.lower_offset, now_millis),
            receiver_upper_limit_millis: offset_to_absolute_millis(info.upper_offset, now_millis),
        }
    }

    /// Folds an inbound header back into this node's own estimate (spec
    /// §4.12), translating the sender's absolute millis bounds back into
    /// offsets relative to this node's own "now" before delegating to
    /// `update_range`.
    pub fn absorb_exchange_header(&self, header: &GlobalTimeExchangeHeader) {
        let now_millis = wall_clock_millis();
        let received_lower = absolute_millis_to_offset(header.sender_lower_limit_millis, now_millis);
        let received_upper = absolute_millis_to_offset(header.receiver_upper_limit_millis, now_millis);
        self.update_range(header, received_lower, received_upper);
    }
}

/// Sentinel millis values standing in for an unbounded nanosecond offset,
/// since `GlobalTimeExchangeHeader`'s fields are unsigned absolute
/// milliseconds and can't carry `i64::MIN`/`i64::MAX` directly.
const UNBOUNDED_MILLIS_LOW: u64 = 0;
const UNBOUNDED_MILLIS_HIGH: u64 = u64::MAX;

fn wall_clock_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn offset_to_absolute_millis(offset: OffsetNanos, now_millis: u64) -> u64 {
    if is_unbounded_low(offset) {
        return UNBOUNDED_MILLIS_LOW;
    }
    if is_unbounded_high(offset) {
        return UNBOUNDED_MILLIS_HIGH;
    }
    let millis = offset / 1_000_000;
    (now_millis as i64 + millis).max(0) as u64
}

fn absolute_millis_to_offset(absolute_millis: u64, now_millis: u64) -> OffsetNanos {
    if absolute_millis == UNBOUNDED_MILLIS_LOW {
        return i64::MIN;
    }
    if absolute_millis == UNBOUNDED_MILLIS_HIGH {
        return i64::MAX;
    }
    (absolute_millis as i64 - now_millis as i64).saturating_mul(1_000_000)
}
