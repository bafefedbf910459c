//! Quote-time probing with unfulfillable packets.
//!
//! Packets of decreasing size are sent with a random condition, so the
//! receiver can only reject them, but its authentic reject still reports how
//! much arrived. Large packets also run into F08s, which seeds the max packet
//! search; while that limit is imprecise the filter keeps adding the search's
//! next candidate.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use super::{FilterChain, StreamPacketFilter};
use crate::request::{RequestBuilder, StreamPacketReply, StreamPacketRequest};
use crate::send_state::SendState;
use crate::trackers::{MaxPacketAmount, MaxPacketAmountTracker};
use crate::util::time_source::{InstantTimeSrc, TimeSource};

pub const DEFAULT_PROBE_AMOUNTS: [u64; 13] = [
    1_000_000_000_000,
    100_000_000_000,
    10_000_000_000,
    1_000_000_000,
    100_000_000,
    10_000_000,
    1_000_000,
    100_000,
    10_000,
    1_000,
    100,
    10,
    1,
];

#[derive(Default)]
struct ProbeQueue {
    pending: BTreeSet<u64>,
    attempted: HashSet<u64>,
}

pub struct RateProbeFilter<T: TimeSource = InstantTimeSrc> {
    queue: Mutex<ProbeQueue>,
    in_flight: AtomicU32,
    max_packet: Arc<MaxPacketAmountTracker>,
    started: Instant,
    timeout: Duration,
    time_source: T,
}

impl RateProbeFilter<InstantTimeSrc> {
    pub fn new(
        amounts: &[u64],
        max_packet: Arc<MaxPacketAmountTracker>,
        timeout: Duration,
    ) -> Self {
        Self::new_with_time_source(amounts, max_packet, timeout, InstantTimeSrc::new())
    }
}

impl<T: TimeSource> RateProbeFilter<T> {
    pub fn new_with_time_source(
        amounts: &[u64],
        max_packet: Arc<MaxPacketAmountTracker>,
        timeout: Duration,
        time_source: T,
    ) -> Self {
        let queue = ProbeQueue {
            pending: amounts.iter().copied().filter(|amount| *amount > 0).collect(),
            attempted: HashSet::new(),
        };
        Self {
            queue: Mutex::new(queue),
            in_flight: AtomicU32::new(0),
            max_packet,
            started: time_source.now(),
            timeout,
            time_source,
        }
    }

    pub fn probes_in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl<T: TimeSource + Send + Sync + 'static> StreamPacketFilter for RateProbeFilter<T> {
    fn next_state(&self, request: &mut RequestBuilder) -> SendState {
        if self.time_source.now().saturating_duration_since(self.started) >= self.timeout {
            tracing::debug!(timeout = ?self.timeout, "rate probe timed out");
            return SendState::End;
        }

        let max_packet = self.max_packet.max_packet_amount();
        let mut queue = self.queue.lock();
        if let MaxPacketAmount::Imprecise(_) = max_packet {
            if let Some(candidate) = self.max_packet.next_max_packet_amount() {
                if candidate > 0 && !queue.attempted.contains(&candidate) {
                    queue.pending.insert(candidate);
                }
            }
        }
        if let Some(limit) = max_packet.value() {
            queue.pending.retain(|amount| *amount <= limit);
        }

        let Some(amount) = queue.pending.pop_last() else {
            return if self.probes_in_flight() == 0 {
                SendState::End
            } else {
                SendState::Wait
            };
        };
        queue.attempted.insert(amount);

        request.source_amount = amount;
        request.min_destination_amount = 0;
        request.is_fulfillable = false;
        SendState::Ready
    }

    fn do_filter(
        self: Arc<Self>,
        request: StreamPacketRequest,
        chain: FilterChain,
    ) -> BoxFuture<'static, StreamPacketReply> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let amount = request.source_amount;
        let reply = chain.do_filter(request);
        async move {
            let reply = reply.await;
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            tracing::trace!(
                amount,
                code = ?reply.reject_code(),
                received = ?reply.destination_amount(),
                "rate probe reply"
            );
            reply
        }
        .boxed()
    }
}
