//! Packet pacing: how many packets may be in flight and how soon the next
//! one may leave.
//!
//! The minimum gap between two sends is
//! `max(1s / packets_per_second, average_rtt / max_in_flight)`, so the
//! sender neither exceeds its packet rate nor keeps more than
//! `max_in_flight` packets outstanding for a typical round trip.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::packet::ErrorCode;
use crate::request::StreamPacketReply;
use crate::util::duration_as_nanos;
use crate::util::time_source::{InstantTimeSrc, TimeSource};

const NANOS_PER_SEC: u64 = 1_000_000_000;
/// Rates are kept in thousandths of a packet per second.
const MILLI: u64 = 1_000;
/// Additive rate increase per authentic reply: half a packet per second.
const RATE_INCREASE_MILLI_PPS: u64 = 500;
/// Weight of the previous average in the RTT moving average, in tenths.
const RTT_HISTORY_WEIGHT_TENTHS: u64 = 9;

#[derive(Debug, Clone)]
pub struct PacingConfig {
    pub max_in_flight: u32,
    pub default_round_trip_time: Duration,
    pub initial_packets_per_second: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 20,
            default_round_trip_time: Duration::from_millis(200),
            initial_packets_per_second: 40,
        }
    }
}

pub struct PacingTracker<T: TimeSource = InstantTimeSrc> {
    epoch: Instant,
    /// Nanoseconds since `epoch` of the last send, plus one; zero means never.
    last_send: AtomicU64,
    in_flight: AtomicU32,
    average_rtt_nanos: AtomicU64,
    milli_packets_per_second: AtomicU64,
    max_in_flight: u32,
    time_source: T,
}

impl PacingTracker<InstantTimeSrc> {
    pub fn new(config: PacingConfig) -> Self {
        Self::new_with_time_source(config, InstantTimeSrc::new())
    }
}

impl<T: TimeSource> PacingTracker<T> {
    pub fn new_with_time_source(config: PacingConfig, time_source: T) -> Self {
        Self {
            epoch: time_source.now(),
            last_send: AtomicU64::new(0),
            in_flight: AtomicU32::new(0),
            average_rtt_nanos: AtomicU64::new(duration_as_nanos(config.default_round_trip_time)),
            milli_packets_per_second: AtomicU64::new(
                u64::from(config.initial_packets_per_second.max(1)) * MILLI,
            ),
            max_in_flight: config.max_in_flight.max(1),
            time_source,
        }
    }

    pub fn now(&self) -> Instant {
        self.time_source.now()
    }

    fn nanos_since_epoch(&self, instant: Instant) -> u64 {
        duration_as_nanos(instant.saturating_duration_since(self.epoch))
    }

    pub fn packets_in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight
    }

    pub fn is_at_capacity(&self) -> bool {
        self.packets_in_flight() >= self.max_in_flight
    }

    pub fn average_round_trip_time(&self) -> Duration {
        Duration::from_nanos(self.average_rtt_nanos.load(Ordering::Acquire))
    }

    /// Current packet rate in packets per second.
    pub fn packets_per_second(&self) -> f64 {
        self.milli_packets_per_second.load(Ordering::Acquire) as f64 / MILLI as f64
    }

    /// Minimum gap between two consecutive sends.
    pub fn packet_delay(&self) -> Duration {
        let milli_pps = self.milli_packets_per_second.load(Ordering::Acquire).max(1);
        let rate_delay = NANOS_PER_SEC.saturating_mul(MILLI) / milli_pps;
        let rtt_delay =
            self.average_rtt_nanos.load(Ordering::Acquire) / u64::from(self.max_in_flight);
        Duration::from_nanos(rate_delay.max(rtt_delay))
    }

    /// How long until the next packet may be sent; zero if it may go now.
    pub fn time_until_next_send(&self) -> Duration {
        let last_send = self.last_send.load(Ordering::Acquire);
        if last_send == 0 {
            return Duration::ZERO;
        }
        let next_send = (last_send - 1).saturating_add(duration_as_nanos(self.packet_delay()));
        let now = self.nanos_since_epoch(self.now());
        Duration::from_nanos(next_send.saturating_sub(now))
    }

    /// Whether a packet may be sent right now.
    pub fn can_send(&self) -> bool {
        !self.is_at_capacity() && self.time_until_next_send().is_zero()
    }

    /// Record a packet leaving. Returns the send time to measure the round trip against.
    pub fn on_send(&self) -> Instant {
        let now = self.now();
        self.last_send
            .store(self.nanos_since_epoch(now).saturating_add(1), Ordering::Release);
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        now
    }

    /// Record the reply to a packet sent at `sent_at`.
    pub fn on_reply(&self, reply: &StreamPacketReply, sent_at: Instant) {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .ok();

        let code = reply.reject_code();
        let is_liquidity_reject = code == Some(ErrorCode::T04_INSUFFICIENT_LIQUIDITY);
        if reply.is_authentic() || is_liquidity_reject {
            let rtt = duration_as_nanos(self.now().saturating_duration_since(sent_at));
            self.update_average_round_trip_time(rtt);
        }

        match code {
            Some(code) if code.is_temporary() && !is_liquidity_reject => {
                let previous = self
                    .milli_packets_per_second
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |milli_pps| {
                        Some((milli_pps / 2).max(MILLI))
                    })
                    .unwrap_or(MILLI);
                tracing::debug!(
                    %code,
                    previous_pps = previous / MILLI,
                    "temporary reject, halving packet rate"
                );
            }
            _ if reply.is_authentic() => {
                self.milli_packets_per_second
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |milli_pps| {
                        Some(milli_pps.saturating_add(RATE_INCREASE_MILLI_PPS))
                    })
                    .ok();
            }
            _ => {}
        }
    }

    fn update_average_round_trip_time(&self, rtt_nanos: u64) {
        self.average_rtt_nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |average| {
                let weighted = u128::from(average) * u128::from(RTT_HISTORY_WEIGHT_TENTHS)
                    + u128::from(rtt_nanos) * u128::from(10 - RTT_HISTORY_WEIGHT_TENTHS);
                Some(u64::try_from(weighted / 10).unwrap_or(u64::MAX))
            })
            .ok();
    }
}
