//! Discovery of the largest packet the path will forward.
//!
//! Connectors reject oversized Prepares with F08. If the reject carries the
//! amount-too-large data, the precise limit in source units can be computed
//! directly; otherwise all we learn is that the packet was too large, and the
//! tracker binary searches between the largest packet known to get through
//! (the verified capacity) and the smallest known to fail.

use std::sync::Arc;

use arc_swap::ArcSwap;
use num_bigint::BigUint;

use crate::math::saturating_amount;
use crate::packet::AmountTooLargeData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxPacketAmount {
    /// No F08 seen yet.
    Unknown,
    /// The path forwards exactly up to this amount.
    Precise(u64),
    /// The path rejected `value + 1`; the real limit is somewhere at or below.
    Imprecise(u64),
}

impl MaxPacketAmount {
    pub fn value(&self) -> Option<u64> {
        match self {
            MaxPacketAmount::Unknown => None,
            MaxPacketAmount::Precise(max) | MaxPacketAmount::Imprecise(max) => Some(*max),
        }
    }

    pub fn is_precise(&self) -> bool {
        matches!(self, MaxPacketAmount::Precise(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MaxPacketState {
    max: MaxPacketAmount,
    verified_capacity: u64,
    no_capacity: bool,
}

impl MaxPacketState {
    fn with_max(mut self, candidate: MaxPacketAmount) -> Self {
        let Some(new_max) = candidate.value() else {
            return self;
        };
        let replace = match self.max {
            MaxPacketAmount::Unknown => true,
            MaxPacketAmount::Precise(current) => new_max < current,
            MaxPacketAmount::Imprecise(current) => {
                new_max < current || (new_max == current && candidate.is_precise())
            }
        };
        if replace {
            self.max = candidate;
            self.verified_capacity = self.verified_capacity.min(new_max);
            if new_max == 0 {
                self.no_capacity = true;
            }
        }
        self.promote_if_verified()
    }

    fn with_capacity(mut self, delivered: u64) -> Self {
        let bound = self.max.value().unwrap_or(u64::MAX);
        self.verified_capacity = self.verified_capacity.max(delivered.min(bound));
        self.promote_if_verified()
    }

    fn promote_if_verified(mut self) -> Self {
        if let MaxPacketAmount::Imprecise(max) = self.max {
            if self.verified_capacity >= max {
                self.max = MaxPacketAmount::Precise(max);
            }
        }
        self
    }
}

pub struct MaxPacketAmountTracker {
    state: ArcSwap<MaxPacketState>,
}

impl Default for MaxPacketAmountTracker {
    fn default() -> Self {
        Self {
            state: ArcSwap::from_pointee(MaxPacketState {
                max: MaxPacketAmount::Unknown,
                verified_capacity: 0,
                no_capacity: false,
            }),
        }
    }
}

impl MaxPacketAmountTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learn from an F08 reject of a packet of `sent` source units.
    pub fn reduce_max_packet_amount(&self, sent: u64, reject_data: &[u8]) {
        let candidate = match AmountTooLargeData::decode(reject_data) {
            Ok(data) if data.received_amount > 0 => {
                // the limit is reported in the rejecting hop's units: scale back to source units
                let precise = saturating_amount(
                    &(BigUint::from(data.maximum_amount) * sent / data.received_amount),
                );
                if precise < sent {
                    MaxPacketAmount::Precise(precise)
                } else {
                    MaxPacketAmount::Imprecise(sent.saturating_sub(1))
                }
            }
            _ => MaxPacketAmount::Imprecise(sent.saturating_sub(1)),
        };

        let previous = self
            .state
            .rcu(|state| Arc::new(state.with_max(candidate)));
        let current = **self.state.load();
        if current.max != previous.max {
            tracing::debug!(
                sent,
                previous = ?previous.max,
                current = ?current.max,
                "reduced max packet amount"
            );
        }
        if current.no_capacity && !previous.no_capacity {
            tracing::warn!(sent, "path has no capacity for any packet");
        }
    }

    /// Record that a packet of `delivered` source units made it through the path.
    pub fn adjust_path_capacity(&self, delivered: u64) {
        self.state
            .rcu(|state| Arc::new(state.with_capacity(delivered)));
    }

    pub fn max_packet_amount(&self) -> MaxPacketAmount {
        self.state.load().max
    }

    pub fn verified_path_capacity(&self) -> u64 {
        self.state.load().verified_capacity
    }

    pub fn is_no_capacity(&self) -> bool {
        self.state.load().no_capacity
    }

    /// The amount the next packet should try, `None` while no limit is known.
    pub fn next_max_packet_amount(&self) -> Option<u64> {
        let state = **self.state.load();
        match state.max {
            MaxPacketAmount::Unknown => None,
            MaxPacketAmount::Precise(max) => Some(max),
            MaxPacketAmount::Imprecise(max) => {
                let verified = state.verified_capacity.min(max);
                let gap = max - verified;
                Some(verified + gap / 2 + gap % 2)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f08(received: u64, maximum: u64) -> bytes::Bytes {
        AmountTooLargeData {
            received_amount: received,
            maximum_amount: maximum,
        }
        .encode()
    }

    #[test]
    fn starts_unknown() {
        let tracker = MaxPacketAmountTracker::new();
        assert_eq!(tracker.max_packet_amount(), MaxPacketAmount::Unknown);
        assert_eq!(tracker.next_max_packet_amount(), None);
        assert!(!tracker.is_no_capacity());
    }

    #[test]
    fn precise_from_reject_data() {
        let tracker = MaxPacketAmountTracker::new();
        // the connector saw 1000 of its units for our 100 and accepts at most 250
        tracker.reduce_max_packet_amount(100, &f08(1000, 250));
        assert_eq!(tracker.max_packet_amount(), MaxPacketAmount::Precise(25));
        assert_eq!(tracker.next_max_packet_amount(), Some(25));
    }

    #[test]
    fn imprecise_without_reject_data() {
        let tracker = MaxPacketAmountTracker::new();
        tracker.reduce_max_packet_amount(100, &[]);
        assert_eq!(tracker.max_packet_amount(), MaxPacketAmount::Imprecise(99));
        // halfway between verified capacity 0 and 99, rounded up
        assert_eq!(tracker.next_max_packet_amount(), Some(50));

        tracker.reduce_max_packet_amount(100, &f08(0, 10));
        assert_eq!(tracker.max_packet_amount(), MaxPacketAmount::Imprecise(99));
    }

    #[test]
    fn max_only_decreases() {
        let tracker = MaxPacketAmountTracker::new();
        tracker.reduce_max_packet_amount(100, &f08(100, 40));
        tracker.reduce_max_packet_amount(1000, &[]);
        assert_eq!(tracker.max_packet_amount(), MaxPacketAmount::Precise(40));

        tracker.reduce_max_packet_amount(30, &[]);
        assert_eq!(tracker.max_packet_amount(), MaxPacketAmount::Imprecise(29));
    }

    #[test]
    fn precise_replaces_equal_imprecise() {
        let tracker = MaxPacketAmountTracker::new();
        tracker.reduce_max_packet_amount(51, &[]);
        tracker.reduce_max_packet_amount(100, &f08(100, 50));
        assert_eq!(tracker.max_packet_amount(), MaxPacketAmount::Precise(50));
    }

    #[test]
    fn zero_max_means_no_capacity() {
        let tracker = MaxPacketAmountTracker::new();
        tracker.reduce_max_packet_amount(1, &[]);
        assert!(tracker.is_no_capacity());
        assert_eq!(tracker.next_max_packet_amount(), Some(0));
    }

    #[test]
    fn verified_capacity_is_monotonic_and_bounded() {
        let tracker = MaxPacketAmountTracker::new();
        tracker.reduce_max_packet_amount(100, &[]);
        tracker.adjust_path_capacity(40);
        tracker.adjust_path_capacity(20);
        assert_eq!(tracker.verified_path_capacity(), 40);
        assert_eq!(tracker.next_max_packet_amount(), Some(70));

        tracker.adjust_path_capacity(500);
        assert_eq!(tracker.verified_path_capacity(), 99);
        assert_eq!(tracker.max_packet_amount(), MaxPacketAmount::Precise(99));
    }

    #[test]
    fn binary_search_converges_logarithmically() {
        for true_max in [1u64, 7, 1000, 123_456_789, 999_999_999_999] {
            let tracker = MaxPacketAmountTracker::new();
            let start = 1_000_000_000_000u64;
            let mut iterations = 0;
            while !tracker.max_packet_amount().is_precise() {
                let amount = tracker.next_max_packet_amount().unwrap_or(start);
                if amount > true_max {
                    tracker.reduce_max_packet_amount(amount, &[]);
                } else {
                    tracker.adjust_path_capacity(amount);
                }
                iterations += 1;
                assert!(iterations <= 2 * 40 + 2, "no convergence for {true_max}");
            }
            assert_eq!(tracker.max_packet_amount(), MaxPacketAmount::Precise(true_max));
            // log2(1e12) is about 40
            assert!(iterations <= 42, "{iterations} iterations for {true_max}");
        }
    }
}
