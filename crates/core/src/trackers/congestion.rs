//! Additive-increase/multiplicative-decrease window on the amount in flight.
//!
//! ```text
//! SlowStart ──(T04)──▶ AvoidCongestion
//!   fulfill: window * 2     fulfill: window + increase_amount
//!   T04:     window / decrease_factor (never below 1)
//! ```
//!
//! F08 rejects say nothing about liquidity; they are left to the
//! [`MaxPacketAmountTracker`](super::MaxPacketAmountTracker).

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::math::{AmountExt, Ratio};
use crate::packet::ErrorCode;

#[derive(Debug, Clone)]
pub struct AimdConfig {
    /// Initial window, in source units.
    pub start_amount: u64,
    /// Added to the window per fulfill once out of slow start.
    pub increase_amount: u64,
    /// The window is divided by this on T04.
    pub decrease_factor: Ratio,
}

impl Default for AimdConfig {
    fn default() -> Self {
        Self {
            start_amount: 1000,
            increase_amount: 1000,
            decrease_factor: Ratio::from_integer(2u64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CongestionState {
    SlowStart = 0,
    AvoidCongestion = 1,
}

impl CongestionState {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::SlowStart),
            1 => Some(Self::AvoidCongestion),
            _ => None,
        }
    }
}

struct AtomicCongestionState(AtomicU8);

impl AtomicCongestionState {
    fn new(state: CongestionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> CongestionState {
        let value = self.0.load(Ordering::Acquire);
        match CongestionState::from_u8(value) {
            Some(state) => state,
            None => {
                tracing::error!(value, "invalid congestion state value");
                debug_assert!(false, "invalid congestion state value: {value}");
                CongestionState::AvoidCongestion
            }
        }
    }

    fn store(&self, state: CongestionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

pub struct AimdController {
    max_in_flight: AtomicU64,
    amount_in_flight: AtomicU64,
    state: AtomicCongestionState,
    increase_amount: u64,
    /// `1 / decrease_factor`, applied with floor rounding.
    decrease_multiplier: Ratio,
}

impl Default for AimdController {
    fn default() -> Self {
        Self::new(AimdConfig::default())
    }
}

impl AimdController {
    pub fn new(config: AimdConfig) -> Self {
        // a factor of zero would grow the window on T04; treat it as "no decrease"
        let decrease_multiplier = config.decrease_factor.reciprocal().unwrap_or_else(Ratio::one);
        Self {
            max_in_flight: AtomicU64::new(config.start_amount.max(1)),
            amount_in_flight: AtomicU64::new(0),
            state: AtomicCongestionState::new(CongestionState::SlowStart),
            increase_amount: config.increase_amount,
            decrease_multiplier,
        }
    }

    pub fn state(&self) -> CongestionState {
        self.state.load()
    }

    /// Current window size.
    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::Acquire)
    }

    pub fn amount_in_flight(&self) -> u64 {
        self.amount_in_flight.load(Ordering::Acquire)
    }

    /// How much more may be put in flight right now.
    pub fn available_amount(&self) -> u64 {
        self.max_in_flight().saturating_sub(self.amount_in_flight())
    }

    pub fn prepare(&self, amount: u64) {
        self.amount_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_flight| {
                Some(in_flight.saturating_add(amount))
            })
            .ok();
    }

    fn release(&self, amount: u64) {
        self.amount_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_flight| {
                Some(in_flight.saturating_sub(amount))
            })
            .ok();
    }

    pub fn on_fulfill(&self, amount: u64) {
        self.release(amount);
        let state = self.state.load();
        let increase = self.increase_amount;
        let previous = self
            .max_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |max| {
                Some(match state {
                    CongestionState::SlowStart => max.saturating_mul(2),
                    CongestionState::AvoidCongestion => max.saturating_add(increase),
                })
            })
            .unwrap_or_default();
        tracing::trace!(?state, previous, current = self.max_in_flight(), "window increased");
    }

    pub fn on_reject(&self, amount: u64, code: ErrorCode) {
        self.release(amount);
        if code != ErrorCode::T04_INSUFFICIENT_LIQUIDITY {
            return;
        }
        self.state.store(CongestionState::AvoidCongestion);
        let multiplier = &self.decrease_multiplier;
        let previous = self
            .max_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |max| {
                Some(max.multiply_floor(multiplier).max(1))
            })
            .unwrap_or_default();
        tracing::debug!(
            previous,
            current = self.max_in_flight(),
            "insufficient liquidity, reducing window"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_start_doubles() {
        let aimd = AimdController::default();
        let mut windows = vec![aimd.max_in_flight()];
        for _ in 0..3 {
            aimd.prepare(10);
            aimd.on_fulfill(10);
            windows.push(aimd.max_in_flight());
        }
        assert_eq!(windows, vec![1000, 2000, 4000, 8000]);
        assert_eq!(aimd.state(), CongestionState::SlowStart);
    }

    #[test]
    fn liquidity_backoff_halves_down_to_one() {
        let aimd = AimdController::default();
        let mut windows = vec![aimd.max_in_flight()];
        for _ in 0..12 {
            aimd.on_reject(0, ErrorCode::T04_INSUFFICIENT_LIQUIDITY);
            windows.push(aimd.max_in_flight());
        }
        assert_eq!(
            windows,
            vec![1000, 500, 250, 125, 62, 31, 15, 7, 3, 1, 1, 1, 1]
        );
        assert_eq!(aimd.state(), CongestionState::AvoidCongestion);
    }

    #[test]
    fn additive_increase_after_backoff() {
        let aimd = AimdController::default();
        aimd.on_reject(0, ErrorCode::T04_INSUFFICIENT_LIQUIDITY);
        aimd.on_fulfill(0);
        aimd.on_fulfill(0);
        assert_eq!(aimd.max_in_flight(), 2500);
    }

    #[test]
    fn other_rejects_only_release_amount() {
        let aimd = AimdController::default();
        aimd.prepare(600);
        assert_eq!(aimd.available_amount(), 400);
        aimd.on_reject(600, ErrorCode::F08_AMOUNT_TOO_LARGE);
        assert_eq!(aimd.available_amount(), 1000);
        assert_eq!(aimd.max_in_flight(), 1000);
        assert_eq!(aimd.state(), CongestionState::SlowStart);
    }

    #[test]
    fn window_saturates() {
        let aimd = AimdController::new(AimdConfig {
            start_amount: u64::MAX / 2 + 1,
            ..AimdConfig::default()
        });
        aimd.on_fulfill(0);
        assert_eq!(aimd.max_in_flight(), u64::MAX);
        aimd.on_fulfill(0);
        assert_eq!(aimd.max_in_flight(), u64::MAX);
    }

    #[test]
    fn fractional_decrease_factor() {
        let aimd = AimdController::new(AimdConfig {
            decrease_factor: "1.25".parse().unwrap(),
            ..AimdConfig::default()
        });
        aimd.on_reject(0, ErrorCode::T04_INSUFFICIENT_LIQUIDITY);
        assert_eq!(aimd.max_in_flight(), 800);
    }
}
