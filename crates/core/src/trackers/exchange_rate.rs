//! Converging bounds on the realized exchange rate of the path.
//!
//! Every authentic reply tells us that `sent` source units arrived as
//! `received` destination units, after the receiver floored the amount. The
//! realized rate therefore lies in `[received / sent, (received + 1) / sent)`.
//! Intersecting those intervals narrows the bounds; an observation that
//! contradicts them means the rate moved, and the tracker starts over.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use num_bigint::BigUint;

use crate::error::PaymentError;
use crate::math::{saturating_amount, AmountExt, Ratio};

/// `[lower, upper)` bounds on the realized exchange rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateBounds {
    pub lower: Ratio,
    pub upper: Ratio,
}

impl RateBounds {
    fn for_packet(sent: u64, received: u64) -> Option<Self> {
        let lower = Ratio::new(received, sent).ok()?;
        let upper = Ratio::new(BigUint::from(received) + 1u32, sent).ok()?;
        Some(Self { lower, upper })
    }

    fn overlaps(&self, other: &RateBounds) -> bool {
        self.lower < other.upper && other.lower < self.upper
    }

    fn intersect(&self, other: &RateBounds) -> Self {
        Self {
            lower: std::cmp::max(&self.lower, &other.lower).clone(),
            upper: std::cmp::min(&self.upper, &other.upper).clone(),
        }
    }
}

#[derive(Default)]
pub struct ExchangeRateTracker {
    bounds: ArcSwapOption<RateBounds>,
    /// source amount -> destination amount
    sent_amounts: DashMap<u64, u64>,
    /// destination amount -> source amount
    received_amounts: DashMap<u64, u64>,
}

impl ExchangeRateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `sent` source units were credited to the receiver as `received`.
    pub fn update_rate(&self, sent: u64, received: u64) {
        let Some(packet_bounds) = RateBounds::for_packet(sent, received) else {
            // zero source amount carries no rate information
            return;
        };

        let drifted = self
            .sent_amounts
            .get(&sent)
            .is_some_and(|prior| *prior != received);

        let mut reset = false;
        self.bounds.rcu(|current| match current.as_deref() {
            Some(tracked) if !drifted && tracked.overlaps(&packet_bounds) => {
                reset = false;
                Some(Arc::new(tracked.intersect(&packet_bounds)))
            }
            Some(_) => {
                reset = true;
                Some(Arc::new(packet_bounds.clone()))
            }
            None => {
                reset = false;
                Some(Arc::new(packet_bounds.clone()))
            }
        });

        if reset {
            tracing::warn!(
                sent,
                received,
                lower = %packet_bounds.lower,
                upper = %packet_bounds.upper,
                "exchange rate drifted, resetting rate bounds"
            );
            self.sent_amounts.clear();
            self.received_amounts.clear();
        } else {
            tracing::trace!(sent, received, "exchange rate observation");
        }
        self.sent_amounts.insert(sent, received);
        self.received_amounts.insert(received, sent);
    }

    pub fn bounds(&self) -> Option<RateBounds> {
        self.bounds.load_full().map(|bounds| (*bounds).clone())
    }

    pub fn lower_bound(&self) -> Result<Ratio, PaymentError> {
        self.bounds()
            .map(|bounds| bounds.lower)
            .ok_or(PaymentError::RateProbeFailed)
    }

    pub fn upper_bound(&self) -> Result<Ratio, PaymentError> {
        self.bounds()
            .map(|bounds| bounds.upper)
            .ok_or(PaymentError::RateProbeFailed)
    }

    /// Range of destination amounts `source` would deliver at the current rate.
    ///
    /// Exact if this very amount was already observed.
    pub fn estimate_destination_amount(&self, source: u64) -> Result<(u64, u64), PaymentError> {
        if let Some(received) = self.sent_amounts.get(&source) {
            return Ok((*received, *received));
        }
        let bounds = self.bounds().ok_or(PaymentError::RateProbeFailed)?;
        let low = saturating_amount(&source.multiply_floor_big(&bounds.lower));
        let ceil_high = source.multiply_ceil_big(&bounds.upper);
        let high = if ceil_high > BigUint::from(0u32) {
            saturating_amount(&(ceil_high - 1u32))
        } else {
            0
        };
        Ok((low, high.max(low)))
    }

    /// Range of source amounts expected to deliver `destination`.
    pub fn estimate_source_amount(&self, destination: u64) -> Result<(u64, u64), PaymentError> {
        if let Some(sent) = self.received_amounts.get(&destination) {
            return Ok((*sent, *sent));
        }
        let bounds = self.bounds().ok_or(PaymentError::RateProbeFailed)?;
        let low = destination
            .multiply_ceil_reciprocal(&bounds.upper)
            .unwrap_or(u64::MAX);
        let high = destination
            .multiply_ceil_reciprocal(&bounds.lower)
            .unwrap_or(u64::MAX);
        Ok((low, high.max(low)))
    }
}
