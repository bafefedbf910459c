//! Payment goal and the amount accounting that enforces it.
//!
//! [`set_payment_target`] turns the caller's goal plus the probed rate into
//! fixed [`PaymentTargetConditions`]. The [`AmountTracker`] then sizes each
//! packet against them, reserves the amounts while the packet is in flight,
//! and settles sent/delivered totals from the reply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use super::{AimdController, ExchangeRateTracker, MaxPacketAmountTracker};
use crate::error::PaymentError;
use crate::math::{saturating_amount, AmountExt, Ratio};
use crate::packet::{Frame, DEFAULT_STREAM_ID};
use crate::request::{RequestBuilder, StreamPacketReply};
use crate::send_state::SendState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentType {
    /// Send exactly the target in source units.
    FixedSend,
    /// Deliver at least the target in destination units.
    FixedDelivery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTargetConditions {
    pub payment_type: PaymentType,
    pub min_exchange_rate: Ratio,
    pub max_source_amount: u64,
    pub min_delivery_amount: u64,
    pub max_packet_amount: u64,
    pub estimated_packets: u64,
    /// Smallest packet, `ceil(1 / margin)`, whose floored delivery still meets the minimum rate.
    pub min_packet_amount: u64,
    /// Destination units the payment may fall short by because of rounding on small packets.
    pub delivery_shortfall_allowance: u64,
}

/// Derive enforceable bounds for a payment of `target_amount`.
///
/// Fails if the probed rate cannot honor `min_exchange_rate`, or if packets of
/// at most `max_packet_amount` are too small for the rate margin to survive
/// the receiver's floor rounding.
pub fn set_payment_target(
    payment_type: PaymentType,
    min_exchange_rate: &Ratio,
    max_packet_amount: u64,
    target_amount: u64,
    rate_tracker: &ExchangeRateTracker,
) -> Result<PaymentTargetConditions, PaymentError> {
    if target_amount == 0 {
        return Err(match payment_type {
            PaymentType::FixedSend => PaymentError::InvalidSourceAmount,
            PaymentType::FixedDelivery => PaymentError::InvalidDestinationAmount,
        });
    }

    let bounds = rate_tracker.bounds().ok_or(PaymentError::RateProbeFailed)?;
    if !bounds.lower.is_positive() || !bounds.upper.is_positive() {
        return Err(PaymentError::InsufficientExchangeRate);
    }

    let margin = bounds
        .lower
        .checked_sub(min_exchange_rate)
        .filter(Ratio::is_positive)
        .ok_or(PaymentError::InsufficientExchangeRate)?;

    // p = ceil(1 / margin) gives p * lower >= p * min + 1, so
    // floor(p * lower) >= ceil(p * min); anything smaller may fall short
    let min_packet_amount = margin
        .reciprocal()
        .map(|inverse| inverse.ceil())
        .ok_or(PaymentError::InsufficientExchangeRate)?;
    if BigUint::from(max_packet_amount) < min_packet_amount {
        tracing::warn!(
            max_packet_amount,
            %min_packet_amount,
            %margin,
            "max packet amount too small to enforce the minimum rate"
        );
        return Err(PaymentError::ExchangeRateRoundingError);
    }

    let delivery_shortfall_allowance =
        saturating_amount(&1u64.multiply_ceil_big(min_exchange_rate));

    let (max_source_amount, min_delivery_amount) = match payment_type {
        PaymentType::FixedSend => {
            let min_delivery = (target_amount - 1).multiply_ceil_big(min_exchange_rate);
            (target_amount, saturating_amount(&min_delivery))
        }
        PaymentType::FixedDelivery => {
            if min_exchange_rate.is_zero() {
                return Err(PaymentError::UnenforceableDelivery);
            }
            let max_source = target_amount
                .multiply_ceil_reciprocal(min_exchange_rate)
                .and_then(|source| source.checked_add(1))
                .ok_or(PaymentError::InvalidDestinationAmount)?;
            (max_source, target_amount)
        }
    };

    let estimated_packets = max_source_amount
        .divide_ceil(max_packet_amount)
        .ok_or(PaymentError::ExchangeRateRoundingError)?;

    let conditions = PaymentTargetConditions {
        payment_type,
        min_exchange_rate: min_exchange_rate.clone(),
        max_source_amount,
        min_delivery_amount,
        max_packet_amount,
        estimated_packets,
        min_packet_amount: saturating_amount(&min_packet_amount),
        delivery_shortfall_allowance,
    };
    tracing::info!(
        ?payment_type,
        max_source_amount,
        min_delivery_amount,
        estimated_packets,
        min_exchange_rate = %conditions.min_exchange_rate,
        "payment target set"
    );
    Ok(conditions)
}

/// Amounts held for one packet between dispatch and reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub source_amount: u64,
    pub min_destination_amount: u64,
    /// Shortfall allowance consumed by this packet, returned if it is rejected.
    pub shortfall: u64,
}

pub struct AmountTracker {
    target: PaymentTargetConditions,
    amount_sent: AtomicU64,
    amount_delivered: AtomicU64,
    source_in_flight: AtomicU64,
    destination_in_flight: AtomicU64,
    available_shortfall: AtomicU64,
    packets_fulfilled: AtomicU64,
    packets_rejected: AtomicU64,
    error: OnceLock<PaymentError>,
}

fn saturating_add(counter: &AtomicU64, amount: u64) {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
            Some(value.saturating_add(amount))
        })
        .ok();
}

fn saturating_sub(counter: &AtomicU64, amount: u64) {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
            Some(value.saturating_sub(amount))
        })
        .ok();
}

impl AmountTracker {
    pub fn new(target: PaymentTargetConditions) -> Self {
        Self {
            available_shortfall: AtomicU64::new(target.delivery_shortfall_allowance),
            target,
            amount_sent: AtomicU64::new(0),
            amount_delivered: AtomicU64::new(0),
            source_in_flight: AtomicU64::new(0),
            destination_in_flight: AtomicU64::new(0),
            packets_fulfilled: AtomicU64::new(0),
            packets_rejected: AtomicU64::new(0),
            error: OnceLock::new(),
        }
    }

    pub fn target(&self) -> &PaymentTargetConditions {
        &self.target
    }

    pub fn amount_sent(&self) -> u64 {
        self.amount_sent.load(Ordering::Acquire)
    }

    pub fn amount_delivered(&self) -> u64 {
        self.amount_delivered.load(Ordering::Acquire)
    }

    pub fn source_amount_in_flight(&self) -> u64 {
        self.source_in_flight.load(Ordering::Acquire)
    }

    pub fn destination_amount_in_flight(&self) -> u64 {
        self.destination_in_flight.load(Ordering::Acquire)
    }

    pub fn available_shortfall(&self) -> u64 {
        self.available_shortfall.load(Ordering::Acquire)
    }

    pub fn packets_fulfilled(&self) -> u64 {
        self.packets_fulfilled.load(Ordering::Acquire)
    }

    pub fn packets_rejected(&self) -> u64 {
        self.packets_rejected.load(Ordering::Acquire)
    }

    pub fn error(&self) -> Option<PaymentError> {
        self.error.get().copied()
    }

    fn fail(&self, error: PaymentError) {
        if self.error.set(error).is_ok() {
            tracing::warn!(%error, "payment failed");
        }
    }

    /// Whether the payment goal has been reached.
    pub fn is_complete(&self) -> bool {
        match self.target.payment_type {
            PaymentType::FixedSend => self.amount_sent() >= self.target.max_source_amount,
            PaymentType::FixedDelivery => {
                self.amount_delivered() >= self.target.min_delivery_amount
            }
        }
    }

    /// Size the next packet, or decide that none should be sent.
    pub fn next_state(
        &self,
        request: &mut RequestBuilder,
        rates: &ExchangeRateTracker,
        max_packet: &MaxPacketAmountTracker,
        window: &AimdController,
    ) -> SendState {
        if let Some(error) = self.error() {
            return SendState::Failed(error);
        }
        if self.is_complete() {
            return SendState::End;
        }

        let source_in_flight = self.source_amount_in_flight();
        let remaining_source = self
            .target
            .max_source_amount
            .saturating_sub(self.amount_sent())
            .saturating_sub(source_in_flight);
        if remaining_source == 0 {
            return if source_in_flight > 0 {
                SendState::Wait
            } else {
                // the whole budget was spent and delivery still fell short
                SendState::Failed(PaymentError::InsufficientExchangeRate)
            };
        }

        let mut source_amount = remaining_source;
        if self.target.payment_type == PaymentType::FixedDelivery {
            let remaining_delivery = self
                .target
                .min_delivery_amount
                .saturating_sub(self.amount_delivered())
                .saturating_sub(self.destination_amount_in_flight());
            if remaining_delivery == 0 {
                return SendState::Wait;
            }
            match rates.estimate_source_amount(remaining_delivery) {
                Ok((_, high)) => source_amount = source_amount.min(high),
                Err(error) => return SendState::Failed(error),
            }
        }
        source_amount = source_amount.min(
            max_packet
                .next_max_packet_amount()
                .unwrap_or(self.target.max_packet_amount),
        );

        // Below min_packet_amount every fulfill eats into the shortfall
        // allowance, so a shrunken window never sizes a packet under it.
        let available = window.available_amount();
        if source_amount > available {
            let floor = self.target.min_packet_amount.min(source_amount);
            if available >= floor {
                source_amount = available;
            } else if window.amount_in_flight() == 0 {
                source_amount = floor;
            } else {
                return SendState::Wait;
            }
        }
        if source_amount == 0 {
            return SendState::Wait;
        }

        let Some(min_destination_amount) =
            source_amount.checked_multiply_ceil(&self.target.min_exchange_rate)
        else {
            return SendState::Failed(PaymentError::InsufficientExchangeRate);
        };
        let estimated_destination_amount = match rates.estimate_destination_amount(source_amount) {
            Ok((low, _)) => low,
            Err(error) => return SendState::Failed(error),
        };
        let deficit = min_destination_amount.saturating_sub(estimated_destination_amount);
        if deficit > self.available_shortfall() {
            tracing::warn!(
                source_amount,
                min_destination_amount,
                estimated_destination_amount,
                "exchange rate fell below the minimum"
            );
            return SendState::Failed(PaymentError::InsufficientExchangeRate);
        }

        request.source_amount = source_amount;
        request.min_destination_amount = min_destination_amount - deficit;
        request.is_fulfillable = true;
        request.push_frame(Frame::StreamMoney {
            stream_id: DEFAULT_STREAM_ID,
            shares: 1,
        });
        SendState::Ready
    }

    /// Hold the packet's amounts until its reply settles them.
    pub fn reserve(&self, source_amount: u64, min_destination_amount: u64) -> Reservation {
        let shortfall = source_amount
            .multiply_ceil(&self.target.min_exchange_rate)
            .saturating_sub(min_destination_amount);
        saturating_add(&self.source_in_flight, source_amount);
        saturating_add(&self.destination_in_flight, min_destination_amount);
        saturating_sub(&self.available_shortfall, shortfall);
        Reservation {
            source_amount,
            min_destination_amount,
            shortfall,
        }
    }

    pub fn settle(&self, reservation: Reservation, reply: &StreamPacketReply) {
        saturating_sub(&self.source_in_flight, reservation.source_amount);
        saturating_sub(&self.destination_in_flight, reservation.min_destination_amount);

        if reply.is_fulfill() {
            let claimed = reply.destination_amount();
            if claimed.is_some_and(|claimed| claimed < reservation.min_destination_amount) {
                tracing::warn!(
                    ?claimed,
                    min_destination_amount = reservation.min_destination_amount,
                    "receiver fulfilled below the minimum destination amount"
                );
                self.fail(PaymentError::ReceiverProtocolViolation);
            }
            let delivered = claimed.unwrap_or(reservation.min_destination_amount);
            saturating_add(&self.amount_sent, reservation.source_amount);
            saturating_add(&self.amount_delivered, delivered);
            self.packets_fulfilled.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(
                source_amount = reservation.source_amount,
                delivered,
                amount_sent = self.amount_sent(),
                amount_delivered = self.amount_delivered(),
                "packet fulfilled"
            );
        } else {
            saturating_add(&self.available_shortfall, reservation.shortfall);
            self.packets_rejected.fetch_add(1, Ordering::AcqRel);
        }

        for frame in reply.frames() {
            if let Frame::StreamMaxMoney {
                stream_id: DEFAULT_STREAM_ID,
                receive_max,
                ..
            } = frame
            {
                if *receive_max < self.target.min_delivery_amount {
                    tracing::warn!(
                        receive_max,
                        min_delivery_amount = self.target.min_delivery_amount,
                        "receiver cannot accept the payment"
                    );
                    self.fail(PaymentError::IncompatibleReceiveMax);
                }
            }
        }
    }
}
