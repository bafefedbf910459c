//! Per-payment state shared by the filters.
//!
//! Trackers are read on every packet and written on every reply, from
//! whichever task the reply lands on. They use atomics, `ArcSwap` and
//! `DashMap` rather than locks.

pub mod amount;
pub mod asset_details;
pub mod congestion;
pub mod exchange_rate;
pub mod max_packet;
pub mod pacing;

pub use amount::{
    set_payment_target, AmountTracker, PaymentTargetConditions, PaymentType, Reservation,
};
pub use asset_details::AssetDetailsTracker;
pub use congestion::{AimdConfig, AimdController, CongestionState};
pub use exchange_rate::{ExchangeRateTracker, RateBounds};
pub use max_packet::{MaxPacketAmount, MaxPacketAmountTracker};
pub use pacing::{PacingConfig, PacingTracker};
