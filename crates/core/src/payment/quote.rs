//! Quoting: probe the path, then fix the payment's enforceable bounds.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::sender::{drive, PaymentSender};
use crate::error::PaymentError;
use crate::filters::{
    AssetDetailsFilter, ExchangeRateFilter, FailureFilter, FilterChain, MaxPacketFilter,
    PacingFilter, RateProbeFilter, SequenceFilter, StreamPacketFilter,
};
use crate::link::{Link, StreamPacketCodec};
use crate::math::{AmountExt, Ratio};
use crate::packet::Denomination;
use crate::trackers::{
    set_payment_target, AimdController, MaxPacketAmount, PaymentTargetConditions, PaymentType,
    RateBounds,
};
use crate::util::time_source::TimeSource;

/// What the payment must achieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Amount {
    /// Send exactly this many source units.
    Send(u64),
    /// Deliver at least this many destination units.
    Deliver(u64),
}

impl Amount {
    fn payment_type(&self) -> PaymentType {
        match self {
            Amount::Send(_) => PaymentType::FixedSend,
            Amount::Deliver(_) => PaymentType::FixedDelivery,
        }
    }

    fn value(&self) -> u64 {
        match self {
            Amount::Send(amount) | Amount::Deliver(amount) => *amount,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub amount: Amount,
    /// Fraction of the probed rate the sender is willing to lose; defaults to the config's.
    pub slippage: Option<Ratio>,
    /// Overrides the minimum rate derived from the probe and slippage.
    pub min_exchange_rate: Option<Ratio>,
    pub source_denomination: Option<Denomination>,
    /// Expected receiver asset; otherwise learned from the receiver.
    pub destination_denomination: Option<Denomination>,
}

impl QuoteRequest {
    pub fn new(amount: Amount) -> Self {
        Self {
            amount,
            slippage: None,
            min_exchange_rate: None,
            source_denomination: None,
            destination_denomination: None,
        }
    }

    pub fn with_slippage(mut self, slippage: Ratio) -> Self {
        self.slippage = Some(slippage);
        self
    }

    pub fn with_min_exchange_rate(mut self, rate: Ratio) -> Self {
        self.min_exchange_rate = Some(rate);
        self
    }

    pub fn with_source_denomination(mut self, denomination: Denomination) -> Self {
        self.source_denomination = Some(denomination);
        self
    }

    pub fn with_destination_denomination(mut self, denomination: Denomination) -> Self {
        self.destination_denomination = Some(denomination);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Quote {
    pub target: PaymentTargetConditions,
    pub rate_bounds: RateBounds,
    pub source_denomination: Denomination,
    pub destination_denomination: Denomination,
    pub max_packet_amount: MaxPacketAmount,
    /// Destination units a fixed send is expected to deliver at the probed rate.
    pub estimated_delivery: u64,
    pub estimated_duration: Duration,
}

impl<L, C, T> PaymentSender<L, C, T>
where
    L: Link,
    C: StreamPacketCodec,
    T: TimeSource + Clone + Send + Sync + 'static,
{
    /// Probe the path and derive the bounds [`pay`](Self::pay) will enforce.
    pub async fn quote(&self, request: QuoteRequest) -> Result<Quote, PaymentError> {
        let slippage = request
            .slippage
            .clone()
            .unwrap_or_else(|| self.config.default_slippage.clone());
        if slippage >= Ratio::one() {
            return Err(PaymentError::InvalidSlippage);
        }

        let source = self.connection.source_address();
        let destination = self.connection.destination_address();
        if !source.shares_network_with(destination) {
            tracing::warn!(%source, %destination, "addresses are on different networks");
            return Err(PaymentError::IncompatibleInterledgerNetworks);
        }
        let source_denomination = request
            .source_denomination
            .clone()
            .ok_or(PaymentError::UnknownSourceAsset)?;
        if request.amount.value() == 0 {
            return Err(match request.amount {
                Amount::Send(_) => PaymentError::InvalidSourceAmount,
                Amount::Deliver(_) => PaymentError::InvalidDestinationAmount,
            });
        }

        self.probe(&source_denomination).await?;

        let destination_denomination = match &request.destination_denomination {
            Some(expected) => {
                self.assets.expect_destination(expected)?;
                expected.clone()
            }
            None => self
                .assets
                .destination_denomination()
                .cloned()
                .ok_or(PaymentError::UnknownDestinationAsset)?,
        };

        let rate_bounds = self.rates.bounds().ok_or(PaymentError::RateProbeFailed)?;
        let min_exchange_rate = match request.min_exchange_rate {
            Some(rate) => rate,
            None => &rate_bounds.lower * &Ratio::one().saturating_sub(&slippage),
        };
        let max_packet_amount = self.max_packet.max_packet_amount();
        let target = set_payment_target(
            request.amount.payment_type(),
            &min_exchange_rate,
            max_packet_amount.value().unwrap_or(u64::MAX),
            request.amount.value(),
            &self.rates,
        )?;
        if let Some(receive_max) = self.assets.receive_max() {
            if receive_max < target.min_delivery_amount {
                tracing::warn!(
                    receive_max,
                    min_delivery_amount = target.min_delivery_amount,
                    "receiver cannot accept the payment"
                );
                return Err(PaymentError::IncompatibleReceiveMax);
            }
        }

        let estimated_delivery = match request.amount {
            Amount::Send(amount) => amount.multiply_floor(&rate_bounds.lower),
            Amount::Deliver(amount) => amount,
        };
        let estimated_duration = self
            .pacing
            .packet_delay()
            .saturating_mul(u32::try_from(target.estimated_packets).unwrap_or(u32::MAX));

        tracing::info!(
            lower = %rate_bounds.lower,
            upper = %rate_bounds.upper,
            %min_exchange_rate,
            max_packet = ?max_packet_amount,
            estimated_delivery,
            ?estimated_duration,
            "quote ready"
        );
        Ok(Quote {
            target,
            rate_bounds,
            source_denomination,
            destination_denomination,
            max_packet_amount,
            estimated_delivery,
            estimated_duration,
        })
    }

    /// Send unfulfillable packets until the rate is known or the schedule runs out.
    async fn probe(&self, source_denomination: &Denomination) -> Result<(), PaymentError> {
        // probe amounts are not bounded by the amount window, it only records them
        let window = Arc::new(AimdController::new(self.config.aimd()));
        let failure = Arc::new(FailureFilter::new_with_time_source(
            None,
            self.time_source.clone(),
        ));
        let filters: Vec<Arc<dyn StreamPacketFilter>> = vec![
            failure.clone(),
            Arc::new(AssetDetailsFilter::new(
                self.assets.clone(),
                self.connection.source_address().clone(),
                Some(source_denomination.clone()),
            )),
            Arc::new(MaxPacketFilter::new(self.max_packet.clone())),
            Arc::new(ExchangeRateFilter::new(self.rates.clone())),
            Arc::new(PacingFilter::new(self.pacing.clone(), window)),
            Arc::new(RateProbeFilter::new_with_time_source(
                &self.config.rate_probe_amounts,
                self.max_packet.clone(),
                self.config.rate_probe_timeout,
                self.time_source.clone(),
            )),
            Arc::new(SequenceFilter::new(self.connection.clone())),
        ];
        let chain = FilterChain::new(filters, self.packet_sender.clone());

        tracing::debug!(amounts = self.config.rate_probe_amounts.len(), "probing exchange rate");
        let outcome = drive(chain, &self.pacing, &self.stop).await;
        if let Some(error) = outcome
            .error
            .or_else(|| failure.error())
            .or_else(|| self.assets.error())
        {
            return Err(error);
        }
        match self.rates.bounds() {
            Some(bounds) => {
                tracing::debug!(
                    lower = %bounds.lower,
                    upper = %bounds.upper,
                    "probed exchange rate"
                );
                Ok(())
            }
            None => Err(PaymentError::RateProbeFailed),
        }
    }
}
