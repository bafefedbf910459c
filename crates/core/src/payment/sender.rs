//! The driver: runs a filter chain until it ends, fails or is stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};

use super::quote::Quote;
use super::receipt::PaymentReceipt;
use crate::config::SenderConfig;
use crate::connection::StreamConnection;
use crate::error::{ConfigError, PaymentError};
use crate::filters::{
    AmountFilter, AssetDetailsFilter, ExchangeRateFilter, FailureFilter, FilterChain,
    MaxPacketFilter, PacingFilter, SequenceFilter, StreamPacketFilter, StreamPacketSender,
};
use crate::link::{Link, StreamPacketCodec};
use crate::packet::{Frame, StreamErrorCode};
use crate::request::{RequestBuilder, StreamPacketReply, StreamPacketRequest};
use crate::send_state::SendState;
use crate::trackers::{
    AimdController, AmountTracker, AssetDetailsTracker, ExchangeRateTracker,
    MaxPacketAmountTracker, PacingTracker,
};
use crate::util::time_source::{InstantTimeSrc, TimeSource};

/// Bounds on how long the driver sleeps while every filter says `Wait`.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Soft stop for a running quote or payment.
///
/// Once stopped, the driver sends no new packets and returns after every
/// packet already in flight has resolved. A stopped handle stays stopped.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        if !self.0.swap(true, Ordering::AcqRel) {
            tracing::info!("stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
pub(super) struct DriveOutcome {
    pub error: Option<PaymentError>,
    pub stopped: bool,
    pub close_frames: Vec<Frame>,
}

impl DriveOutcome {
    fn absorb(&mut self, joined: Result<StreamPacketReply, JoinError>) {
        match joined {
            Ok(reply) => self.close_frames.extend(reply.queued_close_frames),
            Err(error) => {
                tracing::error!(%error, "packet task failed");
                self.error.get_or_insert(PaymentError::ConnectorError);
            }
        }
    }
}

/// Send packets through `chain` until a filter ends or fails the run.
///
/// Each packet runs in its own task. The pre-send half of the chain runs here,
/// on the driver, so packets claim sequence numbers and amounts in order.
pub(super) async fn drive<T>(
    chain: FilterChain,
    pacing: &PacingTracker<T>,
    stop: &StopHandle,
) -> DriveOutcome
where
    T: TimeSource,
{
    let mut outcome = DriveOutcome::default();
    let mut in_flight = JoinSet::new();
    let mut sent = 0u64;

    loop {
        while let Some(joined) = in_flight.try_join_next() {
            outcome.absorb(joined);
        }
        if outcome.error.is_some() {
            break;
        }
        if stop.is_stopped() {
            outcome.stopped = true;
            break;
        }

        let mut builder = RequestBuilder::new();
        match chain.next_state(&mut builder) {
            SendState::Ready => {
                let request = builder.build();
                in_flight.spawn(chain.clone().do_filter(request));
                sent += 1;
            }
            SendState::Wait => {
                let delay = pacing
                    .time_until_next_send()
                    .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
                tokio::select! {
                    Some(joined) = in_flight.join_next() => outcome.absorb(joined),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            SendState::End => break,
            SendState::Failed(error) => {
                outcome.error = Some(error);
                break;
            }
        }
    }

    if !in_flight.is_empty() {
        tracing::debug!(in_flight = in_flight.len(), "waiting for in-flight packets");
    }
    while let Some(joined) = in_flight.join_next().await {
        outcome.absorb(joined);
    }
    tracing::debug!(sent, error = ?outcome.error, stopped = outcome.stopped, "run finished");
    outcome
}

/// Drives quotes and payments over one STREAM connection.
///
/// Path knowledge (rate bounds, max packet amount, pacing, the receiver's
/// asset) persists across calls, so a payment benefits from its quote.
pub struct PaymentSender<L, C, T: TimeSource = InstantTimeSrc> {
    pub(super) connection: Arc<StreamConnection>,
    pub(super) packet_sender: Arc<StreamPacketSender<L, C>>,
    pub(super) config: SenderConfig,
    pub(super) rates: Arc<ExchangeRateTracker>,
    pub(super) max_packet: Arc<MaxPacketAmountTracker>,
    pub(super) assets: Arc<AssetDetailsTracker>,
    pub(super) pacing: Arc<PacingTracker<T>>,
    pub(super) time_source: T,
    pub(super) stop: StopHandle,
}

impl<L: Link, C: StreamPacketCodec> PaymentSender<L, C, InstantTimeSrc> {
    pub fn new(
        link: Arc<L>,
        codec: Arc<C>,
        connection: StreamConnection,
        config: SenderConfig,
    ) -> Result<Self, ConfigError> {
        Self::new_with_time_source(link, codec, connection, config, InstantTimeSrc::new())
    }
}

impl<L, C, T> PaymentSender<L, C, T>
where
    L: Link,
    C: StreamPacketCodec,
    T: TimeSource + Clone + Send + Sync + 'static,
{
    pub fn new_with_time_source(
        link: Arc<L>,
        codec: Arc<C>,
        connection: StreamConnection,
        config: SenderConfig,
        time_source: T,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let connection = Arc::new(connection);
        let packet_sender = Arc::new(StreamPacketSender::new(
            link,
            codec,
            connection.clone(),
            config.packet_expiry,
        ));
        Ok(Self {
            pacing: Arc::new(PacingTracker::new_with_time_source(
                config.pacing(),
                time_source.clone(),
            )),
            connection,
            packet_sender,
            config,
            rates: Arc::new(ExchangeRateTracker::new()),
            max_packet: Arc::new(MaxPacketAmountTracker::new()),
            assets: Arc::new(AssetDetailsTracker::new(None)),
            time_source,
            stop: StopHandle::default(),
        })
    }

    pub fn connection(&self) -> &StreamConnection {
        &self.connection
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    pub fn exchange_rate(&self) -> &ExchangeRateTracker {
        &self.rates
    }

    pub fn max_packet(&self) -> &MaxPacketAmountTracker {
        &self.max_packet
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Send the quoted payment. Never fails outright; the receipt carries the outcome.
    pub async fn pay(&self, quote: &Quote) -> PaymentReceipt {
        let amount = Arc::new(AmountTracker::new(quote.target.clone()));
        let window = Arc::new(AimdController::new(self.config.aimd()));
        let failure = Arc::new(FailureFilter::new_with_time_source(
            Some(self.config.idle_timeout),
            self.time_source.clone(),
        ));

        let filters: Vec<Arc<dyn StreamPacketFilter>> = vec![
            failure.clone(),
            Arc::new(AssetDetailsFilter::new(
                self.assets.clone(),
                self.connection.source_address().clone(),
                Some(quote.source_denomination.clone()),
            )),
            Arc::new(MaxPacketFilter::new(self.max_packet.clone())),
            Arc::new(ExchangeRateFilter::new(self.rates.clone())),
            Arc::new(PacingFilter::new(self.pacing.clone(), window.clone())),
            Arc::new(AmountFilter::new(
                amount.clone(),
                self.rates.clone(),
                self.max_packet.clone(),
                window,
            )),
            Arc::new(SequenceFilter::new(self.connection.clone())),
        ];
        let chain = FilterChain::new(filters, self.packet_sender.clone());

        tracing::info!(
            payment_type = ?quote.target.payment_type,
            max_source_amount = quote.target.max_source_amount,
            min_delivery_amount = quote.target.min_delivery_amount,
            "starting payment"
        );
        let outcome = drive(chain, &self.pacing, &self.stop).await;

        let error = outcome
            .error
            .or_else(|| failure.error())
            .or_else(|| amount.error())
            .or_else(|| self.assets.error());
        let completed = amount.is_complete();
        let receipt = PaymentReceipt {
            amount_sent: amount.amount_sent(),
            amount_delivered: amount.amount_delivered(),
            amount_in_flight_at_end: amount.source_amount_in_flight(),
            packets_fulfilled: amount.packets_fulfilled(),
            packets_rejected: amount.packets_rejected(),
            completed,
            error,
        };
        match error {
            Some(error) => tracing::warn!(
                %error,
                amount_sent = receipt.amount_sent,
                amount_delivered = receipt.amount_delivered,
                "payment failed"
            ),
            None => tracing::info!(
                amount_sent = receipt.amount_sent,
                amount_delivered = receipt.amount_delivered,
                completed,
                "payment finished"
            ),
        }

        let code = if receipt.is_success() {
            StreamErrorCode::NoError
        } else {
            StreamErrorCode::ApplicationError
        };
        self.close(code, outcome.close_frames).await;
        receipt
    }

    /// Best effort: tell the receiver the connection is done.
    ///
    /// Frames queued by filters are sent along; if none of them closes the
    /// connection, a `ConnectionClose` with `code` is added.
    pub async fn close(&self, code: StreamErrorCode, mut frames: Vec<Frame>) {
        if !frames
            .iter()
            .any(|frame| matches!(frame, Frame::ConnectionClose { .. }))
        {
            frames.push(Frame::ConnectionClose {
                code,
                message: String::new(),
            });
        }
        let sequence: Arc<dyn StreamPacketFilter> =
            Arc::new(SequenceFilter::new(self.connection.clone()));
        let chain = FilterChain::new(vec![sequence], self.packet_sender.clone());
        let reply = chain.do_filter(StreamPacketRequest::control(frames)).await;
        tracing::debug!(
            code = ?reply.reject_code(),
            authentic = reply.is_authentic(),
            "sent connection close"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Denomination;
    use crate::payment::{Amount, QuoteRequest};
    use crate::test_utils::{test_connection, JsonCodec, ScriptedReceiver};

    fn fast_config() -> SenderConfig {
        SenderConfig {
            initial_packets_per_second: 1000,
            idle_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    fn payment_sender(
        receiver: ScriptedReceiver,
    ) -> (PaymentSender<ScriptedReceiver, JsonCodec>, Arc<ScriptedReceiver>) {
        let receiver = Arc::new(receiver);
        let sender = PaymentSender::new(
            receiver.clone(),
            Arc::new(JsonCodec),
            test_connection(),
            fast_config(),
        )
        .unwrap();
        (sender, receiver)
    }

    fn usd() -> Denomination {
        Denomination::new("USD", 2)
    }

    #[test]
    fn stop_handle_is_shared() {
        let handle = StopHandle::default();
        let clone = handle.clone();
        assert!(!handle.is_stopped());
        clone.stop();
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn fixed_send_completes() {
        let (sender, _) = payment_sender(ScriptedReceiver::with_rate(1, 1).with_asset(usd()));
        let quote = sender
            .quote(QuoteRequest::new(Amount::Send(10_000)).with_source_denomination(usd()))
            .await
            .unwrap();
        let receipt = sender.pay(&quote).await;
        assert!(receipt.is_success(), "{receipt:?}");
        assert_eq!(receipt.amount_sent, 10_000);
        assert_eq!(receipt.amount_delivered, 10_000);
        assert_eq!(receipt.amount_in_flight_at_end, 0);
    }

    #[tokio::test]
    async fn stopped_payment_sends_nothing() {
        let (sender, receiver) =
            payment_sender(ScriptedReceiver::with_rate(1, 1).with_asset(usd()));
        let quote = sender
            .quote(QuoteRequest::new(Amount::Send(10_000)).with_source_denomination(usd()))
            .await
            .unwrap();
        let probes = receiver.prepares();

        sender.stop_handle().stop();
        let receipt = sender.pay(&quote).await;
        assert_eq!(receipt.error, None);
        assert!(!receipt.completed);
        assert_eq!(receipt.amount_sent, 0);
        // only the connection close went out
        assert_eq!(receiver.prepares(), probes + 1);
    }

    #[tokio::test]
    async fn receive_max_below_target_fails_before_paying() {
        let (sender, receiver) = payment_sender(
            ScriptedReceiver::with_rate(1, 1)
                .with_asset(usd())
                .with_receive_max(100),
        );
        let result = sender
            .quote(QuoteRequest::new(Amount::Deliver(1_000)).with_source_denomination(usd()))
            .await;
        assert_eq!(result.unwrap_err(), PaymentError::IncompatibleReceiveMax);
        assert_eq!(receiver.total_received(), 0);
    }
}
