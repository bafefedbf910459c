use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;

use super::{FilterChain, StreamPacketFilter};
use crate::connection::StreamConnection;
use crate::error::PaymentError;
use crate::packet::ErrorCode;
use crate::request::{RequestBuilder, StreamPacketReply, StreamPacketRequest};
use crate::send_state::SendState;

/// Stamps each packet with a fresh sequence number.
pub struct SequenceFilter {
    connection: Arc<StreamConnection>,
}

impl SequenceFilter {
    pub fn new(connection: Arc<StreamConnection>) -> Self {
        Self { connection }
    }
}

impl StreamPacketFilter for SequenceFilter {
    fn next_state(&self, _request: &mut RequestBuilder) -> SendState {
        if self.connection.is_sequence_exhausted() {
            tracing::warn!(
                sequence = self.connection.peek_sequence(),
                "connection ran out of safe sequence numbers"
            );
            return SendState::Failed(PaymentError::ExceededMaxSequence);
        }
        SendState::Ready
    }

    fn do_filter(
        self: Arc<Self>,
        mut request: StreamPacketRequest,
        chain: FilterChain,
    ) -> BoxFuture<'static, StreamPacketReply> {
        match self.connection.next_sequence() {
            Ok(sequence) => {
                request.sequence = sequence;
                chain.do_filter(request)
            }
            Err(error) => future::ready(StreamPacketReply::local_reject(
                ErrorCode::T00_INTERNAL_ERROR,
                error.to_string(),
            ))
            .boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SEQUENCE_LIMIT;
    use crate::filters::PacketSender;
    use crate::test_utils::test_connection;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Sequences(Mutex<Vec<u64>>);

    impl PacketSender for Sequences {
        fn send(&self, request: StreamPacketRequest) -> BoxFuture<'static, StreamPacketReply> {
            self.0.lock().push(request.sequence);
            future::ready(StreamPacketReply::local_reject(
                ErrorCode::F99_APPLICATION_ERROR,
                "recorded",
            ))
            .boxed()
        }
    }

    fn chain(connection: StreamConnection) -> (FilterChain, Arc<Sequences>) {
        let sent = Arc::new(Sequences::default());
        let filters: Vec<Arc<dyn StreamPacketFilter>> =
            vec![Arc::new(SequenceFilter::new(Arc::new(connection)))];
        (FilterChain::new(filters, sent.clone()), sent)
    }

    #[tokio::test]
    async fn stamps_consecutive_sequences() {
        let (chain, sent) = chain(test_connection());
        for _ in 0..3 {
            chain.clone().do_filter(RequestBuilder::new().build()).await;
        }
        assert_eq!(*sent.0.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn fails_once_sequences_run_out() {
        let (chain, sent) = chain(test_connection().with_next_sequence(SEQUENCE_LIMIT - 1));
        assert_eq!(chain.next_state(&mut RequestBuilder::new()), SendState::Ready);
        chain.clone().do_filter(RequestBuilder::new().build()).await;

        assert_eq!(
            chain.next_state(&mut RequestBuilder::new()),
            SendState::Failed(PaymentError::ExceededMaxSequence)
        );
        let reply = chain.do_filter(RequestBuilder::new().build()).await;
        assert_eq!(reply.reject_code(), Some(ErrorCode::T00_INTERNAL_ERROR));
        assert_eq!(*sent.0.lock(), vec![SEQUENCE_LIMIT - 1]);
    }
}
