use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::DropGuard;

/// Receiving end of one `watch()` call.
///
/// Yields every value detected for the key, in detection order, starting
/// with the current value. Ends (`None`) once the watcher is closed or the
/// cancellation token given to `watch()` fires. Dropping the subscription
/// detaches it from the key.
#[derive(Debug)]
pub struct Subscription {
    key: String,
    id: u64,
    receiver: mpsc::UnboundedReceiver<Bytes>,
    /// Cancels this subscriber's token when the subscription is dropped
    _guard: DropGuard,
}

impl Subscription {
    pub(crate) fn new(
        key: String,
        id: u64,
        receiver: mpsc::UnboundedReceiver<Bytes>,
        token: CancellationToken,
    ) -> Self {
        Self {
            key,
            id,
            receiver,
            _guard: token.drop_guard(),
        }
    }

    /// The watched key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Unique identifier of this subscription within its watcher
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next value. `None` means no value will ever arrive again.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Take an already delivered value without waiting
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Bytes;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
