//! Completion signal for a host cycle.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// Resolves once the host cycle that was outstanding when it was created has
/// fully drained.
///
/// There is no timeout: if the host never finishes the cycle, the future
/// never resolves.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct NextTick {
    receiver: oneshot::Receiver<()>,
}

impl NextTick {
    pub(crate) fn pending() -> (oneshot::Sender<()>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    pub(crate) fn ready() -> Self {
        let (sender, tick) = Self::pending();
        let _ = sender.send(());
        tick
    }
}

impl Future for NextTick {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(()),
            // The scheduler was dropped with the cycle unfinished.
            Poll::Ready(Err(_)) => Poll::Pending,
            Poll::Pending => Poll::Pending,
        }
    }
}
