//! Single-resolution promise returned by `withdraw`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::buffer::Buffer;
use crate::error::{Result, VaultError};

/// Sending half kept in the vault's pending queue.
pub(crate) struct Waiter {
    tx: oneshot::Sender<Result<Buffer>>,
}

impl Waiter {
    /// Returns `true` if the caller dropped its [`Withdrawal`].
    pub(crate) fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Fulfils the promise. Returns `false` if the caller went away, in which
    /// case the buffer has been dropped and so returned to its vault.
    ///
    /// Must not be called with the vault lock held.
    pub(crate) fn fulfil(self, buffer: Buffer) -> bool {
        self.tx.send(Ok(buffer)).is_ok()
    }

    pub(crate) fn cancel(self) {
        let _ = self.tx.send(Err(VaultError::Cancelled));
    }
}

/// A pending or completed withdraw request.
///
/// Resolves exactly once, to a [`Buffer`] or to [`VaultError::Cancelled`] if
/// the vault is torn down first. Await it from async code, call
/// [`wait`](Self::wait) from a plain render thread, or poll it with
/// [`try_take`](Self::try_take).
///
/// Dropping an unresolved `Withdrawal` gives up its place in the queue.
#[must_use = "a withdrawal does nothing unless awaited or waited on"]
#[derive(Debug)]
pub struct Withdrawal {
    rx: oneshot::Receiver<Result<Buffer>>,
}

impl Withdrawal {
    pub(crate) fn new() -> (Waiter, Self) {
        let (tx, rx) = oneshot::channel();
        (Waiter { tx }, Self { rx })
    }

    /// Blocks the current thread until the request resolves.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Cancelled`] if the vault was torn down first.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; await
    /// the `Withdrawal` there instead.
    pub fn wait(self) -> Result<Buffer> {
        self.rx.blocking_recv().unwrap_or(Err(VaultError::Cancelled))
    }

    /// Returns the outcome if the request has resolved, without blocking.
    ///
    /// Once this returns `Some`, the withdrawal is spent and must not be
    /// polled again.
    pub fn try_take(&mut self) -> Option<Result<Buffer>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(VaultError::Cancelled)),
        }
    }
}

impl Future for Withdrawal {
    type Output = Result<Buffer>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(VaultError::Cancelled)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_resolves_waiter() {
        let (waiter, mut withdrawal) = Withdrawal::new();
        assert!(withdrawal.try_take().is_none());
        waiter.cancel();
        assert_eq!(withdrawal.try_take().unwrap().unwrap_err(), VaultError::Cancelled);
    }

    #[test]
    fn test_dropped_sender_reads_as_cancelled() {
        let (waiter, withdrawal) = Withdrawal::new();
        drop(waiter);
        assert_eq!(withdrawal.wait().unwrap_err(), VaultError::Cancelled);
    }

    #[tokio::test]
    async fn test_abandoned_withdrawal_is_detected() {
        let (waiter, withdrawal) = Withdrawal::new();
        assert!(!waiter.is_abandoned());
        drop(withdrawal);
        assert!(waiter.is_abandoned());
    }
}
