use futures::future;
use tokio::sync::oneshot;

use crate::{CommsErr, Result};

/// A pending collective operation.
///
/// Dropping a `Work` doesn't cancel the operation, it only discards its result.
#[derive(Debug)]
pub struct Work<T> {
    seq: u64,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Work<T> {
    /// Creates a new `Work` handle together with the sender that completes it.
    ///
    /// # Arguments
    /// * `seq` - The per-rank sequence number of the operation.
    ///
    /// # Returns
    /// The handle and its completion end.
    pub fn pending(seq: u64) -> (Self, oneshot::Sender<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        (Self { seq, rx }, tx)
    }

    /// Creates an already completed `Work` handle.
    ///
    /// # Arguments
    /// * `seq` - The per-rank sequence number of the operation.
    /// * `value` - The result of the operation.
    pub fn ready(seq: u64, value: T) -> Self {
        let (work, tx) = Self::pending(seq);
        let _ = tx.send(Ok(value));
        work
    }

    /// Returns the per-rank sequence number of this operation.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Waits until the operation completes.
    ///
    /// # Returns
    /// The operation's result or `CommsErr::Aborted` if it was never completed.
    pub async fn wait(self) -> Result<T> {
        let seq = self.seq;
        self.rx.await.map_err(|_| CommsErr::Aborted { seq })?
    }
}

/// Waits on every handle, yielding the results in issue order.
///
/// # Arguments
/// * `works` - The pending operations.
///
/// # Returns
/// All results, or the first error any of them produced.
pub async fn wait_all<T, I>(works: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = Work<T>>,
{
    future::try_join_all(works.into_iter().map(Work::wait)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_work_resolves_immediately() {
        let work = Work::ready(7, vec![1.0_f32, 2.0]);
        assert_eq!(work.seq(), 7);
        assert_eq!(work.wait().await.unwrap(), [1.0, 2.0]);
    }

    #[tokio::test]
    async fn dropped_sender_aborts_the_work() {
        let (work, tx) = Work::<Vec<f32>>::pending(3);
        drop(tx);
        assert_eq!(work.wait().await, Err(CommsErr::Aborted { seq: 3 }));
    }

    #[tokio::test]
    async fn wait_all_keeps_issue_order() {
        let (first, first_tx) = Work::pending(0);
        let (second, second_tx) = Work::pending(1);

        second_tx.send(Ok(2)).unwrap();
        first_tx.send(Ok(1)).unwrap();

        assert_eq!(wait_all([first, second]).await.unwrap(), [1, 2]);
    }

    #[tokio::test]
    async fn wait_all_surfaces_the_first_error() {
        let ok = Work::ready(0, 1);
        let (failed, tx) = Work::pending(1);
        tx.send(Err(CommsErr::Aborted { seq: 1 })).unwrap();

        assert_eq!(
            wait_all([ok, failed]).await,
            Err(CommsErr::Aborted { seq: 1 })
        );
    }
}
