//! Bounded fan-out of per-chunk work.
//!
//! Workers run as futures polled from the caller's task, so result integration
//! happens on one task even though the I/O of up to `limit` chunks overlaps.
//! A slot is refilled as soon as any in-flight item finishes, unless the item
//! at the head of the queue sits at or past the admission ceiling.

use crate::common::TransferError;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::iter::{Enumerate, Peekable};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Worker future tagged with the position of the item it was started for
struct Tagged<Fut> {
    position: usize,
    fut: Pin<Box<Fut>>,
}

impl<Fut: Future> Future for Tagged<Fut> {
    type Output = (usize, Fut::Output);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let position = self.position;
        self.fut.as_mut().poll(cx).map(|out| (position, out))
    }
}

pub struct BoundedScheduler<It, F, Fut>
where
    It: Iterator,
{
    pending: Peekable<Enumerate<It>>,
    in_flight: FuturesUnordered<Tagged<Fut>>,
    worker: F,
    limit: usize,
    /// Positions at or past this wait, even with a free slot
    ceiling: Option<usize>,
    halted: bool,
    admitted: usize,
}

impl<It, F, Fut, O> BoundedScheduler<It, F, Fut>
where
    It: Iterator,
    F: FnMut(It::Item) -> Fut,
    Fut: Future<Output = Result<O, TransferError>>,
{
    pub fn new(items: impl IntoIterator<IntoIter = It>, limit: usize, worker: F) -> Self {
        Self {
            pending: items.into_iter().enumerate().peekable(),
            in_flight: FuturesUnordered::new(),
            worker,
            limit: limit.max(1),
            ceiling: None,
            halted: false,
            admitted: 0,
        }
    }

    /// Stop admitting new items. In-flight items still complete through `next`.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Admit only items whose position is below `ceiling`. Callers raise it as
    /// earlier results are consumed; it must stay above every in-flight position
    /// once nothing is in flight, or `next` ends early.
    pub fn admit_below(&mut self, ceiling: usize) {
        self.ceiling = Some(ceiling);
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn admitted(&self) -> usize {
        self.admitted
    }

    fn fill(&mut self) {
        while !self.halted && self.in_flight.len() < self.limit {
            match (self.pending.peek(), self.ceiling) {
                (None, _) => break,
                (Some((position, _)), Some(ceiling)) if *position >= ceiling => break,
                _ => {}
            }
            let Some((position, item)) = self.pending.next() else {
                break;
            };
            let fut = (self.worker)(item);
            self.in_flight.push(Tagged {
                position,
                fut: Box::pin(fut),
            });
            self.admitted += 1;
        }
    }

    /// Next completed item as `(position, result)`, in completion order.
    /// `None` once nothing is pending (or halted) and in-flight work has drained.
    pub async fn next(&mut self) -> Option<(usize, Result<O, TransferError>)> {
        self.fill();
        self.in_flight.next().await
    }
}

/// Run every item through `worker` with at most `limit` in flight and return the
/// outputs in item order. The first failure stops admission; in-flight work is
/// drained and discarded, then that failure is returned.
pub async fn run_bounded<I, O, F, Fut>(
    items: I,
    limit: usize,
    worker: F,
) -> Result<Vec<O>, TransferError>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<O, TransferError>>,
{
    let mut scheduler = BoundedScheduler::new(items, limit, worker);
    let mut slots: Vec<Option<O>> = Vec::new();
    let mut failure = None;

    while let Some((position, result)) = scheduler.next().await {
        match result {
            Ok(output) if failure.is_none() => {
                if slots.len() <= position {
                    slots.resize_with(position + 1, || None);
                }
                slots[position] = Some(output);
            }
            Ok(_) => {}
            Err(err) => {
                if failure.is_none() {
                    tracing::debug!(position, error = %err, "halting scheduler");
                    failure = Some(err);
                    scheduler.halt();
                }
            }
        }
    }

    if let Some(err) = failure {
        return Err(err);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(position, slot)| {
            slot.ok_or_else(|| {
                TransferError::protocol(format!("item {position} produced no result"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_limit() {
        let current = Rc::new(Cell::new(0usize));
        let peak = Rc::new(Cell::new(0usize));

        let results = run_bounded(0..50u64, 4, |i| {
            let current = current.clone();
            let peak = peak.clone();
            async move {
                current.set(current.get() + 1);
                peak.set(peak.get().max(current.get()));
                sleep(Duration::from_millis(10 + (i * 37) % 23)).await;
                current.set(current.get() - 1);
                Ok(i * 2)
            }
        })
        .await
        .unwrap();

        assert_eq!(peak.get(), 4);
        assert_eq!(results, (0..50u64).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn results_in_item_order_despite_completion_order() {
        // later items finish first
        let results = run_bounded(0..8u64, 8, |i| async move {
            sleep(Duration::from_millis(100 - i * 10)).await;
            Ok(i)
        })
        .await
        .unwrap();
        assert_eq!(results, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn admits_on_completion_not_in_batches() {
        let start = Instant::now();
        let started_at = Rc::new(std::cell::RefCell::new(vec![Duration::ZERO; 10]));

        run_bounded(0..10usize, 8, |i| {
            let started_at = started_at.clone();
            async move {
                started_at.borrow_mut()[i] = start.elapsed();
                // item 0 is fast, the rest of the first wave is slow
                let ms = if i == 0 { 10 } else { 100 };
                sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
        })
        .await
        .unwrap();

        let started_at = started_at.borrow();
        for i in 0..8 {
            assert_eq!(started_at[i], Duration::ZERO, "item {i} admitted immediately");
        }
        // item 8 takes item 0's slot long before the slow wave finishes
        assert!(started_at[8] >= Duration::from_millis(10));
        assert!(started_at[8] < Duration::from_millis(100));
        assert!(started_at[9] >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_stops_admission_and_drains() {
        let started = Rc::new(Cell::new(0usize));
        let finished = Rc::new(Cell::new(0usize));

        let result = run_bounded(0..20u32, 3, |i| {
            let started = started.clone();
            let finished = finished.clone();
            async move {
                started.set(started.get() + 1);
                sleep(Duration::from_millis(if i == 1 { 5 } else { 50 })).await;
                finished.set(finished.get() + 1);
                if i == 1 {
                    Err(TransferError::AuthenticationFailure {
                        file_index: 0,
                        chunk_index: i,
                    })
                } else {
                    Ok(i)
                }
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(TransferError::AuthenticationFailure { chunk_index: 1, .. })
        ));
        // 0, 1, 2 admitted; nothing after the failure
        assert_eq!(started.get(), 3);
        assert_eq!(finished.get(), 3, "in-flight work drained");
    }

    #[tokio::test]
    async fn empty_input_completes() {
        let results: Vec<u8> = run_bounded(Vec::<u8>::new(), 8, |i| async move { Ok(i) })
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn zero_limit_still_makes_progress() {
        let results = run_bounded(0..3u8, 0, |i| async move { Ok(i) }).await.unwrap();
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn ceiling_holds_back_admission_until_raised() {
        let mut scheduler =
            BoundedScheduler::new(0..10usize, 8, |i| async move { Ok::<_, TransferError>(i) });
        scheduler.admit_below(3);

        let mut seen = Vec::new();
        while let Some((position, _)) = scheduler.next().await {
            seen.push(position);
            assert!(scheduler.admitted() <= 3);
        }
        // nothing in flight and the head is at the ceiling
        assert_eq!(seen.len(), 3);

        scheduler.admit_below(10);
        while let Some((position, _)) = scheduler.next().await {
            seen.push(position);
        }
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn halted_scheduler_admits_nothing_more() {
        let mut scheduler =
            BoundedScheduler::new(0..10u8, 2, |i| async move { Ok::<_, TransferError>(i) });
        let first = scheduler.next().await;
        assert!(first.is_some());
        scheduler.halt();
        let mut rest = 0;
        while scheduler.next().await.is_some() {
            rest += 1;
        }
        assert_eq!(rest, 1);
        assert_eq!(scheduler.admitted(), 2);
    }
}
