//! Bounded concurrent dispatch of work items.
//!
//! Every item runs in its own task, so an error or a panic in one item is caught and
//! counted without touching its siblings. Nothing is cancelled once dispatched.

use std::fmt;
use std::future::Future;

use futures::future::join_all;
use futures::StreamExt;
use tokio::task::JoinError;
use tracing::{debug, error, Instrument};

/// Counts of how a dispatch went.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sizes of the batches in dispatch order. Only filled by chunked dispatch.
    pub batch_sizes: Vec<usize>,
    pub succeeded: usize,
    pub failed: usize,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    fn record<E: fmt::Display>(&mut self, label: &str, item: &str, result: Result<Result<(), E>, JoinError>) {
        match result {
            Ok(Ok(())) => self.succeeded += 1,
            Ok(Err(e)) => {
                error!(label, item, "Error processing {} {}: {}", label, item, e);
                self.failed += 1;
            },
            Err(e) => {
                error!(label, item, "Task for {} {} did not complete: {}", label, item, e);
                self.failed += 1;
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Orchestrator {
    limit: usize,
}

impl Orchestrator {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    /// Dispatch `items` in fixed chunks of `limit`.
    ///
    /// Every item of a chunk runs concurrently and the whole chunk has to finish before
    /// the next one starts.
    pub async fn run_chunked<I, F, Fut, E>(&self, label: &str, items: Vec<I>, handler: F) -> DispatchReport
    where
        I: fmt::Display,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut report = DispatchReport::default();
        let mut items = items.into_iter().peekable();

        while items.peek().is_some() {
            let chunk: Vec<I> = items.by_ref().take(self.limit).collect();
            debug!(label, size = chunk.len(), "Dispatching batch {}", report.batch_sizes.len() + 1);
            report.batch_sizes.push(chunk.len());

            let (names, handles): (Vec<String>, Vec<_>) = chunk.into_iter()
                .map(|item| (item.to_string(), tokio::spawn(handler(item).in_current_span())))
                .unzip();

            let results = join_all(handles).await;
            for (name, result) in names.iter().zip(results) {
                report.record(label, name, result);
            }
        }

        report
    }

    /// Dispatch `items` with at most `limit` in flight, starting a new item as soon as
    /// another one finishes.
    pub async fn run_bounded<I, F, Fut, E>(&self, label: &str, items: Vec<I>, handler: F) -> DispatchReport
    where
        I: fmt::Display,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut report = DispatchReport::default();

        // items are only spawned when the stream pulls them, which keeps `limit` tasks alive
        let tasks = items.into_iter().map(|item| {
            let name = item.to_string();
            let handle = tokio::spawn(handler(item).in_current_span());
            async move { (name, handle.await) }
        });

        let results: Vec<_> = futures::stream::iter(tasks)
            .buffer_unordered(self.limit)
            .collect().await;

        for (name, result) in results {
            report.record(label, &name, result);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Start(usize),
        End(usize),
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn chunks_wait_for_each_other() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let registries: Vec<usize> = (0..12).collect();

        let report = Orchestrator::new(5).run_chunked("registry", registries, |i| {
            let events = events.clone();
            async move {
                events.lock().unwrap().push(Event::Start(i));
                // later items finish first, the barrier must still hold
                tokio::time::sleep(Duration::from_millis(30 - (i as u64 % 5) * 5)).await;
                events.lock().unwrap().push(Event::End(i));
                Ok::<(), String>(())
            }
        }).await;

        assert_eq!(report.batch_sizes, vec![5, 5, 2]);
        assert_eq!(report.succeeded, 12);

        let events = events.lock().unwrap();
        let position = |ev: Event| events.iter().position(|e| *e == ev).unwrap();
        let batches: Vec<Vec<usize>> = vec![(0..5).collect(), (5..10).collect(), (10..12).collect()];
        for pair in batches.windows(2) {
            let last_end = pair[0].iter().map(|i| position(Event::End(*i))).max().unwrap();
            let first_start = pair[1].iter().map(|i| position(Event::Start(*i))).min().unwrap();
            assert!(last_end < first_start, "next batch started before the previous one finished");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bounded_never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let report = Orchestrator::new(3).run_bounded("tag", (0..20).collect(), |_i: usize| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), String>(())
            }
        }).await;

        assert_eq!(report.succeeded, 20);
        assert!(report.batch_sizes.is_empty());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn failures_do_not_stop_siblings() {
        let done = Arc::new(AtomicUsize::new(0));

        let report = Orchestrator::new(2).run_chunked("registry", (0..5).collect(), |i: usize| {
            let done = done.clone();
            async move {
                if i == 1 {
                    return Err(format!("registry {} is broken", i));
                }
                if i == 3 {
                    panic!("worker blew up");
                }
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }).await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.attempted(), 5);
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_input_dispatches_nothing() {
        let report = Orchestrator::new(4).run_chunked("registry", Vec::<String>::new(), |_| async {
            Ok::<(), String>(())
        }).await;

        assert_eq!(report, DispatchReport::default());
    }
}
