//! Periodic queue evaluation
//!
//! One loop per enabled queue. Each tick evaluates the queue and launches a
//! lifecycle for every committed candidate; the loop never waits on those
//! lifecycles.

use crate::error::Result;
use crate::lifecycle::{LifecycleLauncher, MatchState};
use crate::matching::MatchEvaluator;
use crate::types::QueueType;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Clone)]
pub struct Crawler {
    evaluator: Arc<MatchEvaluator>,
    launcher: LifecycleLauncher,
    queues: Vec<QueueType>,
    period: Duration,
}

impl Crawler {
    pub fn new(
        evaluator: Arc<MatchEvaluator>,
        launcher: LifecycleLauncher,
        queues: Vec<QueueType>,
        period: Duration,
    ) -> Self {
        Self {
            evaluator,
            launcher,
            queues,
            period,
        }
    }

    pub fn queues(&self) -> &[QueueType] {
        &self.queues
    }

    /// Evaluate one queue and launch lifecycles for what it committed
    pub async fn tick_queue(&self, queue: QueueType) -> Result<Vec<JoinHandle<MatchState>>> {
        let report = self.evaluator.evaluate(queue).await?;
        if report.stale > 0 {
            debug!("{} stale proposals skipped in {}", report.stale, queue);
        }
        Ok(report
            .candidates
            .into_iter()
            .map(|candidate| self.launcher.launch(candidate))
            .collect())
    }

    /// Start one evaluation loop per queue; they stop when `shutdown` flips to true
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.queues
            .iter()
            .map(|&queue| {
                let crawler = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(
                    async move { crawler.run_queue(queue, shutdown).await }
                        .instrument(info_span!("crawl", queue = %queue)),
                )
            })
            .collect()
    }

    async fn run_queue(&self, queue: QueueType, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Crawling {} every {:?}", queue, self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick_queue(queue).await {
                        Ok(launched) if !launched.is_empty() => {
                            info!("Launched {} lifecycles from {}", launched.len(), queue);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Evaluation of {} failed: {:#}", queue, e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Stopped crawling {}", queue);
    }
}
