//! The dual-queue worker pool: a slice queue feeding the search phase and a
//! repo queue feeding the retrieve phase, one worker per credential.

mod worker;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use github_client::{ContentWalker, Credentials, RepoSearch, SearchParams};

use crate::errors::CrawlError;
use crate::model::Repository;
use crate::snapshot::Snapshot;
use crate::store::Store;
use crate::timeslice::slice_period;
use worker::{CrawlWorker, WorkerFailure};

const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Which halves of the crawl to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrawlMode {
    #[default]
    Both,
    SearchOnly,
    RetrieveOnly,
}

impl CrawlMode {
    pub fn searches(self) -> bool {
        matches!(self, Self::Both | Self::SearchOnly)
    }

    pub fn retrieves(self) -> bool {
        matches!(self, Self::Both | Self::RetrieveOnly)
    }
}

/// Everything the pool needs to start crawling.
#[derive(Debug, Clone)]
pub struct CrawlPlan {
    pub mode: CrawlMode,
    /// One worker per entry; `None` entries crawl anonymously.
    pub auths: Vec<Option<Credentials>>,
    pub period: String,
    pub slice: String,
    pub newest_first: bool,
    pub search: SearchParams,
    pub snapshot_interval: Duration,
}

pub struct CrawlPool {
    store: Store,
    plan: CrawlPlan,
    token: CancellationToken,
    workers: JoinSet<()>,
    failures: mpsc::UnboundedReceiver<WorkerFailure>,
    failures_tx: mpsc::UnboundedSender<WorkerFailure>,
    slices: Option<(flume::Sender<String>, flume::Receiver<String>)>,
    repos: Option<(flume::Sender<String>, flume::Receiver<String>)>,
    snapshot: Snapshot,
}

impl CrawlPool {
    /// Build the queues: time slices for the search phase, and the names of
    /// every known repository for the retrieve phase (the idempotent skip
    /// makes re-seeding cheap).
    pub async fn new(store: Store, plan: CrawlPlan) -> Result<Self, CrawlError> {
        assert!(!plan.auths.is_empty(), "no worker to run");

        let slices = if plan.mode.searches() {
            let (tx, rx) = flume::unbounded();
            for slice in slice_period(&plan.period, &plan.slice, plan.newest_first)? {
                let _ = tx.send(slice);
            }
            Some((tx, rx))
        } else {
            None
        };

        let repos = if plan.mode.retrieves() {
            let (tx, rx) = flume::unbounded();
            for name in store.names::<Repository>().await? {
                let _ = tx.send(name);
            }
            Some((tx, rx))
        } else {
            None
        };

        let (failures_tx, failures) = mpsc::unbounded_channel();
        let snapshot = Snapshot::new(plan.snapshot_interval);
        Ok(Self {
            store,
            plan,
            token: CancellationToken::new(),
            workers: JoinSet::new(),
            failures,
            failures_tx,
            slices,
            repos,
            snapshot,
        })
    }

    /// Spawn the workers and release the pool's own queue handles so the
    /// queues disconnect once drained.
    pub fn run(&mut self) {
        let total = self.plan.auths.len();
        for (index, auth) in self.plan.auths.clone().into_iter().enumerate() {
            let name = auth
                .as_ref()
                .map(|credentials| credentials.user.clone())
                .unwrap_or_else(|| format!("anonymous-{}", index + 1));
            let search = self
                .slices
                .is_some()
                .then(|| RepoSearch::new(auth.clone(), self.plan.search.clone()));
            let walker = self
                .repos
                .is_some()
                .then(|| ContentWalker::new(auth.clone(), self.plan.search.timeout));
            let worker = CrawlWorker {
                name,
                store: self.store.clone(),
                token: self.token.clone(),
                search,
                walker,
                slices_rx: self.slices.as_ref().map(|(_, rx)| rx.clone()),
                repos_rx: self.repos.as_ref().map(|(_, rx)| rx.clone()),
                repos_tx: self.repos.as_ref().map(|(tx, _)| tx.clone()),
                failures: self.failures_tx.clone(),
            };
            self.workers.spawn(worker.run());
        }
        // The workers hold the only live queue handles now.
        self.slices = None;
        self.repos = None;
        info!(workers = total, "crawl pool started");
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.workers.is_empty()
    }

    /// Cancel the run flag and join every worker. In-flight requests finish
    /// on their own; queue waits abort immediately.
    pub async fn stop(&mut self) {
        self.token.cancel();
        while self.workers.join_next().await.is_some() {}
    }

    /// Block until every worker finished, saving snapshots on cadence and
    /// surfacing the first worker failure. A final snapshot is forced either
    /// way.
    pub async fn wait_until_finish(&mut self) -> Result<(), CrawlError> {
        loop {
            tokio::select! {
                joined = self.workers.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
                failure = self.failures.recv() => {
                    if let Some(failure) = failure {
                        return self.fail(failure).await;
                    }
                }
                _ = tokio::time::sleep(WAIT_POLL_INTERVAL) => {
                    if self.snapshot.saveable() {
                        info!("saving database...");
                        self.snapshot.save(&self.store, false).await?;
                    }
                }
            }
        }
        // A failure from the last worker may still sit in the channel.
        if let Ok(failure) = self.failures.try_recv() {
            return self.fail(failure).await;
        }
        self.final_snapshot().await?;
        Ok(())
    }

    async fn fail(&mut self, failure: WorkerFailure) -> Result<(), CrawlError> {
        error!(worker = %failure.worker, error = %failure.error, "worker failed, stopping pool");
        self.stop().await;
        self.final_snapshot().await?;
        Err(CrawlError::Worker {
            worker: failure.worker,
            source: Box::new(failure.error),
        })
    }

    /// Unconditional snapshot, used on shutdown.
    pub async fn final_snapshot(&mut self) -> Result<(), CrawlError> {
        info!("saving database...");
        self.snapshot.save(&self.store, true).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_selects_the_phases() {
        assert!(CrawlMode::Both.searches() && CrawlMode::Both.retrieves());
        assert!(CrawlMode::SearchOnly.searches() && !CrawlMode::SearchOnly.retrieves());
        assert!(!CrawlMode::RetrieveOnly.searches() && CrawlMode::RetrieveOnly.retrieves());
    }
}
