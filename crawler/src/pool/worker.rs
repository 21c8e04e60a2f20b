//! One crawl worker: drain the slice queue searching for repositories, then
//! drain the repo queue retrieving their files.

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use github_client::{ContentWalker, RepoSearch};

use crate::errors::CrawlError;
use crate::model::{RepoFiles, Repository};
use crate::store::Store;

pub(crate) struct WorkerFailure {
    pub worker: String,
    pub error: CrawlError,
}

pub(crate) struct CrawlWorker {
    pub name: String,
    pub store: Store,
    pub token: CancellationToken,
    pub search: Option<RepoSearch>,
    pub walker: Option<ContentWalker>,
    pub slices_rx: Option<flume::Receiver<String>>,
    pub repos_rx: Option<flume::Receiver<String>>,
    pub repos_tx: Option<flume::Sender<String>>,
    pub failures: UnboundedSender<WorkerFailure>,
}

impl CrawlWorker {
    pub async fn run(mut self) {
        info!(worker = %self.name, "crawl worker started");
        if let Err(error) = self.crawl().await {
            let _ = self.failures.send(WorkerFailure {
                worker: self.name.clone(),
                error,
            });
        }
        info!(worker = %self.name, "crawl worker stopped");
    }

    async fn crawl(&mut self) -> Result<(), CrawlError> {
        self.search_phase().await?;
        // This worker will enqueue no more repositories; once every worker
        // has let go of its sender the repo queue drains and disconnects.
        self.repos_tx = None;
        self.retrieve_phase().await
    }

    async fn search_phase(&mut self) -> Result<(), CrawlError> {
        let Some(slices) = self.slices_rx.take() else {
            return Ok(());
        };
        while !self.token.is_cancelled() {
            let slice = tokio::select! {
                _ = self.token.cancelled() => break,
                slice = slices.recv_async() => match slice {
                    Ok(slice) => slice,
                    Err(_) => break,
                },
            };
            self.search_in_slice(&slice).await?;
        }
        Ok(())
    }

    async fn retrieve_phase(&mut self) -> Result<(), CrawlError> {
        let Some(repos) = self.repos_rx.take() else {
            return Ok(());
        };
        info!(worker = %self.name, "retrieving repository contents...");
        while !self.token.is_cancelled() {
            let name = tokio::select! {
                _ = self.token.cancelled() => break,
                name = repos.recv_async() => match name {
                    Ok(name) => name,
                    Err(_) => break,
                },
            };
            self.retrieve_repo(&name).await?;
        }
        Ok(())
    }

    async fn search_in_slice(&mut self, slice: &str) -> Result<(), CrawlError> {
        info!(worker = %self.name, slice, "searching time slice");
        let Some(search) = self.search.as_mut() else {
            return Ok(());
        };
        search.search(&[("created", slice)]).await?;
        loop {
            for repo in search.items() {
                if self.token.is_cancelled() {
                    return Ok(());
                }
                if self.store.exists::<Repository>(&repo.full_name).await? {
                    debug!(worker = %self.name, repo = %repo.full_name, "existed repository");
                    continue;
                }
                info!(
                    worker = %self.name,
                    repo = %repo.full_name,
                    id = repo.id,
                    url = %repo.url,
                    "found repository"
                );
                let mut record = self.store.load::<Repository>(&repo.full_name).await?;
                record.set_id(&repo.id.to_string());
                record.set_url(&repo.url);
                record.set_contents_url(&repo.contents_url);
                self.store.commit_changes(&mut record).await?;

                if let Some(repos) = &self.repos_tx {
                    let _ = repos.send(repo.full_name.clone());
                }
            }
            if !search.has_next() {
                break;
            }
            search.next_page().await?;
        }
        Ok(())
    }

    async fn retrieve_repo(&mut self, name: &str) -> Result<(), CrawlError> {
        let mut repo = self.store.load::<Repository>(name).await?;
        if repo.retrieved() {
            info!(worker = %self.name, repo = name, "already done");
            return Ok(());
        }
        let contents_url = match repo.contents_url() {
            Some(url) if !url.is_empty() => url.to_owned(),
            _ => {
                info!(worker = %self.name, repo = name, "no contents url found");
                return Ok(());
            }
        };
        let Some(walker) = self.walker.as_mut() else {
            return Ok(());
        };

        info!(worker = %self.name, repo = name, "retrieving");
        walker.begin(&contents_url)?;
        let mut added = false;
        while let Some(mut entry) = walker.next_file().await? {
            if self.token.is_cancelled() {
                return Ok(());
            }
            if !RepoFiles::expects(&entry.path) {
                debug!(worker = %self.name, "  (-) {}", entry.path);
                continue;
            }
            debug!(worker = %self.name, "  (+) {}", entry.path);
            walker.fetch_content(&mut entry).await?;
            if repo.add_file(&entry.path, &entry.decoded_content()) {
                added = true;
            }
        }

        if added {
            info!(worker = %self.name, repo = name, "finding packages...");
            repo.find_packages(&self.store).await?;
        } else {
            info!(worker = %self.name, repo = name, "no expected files found");
        }

        repo.set_retrieved(true);
        self.store.commit_changes(&mut repo).await?;
        Ok(())
    }
}
