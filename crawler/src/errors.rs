use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;
use crate::timeslice::TimeSliceError;
use github_client::GithubError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read settings file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse settings file {path}: {source}")]
    Unparsable {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("credential \"{0}\" is not a user:token pair")]
    BadCredential(String),
    #[error("missing required setting \"{0}\"")]
    MissingSetting(&'static str),
    #[error("no github credentials configured; pass --anonymous to crawl without")]
    NoCredentials,
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    #[error("github api failure: {0}")]
    Github(#[from] GithubError),
    #[error("time slicing failed: {0}")]
    TimeSlice(#[from] TimeSliceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("worker \"{worker}\" failed: {source}")]
    Worker {
        worker: String,
        #[source]
        source: Box<CrawlError>,
    },
}
