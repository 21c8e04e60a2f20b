//! Wires configuration, settings, logging and the store together.

use std::time::Duration;

use tracing::debug;

use github_client::Credentials;

use crate::errors::{ConfigError, CrawlError};
use crate::pool::{CrawlMode, CrawlPlan};
use crate::store::Store;

use super::config::configuration::{Configuration, Settings};
use super::logging::tracing::tracing_subscribe;

pub struct Application {
    pub config: Configuration,
    pub settings: Settings,
    pub store: Store,
}

impl Application {
    pub fn install_logging(config: &Configuration) -> bool {
        tracing_subscribe(config)
    }

    pub async fn initialize(config: Configuration) -> Result<Self, CrawlError> {
        let settings = match &config.settings {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        debug!(store = %config.store_url, "connecting to store");
        let store = Store::connect(&config.store_url).await?;
        Ok(Self {
            config,
            settings,
            store,
        })
    }

    /// Resolve CLI arguments and settings into a crawl plan. CLI values win
    /// where both exist; an authenticated crawl demands credentials.
    pub fn crawl_plan(&self) -> Result<CrawlPlan, CrawlError> {
        let mode = CrawlMode::from(self.config.mode);

        let auths: Vec<Option<Credentials>> = if self.config.anonymous {
            vec![None; self.config.workers.max(1)]
        } else {
            let pairs = self.settings.credential_pairs()?;
            if pairs.is_empty() {
                return Err(ConfigError::NoCredentials.into());
            }
            pairs.into_iter().map(Some).collect()
        };

        let period = self
            .config
            .period
            .clone()
            .or_else(|| self.settings.search_period.period.clone());
        let slice = self
            .config
            .slice
            .clone()
            .or_else(|| self.settings.search_period.slice.clone());
        let (period, slice) = if mode.searches() {
            (
                period.ok_or(ConfigError::MissingSetting("search_period.period"))?,
                slice.ok_or(ConfigError::MissingSetting("search_period.slice"))?,
            )
        } else {
            (period.unwrap_or_default(), slice.unwrap_or_default())
        };

        Ok(CrawlPlan {
            mode,
            auths,
            period,
            slice,
            newest_first: self.config.newest_first || self.settings.search_period.newest_first,
            search: self.settings.search_params(),
            snapshot_interval: Duration::from_secs(self.config.snapshot_interval),
        })
    }
}
