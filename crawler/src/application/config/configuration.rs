//! CLI arguments plus the JSON settings file that carries credentials and
//! search parameters.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use github_client::{Credentials, SearchParams};

use crate::errors::ConfigError;
use crate::pool::CrawlMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Both,
    SearchOnly,
    RetrieveOnly,
}

impl From<Mode> for CrawlMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Both => Self::Both,
            Mode::SearchOnly => Self::SearchOnly,
            Mode::RetrieveOnly => Self::RetrieveOnly,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "crawler", about = "Crawl GitHub for Python package usage")]
pub struct Configuration {
    /// Key-value store backing the crawl index.
    #[arg(long, default_value = "redis://127.0.0.1/")]
    pub store_url: String,

    /// JSON settings file with credentials and search parameters.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Which halves of the crawl to run.
    #[arg(long, value_enum, default_value_t = Mode::Both)]
    pub mode: Mode,

    /// Lookback horizon, e.g. "1y" (overrides the settings file).
    #[arg(long)]
    pub period: Option<String>,

    /// Search window per query, e.g. "1d" (overrides the settings file).
    #[arg(long)]
    pub slice: Option<String>,

    /// Work through the newest time slices first.
    #[arg(long)]
    pub newest_first: bool,

    /// Crawl without credentials.
    #[arg(long)]
    pub anonymous: bool,

    /// Worker count in anonymous mode.
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Seconds between store snapshots.
    #[arg(long, default_value_t = 300)]
    pub snapshot_interval: u64,

    /// Directory for the rolling log file.
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPeriodSettings {
    pub period: Option<String>,
    pub slice: Option<String>,
    #[serde(default)]
    pub newest_first: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRepoSettings {
    pub keyword: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub per_page: Option<u32>,
    /// Request timeout in seconds.
    pub timeout: Option<u64>,
    #[serde(default)]
    pub qualifiers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// `user:token` pairs; one worker per entry.
    #[serde(default)]
    pub credentials: Vec<String>,
    #[serde(default)]
    pub search_period: SearchPeriodSettings,
    #[serde(default)]
    pub search_repo_params: SearchRepoSettings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Unparsable {
            path: path.to_owned(),
            source,
        })
    }

    pub fn credential_pairs(&self) -> Result<Vec<Credentials>, ConfigError> {
        self.credentials
            .iter()
            .map(|entry| {
                entry
                    .split_once(':')
                    .filter(|(user, token)| !user.is_empty() && !token.is_empty())
                    .map(|(user, token)| Credentials {
                        user: user.to_owned(),
                        token: token.to_owned(),
                    })
                    .ok_or_else(|| ConfigError::BadCredential(entry.clone()))
            })
            .collect()
    }

    /// Search request parameters, always qualified by the target language.
    pub fn search_params(&self) -> SearchParams {
        let params = &self.search_repo_params;
        let mut qualifiers = vec![("language".to_owned(), "python".to_owned())];
        for (key, value) in &params.qualifiers {
            if let Some(slot) = qualifiers.iter_mut().find(|(seen, _)| seen == key) {
                slot.1 = value.clone();
            } else {
                qualifiers.push((key.clone(), value.clone()));
            }
        }
        SearchParams {
            keyword: params.keyword.clone().unwrap_or_default(),
            sort: params.sort.clone(),
            order: params.order.clone(),
            qualifiers,
            per_page: params.per_page,
            timeout: params.timeout.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(raw: &str) -> Settings {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn parses_a_full_settings_file() {
        let settings = settings(
            r#"{
                "credentials": ["alice:token-a", "bob:token-b"],
                "search_period": {"period": "2w", "slice": "1d", "newest_first": true},
                "search_repo_params": {
                    "keyword": "",
                    "sort": "stars",
                    "order": "desc",
                    "per_page": 100,
                    "timeout": 20,
                    "qualifiers": {"stars": ">10"}
                }
            }"#,
        );
        let pairs = settings.credential_pairs().unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].user, "alice");
        assert_eq!(pairs[1].token, "token-b");
        assert!(settings.search_period.newest_first);

        let params = settings.search_params();
        assert_eq!(params.sort.as_deref(), Some("stars"));
        assert_eq!(params.timeout, Some(Duration::from_secs(20)));
        assert!(params.qualifiers.contains(&("language".to_owned(), "python".to_owned())));
        assert!(params.qualifiers.contains(&("stars".to_owned(), ">10".to_owned())));
    }

    #[test]
    fn empty_settings_still_qualify_the_language() {
        let params = Settings::default().search_params();
        assert_eq!(params.qualifiers, vec![("language".to_owned(), "python".to_owned())]);
        assert!(params.keyword.is_empty());
    }

    #[test]
    fn configured_language_overrides_the_default() {
        let settings = settings(
            r#"{"search_repo_params": {"qualifiers": {"language": "python", "fork": "false"}}}"#,
        );
        let params = settings.search_params();
        assert_eq!(
            params.qualifiers.iter().filter(|(key, _)| key == "language").count(),
            1
        );
        assert!(params.qualifiers.contains(&("fork".to_owned(), "false".to_owned())));
    }

    #[test]
    fn malformed_credentials_are_rejected() {
        let settings1 = settings(r#"{"credentials": ["no-colon-here"]}"#);
        assert!(matches!(
            settings1.credential_pairs(),
            Err(ConfigError::BadCredential(_))
        ));

        let settings2 = settings(r#"{"credentials": [":token"]}"#);
        assert!(settings2.credential_pairs().is_err());
    }
}
