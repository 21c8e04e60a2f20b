//! Link-header pagination and the repository-search endpoint built on it.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::client::{Credentials, GithubClient, Payload};
use crate::errors::GithubError;
use crate::limit::LimitResource;

pub const MAX_PER_PAGE: u32 = 100;

const SEARCH_REPOSITORIES_URL: &str = "https://api.github.com/search/repositories";

/// Parse a `Link` header into `{rel -> url}`.
pub fn parse_link_header(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|part| {
            let (url, rel) = part.split_once(';')?;
            let url = url.trim().trim_start_matches('<').trim_end_matches('>');
            let rel = rel.rsplit('=').next()?.trim().trim_matches('"');
            Some((rel.to_owned(), url.to_owned()))
        })
        .collect()
}

/// Drop caller params already pinned by the URL's own query string; a `next`
/// URL carries the authoritative paging state.
pub(crate) fn merge_params(url: &Url, params: &[(String, String)]) -> Vec<(String, String)> {
    let pinned: HashSet<String> = url.query_pairs().map(|(key, _)| key.into_owned()).collect();
    params
        .iter()
        .filter(|(key, _)| !pinned.contains(key))
        .cloned()
        .collect()
}

/// The slice of a search item the crawler cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRepo {
    pub id: u64,
    pub full_name: String,
    pub url: String,
    pub contents_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    total_count: u64,
    incomplete_results: bool,
    items: Vec<SearchRepo>,
}

/// Caller-configured knobs for the search endpoint.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub keyword: String,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub qualifiers: Vec<(String, String)>,
    pub per_page: Option<u32>,
    pub timeout: Option<Duration>,
}

pub struct RepoSearch {
    client: GithubClient,
    keyword: String,
    qualifiers: Vec<(String, String)>,
    sort: Option<String>,
    order: Option<String>,
    per_page: u32,
    items: Vec<SearchRepo>,
    links: HashMap<String, String>,
    pub total: Option<u64>,
    pub incomplete: Option<bool>,
}

impl RepoSearch {
    pub fn new(auth: Option<Credentials>, params: SearchParams) -> Self {
        Self {
            client: GithubClient::new(LimitResource::Search, auth, params.timeout),
            keyword: params.keyword,
            qualifiers: params.qualifiers,
            sort: params.sort,
            order: params.order,
            per_page: params.per_page.unwrap_or(MAX_PER_PAGE).min(MAX_PER_PAGE),
            items: Vec::new(),
            links: HashMap::new(),
            total: None,
            incomplete: None,
        }
    }

    /// Issue a fresh search. Call-site qualifiers override configured ones
    /// with the same key.
    pub async fn search(&mut self, qualifiers: &[(&str, &str)]) -> Result<(), GithubError> {
        let mut terms: Vec<(String, String)> = qualifiers
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        for (key, value) in &self.qualifiers {
            if !terms.iter().any(|(seen, _)| seen == key) {
                terms.push((key.clone(), value.clone()));
            }
        }
        let query = std::iter::once(self.keyword.clone())
            .chain(terms.iter().map(|(key, value)| format!("{key}:{value}")))
            .filter(|term| !term.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        assert!(!query.is_empty(), "search query must not be empty");

        let mut params = vec![
            ("q".to_owned(), query),
            ("per_page".to_owned(), self.per_page.to_string()),
        ];
        if let Some(sort) = &self.sort {
            params.push(("sort".to_owned(), sort.clone()));
        }
        if let Some(order) = &self.order {
            params.push(("order".to_owned(), order.clone()));
        }

        let url = Url::parse(SEARCH_REPOSITORIES_URL)
            .map_err(|err| GithubError::DataDecode(err.to_string()))?;
        self.fetch(url, params).await
    }

    pub fn items(&self) -> &[SearchRepo] {
        &self.items
    }

    pub fn has_next(&self) -> bool {
        self.links.contains_key("next")
    }

    pub async fn next_page(&mut self) -> Result<(), GithubError> {
        assert!(self.has_next(), "no next page to fetch");
        let url = Url::parse(&self.links["next"])
            .map_err(|err| GithubError::DataDecode(err.to_string()))?;
        let params = vec![("per_page".to_owned(), self.per_page.to_string())];
        self.fetch(url, params).await
    }

    async fn fetch(&mut self, url: Url, params: Vec<(String, String)>) -> Result<(), GithubError> {
        let params = merge_params(&url, &params);
        let page = match self.client.request(url, &params).await {
            Ok(page) => page,
            Err(err) if err.is_empty_result() => {
                self.items.clear();
                self.links.clear();
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let envelope: SearchEnvelope = serde_json::from_value(page.payload.into_value())
            .map_err(|err| GithubError::DataDecode(err.to_string()))?;
        self.total = Some(envelope.total_count);
        self.incomplete = Some(envelope.incomplete_results);
        self.items = envelope.items;
        self.links = page.links;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_link_headers() {
        let raw = concat!(
            "<https://api.github.com/search/repositories?q=language%3Apython&page=2>; rel=\"next\", ",
            "<https://api.github.com/search/repositories?q=language%3Apython&page=10>; rel=\"last\""
        );
        let links = parse_link_header(raw);
        assert_eq!(
            links["next"],
            "https://api.github.com/search/repositories?q=language%3Apython&page=2"
        );
        assert_eq!(
            links["last"],
            "https://api.github.com/search/repositories?q=language%3Apython&page=10"
        );
        assert!(!links.contains_key("prev"));
    }

    #[test]
    fn url_params_take_precedence() {
        let url = Url::parse("https://api.github.com/search/repositories?page=2&per_page=50")
            .unwrap();
        let params = vec![
            ("per_page".to_owned(), "100".to_owned()),
            ("q".to_owned(), "language:python".to_owned()),
        ];
        let merged = merge_params(&url, &params);
        assert_eq!(merged, vec![("q".to_owned(), "language:python".to_owned())]);
    }

    #[test]
    fn per_page_is_clamped() {
        let search = RepoSearch::new(
            None,
            SearchParams {
                per_page: Some(500),
                ..SearchParams::default()
            },
        );
        assert_eq!(search.per_page, MAX_PER_PAGE);
    }
}
