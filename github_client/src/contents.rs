//! Breadth-first walk over a repository's contents tree, yielding file
//! entries and fetching their decoded bodies.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use url::Url;

use crate::client::{Credentials, GithubClient};
use crate::errors::GithubError;
use crate::limit::LimitResource;

/// Directory segments that never hold first-party sources: virtualenvs,
/// vendored interpreters, caches, dotdirs and static assets.
static EXCLUDED_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?i:\w*venv|site-packages|__pycache__|static|\.\w+|(?:python|pip)(?:-?\d+(?:\.[0-9a-z]+)*)?)$",
    )
    .unwrap()
});

/// One entry of a directory listing (or a file metadata response).
#[derive(Debug, Clone, Deserialize)]
pub struct ContentEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

impl ContentEntry {
    pub fn is_file(&self) -> bool {
        self.kind == "file"
    }

    pub fn is_dir(&self) -> bool {
        self.kind == "dir"
    }

    /// Inline blobs arrive base64-wrapped; raw fallbacks arrive as plain
    /// text. Undecodable bytes yield empty content rather than failing the
    /// walk.
    pub fn decoded_content(&self) -> String {
        let Some(content) = &self.content else {
            return String::new();
        };
        match self.encoding.as_deref() {
            Some("base64") => {
                let packed: String = content
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                BASE64
                    .decode(packed)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .unwrap_or_default()
            }
            _ => content.clone(),
        }
    }
}

pub struct ContentWalker {
    client: GithubClient,
    base: Option<Url>,
    folders: VecDeque<String>,
    visited: HashSet<String>,
    files: VecDeque<ContentEntry>,
}

impl ContentWalker {
    pub fn new(auth: Option<Credentials>, timeout: Option<Duration>) -> Self {
        Self {
            client: GithubClient::new(LimitResource::Core, auth, timeout),
            base: None,
            folders: VecDeque::new(),
            visited: HashSet::new(),
            files: VecDeque::new(),
        }
    }

    pub fn is_excluded(path: &str) -> bool {
        path.split('/').any(|segment| EXCLUDED_SEGMENT.is_match(segment))
    }

    /// Point the walker at a repository. The `contents_url` is the templated
    /// form from the search API (`.../contents/{+path}`).
    pub fn begin(&mut self, contents_url: &str) -> Result<(), GithubError> {
        let trimmed = contents_url
            .split('{')
            .next()
            .unwrap_or(contents_url)
            .trim_end_matches('/');
        let base = Url::parse(&format!("{trimmed}/"))
            .map_err(|err| GithubError::DataDecode(err.to_string()))?;
        self.base = Some(base);
        self.folders = VecDeque::from(vec![String::from(".")]);
        self.visited.clear();
        self.files.clear();
        Ok(())
    }

    /// Next file entry in breadth-first order, or `None` when the tree is
    /// exhausted.
    pub async fn next_file(&mut self) -> Result<Option<ContentEntry>, GithubError> {
        loop {
            if let Some(file) = self.files.pop_front() {
                return Ok(Some(file));
            }
            let Some(folder) = self.folders.pop_front() else {
                return Ok(None);
            };
            self.visited.insert(folder.clone());
            for entry in self.list(&folder).await? {
                if entry.is_file() {
                    self.files.push_back(entry);
                } else if entry.is_dir()
                    && !Self::is_excluded(&entry.path)
                    && !self.visited.contains(&entry.path)
                    && !self.folders.contains(&entry.path)
                {
                    self.folders.push_back(entry.path);
                }
            }
        }
    }

    /// Fill in `content`/`encoding` for a file entry. Oversized blobs fall
    /// back to the raw download URL; a failing fallback drops the file
    /// silently.
    pub async fn fetch_content(&mut self, entry: &mut ContentEntry) -> Result<(), GithubError> {
        if !entry.is_file() {
            return Ok(());
        }
        let url = Url::parse(&entry.url).map_err(|err| GithubError::DataDecode(err.to_string()))?;
        match self.client.request(url, &[]).await {
            Ok(page) => {
                let body: ContentBody = serde_json::from_value(page.payload.into_value())
                    .map_err(|err| GithubError::DataDecode(err.to_string()))?;
                entry.content = body.content;
                entry.encoding = body.encoding;
                Ok(())
            }
            Err(GithubError::BlobTooLarge(_)) => {
                let Some(download_url) = entry.download_url.clone() else {
                    return Ok(());
                };
                let Ok(url) = Url::parse(&download_url) else {
                    return Ok(());
                };
                if let Ok(page) = self.client.request(url, &[]).await {
                    entry.content = Some(page.payload.into_text());
                    entry.encoding = None;
                }
                Ok(())
            }
            Err(err) if err.is_empty_result() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn list(&mut self, folder: &str) -> Result<Vec<ContentEntry>, GithubError> {
        let url = self.folder_url(folder)?;
        let page = match self.client.request(url, &[]).await {
            Ok(page) => page,
            // A listing that is gone or malformed reads as empty; the walk
            // goes on.
            Err(err) if err.is_empty_result() => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let value = page.payload.into_value();
        let entries = if value.is_array() {
            serde_json::from_value(value).map_err(|err| GithubError::DataDecode(err.to_string()))?
        } else if value.is_object() {
            vec![serde_json::from_value(value)
                .map_err(|err| GithubError::DataDecode(err.to_string()))?]
        } else {
            Vec::new()
        };
        Ok(entries)
    }

    fn folder_url(&self, folder: &str) -> Result<Url, GithubError> {
        let base = self
            .base
            .as_ref()
            .expect("walker used before begin()");
        if folder == "." {
            return Ok(base.clone());
        }
        // Url::join percent-encodes most of the path; '#', '?' and '%' would
        // change its meaning, so pre-encode those.
        let escaped = folder
            .replace('%', "%25")
            .replace('#', "%23")
            .replace('?', "%3F");
        base.join(&escaped)
            .map_err(|err| GithubError::DataDecode(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_environment_and_cache_directories() {
        for path in [
            "venv",
            "myvenv",
            ".venv",
            "lib/site-packages",
            "src/__pycache__",
            "static",
            "app/static/css",
            ".git",
            ".github/workflows",
            "python",
            "Python-3.9.1",
            "pip-20.1",
            "tools/python2.7",
        ] {
            assert!(ContentWalker::is_excluded(path), "{path} should be excluded");
        }
    }

    #[test]
    fn keeps_ordinary_source_directories() {
        for path in ["src", "src/app", "tests", "pipelines", "venvs-doc", "staticfiles"] {
            assert!(!ContentWalker::is_excluded(path), "{path} should be kept");
        }
    }

    #[test]
    fn decodes_inline_base64_blobs() {
        let entry = ContentEntry {
            kind: "file".into(),
            path: "main.py".into(),
            url: String::new(),
            download_url: None,
            content: Some("aW1wb3J0IG9z\nCg==".into()),
            encoding: Some("base64".into()),
        };
        assert_eq!(entry.decoded_content(), "import os\n");
    }

    #[test]
    fn undecodable_bytes_yield_empty_content() {
        let entry = ContentEntry {
            kind: "file".into(),
            path: "blob.py".into(),
            url: String::new(),
            download_url: None,
            content: Some("/w==".into()), // 0xFF, not UTF-8
            encoding: Some("base64".into()),
        };
        assert_eq!(entry.decoded_content(), "");
    }

    #[test]
    fn passthrough_without_encoding() {
        let entry = ContentEntry {
            kind: "file".into(),
            path: "requirements.txt".into(),
            url: String::new(),
            download_url: None,
            content: Some("Django>=3.0\n".into()),
            encoding: None,
        };
        assert_eq!(entry.decoded_content(), "Django>=3.0\n");
    }
}
