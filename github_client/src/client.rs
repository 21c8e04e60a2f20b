//! One authenticated session per worker per endpoint class, with the retry
//! wrapper that turns classified API failures into bounded, paced retries.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, LINK};
use reqwest::StatusCode;
use tracing::{error, info};
use url::Url;

use crate::errors::{classify, from_reqwest, GithubError};
use crate::limit::{LimitResource, RateLimit};
use crate::pagination::parse_link_header;

pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const MAX_RETRIES_PER_REQUEST: u32 = 5;
const SHORT_BREAK: Duration = Duration::from_secs(1);
const MEDIUM_BREAK: Duration = Duration::from_secs(3);
const LONG_BREAK: Duration = Duration::from_secs(5);

/// Basic-auth pair for one worker. Workers never share credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

/// Body of a 200 response: JSON when it parses, raw text otherwise (raw
/// download endpoints return plain file bodies).
#[derive(Debug, Clone)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
}

impl Payload {
    pub fn into_value(self) -> serde_json::Value {
        match self {
            Self::Json(value) => value,
            Self::Text(text) => serde_json::Value::String(text),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Json(serde_json::Value::String(text)) => text,
            Self::Json(value) => value.to_string(),
            Self::Text(text) => text,
        }
    }
}

/// A parsed 200 response: payload plus the bits of response metadata the
/// pagination layer needs.
#[derive(Debug)]
pub struct ApiPage {
    pub payload: Payload,
    pub url: Url,
    pub links: HashMap<String, String>,
}

pub struct GithubClient {
    session: reqwest::Client,
    auth: Option<Credentials>,
    timeout: Duration,
    pub(crate) limit: RateLimit,
}

impl GithubClient {
    pub fn new(
        resource: LimitResource,
        auth: Option<Credentials>,
        timeout: Option<Duration>,
    ) -> Self {
        let timeout = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        Self {
            session: build_session(timeout),
            auth,
            timeout,
            limit: RateLimit::new(resource),
        }
    }

    /// Drop the current session and start a fresh one. Used after abuse-limit
    /// violations and connection-level failures.
    pub fn reset(&mut self) {
        self.session = build_session(self.timeout);
    }

    pub async fn request(
        &mut self,
        url: Url,
        params: &[(String, String)],
    ) -> Result<ApiPage, GithubError> {
        self.limit
            .ask(&self.session, self.auth.as_ref(), false)
            .await?;
        self.limit.pace().await;

        for attempt in 1..=MAX_RETRIES_PER_REQUEST {
            match self.send(&url, params).await {
                Ok(page) => {
                    self.limit.use_one();
                    return Ok(page);
                }
                Err(err) => {
                    match &err {
                        GithubError::RateLimit(_) => {
                            error!(error = %err, "rate limit exceeded");
                            self.limit
                                .ask(&self.session, self.auth.as_ref(), true)
                                .await?;
                            pause(SHORT_BREAK, attempt).await;
                        }
                        GithubError::AbuseLimit(_) => {
                            error!(error = %err, "abuse limit violated");
                            self.reset();
                            pause(LONG_BREAK, attempt).await;
                        }
                        GithubError::Timeout(_) | GithubError::Connection(_) => {
                            error!(error = %err, "request timeout or connection error");
                            self.reset();
                            pause(LONG_BREAK, attempt).await;
                        }
                        GithubError::ServiceUnavailable(_) | GithubError::Server(_) => {
                            error!(error = %err, "server-side failure");
                            pause(LONG_BREAK, attempt).await;
                        }
                        GithubError::DataDecode(_) => {
                            error!(error = %err, "undecodable response");
                            pause(MEDIUM_BREAK, attempt).await;
                        }
                        // Empty results and fatal conditions are for the
                        // caller to deal with.
                        _ => return Err(err),
                    }
                    info!("retrying the request...");
                }
            }
        }
        Err(GithubError::MaxRetries {
            attempts: MAX_RETRIES_PER_REQUEST,
        })
    }

    async fn send(&self, url: &Url, params: &[(String, String)]) -> Result<ApiPage, GithubError> {
        let mut request = self.session.get(url.clone());
        if !params.is_empty() {
            request = request.query(params);
        }
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.user, Some(&auth.token));
        }
        let response = request.send().await.map_err(from_reqwest)?;
        parse_response(response).await
    }
}

fn build_session(timeout: Duration) -> reqwest::Client {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github.v3+json"));
    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(concat!("pycrawl/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .expect("couldn't build GitHub session?")
}

/// Linear backoff: retry sleeps grow with the attempt number.
async fn pause(base: Duration, attempt: u32) {
    tokio::time::sleep(base * attempt).await;
}

pub(crate) async fn parse_response(response: reqwest::Response) -> Result<ApiPage, GithubError> {
    let status = response.status();
    let url = response.url().clone();
    let links = response
        .headers()
        .get(LINK)
        .and_then(|value| value.to_str().ok())
        .map(parse_link_header)
        .unwrap_or_default();
    let text = response.text().await.map_err(from_reqwest)?;
    let json: Option<serde_json::Value> = serde_json::from_str(&text).ok();

    if status == StatusCode::OK {
        let payload = match json {
            Some(value) => Payload::Json(value),
            None => Payload::Text(text),
        };
        return Ok(ApiPage { payload, url, links });
    }

    let message = json
        .as_ref()
        .and_then(|value| value.get("message"))
        .and_then(|message| message.as_str())
        .unwrap_or(&text)
        .to_lowercase();
    Err(classify(status.as_u16(), &message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_text_passes_through() {
        assert_eq!(Payload::Text("import os".into()).into_text(), "import os");
        assert_eq!(
            Payload::Json(serde_json::Value::String("raw body".into())).into_text(),
            "raw body"
        );
    }
}
