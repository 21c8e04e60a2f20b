//! Quota bookkeeping for one API session. Search and core endpoints carry
//! independent quotas upstream, so every client owns its own `RateLimit`
//! keyed by the endpoint class it talks to.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::client::Credentials;
use crate::errors::{from_reqwest, GithubError};

pub(crate) const RATE_LIMIT_URL: &str = "https://api.github.com/rate_limit";

const MIN_REMAINING: u64 = 1;
const MIN_DELAY_PER_REQUEST: f64 = 1.0;
const MORE_DELAY_IF_OUT_OF_LIMIT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitResource {
    Core,
    Search,
}

impl LimitResource {
    fn key(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Search => "search",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct QuotaWindow {
    limit: u64,
    remaining: u64,
    reset: f64,
}

#[derive(Debug, Deserialize)]
struct QuotaResources {
    core: QuotaWindow,
    search: QuotaWindow,
}

#[derive(Debug, Deserialize)]
struct QuotaResponse {
    resources: QuotaResources,
}

#[derive(Debug)]
pub struct RateLimit {
    resource: LimitResource,
    limit: u64,
    remaining: u64,
    reset: f64,
    last_use: Option<f64>,
    delay: Option<f64>,
}

impl RateLimit {
    pub fn new(resource: LimitResource) -> Self {
        Self {
            resource,
            limit: 0,
            remaining: 0,
            reset: 0.0,
            last_use: None,
            delay: None,
        }
    }

    fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    pub fn has_data(&self) -> bool {
        self.reset > 0.0
    }

    /// Quota data is unusable once the reset instant has passed.
    pub fn stale(&self) -> bool {
        self.reset <= Self::now()
    }

    fn in_limit(&self) -> bool {
        self.remaining > MIN_REMAINING
    }

    /// Refresh quota numbers from the rate-limit endpoint. Skipped unless the
    /// cached window is stale or the caller forces it.
    pub async fn ask(
        &mut self,
        session: &reqwest::Client,
        auth: Option<&Credentials>,
        force: bool,
    ) -> Result<(), GithubError> {
        if !force && self.has_data() && !self.stale() {
            return Ok(());
        }
        let mut request = session.get(RATE_LIMIT_URL);
        if let Some(auth) = auth {
            request = request.basic_auth(&auth.user, Some(&auth.token));
        }
        let response = request.send().await.map_err(from_reqwest)?;
        let page = crate::client::parse_response(response).await?;
        let quota: QuotaResponse = serde_json::from_value(page.payload.into_value())
            .map_err(|err| GithubError::DataDecode(err.to_string()))?;
        let window = match self.resource {
            LimitResource::Core => quota.resources.core,
            LimitResource::Search => quota.resources.search,
        };
        self.limit = window.limit.max(1);
        self.remaining = window.remaining;
        self.reset = window.reset;
        self.delay = Some(self.request_interval());
        Ok(())
    }

    fn request_interval(&self) -> f64 {
        let spread = (self.reset - Self::now()) / self.limit as f64;
        spread.max(MIN_DELAY_PER_REQUEST)
    }

    /// How long to hold off before the next request. Infallible; the caller
    /// sleeps, the governor only does arithmetic.
    pub fn pause(&self) -> Option<Duration> {
        let now = Self::now();
        let wait = if self.in_limit() {
            match (self.last_use, self.delay) {
                (Some(last_use), Some(delay)) => last_use + delay - now,
                _ => 0.0,
            }
        } else {
            self.reset - now + MORE_DELAY_IF_OUT_OF_LIMIT
        };
        (wait > 0.0).then(|| Duration::from_secs_f64(wait))
    }

    pub async fn pace(&self) {
        if let Some(wait) = self.pause() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Book one spent request.
    pub fn use_one(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
        self.last_use = Some(Self::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(limit: u64, remaining: u64, reset_in: f64) -> RateLimit {
        let mut limit_state = RateLimit::new(LimitResource::Search);
        limit_state.limit = limit;
        limit_state.remaining = remaining;
        limit_state.reset = RateLimit::now() + reset_in;
        limit_state.delay = Some(limit_state.request_interval());
        limit_state
    }

    #[test]
    fn interval_never_drops_below_minimum() {
        let governor = governor(5000, 4000, 10.0);
        assert!(governor.delay.unwrap() >= MIN_DELAY_PER_REQUEST);
    }

    #[test]
    fn interval_spreads_requests_over_the_window() {
        let governor = governor(10, 8, 600.0);
        let delay = governor.delay.unwrap();
        assert!(delay >= 59.0 && delay <= 60.0, "delay was {delay}");
    }

    #[test]
    fn pause_waits_out_the_reset_when_quota_is_spent() {
        let governor = governor(10, 0, 30.0);
        let wait = governor.pause().expect("should wait for reset");
        assert!(wait >= Duration::from_secs_f64(29.0));
        assert!(wait <= Duration::from_secs_f64(31.5));
    }

    #[test]
    fn pause_spaces_consecutive_requests() {
        let mut governor = governor(10, 8, 600.0);
        assert!(governor.pause().is_none(), "no pause before the first use");
        governor.use_one();
        let wait = governor.pause().expect("paced after use");
        assert!(wait >= Duration::from_secs_f64(58.0));
    }

    #[test]
    fn staleness_follows_the_reset_clock() {
        assert!(governor(10, 10, -5.0).stale());
        assert!(!governor(10, 10, 60.0).stale());
        assert!(!RateLimit::new(LimitResource::Core).has_data());
    }
}
