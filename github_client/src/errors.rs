use std::fmt;

use thiserror::Error;

/// Status line and message of a non-200 API response, kept for logging.
#[derive(Debug, Clone)]
pub struct ApiFailure {
    pub status: u16,
    pub message: String,
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.message)
    }
}

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("login rejected: {0}")]
    Login(ApiFailure),
    #[error("invalid user agent: {0}")]
    UserAgent(ApiFailure),
    #[error("rate limit exceeded: {0}")]
    RateLimit(ApiFailure),
    #[error("abuse limit violated: {0}")]
    AbuseLimit(ApiFailure),
    #[error("repository access blocked: {0}")]
    RepoBlocked(ApiFailure),
    #[error("blob too large: {0}")]
    BlobTooLarge(ApiFailure),
    #[error("unavailable for legal reasons: {0}")]
    LegalReason(ApiFailure),
    #[error("not found: {0}")]
    NotFound(ApiFailure),
    #[error("bad request: {0}")]
    BadRequest(ApiFailure),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(ApiFailure),
    #[error("server error: {0}")]
    Server(ApiFailure),
    #[error("unexpected api response: {0}")]
    Api(ApiFailure),
    #[error("could not decode response payload: {0}")]
    DataDecode(String),
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("connection failed: {0}")]
    Connection(#[source] reqwest::Error),
    #[error("max retries exceeded after {attempts} attempts")]
    MaxRetries { attempts: u32 },
}

impl GithubError {
    /// Callers treat these as "no data here", not a failure of the walk.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::BadRequest(_))
    }
}

pub(crate) fn from_reqwest(err: reqwest::Error) -> GithubError {
    if err.is_timeout() {
        GithubError::Timeout(err)
    } else {
        GithubError::Connection(err)
    }
}

/// Map a non-200 status plus the lowercased `message` body onto the taxonomy.
pub(crate) fn classify(status: u16, message: &str) -> GithubError {
    let failure = ApiFailure {
        status,
        message: message.to_owned(),
    };
    match status {
        401 => GithubError::Login(failure),
        403 => {
            if message.contains("invalid user-agent") {
                GithubError::UserAgent(failure)
            } else if message.contains("rate limit exceeded") {
                GithubError::RateLimit(failure)
            } else if message.contains("abuse") {
                GithubError::AbuseLimit(failure)
            } else if message.contains("blob is too large") {
                GithubError::BlobTooLarge(failure)
            } else if message == "repository access blocked" {
                GithubError::RepoBlocked(failure)
            } else {
                GithubError::Api(failure)
            }
        }
        404 => GithubError::NotFound(failure),
        400 => GithubError::BadRequest(failure),
        451 => GithubError::LegalReason(failure),
        503 => GithubError::ServiceUnavailable(failure),
        500 | 502 => GithubError::Server(failure),
        _ => GithubError::Api(failure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_forbidden_by_message() {
        assert!(matches!(
            classify(403, "api rate limit exceeded for 1.2.3.4."),
            GithubError::RateLimit(_)
        ));
        assert!(matches!(
            classify(403, "you have triggered an abuse detection mechanism."),
            GithubError::AbuseLimit(_)
        ));
        assert!(matches!(
            classify(403, "invalid user-agent header"),
            GithubError::UserAgent(_)
        ));
        assert!(matches!(
            classify(403, "this api returns blobs up to 1 mb in size. the requested blob is too large"),
            GithubError::BlobTooLarge(_)
        ));
        assert!(matches!(
            classify(403, "repository access blocked"),
            GithubError::RepoBlocked(_)
        ));
        assert!(matches!(classify(403, "forbidden"), GithubError::Api(_)));
    }

    #[test]
    fn classifies_by_status() {
        assert!(matches!(classify(401, "bad credentials"), GithubError::Login(_)));
        assert!(matches!(classify(404, "not found"), GithubError::NotFound(_)));
        assert!(matches!(classify(400, "problems parsing json"), GithubError::BadRequest(_)));
        assert!(matches!(classify(451, "dmca"), GithubError::LegalReason(_)));
        assert!(matches!(classify(503, ""), GithubError::ServiceUnavailable(_)));
        assert!(matches!(classify(500, ""), GithubError::Server(_)));
        assert!(matches!(classify(502, ""), GithubError::Server(_)));
        assert!(matches!(classify(418, "teapot"), GithubError::Api(_)));
    }

    #[test]
    fn empty_result_errors() {
        assert!(classify(404, "not found").is_empty_result());
        assert!(classify(400, "").is_empty_result());
        assert!(!classify(500, "").is_empty_result());
    }
}
