//! Error classification shared by the Prober and the Weeder.
//!
//! Both control loops need to answer the same question after every
//! Kubernetes API call: was this failure significant, or is it the kind of
//! noise (a stale cache, a rate limit, a resource that simply isn't there
//! yet) that should be swallowed without moving a health counter? This
//! module is the single place that answers it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("the Kubernetes API server rejected our request")]
    Api(#[source] kube::Error),
    #[error("failed to connect to the Kubernetes API server")]
    Connection(#[source] kube::Error),
    #[error("the Kubernetes API server returned an unexpected error")]
    Other(#[source] kube::Error),
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(_) => ApiError::Api(err),
            kube::Error::HyperError(_) | kube::Error::Service(_) => ApiError::Connection(err),
            _ => ApiError::Other(err),
        }
    }
}

/// Classification used by the probe state machines (spec §4.2, §7): does
/// this error move the failure counter, or is it noise we should ride out?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// NotFound / Forbidden / Unauthorized: the request was answered, the
    /// answer just wasn't useful. Does not move any counter.
    Ignorable,
    /// TooManyRequests: answered, but we are asking too fast. Does not move
    /// any counter, but does impose a short local back-off.
    RateLimited,
    /// Anything else: timeouts, connection refused, TLS failures, 5xx. This
    /// is what the failure/success counters exist to track.
    NonIgnorable,
}

pub fn classify(err: &kube::Error) -> ErrorClass {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 | 403 | 401 => ErrorClass::Ignorable,
            429 => ErrorClass::RateLimited,
            _ => ErrorClass::NonIgnorable,
        },
        _ => ErrorClass::NonIgnorable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "test".into(),
            reason: "test".into(),
            code,
        })
    }

    #[test]
    fn not_found_is_ignorable() {
        assert_eq!(classify(&api_err(404)), ErrorClass::Ignorable);
    }

    #[test]
    fn forbidden_and_unauthorized_are_ignorable() {
        assert_eq!(classify(&api_err(403)), ErrorClass::Ignorable);
        assert_eq!(classify(&api_err(401)), ErrorClass::Ignorable);
    }

    #[test]
    fn too_many_requests_is_rate_limited() {
        assert_eq!(classify(&api_err(429)), ErrorClass::RateLimited);
    }

    #[test]
    fn server_error_is_non_ignorable() {
        assert_eq!(classify(&api_err(500)), ErrorClass::NonIgnorable);
    }
}
