/// Errors produced by the Tower Tier middleware stack.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TierError {
    /// The request's key has used its allowance in at least one window.
    ///
    /// The duration indicates when the client should retry.
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with a `Retry-After` header.
    #[error("Rate limit exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// The duration to wait before retrying.
        retry_after: std::time::Duration,
    },

    /// Too many requests are already in flight.
    ///
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Service is overloaded; request shed")]
    Overloaded,

    /// No rate limit key could be derived from the request.
    ///
    /// When the `axum` feature is enabled, this converts to `400 Bad Request`.
    #[error("Request carries no rate limit key")]
    MissingKey,

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for TierError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, msg, headers) = match self {
            Self::Overloaded => (StatusCode::SERVICE_UNAVAILABLE, self.to_string(), None),
            Self::MissingKey => (StatusCode::BAD_REQUEST, self.to_string(), None),
            Self::RateLimited { retry_after } => {
                // Round up so a client honouring the header is not rejected again
                let secs = (retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)).max(1);
                let val = axum::http::HeaderValue::from(secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    self.to_string(),
                    Some((axum::http::header::RETRY_AFTER, val)),
                )
            }
            Self::Inner(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string(), None),
        };

        let mut response = (status, msg).into_response();
        if let Some((name, value)) = headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}
