use http::StatusCode;
use thiserror::Error;

/// Request-path errors surfaced by the gateway core.
///
/// Plugin rejections (401/403/413/429) are short-circuit responses, not
/// errors; this enum covers routing and forwarding failures only.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("route not found")]
    RouteNotFound,

    #[error("upstream '{0}' not found")]
    UpstreamNotFound(String),

    #[error("no healthy targets available in upstream '{0}'")]
    NoHealthyTarget(String),

    #[error("upstream '{0}' timed out")]
    UpstreamTimeout(String),

    #[error("upstream '{0}' request failed: {1}")]
    UpstreamError(String, String),
}

impl GatewayError {
    /// The client-facing status for this error kind.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound => StatusCode::NOT_FOUND,
            GatewayError::UpstreamNotFound(_) => StatusCode::BAD_GATEWAY,
            GatewayError::NoHealthyTarget(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamError(..) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short machine-readable message used in JSON error bodies.
    pub fn client_message(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound => "route not found",
            GatewayError::UpstreamNotFound(_) => "upstream not found",
            GatewayError::NoHealthyTarget(_) => "no healthy targets available",
            GatewayError::UpstreamTimeout(_) => "gateway timeout",
            GatewayError::UpstreamError(..) => "bad gateway",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::RouteNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::NoHealthyTarget("u".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::UpstreamTimeout("u".into()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::UpstreamError("u".into(), "boom".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
