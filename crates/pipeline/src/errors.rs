//! Pipeline error types

use scholarlink_common::errors::AppError;
use thiserror::Error;

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Content generation failures, classified by what the caller can do about them
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation provider rejected the API key: {message}")]
    Unauthorized { message: String },

    #[error("generation quota or account balance exhausted: {message}")]
    QuotaExceeded { message: String },

    #[error("generation provider rate limit reached: {message}")]
    RateLimited { message: String },

    #[error("generation provider returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("generation request failed: {0}")]
    Transport(String),

    #[error("invalid generation response: {0}")]
    InvalidResponse(String),

    #[error("generation provider not configured: {0}")]
    NotConfigured(String),
}

impl GenerationError {
    /// Map a non-2xx HTTP status from the provider to an error class
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => GenerationError::Unauthorized { message },
            402 | 403 => GenerationError::QuotaExceeded { message },
            429 => GenerationError::RateLimited { message },
            _ => GenerationError::Upstream { status, message },
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        let message = err.to_string();
        match err {
            GenerationError::Unauthorized { .. } => AppError::GenerationAuth { message },
            GenerationError::QuotaExceeded { .. } => AppError::GenerationQuota { message },
            GenerationError::RateLimited { .. } => AppError::GenerationRateLimited { message },
            GenerationError::Upstream { .. }
            | GenerationError::Transport(_)
            | GenerationError::InvalidResponse(_) => AppError::GenerationUnavailable { message },
            GenerationError::NotConfigured(_) => AppError::Configuration { message },
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The paper source could not be reached or refused the request
    #[error("paper source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("paper source returned an unreadable document: {0}")]
    SourceFormat(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    App(#[from] AppError),
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::SourceUnavailable(message) | PipelineError::SourceFormat(message) => {
                AppError::PaperSourceUnavailable { message }
            }
            PipelineError::Generation(e) => e.into(),
            PipelineError::App(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scholarlink_common::errors::ErrorCode;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            GenerationError::from_status(401, "bad key"),
            GenerationError::Unauthorized { .. }
        ));
        assert!(matches!(
            GenerationError::from_status(402, "balance"),
            GenerationError::QuotaExceeded { .. }
        ));
        assert!(matches!(
            GenerationError::from_status(403, "forbidden"),
            GenerationError::QuotaExceeded { .. }
        ));
        assert!(matches!(
            GenerationError::from_status(429, "slow down"),
            GenerationError::RateLimited { .. }
        ));
        assert_eq!(
            GenerationError::from_status(503, "overloaded"),
            GenerationError::Upstream {
                status: 503,
                message: "overloaded".to_string()
            }
        );
    }

    #[test]
    fn test_generation_errors_keep_distinct_codes() {
        let auth: AppError = GenerationError::from_status(401, "x").into();
        let quota: AppError = GenerationError::from_status(402, "x").into();
        let limited: AppError = GenerationError::from_status(429, "x").into();
        let transient: AppError = GenerationError::from_status(500, "x").into();

        assert_eq!(auth.code(), ErrorCode::GenerationAuthFailed);
        assert_eq!(quota.code(), ErrorCode::QuotaExceeded);
        assert_eq!(limited.code(), ErrorCode::RateLimited);
        assert_eq!(transient.code(), ErrorCode::GenerationUnavailable);
    }

    #[test]
    fn test_source_errors_map_to_upstream() {
        let err: AppError = PipelineError::SourceUnavailable("connection refused".into()).into();
        assert_eq!(err.code(), ErrorCode::PaperSourceUnavailable);
    }
}
