//! Error types for telemetry operations.

use thiserror::Error;

/// Errors raised while installing logging or operating the metrics registry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global tracing subscriber was already installed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Underlying subscriber error.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
    /// A recovery collector could not be built or registered.
    #[error("failed to set up metrics collector")]
    MetricsSetup {
        /// Metric identifier tied to the failure.
        name: &'static str,
        /// Setup stage that failed (`build` or `register`).
        stage: &'static str,
        /// Underlying Prometheus error.
        #[source]
        source: prometheus::Error,
    },
    /// The registry could not be rendered as exposition text.
    #[error("failed to render metrics")]
    MetricsRender {
        /// Underlying encoding or UTF-8 error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Convenience alias for telemetry results.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn metric_errors_keep_context_and_sources() {
        let err = TelemetryError::MetricsSetup {
            name: "recovery_queue_depth",
            stage: "register",
            source: prometheus::Error::AlreadyReg,
        };
        assert_eq!(err.to_string(), "failed to set up metrics collector");
        assert!(err.source().is_some());
        assert!(matches!(
            err,
            TelemetryError::MetricsSetup {
                stage: "register",
                ..
            }
        ));
    }
}
