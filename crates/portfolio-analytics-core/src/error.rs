use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Insufficient data for {context}: need at least {required} observations, got {available}")]
    InsufficientData {
        context: String,
        required: usize,
        available: usize,
    },

    #[error("Misaligned series {ticker}: {reason}")]
    MisalignedSeries { ticker: String, reason: String },

    #[error("Degenerate distribution for {subject}: {reason}")]
    DegenerateDistribution { subject: String, reason: String },

    #[error("Infeasible constraints: {0}")]
    InfeasibleConstraints(String),

    #[error("Singular covariance matrix: {0}")]
    SingularCovariance(String),

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta:e})")]
    ConvergenceFailure {
        function: String,
        iterations: u32,
        last_delta: f64,
    },

    #[error("Computation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AnalyticsError {
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AnalyticsError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn insufficient_data(context: impl Into<String>, required: usize, available: usize) -> Self {
        AnalyticsError::InsufficientData {
            context: context.into(),
            required,
            available,
        }
    }

    pub fn misaligned(ticker: impl Into<String>, reason: impl Into<String>) -> Self {
        AnalyticsError::MisalignedSeries {
            ticker: ticker.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for AnalyticsError {
    fn from(e: serde_json::Error) -> Self {
        AnalyticsError::SerializationError(e.to_string())
    }
}
