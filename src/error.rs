//! Error types for the dashboard.

use serde::Serialize;
use thiserror::Error;

/// Every failure a single refresh cycle can produce.
///
/// All variants are recoverable: the host replaces the affected panel with
/// an [`ErrorReport`] and keeps the session and cached dataset intact.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DashboardError {
    /// Bad credentials, or dashboard content requested while locked
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Local and remote sources unavailable, or content could not be parsed
    #[error("Could not load dataset: {0}")]
    DataLoad(String),

    /// A selection references a column the active dataset does not have
    #[error("Column '{column}' is not present in the dataset (requested by {context})")]
    MissingColumn { column: String, context: String },

    /// An entity filter matched zero rows
    #[error("No rows where {column} = '{value}'")]
    EmptyDataset { column: String, value: String },

    /// A numeric operation was asked of a non-numeric column
    #[error("Column '{column}' is {found}, but {context} needs a {expected} column")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
        context: String,
    },

    /// A chart kind needs more fields than the selection supplies
    #[error("{kind} needs columns for {}", .missing.join(", "))]
    InsufficientColumns { kind: String, missing: Vec<String> },

    /// The data cannot be drawn by the requested chart
    #[error("Cannot build chart: {0}")]
    ChartBuild(String),

    /// Malformed configuration file
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DashboardError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn data_load(message: impl Into<String>) -> Self {
        Self::DataLoad(message.into())
    }

    pub fn missing_column(column: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.into(),
            context: context.into(),
        }
    }

    pub fn chart_build(message: impl Into<String>) -> Self {
        Self::ChartBuild(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Stable snake_case tag for the variant, used by hosts and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::DataLoad(_) => "data_load",
            Self::MissingColumn { .. } => "missing_column",
            Self::EmptyDataset { .. } => "empty_dataset",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::InsufficientColumns { .. } => "insufficient_columns",
            Self::ChartBuild(_) => "chart_build",
            Self::Config(_) => "config",
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from(self)
    }
}

/// User-facing rendition of an error: what went wrong, never a backtrace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
}

impl From<&DashboardError> for ErrorReport {
    fn from(err: &DashboardError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_column_and_question() {
        let err = DashboardError::missing_column("market_cap_usd", "Top cryptocurrencies by market capitalization");
        let message = err.to_string();
        assert!(message.contains("market_cap_usd"));
        assert!(message.contains("Top cryptocurrencies by market capitalization"));
        assert_eq!(err.kind(), "missing_column");
    }

    #[test]
    fn insufficient_columns_lists_every_missing_field() {
        let err = DashboardError::InsufficientColumns {
            kind: "Bubble Chart".to_string(),
            missing: vec!["size".to_string(), "y".to_string()],
        };
        assert_eq!(err.to_string(), "Bubble Chart needs columns for size, y");
    }

    #[test]
    fn report_carries_kind_and_message() {
        let err = DashboardError::EmptyDataset {
            column: "symbol".to_string(),
            value: "XRP".to_string(),
        };
        let report = err.report();
        assert_eq!(report.kind, "empty_dataset");
        assert_eq!(report.message, "No rows where symbol = 'XRP'");
    }
}
