//! Core types shared by the quality pipeline: configuration, error
//! taxonomy, HTTP client, metric aggregation, SLO evaluation and reports.

pub mod config;
pub mod error;
pub mod http;
pub mod ids;
pub mod metrics;
pub mod phase;
pub mod render;
pub mod report;
pub mod slo;

pub use config::{parse_duration, QaConfig};
pub use error::{QaError, QaResult};
pub use http::{ApiKey, ApiRequest, ApiResponse, ApiTransport, Method, ServiceClient};
pub use ids::{CorrelationId, RunId, CORRELATION_HEADER};
pub use metrics::{
    AggregatedMetric, ErrorCounts, MetricAggregator, MetricSample, MetricsSnapshot, OperationCategory, Outcome,
};
pub use phase::{PhaseResult, PhaseStatus};
pub use render::ReportFormat;
pub use report::{build_report, ContainerStats, InfraSummary, Report, ReportInputs};
pub use slo::{evaluate, Observations, SloCompliance, SloResult, SloThreshold};
