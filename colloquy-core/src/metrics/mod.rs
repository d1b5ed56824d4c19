mod aggregator;

pub use aggregator::{summarize, MetricsAggregator};
