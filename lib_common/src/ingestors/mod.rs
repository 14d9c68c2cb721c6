//! Upstream ingestion: per-cycle aggregation of the TSS source documents.

pub mod aggregator;
