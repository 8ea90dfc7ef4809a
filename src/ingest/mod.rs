//! Inbound webhook ingestion.

pub mod payload;
pub mod pipeline;

pub use payload::{InboundMessage, ParsedInbound, StatusUpdate};
pub use pipeline::{InboundPipeline, IngestOutcome};
