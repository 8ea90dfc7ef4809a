//! Unified inbox: omnichannel message routing, delivery and real-time fan-out.

pub mod analytics;
pub mod channels;
pub mod config;
pub mod contacts;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod notes;
pub mod realtime;
pub mod server;
pub mod store;
