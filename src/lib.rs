pub mod aggregate;
pub mod assemble;
pub mod cache;
pub mod cli;
pub mod config;
pub mod contract;
pub mod download;
pub mod error;
pub mod load_config;
pub mod orchestrate;
pub mod pipeline;
pub mod preprocess;
pub mod providers;

pub use contract::{FileSnapshot, SnapshotMeta, WikiDocument, WikiSection};
pub use error::WikiError;
pub use pipeline::WikiGenerator;
