pub mod client;
pub mod msearch;
pub mod search_request;
pub mod timestamp_infos;

pub use client::{ClientError, ConfiguredFields, QuickwitClient, QuickwitConfig};
