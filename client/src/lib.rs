//! Capture photos into a local queue and send them to an ingestion endpoint
//! as one authenticated multipart batch.

pub mod capture;
pub mod config;
pub mod notify;
pub mod store;
pub mod uploader;
