//! Core logic: the file hierarchy, blob storage and the thumbnail pipeline.

pub mod blob_store;
pub mod hierarchy_service;
pub mod thumbnail_worker;
pub mod worker_runner;
