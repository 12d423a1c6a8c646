//! Core data models for the file storage service.
//!
//! `file` holds the records users see through the API; `job` holds the
//! payloads carried by the thumbnail queue.

pub mod file;
pub mod job;
