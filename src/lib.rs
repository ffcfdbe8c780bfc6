//! Credential generation and print-batching pipeline.
//!
//! Issues event credentials for approved accreditation requests: renders a
//! QR code, composites the personalized badge from a template, produces a
//! single-credential PDF, and batches many ready credentials into one
//! print-ready document. Work is driven by a Redis-backed job queue with
//! per-job retry, backoff and dead-lettering; records live in Postgres and
//! artifacts in path-addressed blob storage.

pub mod app_state;
pub mod clock;
pub mod config;
pub mod db;
pub mod jobs;
pub mod models;
pub mod services;
pub mod store;
