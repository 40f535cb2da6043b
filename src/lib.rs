//! Asynchronous OCR job pipeline
//!
//! Images are submitted as jobs, queued in Redis, processed by a pool of
//! workers (downscale, grayscale, text recognition) and their outcomes stored
//! in PostgreSQL, where clients poll for them by job id.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod setup;
