//! Library root for the `logger-service` crate
//!
//! Producers publish log events onto a topic; a consumer group persists them
//! into a relational store; readers query the store through a rate-limited,
//! cached HTTP endpoint.

// Core error handling
pub mod errors;

// Data model and input handling
pub mod input_validator;
pub mod log_record;

// Storage
pub mod log_store;
pub mod log_store_sql;
pub mod query_builder;

// Read path
pub mod cache_store;
pub mod fault_report;
pub mod log_query_service;
pub mod rate_limiter;

// Ingestion
pub mod in_process_broker;
pub mod ingest;
pub mod kafka_transport;
pub mod transport;

// Configuration & CLI
pub mod cli;
pub mod config_loader;
pub mod telemetry;

// Web server interface
pub mod api_errors;
pub mod app_state;
pub mod web;

// Process wiring
pub mod service;

pub use errors::{LoggerError, LoggerResult};
pub use log_record::{LogCreateRequest, LogFilter, LogLevel, LogRecord, PaginatedResult, Pagination};
pub use log_store::LogStore;
