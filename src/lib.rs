//! Rust Lead Harvester Library
//!
//! This library provides the core of the business-record harvester: a crawl
//! resilience state machine that extracts listing detail pages under bot
//! detection, and a multi-source email discovery engine, both writing through
//! an idempotent, identity-keyed store.
//!
//! # Modules
//!
//! - `captcha`: Challenge page classifier.
//! - `circuit_breaker`: Circuit breaker guarding store writes.
//! - `config`: Configuration management.
//! - `contact_pages`: Contact page scraping for published addresses.
//! - `db`: Database connection, pool management and schema.
//! - `db_storage`: Postgres-backed dedup store.
//! - `dedup_store`: Store trait and in-memory implementation.
//! - `detail_parser`: Listing detail page extraction.
//! - `enrichment`: Per-business orchestration and batch driver.
//! - `errors`: Error handling types.
//! - `fetcher`: Page fetching with per-identity proxy and user agent.
//! - `fingerprint`: Content fingerprints for unchanged-write detection.
//! - `identity`: Proxy and user agent rotation.
//! - `merge`: Email candidate merging and ranking.
//! - `models`: Core data models.
//! - `patterns`: Email address pattern generation.
//! - `rate_limiter`: Jittered request pacing and the injectable clock.
//! - `retry`: Detail crawl retry state machine.
//! - `search_parser`: Search results page parsing.
//! - `smtp`: MX resolution and SMTP deliverability probing.
//! - `stats`: Shared crawl counters.
//! - `whois`: Registrant email lookup.

pub mod captcha;
pub mod circuit_breaker;
pub mod config;
pub mod contact_pages;
pub mod db;
pub mod db_storage;
pub mod dedup_store;
pub mod detail_parser;
pub mod enrichment;
pub mod errors;
pub mod fetcher;
pub mod fingerprint;
pub mod identity;
pub mod merge;
pub mod models;
pub mod patterns;
pub mod rate_limiter;
pub mod retry;
pub mod search_parser;
pub mod smtp;
pub mod stats;
pub mod whois;
