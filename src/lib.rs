//! lexiquery - REST query layer over a lexical translation database
//!
//! This crate turns declarative HTTP query parameters into parameterized
//! PostgreSQL queries:
//! - Per-entity column maps with dynamic projection
//! - Validated filter predicates and deduplicated joins
//! - Sorting, random sampling and seek-cursor pagination
//! - Translation-path resolution with quality scoring
//! - A fingerprinted response cache and per-client throttling

pub mod catalog;
pub mod config;
pub mod pagination;
pub mod predicate;
pub mod query_builder;
pub mod routes;
pub mod server;
pub mod translation;
