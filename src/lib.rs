//! Bulletin monitor - recurring crawl, extract and diff engine for
//! regulatory bulletins, forms and notices.
//!
//! A crawl pass expands each active source into candidate URLs, fetches
//! them politely, extracts normalized text, deduplicates by content hash
//! and records snapshot lineage with diffs for anything that changed.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod extract;
pub mod models;
pub mod ocr;
pub mod repository;
pub mod schema;
pub mod scrapers;
pub mod services;
pub mod storage;
pub mod utils;
