//! Eris - A Feed Aggregator
//!
//! This crate fetches every feed listed in an OPML file concurrently, normalises
//! Atom, RSS and RDF entries into one record type, deduplicates them by link and
//! renders the most recent ones as a single HTML page.

pub mod aggregator;
pub mod config;
pub mod date;
pub mod feed;
pub mod fetcher;
pub mod opml;
pub mod rank;
pub mod render;
pub mod xml;
