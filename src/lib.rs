//! Daedalus - filter-aware SSTI payload synthesizer
//!
//! Learns which characters and keywords a target's input filter blocks by
//! probing it, then searches the Jinja2 expression grammar for a payload
//! built only from what the filter lets through.

pub mod assembler;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod models;
pub mod oracle;
pub mod report;
pub mod resolver;
pub mod session;
pub mod synth;
