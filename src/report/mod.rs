//! Engagement report output

pub mod json;
