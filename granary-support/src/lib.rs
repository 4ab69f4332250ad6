//! # Granary Support
//!
//! Shared diagnostics utilities for the Granary bean container.
//!
//! This crate provides:
//! - Text rendering for creation chains and teardown reports
//! - "Did you mean?" suggestions for unknown bean names

pub mod rendering;
