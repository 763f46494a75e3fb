//! # Haqn Support
//!
//! Shared utilities for the haqn crates.
//!
//! This crate provides:
//! - Text rendering for diagnostics (scope stacks, feature suggestions)
//! - Type-name shortening for type-tagged feature keys

pub mod rendering;
