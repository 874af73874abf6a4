//! # psy-core
//!
//! Core types, lifecycle states, and error types for the Psylab module engine.
//!
//! This crate provides the foundational types shared across all Psylab crates:
//! - Module descriptors, result records, and audit entries
//! - Lifecycle state machine for pluggable test modules
//! - Open, ordered field values for module-specific result columns
//! - The explicit acting identity passed into every store operation
//! - ID prefixes and the common result-table column names
//! - Cross-cutting error types

pub mod entities;
pub mod enums;
pub mod errors;
pub mod identity;
pub mod ids;
pub mod values;
