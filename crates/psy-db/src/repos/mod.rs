//! Repository layer: `impl PsyService` blocks, one per concern.

pub mod audit;
pub mod catalog;
pub mod consistency;
pub mod lifecycle;
pub mod registry;
pub mod results;
