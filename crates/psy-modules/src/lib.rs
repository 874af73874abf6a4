//! # psy-modules
//!
//! Discovery and instantiation of pluggable psychometric test modules.
//!
//! - [`manifest`]: parses and validates a module's `module.json`
//! - [`catalog`]: scans module roots and produces the set of discoverable modules
//! - [`factory`]: maps module keys to constructors of module behavior, with
//!   optional compute/interpret capabilities and a per-key instance cache
//!
//! Nothing here touches the database; registry state is layered on top by
//! `psy-db`.

pub mod catalog;
pub mod error;
pub mod factory;
pub mod manifest;

pub use catalog::{Catalog, CatalogScan, DiscoveredModule};
pub use error::{FactoryError, HookError, ManifestError};
pub use factory::{
    Annotation, Computer, FactoryRegistry, InstanceCache, Interpreter, ModuleInstance,
    NoopInstance, run_compute, run_interpret,
};
pub use manifest::parse_manifest;
