//! Service schema mappings for KATANA components.
//!
//! The framework sends the schema mappings of every known service along
//! with a request whenever they change. [`SchemaRegistry`] keeps the latest
//! table and hands out [`SchemaSnapshot`]s, so a request reads one
//! consistent table even while a newer one is being installed.
//!
//! Service versions may be requested with `*` wildcards; see
//! [`VersionString`] for the matching and ordering rules.

pub mod config;
pub mod error;
pub mod registry;
pub mod service;
pub mod versions;

pub use config::RegistryConfig;
pub use error::{Result, SchemaError};
pub use registry::{SchemaRegistry, SchemaSnapshot};
pub use service::ServiceSchema;
pub use versions::{compare_versions, VersionString};
