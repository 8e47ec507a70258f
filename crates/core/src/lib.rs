//! Resource types shared by the catalog controllers.
//!
//! - [`api`]: the `CatalogSource` and `CatalogCache` custom resources
//! - [`key`]: `(namespace, name)` object identity
//! - [`scheme`]: explicit, startup-built registry of resource kinds

#![forbid(unsafe_code)]

pub mod api;
pub mod error;
pub mod key;
pub mod scheme;

pub use api::{
    ApiKey, CatalogCache, CatalogCacheSpec, CatalogCacheStatus, CatalogSource, CatalogSourceSpec,
    Operator, CONDITION_CACHE_UPDATED_AT,
};
pub use error::{Error, Result};
pub use key::ObjectKey;
pub use scheme::{TypeInfo, TypeRegistry};
