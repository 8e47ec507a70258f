//! Catalog image access.
//!
//! Three collaborators, each behind a trait so the controllers can be driven
//! without a registry:
//!
//! - [`RegistryClient`]: pull and unpack an image ([`OciRegistryClient`])
//! - [`CatalogRenderer`]: turn unpacked content into bundles
//!   ([`DeclarativeConfigRenderer`])
//! - [`PropertyParser`]: decode a bundle's properties ([`OlmPropertyParser`])

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod property;
pub mod render;

pub use client::{
    OciClientFactory, OciRegistryClient, RegistryClient, RegistryClientFactory, RegistryConfig,
    ScopedRegistry, UnpackedImage,
};
pub use error::{Error, Result};
pub use property::{Gvk, OlmPropertyParser, PackageProperty, ParsedProperties, PropertyParser};
pub use render::{Bundle, Catalog, CatalogRenderer, DeclarativeConfigRenderer, Property};
