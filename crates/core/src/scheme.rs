//! Explicit registry of the resource kinds a process works with.
//!
//! Built once at startup and handed to whatever needs it (the controller
//! manager, CRD generation). There is no process-wide registration.

use std::collections::BTreeMap;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{CustomResourceExt, Resource};
use tracing::debug;

use crate::api::{CatalogCache, CatalogSource};
use crate::error::{Error, Result};

/// Type metadata for one registered kind.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
    crd: fn() -> CustomResourceDefinition,
}

impl TypeInfo {
    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Generated CustomResourceDefinition for this kind.
    pub fn crd(&self) -> CustomResourceDefinition {
        (self.crd)()
    }
}

/// Kind-keyed registry of custom resource types.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeInfo>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `CatalogSource` and `CatalogCache`.
    ///
    /// # Errors
    ///
    /// Never fails in practice; registration errors are only possible on
    /// duplicate kinds.
    pub fn with_catalog_types() -> Result<Self> {
        let mut registry = Self::new();
        registry.register::<CatalogSource>()?;
        registry.register::<CatalogCache>()?;
        Ok(registry)
    }

    /// Register a custom resource kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateKind`] if the kind is already registered.
    pub fn register<K>(&mut self) -> Result<()>
    where
        K: CustomResourceExt + Resource<DynamicType = ()>,
    {
        let kind = K::kind(&()).into_owned();
        if self.types.contains_key(&kind) {
            return Err(Error::duplicate_kind(kind));
        }

        let info = TypeInfo {
            group: K::group(&()).into_owned(),
            version: K::version(&()).into_owned(),
            kind: kind.clone(),
            plural: K::plural(&()).into_owned(),
            namespaced: K::crd().spec.scope == "Namespaced",
            crd: K::crd,
        };
        debug!(kind = %kind, api_version = %info.api_version(), "Registered kind");
        self.types.insert(kind, info);
        Ok(())
    }

    /// Look up a kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownKind`] if the kind was never registered.
    pub fn get(&self, kind: &str) -> Result<&TypeInfo> {
        self.types.get(kind).ok_or_else(|| Error::unknown_kind(kind))
    }

    /// Check whether a kind is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.types.contains_key(kind)
    }

    /// CRDs of every registered kind, ordered by kind name.
    pub fn crds(&self) -> Vec<CustomResourceDefinition> {
        self.types.values().map(TypeInfo::crd).collect()
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_catalog_types_registered() {
        let registry = TypeRegistry::with_catalog_types().unwrap();

        assert_eq!(registry.len(), 2);
        let source = registry.get("CatalogSource").unwrap();
        assert_eq!(source.api_version(), "core.rukpak.io/v1alpha1");
        assert_eq!(source.plural, "catalogsources");
        assert!(source.namespaced);
        assert!(registry.contains("CatalogCache"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = TypeRegistry::with_catalog_types().unwrap();

        let err = registry.register::<CatalogCache>().unwrap_err();
        assert_eq!(err, Error::duplicate_kind("CatalogCache"));
    }

    #[test]
    fn test_unknown_kind() {
        let registry = TypeRegistry::new();

        assert!(registry.is_empty());
        assert_eq!(
            registry.get("CatalogSource").unwrap_err(),
            Error::unknown_kind("CatalogSource")
        );
    }

    #[test]
    fn test_crds_follow_kind_order() {
        let registry = TypeRegistry::with_catalog_types().unwrap();
        let names: Vec<_> = registry
            .crds()
            .into_iter()
            .filter_map(|crd| crd.metadata.name)
            .collect();

        assert_eq!(
            names,
            vec![
                "catalogcaches.core.rukpak.io".to_string(),
                "catalogsources.core.rukpak.io".to_string(),
            ]
        );
    }
}
