//! `core.rukpak.io/v1alpha1` resource types.
//!
//! `CatalogSource` is the desired-state input: one catalog image to render.
//! `CatalogCache` is the derived record written by the controllers, named
//! after and owned by its source.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, OwnerReference};
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::ObjectKey;

/// API group of both resources.
pub const GROUP: &str = "core.rukpak.io";

/// API version of both resources.
pub const VERSION: &str = "v1alpha1";

/// Condition type stamped onto every `CatalogCache` status.
pub const CONDITION_CACHE_UPDATED_AT: &str = "CacheUpdatedAt";

/// Desired state of a `CatalogSource`.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, JsonSchema)]
#[kube(
    group = "core.rukpak.io",
    version = "v1alpha1",
    kind = "CatalogSource",
    namespaced
)]
pub struct CatalogSourceSpec {
    /// Pull specification of the catalog image.
    pub image: String,
}

impl CatalogSource {
    /// Owner reference pointing back at this source.
    ///
    /// Kind, apiVersion, name and uid are copied verbatim; nothing else is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidObject`] when the source has no uid yet, i.e.
    /// it was never persisted.
    pub fn owner_reference(&self) -> Result<OwnerReference> {
        let uid = self.uid().ok_or_else(|| {
            Error::invalid_object(ObjectKey::of(self).to_string(), "missing metadata.uid")
        })?;

        Ok(OwnerReference {
            api_version: <Self as Resource>::api_version(&()).into_owned(),
            kind: <Self as Resource>::kind(&()).into_owned(),
            name: self.name_any(),
            uid,
            ..OwnerReference::default()
        })
    }
}

/// Desired state of a `CatalogCache`: the rendered operators.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "core.rukpak.io",
    version = "v1alpha1",
    kind = "CatalogCache",
    derive = "PartialEq",
    namespaced,
    status = "CatalogCacheStatus"
)]
pub struct CatalogCacheSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operators: Vec<Operator>,
}

/// Observed state of a `CatalogCache`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
pub struct CatalogCacheStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// One rendered bundle.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct Operator {
    pub name: String,
    pub package: String,
    pub version: String,
    #[serde(rename = "providedapis", default)]
    pub provided_apis: Vec<ApiKey>,
    #[serde(rename = "requiredapis", default, skip_serializing_if = "Vec::is_empty")]
    pub required_apis: Vec<ApiKey>,
    #[serde(rename = "bundlepath")]
    pub bundle_path: String,
}

/// A `(group, version, kind)` triple.
///
/// Compared field by field; the empty core group is not special-cased.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
pub struct ApiKey {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ApiKey {
    /// Create an API key.
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }
}
