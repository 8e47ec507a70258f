//! Bundle property decoding.
//!
//! Bundles carry a list of `{type, value}` properties. Only the types the
//! catalog cache needs are decoded; anything else is skipped.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::render::Property;

/// An API the bundle provides.
pub const TYPE_GVK: &str = "olm.gvk";

/// An API the bundle requires.
pub const TYPE_GVK_REQUIRED: &str = "olm.gvk.required";

/// Package name and version of the bundle.
pub const TYPE_PACKAGE: &str = "olm.package";

/// Group, version, kind as written in a bundle property.
///
/// Missing fields decode as empty strings and are kept as written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

/// Value of an `olm.package` property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageProperty {
    #[serde(rename = "packageName")]
    pub package_name: String,
    pub version: String,
}

/// Typed view of a bundle's properties, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedProperties {
    pub provided: Vec<Gvk>,
    pub required: Vec<Gvk>,
    pub packages: Vec<PackageProperty>,
}

impl ParsedProperties {
    /// Version from the first `olm.package` property, if any.
    pub fn version(&self) -> Option<&str> {
        self.packages
            .first()
            .map(|p| p.version.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// Decodes raw bundle properties.
pub trait PropertyParser: Send + Sync {
    /// Parse a bundle's properties.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProperty`] when the value of a known type is
    /// not an object of the expected shape.
    fn parse(&self, properties: &[Property]) -> Result<ParsedProperties>;
}

/// Parser for the `olm.*` property types.
#[derive(Debug, Clone, Copy, Default)]
pub struct OlmPropertyParser;

impl PropertyParser for OlmPropertyParser {
    fn parse(&self, properties: &[Property]) -> Result<ParsedProperties> {
        let mut parsed = ParsedProperties::default();
        for property in properties {
            match property.property_type.as_str() {
                TYPE_GVK => parsed.provided.push(decode(property)?),
                TYPE_GVK_REQUIRED => parsed.required.push(decode(property)?),
                TYPE_PACKAGE => parsed.packages.push(decode(property)?),
                _ => {}
            }
        }
        Ok(parsed)
    }
}

fn decode<T: DeserializeOwned>(property: &Property) -> Result<T> {
    if !property.value.is_object() {
        return Err(Error::invalid_property(
            &property.property_type,
            "value is not an object",
        ));
    }
    T::deserialize(&property.value)
        .map_err(|e| Error::invalid_property(&property.property_type, e.to_string()))
}
