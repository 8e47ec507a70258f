//! Bundle → Operator → CatalogCache mapping.

use catsrc_core::{ApiKey, CatalogCache, CatalogCacheSpec, CatalogSource, Operator};
use catsrc_registry::{Bundle, Gvk, ParsedProperties, PropertyParser};
use kube::ResourceExt;
use kube::api::ObjectMeta;
use tracing::warn;

use crate::config::PropertyErrorPolicy;
use crate::error::Result;

/// API key of a group/version/kind property.
pub fn api_key(gvk: &Gvk) -> ApiKey {
    ApiKey::new(&gvk.group, &gvk.version, &gvk.kind)
}

/// Build the operator entry for one bundle.
///
/// Each operator only ever receives the APIs of its own bundle.
///
/// # Errors
///
/// Returns the parser's error when `policy` is [`PropertyErrorPolicy::Fail`].
pub fn operator_from_bundle(
    bundle: &Bundle,
    parser: &dyn PropertyParser,
    policy: PropertyErrorPolicy,
) -> Result<Operator> {
    let parsed = match parser.parse(&bundle.properties) {
        Ok(parsed) => parsed,
        Err(e) => match policy {
            PropertyErrorPolicy::Fail => return Err(e.into()),
            PropertyErrorPolicy::Degrade => {
                warn!(bundle = %bundle.name, error = %e, "Failed to parse bundle properties");
                ParsedProperties::default()
            }
        },
    };

    Ok(Operator {
        name: bundle.name.clone(),
        package: bundle.package.clone(),
        version: parsed.version().unwrap_or_default().to_string(),
        provided_apis: parsed.provided.iter().map(api_key).collect(),
        required_apis: parsed.required.iter().map(api_key).collect(),
        bundle_path: bundle.image.clone(),
    })
}

/// The cache derived from `source`: same namespace and name, owned by it.
///
/// # Errors
///
/// Returns an error when the source has never been persisted (no uid).
pub fn catalog_cache_for(source: &CatalogSource, operators: Vec<Operator>) -> Result<CatalogCache> {
    let owner = source.owner_reference()?;
    Ok(CatalogCache {
        metadata: ObjectMeta {
            name: Some(source.name_any()),
            namespace: source.namespace(),
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        },
        spec: CatalogCacheSpec { operators },
        status: None,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use catsrc_core::CatalogSourceSpec;
    use catsrc_registry::{OlmPropertyParser, Property};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::error::Error;

    fn bundle(properties: Vec<Property>) -> Bundle {
        Bundle {
            name: "acme.v0.1.0".to_string(),
            package: "acme".to_string(),
            image: "quay.io/acme/acme-bundle:v0.1.0".to_string(),
            properties,
        }
    }

    fn property(property_type: &str, value: serde_json::Value) -> Property {
        Property {
            property_type: property_type.to_string(),
            value,
        }
    }

    #[test]
    fn test_operator_from_bundle() {
        let bundle = bundle(vec![
            property("olm.package", json!({"packageName": "acme", "version": "0.1.0"})),
            property("olm.gvk", json!({"group": "g", "version": "v1", "kind": "Foo"})),
            property("olm.gvk.required", json!({"group": "h", "version": "v1", "kind": "Bar"})),
        ]);

        let operator =
            operator_from_bundle(&bundle, &OlmPropertyParser, PropertyErrorPolicy::Degrade).unwrap();

        assert_eq!(
            operator,
            Operator {
                name: "acme.v0.1.0".to_string(),
                package: "acme".to_string(),
                version: "0.1.0".to_string(),
                provided_apis: vec![ApiKey::new("g", "v1", "Foo")],
                required_apis: vec![ApiKey::new("h", "v1", "Bar")],
                bundle_path: "quay.io/acme/acme-bundle:v0.1.0".to_string(),
            }
        );
    }

    #[test]
    fn test_unparseable_properties_degrade() {
        let bundle = bundle(vec![property("olm.gvk", json!("not an object"))]);

        let operator =
            operator_from_bundle(&bundle, &OlmPropertyParser, PropertyErrorPolicy::Degrade).unwrap();

        assert!(operator.provided_apis.is_empty());
        assert!(operator.required_apis.is_empty());
        assert_eq!(operator.version, "");
        assert_eq!(operator.name, "acme.v0.1.0");
    }

    #[test]
    fn test_unparseable_properties_fail() {
        let bundle = bundle(vec![property("olm.gvk", json!("not an object"))]);

        let err = operator_from_bundle(&bundle, &OlmPropertyParser, PropertyErrorPolicy::Fail)
            .unwrap_err();

        assert!(matches!(err, Error::Registry(_)));
    }

    #[test]
    fn test_catalog_cache_for_source() {
        let mut source = CatalogSource::new(
            "acme",
            CatalogSourceSpec {
                image: "quay.io/acme/catalog:latest".to_string(),
            },
        );
        source.metadata.namespace = Some("operators".to_string());
        source.metadata.uid = Some("source-uid".to_string());

        let cache = catalog_cache_for(&source, vec![Operator::default()]).unwrap();

        assert_eq!(cache.metadata.name.as_deref(), Some("acme"));
        assert_eq!(cache.metadata.namespace.as_deref(), Some("operators"));
        assert_eq!(cache.owner_references().len(), 1);
        assert_eq!(cache.owner_references().first().map(|o| o.uid.as_str()), Some("source-uid"));
        assert_eq!(cache.spec.operators.len(), 1);
        assert!(cache.status.is_none());
    }

    #[test]
    fn test_catalog_cache_requires_persisted_source() {
        let source = CatalogSource::new("acme", CatalogSourceSpec::default());

        let err = catalog_cache_for(&source, Vec::new()).unwrap_err();

        assert!(matches!(err, Error::Core(_)));
    }
}
