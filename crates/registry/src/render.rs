//! Render catalog images into bundle descriptors.
//!
//! A catalog image carries its declarative config as a tree of JSON and YAML
//! files. Every object with `schema: olm.bundle` becomes one [`Bundle`];
//! packages, channels and other schemas are not needed by the cache.

use std::ffi::OsStr;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::client::RegistryClient;
use crate::error::{Error, Result};

/// Schema of bundle objects in a declarative config.
pub const SCHEMA_BUNDLE: &str = "olm.bundle";

/// A rendered catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub bundles: Vec<Bundle>,
}

/// One bundle entry of a declarative config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub name: String,
    pub package: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub properties: Vec<Property>,
}

/// A raw, undecoded bundle property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub property_type: String,
    pub value: Value,
}

/// Produces a [`Catalog`] from image references.
#[async_trait]
pub trait CatalogRenderer: Send + Sync {
    /// Render `refs` in order, pulling through `registry`.
    ///
    /// # Errors
    ///
    /// Returns pull, unpack and decode errors unmodified, and
    /// [`Error::Cancelled`] if `cancel` fires.
    async fn render(
        &self,
        refs: &[String],
        registry: &dyn RegistryClient,
        cancel: &CancellationToken,
    ) -> Result<Catalog>;
}

/// Renders declarative-config catalogs pulled through the registry client.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclarativeConfigRenderer;

#[async_trait]
impl CatalogRenderer for DeclarativeConfigRenderer {
    async fn render(
        &self,
        refs: &[String],
        registry: &dyn RegistryClient,
        cancel: &CancellationToken,
    ) -> Result<Catalog> {
        let mut catalog = Catalog::default();
        for reference in refs {
            let configs_dir = registry.unpack(reference, cancel).await?.configs_dir;

            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let dir = configs_dir.clone();
            let bundles = tokio::task::spawn_blocking(move || load_bundles(&dir))
                .await
                .map_err(|e| Error::render_failed(&configs_dir, e.to_string()))??;

            info!(reference = %reference, bundles = bundles.len(), "Rendered catalog");
            catalog.bundles.extend(bundles);
        }
        Ok(catalog)
    }
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Json,
    Yaml,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

/// Collect every bundle object under `dir`, in file-name order.
pub fn load_bundles(dir: &Path) -> Result<Vec<Bundle>> {
    if !dir.is_dir() {
        return Err(Error::ConfigsNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut bundles = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|e| Error::render_failed(dir, e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let format = match entry.path().extension().and_then(OsStr::to_str) {
            Some("json") => Format::Json,
            Some("yaml" | "yml") => Format::Yaml,
            _ => continue,
        };

        let path = entry.path();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::render_failed(path, e.to_string()))?;
        let documents =
            decode_documents(&content, format).map_err(|reason| Error::render_failed(path, reason))?;

        for document in documents {
            if document.get("schema").and_then(Value::as_str) != Some(SCHEMA_BUNDLE) {
                continue;
            }
            let bundle: Bundle = serde_json::from_value(document)
                .map_err(|e| Error::render_failed(path, e.to_string()))?;
            debug!(bundle = %bundle.name, package = %bundle.package, "Found bundle");
            bundles.push(bundle);
        }
    }
    Ok(bundles)
}

/// Split a file into its JSON values (a JSON stream, or a YAML document stream).
fn decode_documents(content: &str, format: Format) -> std::result::Result<Vec<Value>, String> {
    match format {
        Format::Json => serde_json::Deserializer::from_str(content)
            .into_iter::<Value>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| e.to_string()),
        Format::Yaml => serde_yaml::Deserializer::from_str(content)
            .map(|doc| Value::deserialize(doc).map_err(|e| e.to_string()))
            .filter(|doc| !matches!(doc, Ok(Value::Null)))
            .collect(),
    }
}
