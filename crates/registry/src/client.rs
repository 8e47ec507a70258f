//! Registry clients: pull a catalog image and unpack it to local disk.
//!
//! A client owns a private working directory. Callers hold it through
//! [`ScopedRegistry`], which destroys the client on every exit path.

use std::ffi::OsStr;
use std::io::{self, Cursor, Read};
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference, manifest};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Image label naming the directory that holds the declarative config.
pub const CONFIGS_DIR_LABEL: &str = "operators.operatorframework.io.index.configs.v1";

/// Declarative config location used when the image carries no label.
pub const DEFAULT_CONFIGS_DIR: &str = "/configs";

const IMAGE_LAYER_TAR_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";
const DOCKER_LAYER_TAR_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar";

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// An image unpacked onto local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedImage {
    /// The reference that was pulled.
    pub image: String,
    /// Root of the unpacked filesystem.
    pub root: PathBuf,
    /// Directory holding the declarative config, inside `root`.
    pub configs_dir: PathBuf,
}

/// Pulls and unpacks container images.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Pull `image` and unpack its layers.
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires before the pull finishes.
    async fn unpack(&self, image: &str, cancel: &CancellationToken) -> Result<UnpackedImage>;

    /// Release everything the client holds on disk. Idempotent.
    fn destroy(&mut self) -> Result<()>;
}

/// Creates a fresh registry client per use.
pub trait RegistryClientFactory: Send + Sync {
    /// Create a new client.
    fn new_client(&self) -> Result<Box<dyn RegistryClient>>;
}

/// A registry client that is destroyed when it goes out of scope.
///
/// [`ScopedRegistry::release`] destroys it explicitly and reports failure;
/// dropping it without releasing destroys it and logs failure.
pub struct ScopedRegistry {
    client: Box<dyn RegistryClient>,
    released: bool,
}

impl ScopedRegistry {
    /// Acquire a new client from `factory`.
    ///
    /// # Errors
    ///
    /// Propagates the factory's error.
    pub fn acquire(factory: &dyn RegistryClientFactory) -> Result<Self> {
        Ok(Self {
            client: factory.new_client()?,
            released: false,
        })
    }

    /// Destroy the client now.
    ///
    /// # Errors
    ///
    /// Returns the client's destroy error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.client.destroy()
    }
}

impl Deref for ScopedRegistry {
    type Target = dyn RegistryClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl Drop for ScopedRegistry {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.client.destroy() {
            warn!(error = %e, "Failed to destroy registry client");
        }
    }
}

/// Settings for [`OciRegistryClient`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Parent directory for per-client working directories.
    pub cache_dir: PathBuf,
    /// Registries reached over plain HTTP.
    pub insecure: Vec<String>,
    /// Image label naming the declarative config directory.
    pub configs_dir_label: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("catsrc"),
            insecure: Vec::new(),
            configs_dir_label: CONFIGS_DIR_LABEL.to_string(),
        }
    }
}

/// Factory for [`OciRegistryClient`].
#[derive(Debug, Clone, Default)]
pub struct OciClientFactory {
    config: RegistryConfig,
}

impl OciClientFactory {
    /// Create a factory.
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }
}

impl RegistryClientFactory for OciClientFactory {
    fn new_client(&self) -> Result<Box<dyn RegistryClient>> {
        Ok(Box::new(OciRegistryClient::new(&self.config)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Gzip,
    None,
}

struct PulledLayer {
    compression: Compression,
    data: Vec<u8>,
}

/// Anonymous OCI registry client backed by `oci-distribution`.
pub struct OciRegistryClient {
    client: Client,
    workdir: Option<TempDir>,
    configs_dir_label: String,
    unpacked: AtomicUsize,
}

impl OciRegistryClient {
    /// Create a client with a fresh working directory under `config.cache_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the working directory cannot be created.
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.cache_dir)?;
        let workdir = tempfile::Builder::new()
            .prefix("registry-")
            .tempdir_in(&config.cache_dir)?;

        let protocol = if config.insecure.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(config.insecure.clone())
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..ClientConfig::default()
        });

        debug!(workdir = %workdir.path().display(), "Created registry client");
        Ok(Self {
            client,
            workdir: Some(workdir),
            configs_dir_label: config.configs_dir_label.clone(),
            unpacked: AtomicUsize::new(0),
        })
    }

    async fn pull(&self, reference: &Reference, image: &str) -> Result<(String, Vec<PulledLayer>)> {
        let auth = RegistryAuth::Anonymous;
        let (manifest, digest, config) = self
            .client
            .pull_manifest_and_config(reference, &auth)
            .await
            .map_err(|e| Error::pull_failed(image, e.to_string()))?;
        debug!(image, digest = %digest, layers = manifest.layers.len(), "Pulled manifest");

        let configs_dir = configs_dir_label(&config, &self.configs_dir_label)
            .unwrap_or_else(|| DEFAULT_CONFIGS_DIR.to_string());

        let mut layers = Vec::new();
        for layer in &manifest.layers {
            let compression = match layer.media_type.as_str() {
                manifest::IMAGE_LAYER_GZIP_MEDIA_TYPE | manifest::IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE => {
                    Compression::Gzip
                }
                IMAGE_LAYER_TAR_MEDIA_TYPE | DOCKER_LAYER_TAR_MEDIA_TYPE => Compression::None,
                other => {
                    warn!(image, media_type = other, "Skipping layer with unsupported media type");
                    continue;
                }
            };

            let mut data = Vec::new();
            self.client
                .pull_blob(reference, layer, &mut data)
                .await
                .map_err(|e| Error::pull_failed(image, e.to_string()))?;
            debug!(image, digest = %layer.digest, bytes = data.len(), "Pulled layer");
            layers.push(PulledLayer { compression, data });
        }

        if layers.is_empty() {
            return Err(Error::NoLayers {
                image: image.to_string(),
            });
        }
        Ok((configs_dir, layers))
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    async fn unpack(&self, image: &str, cancel: &CancellationToken) -> Result<UnpackedImage> {
        let workdir = self.workdir.as_ref().ok_or(Error::Destroyed)?;
        let reference = Reference::try_from(image.to_string()).map_err(|e| Error::InvalidReference {
            image: image.to_string(),
            reason: e.to_string(),
        })?;

        let index = self.unpacked.fetch_add(1, Ordering::Relaxed);
        let root = workdir.path().join(format!("image-{index}"));

        info!(image, "Pulling catalog image");
        let (configs_dir, layers) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            pulled = self.pull(&reference, image) => pulled?,
        };

        let dest = root.clone();
        let owned = image.to_string();
        tokio::task::spawn_blocking(move || extract_layers(&owned, &dest, layers))
            .await
            .map_err(|e| Error::unpack_failed(image, &root, e.to_string()))??;

        let configs_dir = root.join(configs_dir.trim_start_matches('/'));
        debug!(image, configs_dir = %configs_dir.display(), "Unpacked catalog image");
        Ok(UnpackedImage {
            image: image.to_string(),
            root,
            configs_dir,
        })
    }

    fn destroy(&mut self) -> Result<()> {
        if let Some(workdir) = self.workdir.take() {
            let path = workdir.path().to_path_buf();
            workdir.close()?;
            debug!(workdir = %path.display(), "Destroyed registry client");
        }
        Ok(())
    }
}

/// Read the configs directory label out of an image config blob.
fn configs_dir_label(config: &str, label: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(config).ok()?;
    value
        .pointer("/config/Labels")
        .and_then(|labels| labels.get(label))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

/// Apply layers in order onto `dest`.
fn extract_layers(image: &str, dest: &Path, layers: Vec<PulledLayer>) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for layer in &layers {
        apply_layer(layer, dest).map_err(|e| Error::unpack_failed(image, dest, e.to_string()))?;
    }
    Ok(())
}

fn layer_archive(layer: &PulledLayer) -> tar::Archive<Box<dyn Read + '_>> {
    let reader = Cursor::new(layer.data.as_slice());
    match layer.compression {
        Compression::Gzip => tar::Archive::new(Box::new(GzDecoder::new(reader))),
        Compression::None => tar::Archive::new(Box::new(reader)),
    }
}

/// Apply one layer: its whiteouts first, against the layers below it, then
/// every other entry. Whiteout markers are never written to disk.
fn apply_layer(layer: &PulledLayer, dest: &Path) -> io::Result<()> {
    let mut archive = layer_archive(layer);
    for entry in archive.entries()? {
        let entry = entry?;
        if let Some(whiteout) = Whiteout::parse(&entry.path()?) {
            whiteout.apply(dest)?;
        }
    }

    let mut archive = layer_archive(layer);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if is_whiteout(&entry.path()?) {
            continue;
        }
        entry.unpack_in(dest)?;
    }
    Ok(())
}

fn is_whiteout(path: &Path) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| name.starts_with(WHITEOUT_PREFIX))
}

/// A deletion recorded by an upper layer.
#[derive(Debug, PartialEq, Eq)]
enum Whiteout {
    /// Remove one path.
    Path(PathBuf),
    /// Remove everything lower layers put in a directory.
    Opaque(PathBuf),
}

impl Whiteout {
    fn parse(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let parent = contained(path.parent()?)?;
        if name == OPAQUE_WHITEOUT {
            Some(Self::Opaque(parent))
        } else {
            let target = name.strip_prefix(WHITEOUT_PREFIX)?;
            (!target.is_empty()).then(|| Self::Path(parent.join(target)))
        }
    }

    fn apply(&self, dest: &Path) -> io::Result<()> {
        match self {
            Self::Path(path) => {
                let target = dest.join(path);
                if target.parent().is_some_and(|dir| inside(dest, dir)) {
                    remove(&target)?;
                }
            }
            Self::Opaque(dir) => {
                let dir = dest.join(dir);
                if dir.is_dir() && inside(dest, &dir) {
                    for child in std::fs::read_dir(&dir)? {
                        remove(&child?.path())?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Relative form of an archive path, or `None` if it climbs out of the root.
fn contained(path: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    Some(relative)
}

/// Whether `dir` resolves to a location under `dest` (symlinks followed).
fn inside(dest: &Path, dir: &Path) -> bool {
    match (dest.canonicalize(), dir.canonicalize()) {
        (Ok(dest), Ok(dir)) => dir.starts_with(dest),
        _ => false,
    }
}

/// Remove a file, symlink or directory tree; a missing path is not an error.
fn remove(path: &Path) -> io::Result<()> {
    let removed = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match removed {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
