//! Path-keyed image loading and saving.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::image::Image;
use crate::pkim::{self, CodecWriteFlags};

/// Image and file access used by the environment map and the shader
/// compiler.
pub trait ResourceManager {
    /// Decodes the image at `path`.
    fn load_image(&self, path: &Path) -> Result<Image>;

    /// Encodes `image` at `path`. Only `.pkim` is writable.
    fn save_image(&self, path: &Path, image: &Image, flags: CodecWriteFlags) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;

    fn delete(&self, path: &Path) -> Result<()>;
}

/// [`ResourceManager`] over the local file system. Relative paths resolve
/// against `root`.
#[derive(Debug, Clone)]
pub struct DiskResourceManager {
    root: PathBuf,
}

impl DiskResourceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

fn is_pkim(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pkim"))
}

impl ResourceManager for DiskResourceManager {
    fn load_image(&self, path: &Path) -> Result<Image> {
        let full = self.resolve(path);
        if is_pkim(&full) {
            let bytes = std::fs::read(&full)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", full.display()))?;
            return Ok(pkim::decode(&bytes)?);
        }
        let decoded = ::image::open(&full)
            .map_err(|e| anyhow::anyhow!("Failed to decode {}: {e}", full.display()))?;
        debug!("loaded {} ({}x{})", full.display(), decoded.width(), decoded.height());
        Ok(Image::from_dynamic(decoded))
    }

    fn save_image(&self, path: &Path, image: &Image, flags: CodecWriteFlags) -> Result<()> {
        let full = self.resolve(path);
        if !is_pkim(&full) {
            anyhow::bail!("No write codec for {}", full.display());
        }
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, pkim::encode(image, flags))
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", full.display()))
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let full = self.resolve(path);
        match std::fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Failed to delete {}: {e}", full.display())),
        }
    }
}
