//! Result files on local disk, keyed by random ids.
//!
//! Each successful request leaves `{id}_result.png` (the RGBA cut-out) and
//! `{id}_mask.png` (the grayscale mask) in the results directory until the
//! cleanup pass deletes them.

use crate::input::png_bytes;
use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, RgbaImage};
use image::Luma;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

const RESULT_SUFFIX: &str = "_result.png";
const MASK_SUFFIX: &str = "_mask.png";
const EDIT_STRIPES: usize = 16;

pub struct ResultStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles; ids hash onto one stripe each
    edit_locks: Vec<Mutex<()>>,
}

impl ResultStore {
    /// Open the store, creating the directory if needed
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create results directory {}", dir.display()))?;
        Ok(Self {
            dir,
            edit_locks: (0..EDIT_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Canonical form of `id`, or `None` when it is not a UUID
    ///
    /// Only canonical ids reach the filesystem, so a request can never name a
    /// path outside the results directory.
    pub fn canonical_id(id: &str) -> Option<String> {
        Uuid::parse_str(id.trim()).ok().map(|uuid| uuid.to_string())
    }

    pub fn result_path(&self, id: &str) -> Option<PathBuf> {
        Self::canonical_id(id).map(|id| self.dir.join(format!("{id}{RESULT_SUFFIX}")))
    }

    pub fn mask_path(&self, id: &str) -> Option<PathBuf> {
        Self::canonical_id(id).map(|id| self.dir.join(format!("{id}{MASK_SUFFIX}")))
    }

    /// Persist a cut-out and its mask under `id`, replacing earlier versions
    pub fn save(&self, id: &str, cutout: &RgbaImage, mask: &GrayImage) -> Result<()> {
        let result_png = png_bytes(&DynamicImage::ImageRgba8(cutout.clone()))?;
        let mask_png = png_bytes(&DynamicImage::ImageLuma8(mask.clone()))?;
        self.save_encoded(id, &result_png, &mask_png)
    }

    /// Same as [`ResultStore::save`] for images that are already PNG encoded
    pub fn save_encoded(&self, id: &str, result_png: &[u8], mask_png: &[u8]) -> Result<()> {
        let result_path = self.result_path(id).context("Invalid result id")?;
        let mask_path = self.mask_path(id).context("Invalid result id")?;

        write_atomic(&result_path, result_png)?;
        write_atomic(&mask_path, mask_png)?;

        tracing::debug!(id, dir = %self.dir.display(), "Stored result");
        Ok(())
    }

    /// Load a stored result and its mask, let `edit` change them, and store both
    ///
    /// Updates to the same id run one at a time, so concurrent edits never
    /// overwrite each other. When the mask file is missing or its size does not
    /// match, it is rebuilt from the cut-out's alpha channel. Returns the new
    /// result PNG with the edit's output, or `None` when nothing is stored.
    pub fn update<T>(
        &self,
        id: &str,
        edit: impl FnOnce(&mut RgbaImage, &mut GrayImage) -> Result<T>,
    ) -> Result<Option<(Vec<u8>, T)>> {
        let Some(canonical) = Self::canonical_id(id) else {
            return Ok(None);
        };
        let _guard = self.edit_lock(&canonical);

        let Some(mut result) = self.load_result(&canonical)? else {
            return Ok(None);
        };
        let mut mask = match self.load_mask(&canonical)? {
            Some(mask) if mask.dimensions() == result.dimensions() => mask,
            _ => alpha_channel(&result),
        };

        let output = edit(&mut result, &mut mask)?;

        let result_png = png_bytes(&DynamicImage::ImageRgba8(result))?;
        let mask_png = png_bytes(&DynamicImage::ImageLuma8(mask))?;
        self.save_encoded(&canonical, &result_png, &mask_png)?;
        Ok(Some((result_png, output)))
    }

    fn edit_lock(&self, canonical_id: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        canonical_id.hash(&mut hasher);
        let stripe = (hasher.finish() % self.edit_locks.len() as u64) as usize;
        // The guarded data is (), so a poisoned stripe carries no broken state
        self.edit_locks[stripe]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn read_result_png(&self, id: &str) -> Result<Option<Vec<u8>>> {
        match self.result_path(id) {
            Some(path) => read_optional(&path),
            None => Ok(None),
        }
    }

    pub fn read_mask_png(&self, id: &str) -> Result<Option<Vec<u8>>> {
        match self.mask_path(id) {
            Some(path) => read_optional(&path),
            None => Ok(None),
        }
    }

    pub fn load_result(&self, id: &str) -> Result<Option<RgbaImage>> {
        self.read_result_png(id)?
            .map(|png| {
                image::load_from_memory(&png)
                    .map(|image| image.to_rgba8())
                    .context("Stored result is not a readable PNG")
            })
            .transpose()
    }

    pub fn load_mask(&self, id: &str) -> Result<Option<GrayImage>> {
        self.read_mask_png(id)?
            .map(|png| {
                image::load_from_memory(&png)
                    .map(|image| image.to_luma8())
                    .context("Stored mask is not a readable PNG")
            })
            .transpose()
    }

    /// Delete stored files at least `max_age` old; returns how many were removed
    pub fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.ends_with(RESULT_SUFFIX) || name.ends_with(MASK_SUFFIX)) {
                continue;
            }

            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or(Duration::ZERO);
            if age < max_age {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove expired file")
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Removed expired results");
        }
        Ok(removed)
    }
}

fn alpha_channel(image: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| Luma([image.get_pixel(x, y)[3]]))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Write through a temporary sibling so readers never observe a partial file
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("png.tmp");
    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to move result into {}", path.display()))
}
