use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use serde_json::Value;

use crate::deobfuscate::{META_TEXTURE_SIZE, MetaTexture};
use crate::error::Result;

/// Optional sink for intermediate artifacts: preserved extension blocks and
/// texture snapshots before and after normalization.
#[derive(Debug, Clone)]
pub struct DebugSink {
    dir: PathBuf,
}

impl DebugSink {
    /// Empties (or creates) `dir` so each run starts clean.
    pub fn prepare(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), "debug output enabled");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dump_extension(&self, name: &str, block: &Value) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.json", safe_filename(name)));
        fs::write(&path, serde_json::to_vec_pretty(block)?)?;
        Ok(path)
    }

    pub fn dump_texture(&self, name: &str, suffix: &str, bytes: &[u8], extension: &str) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{}.{suffix}.{extension}", safe_filename(name)));
        fs::write(&path, bytes)?;
        Ok(path)
    }

    pub fn dump_meta_texture(&self, texture: &MetaTexture) -> Result<PathBuf> {
        let size = META_TEXTURE_SIZE as u32;
        let raw = texture.texels().iter().flatten().copied().collect();
        let path = self.dir.join("meta_texture.png");
        if let Some(image) = RgbImage::from_raw(size, size, raw) {
            image.save(&path)?;
        }
        Ok(path)
    }
}

/// Replaces characters that are invalid in file names on common platforms
/// with `_xHH_`.
pub fn safe_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || ch < '\u{20}' {
            out.push_str(&format!("_x{:02x}_", ch as u32));
        } else {
            out.push(ch);
        }
    }
    out
}
