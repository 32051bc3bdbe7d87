mod ktx2;

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::error::{Error, Result};

pub const MIME_PNG: &str = "image/png";
pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_KTX2: &str = "image/ktx2";
pub const MIME_BASIS: &str = "image/basis";

const MAGIC_PNG: u32 = 0x8950_4e47;
const MAGIC_JPEG: [u32; 4] = [0xffd8_ffdb, 0xffd8_ffe0, 0xffd8_ffee, 0xffd8_ffe1];
const MAGIC_RIFF: u32 = 0x5249_4646;

/// Decoder seam for GPU texture containers.
pub trait TextureTranscoder {
    fn transcode_ktx2(&self, bytes: &[u8]) -> Result<RgbaImage>;

    fn transcode_basis(&self, bytes: &[u8]) -> Result<RgbaImage>;
}

/// KTX2 levels stored as raw RGBA8 or BC1/BC3/BC7 blocks, optionally zstd
/// supercompressed. Basis Universal payloads are not supported.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTranscoder;

impl TextureTranscoder for BuiltinTranscoder {
    fn transcode_ktx2(&self, bytes: &[u8]) -> Result<RgbaImage> {
        ktx2::decode_base_level(bytes)
    }

    fn transcode_basis(&self, _bytes: &[u8]) -> Result<RgbaImage> {
        Err(Error::Transcode(
            "Basis Universal payloads require an external transcoder".to_string(),
        ))
    }
}

/// What normalization did to one texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureAction {
    /// Declared type was wrong; bytes are kept, only the MIME type changes.
    Retyped,
    /// Decoded and re-encoded as PNG.
    Reencoded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTexture {
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
    pub action: TextureAction,
}

/// Brings one embedded texture to a format ordinary glTF viewers read.
///
/// Returns `None` when the texture is already fine as declared.
pub fn normalize_texture(
    mime_type: Option<&str>,
    bytes: &[u8],
    transcoder: &dyn TextureTranscoder,
) -> Result<Option<NormalizedTexture>> {
    let magic = leading_magic(bytes);
    match mime_type {
        Some(MIME_KTX2) => {
            let image = transcoder.transcode_ktx2(bytes)?;
            Ok(Some(reencoded(image)?))
        }
        Some(MIME_BASIS) => match magic {
            Some(MAGIC_PNG) => Ok(Some(retyped(MIME_PNG, bytes))),
            Some(magic) if MAGIC_JPEG.contains(&magic) => Ok(Some(retyped(MIME_JPEG, bytes))),
            _ => {
                let image = transcoder.transcode_basis(bytes)?;
                Ok(Some(reencoded(image)?))
            }
        },
        Some(MIME_PNG) if magic == Some(MAGIC_RIFF) => {
            let image = image::load_from_memory_with_format(bytes, ImageFormat::WebP)?;
            Ok(Some(reencoded(image.to_rgba8())?))
        }
        _ => Ok(None),
    }
}

/// First four bytes as a big-endian word.
fn leading_magic(bytes: &[u8]) -> Option<u32> {
    bytes.first_chunk::<4>().copied().map(u32::from_be_bytes)
}

fn retyped(mime_type: &'static str, bytes: &[u8]) -> NormalizedTexture {
    NormalizedTexture {
        mime_type,
        bytes: bytes.to_vec(),
        action: TextureAction::Retyped,
    }
}

fn reencoded(image: RgbaImage) -> Result<NormalizedTexture> {
    Ok(NormalizedTexture {
        mime_type: MIME_PNG,
        bytes: encode_png(image)?,
        action: TextureAction::Reencoded,
    })
}

pub fn encode_png(image: RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

/// File extension used when dumping a texture of this MIME type.
pub fn file_extension(mime_type: Option<&str>) -> &'static str {
    match mime_type {
        Some(MIME_PNG) => "png",
        Some(MIME_JPEG) => "jpg",
        Some(MIME_KTX2) => "ktx2",
        Some(MIME_BASIS) => "basis",
        Some("image/webp") => "webp",
        _ => "bin",
    }
}
