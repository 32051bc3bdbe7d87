use image::RgbaImage;

use crate::error::{Error, Result};

const IDENTIFIER: [u8; 12] = [
    0xab, 0x4b, 0x54, 0x58, 0x20, 0x32, 0x30, 0xbb, 0x0d, 0x0a, 0x1a, 0x0a,
];
const LEVEL_INDEX_OFFSET: usize = 80;

/// Largest width or height decoded; bigger levels are rejected.
const MAX_DIMENSION: u32 = 16384;

const SUPERCOMPRESSION_NONE: u32 = 0;
const SUPERCOMPRESSION_ZSTD: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockFormat {
    Rgba8,
    Bc1,
    Bc3,
    Bc7,
}

impl BlockFormat {
    fn from_vk_format(vk_format: u32) -> Option<Self> {
        match vk_format {
            37 | 43 => Some(Self::Rgba8),
            131..=134 => Some(Self::Bc1),
            137 | 138 => Some(Self::Bc3),
            145 | 146 => Some(Self::Bc7),
            _ => None,
        }
    }

    /// Byte size of a `width`×`height` level in this format.
    fn level_size(self, width: u32, height: u32) -> Option<usize> {
        let (block_width, block_height, block_bytes) = match self {
            Self::Rgba8 => (width as usize, height as usize, 4),
            Self::Bc1 => (width.div_ceil(4) as usize, height.div_ceil(4) as usize, 8),
            Self::Bc3 | Self::Bc7 => (width.div_ceil(4) as usize, height.div_ceil(4) as usize, 16),
        };
        block_width.checked_mul(block_height)?.checked_mul(block_bytes)
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|slice| slice.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| Error::Transcode("KTX2 header is truncated".to_string()))
}

fn read_u64(bytes: &[u8], offset: usize) -> Result<usize> {
    bytes
        .get(offset..offset + 8)
        .and_then(|slice| slice.try_into().ok())
        .map(u64::from_le_bytes)
        .map(|value| value as usize)
        .ok_or_else(|| Error::Transcode("KTX2 level index is truncated".to_string()))
}

/// Decodes mip level 0 of a 2D KTX2 texture to RGBA8.
pub(super) fn decode_base_level(bytes: &[u8]) -> Result<RgbaImage> {
    if bytes.get(..IDENTIFIER.len()) != Some(&IDENTIFIER[..]) {
        return Err(Error::Transcode("missing KTX2 identifier".to_string()));
    }

    let vk_format = read_u32(bytes, 12)?;
    let width = read_u32(bytes, 20)?;
    let height = read_u32(bytes, 24)?.max(1);
    let supercompression = read_u32(bytes, 44)?;

    let format = BlockFormat::from_vk_format(vk_format).ok_or_else(|| {
        Error::Transcode(format!(
            "unsupported KTX2 vkFormat {vk_format} (Basis Universal needs an external transcoder)"
        ))
    })?;

    if width == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(Error::Transcode(format!(
            "KTX2 level size {width}x{height} is outside 1..={MAX_DIMENSION}"
        )));
    }
    let expected_length = format
        .level_size(width, height)
        .ok_or_else(|| Error::Transcode("KTX2 level size overflows".to_string()))?;

    let level_offset = read_u64(bytes, LEVEL_INDEX_OFFSET)?;
    let level_length = read_u64(bytes, LEVEL_INDEX_OFFSET + 8)?;
    let uncompressed_length = read_u64(bytes, LEVEL_INDEX_OFFSET + 16)?;
    let level = level_offset
        .checked_add(level_length)
        .and_then(|end| bytes.get(level_offset..end))
        .ok_or_else(|| Error::Transcode("KTX2 level 0 overruns the file".to_string()))?;

    let level = match supercompression {
        SUPERCOMPRESSION_NONE => level.to_vec(),
        SUPERCOMPRESSION_ZSTD => {
            if uncompressed_length != expected_length {
                return Err(Error::Transcode(format!(
                    "KTX2 level declares {uncompressed_length} bytes, {format:?} {width}x{height} needs {expected_length}"
                )));
            }
            zstd::bulk::decompress(level, expected_length)
                .map_err(|err| Error::Transcode(format!("KTX2 zstd level: {err}")))?
        }
        other => {
            return Err(Error::Transcode(format!(
                "unsupported KTX2 supercompression scheme {other}"
            )));
        }
    };

    tracing::debug!(vk_format, width, height, ?format, "decoding KTX2 base level");
    decode_blocks(format, &level, width, height)
}

fn decode_blocks(format: BlockFormat, data: &[u8], width: u32, height: u32) -> Result<RgbaImage> {
    let decode = match format {
        BlockFormat::Rgba8 => {
            return RgbaImage::from_raw(width, height, data.to_vec())
                .ok_or_else(|| Error::Transcode("KTX2 RGBA8 level is too short".to_string()));
        }
        BlockFormat::Bc1 => texture2ddecoder::decode_bc1,
        BlockFormat::Bc3 => texture2ddecoder::decode_bc3,
        BlockFormat::Bc7 => texture2ddecoder::decode_bc7,
    };
    let mut pixels = vec![0u32; width as usize * height as usize];
    decode(data, width as usize, height as usize, &mut pixels)
        .map_err(|err| Error::Transcode(format!("{format:?} block decode: {err}")))?;

    // Decoded pixels are packed as 0xAARRGGBB.
    let rgba = pixels
        .iter()
        .flat_map(|pixel| {
            let [b, g, r, a] = pixel.to_le_bytes();
            [r, g, b, a]
        })
        .collect();
    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| Error::Transcode("decoded KTX2 level has the wrong size".to_string()))
}
