use nalgebra::Vector3;

use super::SchemeVersion;
use crate::error::{Error, Result};
use crate::prng::RandomGenerator;

pub const META_TEXTURE_SIZE: usize = 256;

/// Second key of the external generator, fixed for every model.
pub const DOMAIN_CONSTANT: u64 = 2_352_940_687_395_663_367;

/// External source of meta data for generations whose stream is not the
/// built-in PRNG.
pub trait MetaGenerator {
    /// RGBA bytes of the 256x256 meta texture.
    fn generate_texture(&self, seed: i64, constant: u64) -> Result<Vec<u8>>;

    /// `len` lookup coordinates in `[0, 1)`.
    fn generate_buffer(&self, seed: i64, constant: u64, len: usize) -> Result<Vec<f32>>;
}

/// 256x256 table of RGB displacement factors.
#[derive(Debug, Clone)]
pub struct MetaTexture {
    texels: Vec<[u8; 3]>,
}

impl MetaTexture {
    /// Three PRNG draws per texel, row-major.
    pub fn from_generator(generator: &mut RandomGenerator) -> Self {
        let texels = (0..META_TEXTURE_SIZE * META_TEXTURE_SIZE)
            .map(|_| {
                [
                    generator.next_in_range(256) as u8,
                    generator.next_in_range(256) as u8,
                    generator.next_in_range(256) as u8,
                ]
            })
            .collect();
        Self { texels }
    }

    /// Drops the alpha channel of an externally generated RGBA buffer.
    pub fn from_rgba(rgba: &[u8]) -> Result<Self> {
        let expected = META_TEXTURE_SIZE * META_TEXTURE_SIZE * 4;
        if rgba.len() != expected {
            return Err(Error::Document(format!(
                "meta texture has {} bytes, expected {expected}",
                rgba.len()
            )));
        }
        let texels = rgba
            .chunks_exact(4)
            .map(|texel| [texel[0], texel[1], texel[2]])
            .collect();
        Ok(Self { texels })
    }

    /// Texel at `(u, v)`, each channel normalized by 255.
    pub fn sample(&self, u: usize, v: usize) -> Vector3<f64> {
        let u = u.min(META_TEXTURE_SIZE - 1);
        let v = v.min(META_TEXTURE_SIZE - 1);
        let [r, g, b] = self.texels[v * META_TEXTURE_SIZE + u];
        Vector3::new(f64::from(r), f64::from(g), f64::from(b)) / 255.0
    }

    /// Raw texel bytes, for debug dumps.
    pub fn texels(&self) -> &[[u8; 3]] {
        &self.texels
    }
}

/// Builds the meta texture for one document.
pub(crate) fn build_meta_texture(
    seed: i64,
    version: SchemeVersion,
    timestamp: &str,
    generator: Option<&dyn MetaGenerator>,
) -> Result<MetaTexture> {
    if version.uses_external_generator() {
        let generator = require(generator, version)?;
        return MetaTexture::from_rgba(&generator.generate_texture(seed, DOMAIN_CONSTANT)?);
    }
    Ok(MetaTexture::from_generator(&mut RandomGenerator::for_scheme(
        seed, timestamp,
    )))
}

/// `2 * vertex_count` lookup coordinates for one primitive. Every primitive
/// restarts the stream from the same seed.
pub(crate) fn primitive_lookups(
    seed: i64,
    version: SchemeVersion,
    timestamp: &str,
    generator: Option<&dyn MetaGenerator>,
    vertex_count: usize,
) -> Result<Vec<f32>> {
    let len = vertex_count
        .checked_mul(2)
        .ok_or_else(|| Error::Document(format!("{vertex_count} vertices is too many to look up")))?;
    if version.uses_external_generator() {
        let lookups = require(generator, version)?.generate_buffer(seed, DOMAIN_CONSTANT, len)?;
        if lookups.len() < len {
            return Err(Error::Document(format!(
                "meta generator returned {} lookups, expected {len}",
                lookups.len()
            )));
        }
        return Ok(lookups);
    }

    let mut generator = RandomGenerator::for_scheme(seed, timestamp);
    Ok((0..len)
        .map(|_| (generator.next_in_range(256) as f32 + 0.5) / 256.0)
        .collect())
}

/// Texel coordinate of one lookup value.
pub(crate) fn texel_coordinate(lookup: f32) -> usize {
    let scaled = (f64::from(lookup) * META_TEXTURE_SIZE as f64).floor();
    scaled.clamp(0.0, (META_TEXTURE_SIZE - 1) as f64) as usize
}

fn require(
    generator: Option<&dyn MetaGenerator>,
    version: SchemeVersion,
) -> Result<&dyn MetaGenerator> {
    generator.ok_or_else(|| Error::GeneratorUnavailable {
        version: version.to_string(),
    })
}
