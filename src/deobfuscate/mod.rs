//! Vertex displacement reversal.
//!
//! Every obfuscated POSITION component was scaled (or, for legacy models,
//! shifted) by a factor sampled from a seeded 256x256 meta texture at a
//! seeded per-vertex coordinate. Both are regenerated here and the
//! displacement is inverted in place.

mod meta;
mod scheme;

use std::collections::HashSet;

use nalgebra::Vector3;

use crate::document::Document;
use crate::error::Result;

pub use meta::{DOMAIN_CONSTANT, META_TEXTURE_SIZE, MetaGenerator, MetaTexture};
pub use scheme::{ObfuscationParameters, SchemeVersion};

// ─── Processed values ─────────────────────────────────────────────────────────

/// Corrected component values seen so far, one set per axis.
///
/// Accessors shared between primitives must only be corrected once; a
/// vertex whose three components are all already known is treated as
/// corrected. This is keyed by value, so an untouched vertex whose
/// components coincide with corrected ones elsewhere is skipped too.
#[derive(Debug, Default)]
pub struct ProcessedValueSets {
    axes: [HashSet<u32>; 3],
}

impl ProcessedValueSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, value: &Vector3<f32>) -> bool {
        (0..3).all(|axis| self.axes[axis].contains(&value_key(value[axis])))
    }

    pub fn insert(&mut self, value: &Vector3<f32>) {
        for axis in 0..3 {
            self.axes[axis].insert(value_key(value[axis]));
        }
    }
}

/// Same-value-zero key: `+0.0` and `-0.0` collapse, NaNs collapse.
fn value_key(value: f32) -> u32 {
    if value == 0.0 {
        0
    } else if value.is_nan() {
        f32::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

// ─── Deobfuscator ─────────────────────────────────────────────────────────────

/// Counters reported after a document has been processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeobfuscationStats {
    pub primitives: usize,
    pub corrected_vertices: usize,
    pub skipped_vertices: usize,
}

/// Per-document displacement reversal state.
pub struct Deobfuscator<'g> {
    seed: i64,
    version: SchemeVersion,
    timestamp: String,
    generator: Option<&'g dyn MetaGenerator>,
    meta: MetaTexture,
    processed: ProcessedValueSets,
}

impl<'g> Deobfuscator<'g> {
    pub fn new(
        seed: i64,
        version: SchemeVersion,
        timestamp: &str,
        generator: Option<&'g dyn MetaGenerator>,
    ) -> Result<Self> {
        tracing::info!(%version, timestamp, "generating meta texture");
        let meta = meta::build_meta_texture(seed, version, timestamp, generator)?;
        Ok(Self {
            seed,
            version,
            timestamp: timestamp.to_string(),
            generator,
            meta,
            processed: ProcessedValueSets::new(),
        })
    }

    pub fn meta_texture(&self) -> &MetaTexture {
        &self.meta
    }

    /// Corrects every primitive's POSITION data in document order.
    pub fn process_document(&mut self, document: &mut Document) -> Result<DeobfuscationStats> {
        let mut stats = DeobfuscationStats::default();

        for primitive in document.primitives() {
            let Some(accessor) = primitive.position else {
                continue;
            };
            // Re-read per primitive: a shared accessor already holds
            // corrected values from an earlier primitive.
            let mut positions = document.read_positions(accessor)?;
            let lookups = meta::primitive_lookups(
                self.seed,
                self.version,
                &self.timestamp,
                self.generator,
                positions.len(),
            )?;

            let (corrected, skipped) = self.correct_positions(&mut positions, &lookups);
            document.write_positions(accessor, &positions)?;

            tracing::debug!(
                mesh = primitive.mesh,
                primitive = primitive.primitive,
                accessor,
                corrected,
                skipped,
                "processed vertex displacement"
            );
            stats.primitives += 1;
            stats.corrected_vertices += corrected;
            stats.skipped_vertices += skipped;
        }

        tracing::info!(
            primitives = stats.primitives,
            corrected = stats.corrected_vertices,
            skipped = stats.skipped_vertices,
            "vertex displacement reversed"
        );
        Ok(stats)
    }

    fn correct_positions(&mut self, positions: &mut [Vector3<f32>], lookups: &[f32]) -> (usize, usize) {
        let mut corrected = 0;
        let mut skipped = 0;
        for (vertex, position) in positions.iter_mut().enumerate() {
            if self.processed.contains(position) {
                skipped += 1;
                continue;
            }
            let u = meta::texel_coordinate(lookups[vertex * 2]);
            let v = meta::texel_coordinate(lookups[vertex * 2 + 1]);
            let factors = self.meta.sample(u, v);

            for axis in 0..3 {
                position[axis] = self.version.correct(position[axis], factors[axis]);
            }
            self.processed.insert(position);
            corrected += 1;
        }
        (corrected, skipped)
    }
}
