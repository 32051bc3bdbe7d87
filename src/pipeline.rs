use std::fs;
use std::path::{Path, PathBuf};

use crate::config::DeobOptions;
use crate::debug::DebugSink;
use crate::deobfuscate::{
    DeobfuscationStats, Deobfuscator, MetaGenerator, ObfuscationParameters, SchemeVersion,
};
use crate::document::Document;
use crate::envelope::decrypt_and_decode;
use crate::error::Result;
use crate::extensions::{ExtensionRegistry, PREVIEW_MESH_EXTENSION, TEXTURE_BASIS_EXTENSION};
use crate::fetch::{HubClient, ModelCache};
use crate::seed::{ModelId, compute_seed_map};
use crate::texture::{BuiltinTranscoder, TextureAction, TextureTranscoder, file_extension, normalize_texture};

/// Pluggable collaborators for one pipeline run.
#[derive(Clone, Copy)]
pub struct PipelineHooks<'a> {
    pub transcoder: &'a dyn TextureTranscoder,
    /// Needed only for models using the externally generated scheme.
    pub generator: Option<&'a dyn MetaGenerator>,
    pub debug: Option<&'a DebugSink>,
}

impl Default for PipelineHooks<'static> {
    fn default() -> Self {
        Self {
            transcoder: &BuiltinTranscoder,
            generator: None,
            debug: None,
        }
    }
}

#[derive(Debug, Clone)]
/// Summary of one deobfuscation run.
pub struct DeobfuscationReport {
    /// Model id the seed map was derived from.
    pub model_id: String,
    /// Scheme generation read from the preview-mesh block.
    pub version: SchemeVersion,
    /// Timestamp key used for the seed lookup.
    pub timestamp_key: String,
    pub seed: i64,
    pub stats: DeobfuscationStats,
    /// Textures retyped or re-encoded during normalization.
    pub normalized_textures: usize,
    /// Vendor blocks carried through the rebuild.
    pub preserved_extensions: Vec<String>,
    /// Final output location; `None` for in-memory runs.
    pub output_path: Option<PathBuf>,
}

/// Deobfuscates an already decrypted GLB.
///
/// `resolved_url` is the URL the encrypted model was served from; it
/// selects the seed derivation.
pub fn run_pipeline_on_bytes(
    model_id: &str,
    resolved_url: Option<&str>,
    glb: &[u8],
    hooks: PipelineHooks<'_>,
) -> Result<(Vec<u8>, DeobfuscationReport)> {
    let seeds = compute_seed_map(model_id, resolved_url)?;

    let mut registry = ExtensionRegistry::vroid();
    let mut document = Document::read(glb, &mut registry)?;

    let params = ObfuscationParameters::from_block(
        registry.preview_mesh().and_then(|preview| preview.data()),
    )?;
    registry.dispose(PREVIEW_MESH_EXTENSION);
    registry.dispose(TEXTURE_BASIS_EXTENSION);
    let seed = params.seed(&seeds)?;
    tracing::info!(
        version = %params.version,
        timestamp = %params.timestamp_key,
        seed,
        "obfuscation scheme selected"
    );

    if let Some(debug) = hooks.debug {
        for (name, block) in registry.preserved_blocks() {
            debug.dump_extension(name, block)?;
        }
    }

    let mut deobfuscator =
        Deobfuscator::new(seed, params.version, &params.timestamp_key, hooks.generator)?;
    if let Some(debug) = hooks.debug {
        debug.dump_meta_texture(deobfuscator.meta_texture())?;
    }
    let stats = deobfuscator.process_document(&mut document)?;

    let normalized_textures = normalize_textures(&mut document, hooks)?;

    let preserved_extensions = registry.names().into_iter().map(str::to_owned).collect();
    let bytes = document.write(&mut registry)?;

    Ok((
        bytes,
        DeobfuscationReport {
            model_id: model_id.to_string(),
            version: params.version,
            timestamp_key: params.timestamp_key,
            seed,
            stats,
            normalized_textures,
            preserved_extensions,
            output_path: None,
        },
    ))
}

fn normalize_textures(document: &mut Document, hooks: PipelineHooks<'_>) -> Result<usize> {
    let mut normalized = 0;
    for record in document.texture_records() {
        let name = record
            .name
            .clone()
            .unwrap_or_else(|| format!("image_{}", record.source_image_id));
        if let Some(debug) = hooks.debug {
            debug.dump_texture(
                &name,
                "original",
                &record.raw_bytes,
                file_extension(record.mime_type.as_deref()),
            )?;
        }

        let Some(texture) =
            normalize_texture(record.mime_type.as_deref(), &record.raw_bytes, hooks.transcoder)?
        else {
            continue;
        };
        match texture.action {
            TextureAction::Retyped => tracing::info!(
                texture = %name,
                from = ?record.mime_type,
                to = texture.mime_type,
                "retyped texture"
            ),
            TextureAction::Reencoded => tracing::info!(
                texture = %name,
                from = ?record.mime_type,
                "re-encoded texture as PNG"
            ),
        }
        if let Some(debug) = hooks.debug {
            debug.dump_texture(&name, "normalized", &texture.bytes, file_extension(Some(texture.mime_type)))?;
        }
        document.replace_image(record.source_image_id, texture.mime_type, texture.bytes)?;
        normalized += 1;
    }
    Ok(normalized)
}

/// Fetches (or loads from cache), decrypts, deobfuscates and writes
/// `{output_dir}/{id}.deob.vrm`.
pub fn deobfuscate_model(
    target: &str,
    options: &DeobOptions,
    generator: Option<&dyn MetaGenerator>,
) -> Result<DeobfuscationReport> {
    let id = ModelId::parse(target)?;
    let debug = options
        .debug_dir
        .as_ref()
        .map(DebugSink::prepare)
        .transpose()?;

    let cache = ModelCache::new(&options.cache_dir);
    let cached = if options.use_cache {
        cache.load(&id)?
    } else {
        None
    };
    let (glb, resolved_url) = match cached {
        Some(cached) => (cached.bytes, cached.entry.url),
        None => {
            let downloaded = HubClient::new(&options.hub)?.download(&id)?;
            let glb = decrypt_and_decode(&downloaded.bytes)?;
            tracing::info!(bytes = glb.len(), "model decrypted");
            if options.use_cache {
                cache.store(&id, &glb, &downloaded.resolved_url)?;
            }
            (glb, downloaded.resolved_url)
        }
    };

    let hooks = PipelineHooks {
        generator,
        debug: debug.as_ref(),
        ..PipelineHooks::default()
    };
    let (bytes, mut report) = run_pipeline_on_bytes(id.as_str(), Some(&resolved_url), &glb, hooks)?;

    let output_path = options.output_dir.join(format!("{id}.deob.vrm"));
    write_atomically(&output_path, &bytes)?;
    tracing::info!(path = %output_path.display(), bytes = bytes.len(), "wrote deobfuscated model");
    report.output_path = Some(output_path);
    Ok(report)
}

/// Writes to a sibling temporary file and renames it into place.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut temporary = path.as_os_str().to_owned();
    temporary.push(".partial");
    let temporary = PathBuf::from(temporary);

    if let Err(err) = fs::write(&temporary, bytes).and_then(|()| fs::rename(&temporary, path)) {
        let _ = fs::remove_file(&temporary);
        return Err(err.into());
    }
    Ok(())
}
