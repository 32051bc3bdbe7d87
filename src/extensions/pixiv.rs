use serde_json::Value;

use super::{ExtensionHooks, HookContext, root_block};
use crate::error::{Error, Result};

pub const PREVIEW_MESH_EXTENSION: &str = "PIXIV_vroid_hub_preview_mesh";
pub const TEXTURE_BASIS_EXTENSION: &str = "PIXIV_texture_basis";

// ─── Preview mesh parameters ──────────────────────────────────────────────────

/// Read-only carrier of the obfuscation parameters. Must be disposed before
/// the document is written.
#[derive(Debug, Default)]
pub struct PreviewMeshExtension {
    data: Option<Value>,
}

impl PreviewMeshExtension {
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Scheme generation key, as a string whatever its JSON type.
    pub fn timestamp(&self) -> Option<String> {
        self.field("timestamp")
    }

    pub fn version(&self) -> Option<String> {
        self.field("version")
    }

    fn field(&self, key: &str) -> Option<String> {
        match self.data.as_ref()?.get(key)? {
            Value::String(value) => Some(value.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl ExtensionHooks for PreviewMeshExtension {
    fn name(&self) -> &str {
        PREVIEW_MESH_EXTENSION
    }

    fn read(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        self.data = root_block(ctx.json, PREVIEW_MESH_EXTENSION);
        Ok(())
    }

    fn write(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        Err(Error::ProtocolMisuse {
            extension: PREVIEW_MESH_EXTENSION.to_string(),
        })
    }
}

// ─── Basis texture fix-up ─────────────────────────────────────────────────────

/// Moves the image source out of each texture's vendor basis block into
/// `texture.source`, so the image is reachable by ordinary lookups.
#[derive(Debug, Default)]
pub struct TextureBasisExtension {
    adopted: usize,
}

impl TextureBasisExtension {
    pub fn adopted(&self) -> usize {
        self.adopted
    }
}

impl ExtensionHooks for TextureBasisExtension {
    fn name(&self) -> &str {
        TEXTURE_BASIS_EXTENSION
    }

    fn preread(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        let Some(textures) = ctx.json.get_mut("textures").and_then(Value::as_array_mut) else {
            return Ok(());
        };
        for texture in textures {
            let Some(source) = texture
                .get("extensions")
                .and_then(|extensions| extensions.get(TEXTURE_BASIS_EXTENSION))
                .and_then(|block| block.get("source"))
                .and_then(Value::as_u64)
            else {
                continue;
            };
            if let Some(texture) = texture.as_object_mut() {
                texture.insert("source".to_string(), Value::from(source));
                self.adopted += 1;
            }
        }
        if self.adopted > 0 {
            tracing::debug!(textures = self.adopted, "adopted basis texture sources");
        }
        Ok(())
    }

    fn write(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        Err(Error::ProtocolMisuse {
            extension: TEXTURE_BASIS_EXTENSION.to_string(),
        })
    }
}
