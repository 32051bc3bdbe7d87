//! Vendor extension preservation.
//!
//! The document model rebuilds its texture, sampler and buffer lists on
//! write and drops extension blocks it does not understand. Each vendor block
//! listed here captures its data on read and reattaches it on write,
//! reconciling texture indices by image source through a shared
//! [`TexturePool`].
//!
//! Hook phases, as driven by [`crate::document::Document`]:
//!
//! 1. `preread` for every active extension, on the raw JSON.
//! 2. The document finalizes its resource lists.
//! 3. `read` for every active extension.
//! 4. The document strips every claimed block.
//! 5. `prewrite` for every remaining extension, before the rebuild.
//! 6. The document rebuilds textures, samplers and buffers.
//! 7. `write` for every remaining extension.

mod pixiv;
mod texture_pool;
mod vrm;

use serde_json::{Map, Value};

use crate::error::Result;

pub use pixiv::{PREVIEW_MESH_EXTENSION, PreviewMeshExtension, TEXTURE_BASIS_EXTENSION, TextureBasisExtension};
pub use texture_pool::{TexturePool, TextureSnapshot, source_index_map, source_of};
pub use vrm::{
    EMISSIVE_MULTIPLIER_EXTENSION, EmissiveMultiplierExtension, MTOON_EXTENSION, MtoonExtension,
    NODE_CONSTRAINT_EXTENSION, NodeConstraintExtension, PASSTHROUGH_EXTENSIONS,
    PassthroughExtension, VRM_V0_EXTENSION, VRM_V1_EXTENSION, VrmV0Extension, VrmV1Extension,
};

/// State handed to every hook: the document JSON and the session texture
/// pool.
pub struct HookContext<'a> {
    pub json: &'a mut Value,
    pub textures: &'a mut TexturePool,
}

/// Lifecycle hooks shared by every vendor block.
pub trait ExtensionHooks: std::fmt::Debug {
    fn name(&self) -> &str;

    fn preread(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    fn prewrite(&mut self, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, ctx: &mut HookContext<'_>) -> Result<()>;

    /// Root-level block as it was (or will be) written, for diagnostics.
    fn preserved_block(&self) -> Option<&Value> {
        None
    }
}

/// Closed set of vendor blocks this tool knows how to carry through a
/// read/write cycle.
#[derive(Debug)]
pub enum VendorExtension {
    VrmV0(VrmV0Extension),
    VrmV1(VrmV1Extension),
    MaterialsMtoon(MtoonExtension),
    NodeConstraint(NodeConstraintExtension),
    EmissiveMultiplier(EmissiveMultiplierExtension),
    Passthrough(PassthroughExtension),
    PreviewMesh(PreviewMeshExtension),
    TextureBasis(TextureBasisExtension),
    /// Caller-supplied handler for a block outside the built-in set.
    Custom(Box<dyn ExtensionHooks>),
}

impl VendorExtension {
    fn hooks(&self) -> &dyn ExtensionHooks {
        match self {
            Self::VrmV0(ext) => ext,
            Self::VrmV1(ext) => ext,
            Self::MaterialsMtoon(ext) => ext,
            Self::NodeConstraint(ext) => ext,
            Self::EmissiveMultiplier(ext) => ext,
            Self::Passthrough(ext) => ext,
            Self::PreviewMesh(ext) => ext,
            Self::TextureBasis(ext) => ext,
            Self::Custom(ext) => ext.as_ref(),
        }
    }

    fn hooks_mut(&mut self) -> &mut dyn ExtensionHooks {
        match self {
            Self::VrmV0(ext) => ext,
            Self::VrmV1(ext) => ext,
            Self::MaterialsMtoon(ext) => ext,
            Self::NodeConstraint(ext) => ext,
            Self::EmissiveMultiplier(ext) => ext,
            Self::Passthrough(ext) => ext,
            Self::PreviewMesh(ext) => ext,
            Self::TextureBasis(ext) => ext,
            Self::Custom(ext) => ext.as_mut(),
        }
    }
}

impl ExtensionHooks for VendorExtension {
    fn name(&self) -> &str {
        self.hooks().name()
    }

    fn preread(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        self.hooks_mut().preread(ctx)
    }

    fn read(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        self.hooks_mut().read(ctx)
    }

    fn prewrite(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        self.hooks_mut().prewrite(ctx)
    }

    fn write(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        self.hooks_mut().write(ctx)
    }

    fn preserved_block(&self) -> Option<&Value> {
        self.hooks().preserved_block()
    }
}

/// Ordered set of registered vendor blocks plus the session texture pool.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    extensions: Vec<VendorExtension>,
    textures: TexturePool,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every block found in hub-distributed avatars. The basis fix-up is
    /// registered first so texture snapshots see corrected sources.
    pub fn vroid() -> Self {
        let mut registry = Self::new();
        registry.register(VendorExtension::TextureBasis(TextureBasisExtension::default()));
        registry.register(VendorExtension::VrmV0(VrmV0Extension::default()));
        registry.register(VendorExtension::VrmV1(VrmV1Extension::default()));
        registry.register(VendorExtension::MaterialsMtoon(MtoonExtension::default()));
        registry.register(VendorExtension::NodeConstraint(NodeConstraintExtension::default()));
        registry.register(VendorExtension::EmissiveMultiplier(
            EmissiveMultiplierExtension::default(),
        ));
        registry.register(VendorExtension::PreviewMesh(PreviewMeshExtension::default()));
        for name in PASSTHROUGH_EXTENSIONS {
            registry.register(VendorExtension::Passthrough(PassthroughExtension::new(name)));
        }
        registry
    }

    pub fn register(&mut self, extension: VendorExtension) {
        self.extensions.push(extension);
    }

    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(|ext| ext.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&VendorExtension> {
        self.extensions.iter().find(|ext| ext.name() == name)
    }

    pub fn preview_mesh(&self) -> Option<&PreviewMeshExtension> {
        self.extensions.iter().find_map(|ext| match ext {
            VendorExtension::PreviewMesh(preview) => Some(preview),
            _ => None,
        })
    }

    /// Removes a consumed block so it is not written back.
    pub fn dispose(&mut self, name: &str) -> Option<VendorExtension> {
        let position = self.extensions.iter().position(|ext| ext.name() == name)?;
        Some(self.extensions.remove(position))
    }

    /// Root blocks currently held for reattachment, in registration order.
    pub fn preserved_blocks(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.extensions
            .iter()
            .filter_map(|ext| ext.preserved_block().map(|block| (ext.name(), block)))
    }

    /// Keeps only extensions the document declares in `extensionsUsed`.
    pub(crate) fn retain_used(&mut self, json: &Value) {
        let used: Vec<&str> = json
            .get("extensionsUsed")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        self.extensions.retain(|ext| used.contains(&ext.name()));
    }

    pub(crate) fn run_preread(&mut self, json: &mut Value) -> Result<()> {
        self.run(json, |ext, ctx| ext.preread(ctx))
    }

    pub(crate) fn run_read(&mut self, json: &mut Value) -> Result<()> {
        self.run(json, |ext, ctx| ext.read(ctx))
    }

    pub(crate) fn run_prewrite(&mut self, json: &mut Value) -> Result<()> {
        self.run(json, |ext, ctx| ext.prewrite(ctx))
    }

    pub(crate) fn run_write(&mut self, json: &mut Value) -> Result<()> {
        self.run(json, |ext, ctx| ext.write(ctx))
    }

    fn run(
        &mut self,
        json: &mut Value,
        mut hook: impl FnMut(&mut VendorExtension, &mut HookContext<'_>) -> Result<()>,
    ) -> Result<()> {
        let mut ctx = HookContext {
            json,
            textures: &mut self.textures,
        };
        for extension in &mut self.extensions {
            hook(extension, &mut ctx)?;
        }
        Ok(())
    }
}

// ─── JSON helpers shared by the vendor blocks ─────────────────────────────────

pub(crate) fn root_block(json: &Value, name: &str) -> Option<Value> {
    json.get("extensions").and_then(|extensions| extensions.get(name)).cloned()
}

pub(crate) fn attach_root_block(json: &mut Value, name: &str, block: Value) {
    if let Some(extensions) = extensions_object(json) {
        extensions.insert(name.to_string(), block);
    }
}

/// Attaches `block` under `json[collection][index].extensions[name]`.
/// Returns `false` when the target element does not exist.
pub(crate) fn attach_element_block(
    json: &mut Value,
    collection: &str,
    index: usize,
    name: &str,
    block: Value,
) -> bool {
    let Some(element) = json
        .get_mut(collection)
        .and_then(Value::as_array_mut)
        .and_then(|items| items.get_mut(index))
    else {
        return false;
    };
    match extensions_object(element) {
        Some(extensions) => {
            extensions.insert(name.to_string(), block);
            true
        }
        None => false,
    }
}

/// Collects `(index, block)` for every element of `collection` carrying
/// `extensions[name]`.
pub(crate) fn element_blocks(json: &Value, collection: &str, name: &str) -> Vec<(usize, Value)> {
    json.get(collection)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| {
                    item.get("extensions")
                        .and_then(|extensions| extensions.get(name))
                        .map(|block| (index, block.clone()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extensions_object(value: &mut Value) -> Option<&mut Map<String, Value>> {
    value
        .as_object_mut()?
        .entry("extensions")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
}
