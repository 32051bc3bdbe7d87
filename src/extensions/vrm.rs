use std::collections::BTreeMap;

use serde_json::Value;

use super::{
    ExtensionHooks, HookContext, attach_element_block, attach_root_block, element_blocks,
    root_block, source_index_map, source_of,
};
use crate::error::{Error, Result};

pub const VRM_V0_EXTENSION: &str = "VRM";
pub const VRM_V1_EXTENSION: &str = "VRMC_vrm";
pub const MTOON_EXTENSION: &str = "VRMC_materials_mtoon";
pub const NODE_CONSTRAINT_EXTENSION: &str = "VRMC_node_constraint";
pub const EMISSIVE_MULTIPLIER_EXTENSION: &str = "VRMC_materials_hdr_emissiveMultiplier";

/// VRM 1.0 sub-extensions whose root blocks are carried over verbatim.
pub const PASSTHROUGH_EXTENSIONS: [&str; 4] = [
    "VRMC_springBone",
    "VRMC_springBone_limit",
    "VRMC_springBone_extended_collider",
    "VRMC_vrm_animation",
];

/// Read-time image source of one texture slot inside a preserved block.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TextureSlotSource {
    material: usize,
    slot: String,
    source: Option<u64>,
}

fn resolve_source(json: &Value, texture_index: u64, owner: &str) -> Result<Option<u64>> {
    source_of(json, texture_index).ok_or_else(|| {
        Error::Document(format!(
            "{owner} references texture {texture_index}, which does not exist"
        ))
    })
}

// ─── VRM 0.x ──────────────────────────────────────────────────────────────────

/// VRM 0.x root block. Material texture properties are plain texture
/// indices and are remapped by image source on write.
#[derive(Debug, Default)]
pub struct VrmV0Extension {
    data: Option<Value>,
    texture_sources: Vec<TextureSlotSource>,
}

impl ExtensionHooks for VrmV0Extension {
    fn name(&self) -> &str {
        VRM_V0_EXTENSION
    }

    fn read(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        self.data = root_block(ctx.json, VRM_V0_EXTENSION);
        ctx.textures.snapshot(ctx.json);
        self.texture_sources.clear();

        let Some(materials) = self
            .data
            .as_ref()
            .and_then(|data| data.get("materialProperties"))
            .and_then(Value::as_array)
        else {
            return Ok(());
        };

        for (material, properties) in materials.iter().enumerate() {
            let Some(slots) = properties.get("textureProperties").and_then(Value::as_object) else {
                continue;
            };
            for (slot, index) in slots {
                let Some(index) = index.as_u64() else {
                    continue;
                };
                let source = resolve_source(ctx.json, index, "VRM materialProperties")?;
                self.texture_sources.push(TextureSlotSource {
                    material,
                    slot: slot.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    fn write(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        ctx.textures.reapply(ctx.json);

        let Some(mut data) = self.data.take() else {
            return Ok(());
        };
        let source_to_index = source_index_map(ctx.json);
        for slot in self.texture_sources.drain(..) {
            let Some(slots) = data
                .get_mut("materialProperties")
                .and_then(|materials| materials.get_mut(slot.material))
                .and_then(|material| material.get_mut("textureProperties"))
                .and_then(Value::as_object_mut)
            else {
                continue;
            };
            match source_to_index.get(&slot.source) {
                Some(&index) => {
                    slots.insert(slot.slot, Value::from(index as u64));
                }
                None => {
                    slots.remove(&slot.slot);
                }
            }
        }

        attach_root_block(ctx.json, VRM_V0_EXTENSION, data.clone());
        self.data = Some(data);
        Ok(())
    }

    fn preserved_block(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

// ─── VRM 1.0 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct VrmV1Extension {
    data: Option<Value>,
}

impl ExtensionHooks for VrmV1Extension {
    fn name(&self) -> &str {
        VRM_V1_EXTENSION
    }

    fn read(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        self.data = root_block(ctx.json, VRM_V1_EXTENSION);
        ctx.textures.snapshot(ctx.json);
        Ok(())
    }

    fn write(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        if let Some(data) = &self.data {
            attach_root_block(ctx.json, VRM_V1_EXTENSION, data.clone());
        }
        ctx.textures.reapply(ctx.json);
        Ok(())
    }

    fn preserved_block(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

// ─── Material blocks ──────────────────────────────────────────────────────────

/// Per-material MToon blocks. Every `*Texture` member holds a texture info
/// whose `index` is remapped by image source on write.
#[derive(Debug, Default)]
pub struct MtoonExtension {
    materials: BTreeMap<usize, Value>,
    texture_sources: Vec<TextureSlotSource>,
}

impl ExtensionHooks for MtoonExtension {
    fn name(&self) -> &str {
        MTOON_EXTENSION
    }

    fn preread(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        ctx.textures.snapshot(ctx.json);
        self.materials.clear();
        self.texture_sources.clear();

        for (material, block) in element_blocks(ctx.json, "materials", MTOON_EXTENSION) {
            if let Some(members) = block.as_object() {
                for (slot, info) in members {
                    if !slot.ends_with("Texture") {
                        continue;
                    }
                    let Some(index) = info.get("index").and_then(Value::as_u64) else {
                        continue;
                    };
                    let source = resolve_source(ctx.json, index, MTOON_EXTENSION)?;
                    self.texture_sources.push(TextureSlotSource {
                        material,
                        slot: slot.clone(),
                        source,
                    });
                }
            }
            self.materials.insert(material, block);
        }
        Ok(())
    }

    fn write(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        ctx.textures.reapply(ctx.json);
        let source_to_index = source_index_map(ctx.json);

        for slot in self.texture_sources.drain(..) {
            let Some(info) = self
                .materials
                .get_mut(&slot.material)
                .and_then(|block| block.get_mut(&slot.slot))
                .and_then(Value::as_object_mut)
            else {
                continue;
            };
            match source_to_index.get(&slot.source) {
                Some(&index) => {
                    info.insert("index".to_string(), Value::from(index as u64));
                }
                None => {
                    info.remove("index");
                }
            }
        }

        for (material, block) in &self.materials {
            attach_element_block(ctx.json, "materials", *material, MTOON_EXTENSION, block.clone());
        }
        Ok(())
    }
}

/// Per-material HDR emissive multiplier; no texture references.
#[derive(Debug, Default)]
pub struct EmissiveMultiplierExtension {
    materials: BTreeMap<usize, Value>,
}

impl ExtensionHooks for EmissiveMultiplierExtension {
    fn name(&self) -> &str {
        EMISSIVE_MULTIPLIER_EXTENSION
    }

    fn preread(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        ctx.textures.snapshot(ctx.json);
        self.materials = element_blocks(ctx.json, "materials", EMISSIVE_MULTIPLIER_EXTENSION)
            .into_iter()
            .collect();
        Ok(())
    }

    fn write(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        ctx.textures.reapply(ctx.json);
        for (material, block) in &self.materials {
            attach_element_block(
                ctx.json,
                "materials",
                *material,
                EMISSIVE_MULTIPLIER_EXTENSION,
                block.clone(),
            );
        }
        Ok(())
    }
}

// ─── Node blocks ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct NodeConstraintExtension {
    data: Option<Value>,
    nodes: BTreeMap<usize, Value>,
}

impl ExtensionHooks for NodeConstraintExtension {
    fn name(&self) -> &str {
        NODE_CONSTRAINT_EXTENSION
    }

    fn read(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        self.data = root_block(ctx.json, NODE_CONSTRAINT_EXTENSION);
        Ok(())
    }

    fn preread(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        self.nodes = element_blocks(ctx.json, "nodes", NODE_CONSTRAINT_EXTENSION)
            .into_iter()
            .collect();
        Ok(())
    }

    fn write(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        if let Some(data) = &self.data {
            attach_root_block(ctx.json, NODE_CONSTRAINT_EXTENSION, data.clone());
        }
        for (node, block) in &self.nodes {
            attach_element_block(ctx.json, "nodes", *node, NODE_CONSTRAINT_EXTENSION, block.clone());
        }
        Ok(())
    }

    fn preserved_block(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

// ─── Verbatim root blocks ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct PassthroughExtension {
    name: &'static str,
    data: Option<Value>,
}

impl PassthroughExtension {
    pub fn new(name: &'static str) -> Self {
        Self { name, data: None }
    }
}

impl ExtensionHooks for PassthroughExtension {
    fn name(&self) -> &str {
        self.name
    }

    fn read(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        self.data = root_block(ctx.json, self.name);
        Ok(())
    }

    fn write(&mut self, ctx: &mut HookContext<'_>) -> Result<()> {
        if let Some(data) = &self.data {
            attach_root_block(ctx.json, self.name, data.clone());
        }
        Ok(())
    }

    fn preserved_block(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}
