//! In-memory GLB document: the JSON chunk plus one byte segment per buffer
//! view. Reading drives the extension hook phases; writing rebuilds textures,
//! samplers and buffer views before the write hooks run.

mod accessor;
mod rebuild;

use std::borrow::Cow;

use gltf::binary::{Glb, Header};
use nalgebra::Vector3;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::extensions::ExtensionRegistry;

/// Standard basis texture extension; its source is adopted at read and the
/// extension itself is not written back.
pub const KHR_TEXTURE_BASISU: &str = "KHR_texture_basisu";

const EXTENSION_HOSTS: [&str; 4] = ["materials", "nodes", "textures", "meshes"];

/// One mesh primitive and its POSITION accessor, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveRef {
    pub mesh: usize,
    pub primitive: usize,
    pub position: Option<usize>,
}

/// An embedded image together with the first texture that samples it.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureRecord {
    pub name: Option<String>,
    pub source_image_id: usize,
    pub sampler_id: Option<usize>,
    pub mime_type: Option<String>,
    pub raw_bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct Document {
    json: Value,
    views: Vec<Vec<u8>>,
}

impl Document {
    /// Parses a GLB container without running any extension hooks.
    pub fn from_glb(bytes: &[u8]) -> Result<Self> {
        let glb = Glb::from_slice(bytes)?;
        let json: Value = serde_json::from_slice(glb.json.as_ref())?;
        let bin = glb.bin.map(Cow::into_owned).unwrap_or_default();

        let mut views = Vec::new();
        if let Some(buffer_views) = json.get("bufferViews").and_then(Value::as_array) {
            for (index, view) in buffer_views.iter().enumerate() {
                if view.get("buffer").and_then(Value::as_u64).unwrap_or(0) != 0 {
                    return Err(Error::Document(format!(
                        "bufferView {index} points outside the embedded binary chunk"
                    )));
                }
                let offset = view.get("byteOffset").and_then(Value::as_u64).unwrap_or(0) as usize;
                let length = view.get("byteLength").and_then(Value::as_u64).unwrap_or(0) as usize;
                let segment = offset
                    .checked_add(length)
                    .and_then(|end| bin.get(offset..end))
                    .ok_or_else(|| {
                        Error::Document(format!("bufferView {index} overruns the binary chunk"))
                    })?;
                views.push(segment.to_vec());
            }
        }

        Ok(Self { json, views })
    }

    /// Parses a GLB container and runs the read-side hook phases.
    pub fn read(bytes: &[u8], registry: &mut ExtensionRegistry) -> Result<Self> {
        let mut document = Self::from_glb(bytes)?;
        document.adopt_basisu_sources();
        registry.retain_used(&document.json);

        registry.run_preread(&mut document.json)?;
        document.check_texture_sources()?;
        registry.run_read(&mut document.json)?;

        let mut claimed: Vec<String> = registry.names().into_iter().map(str::to_owned).collect();
        claimed.push(KHR_TEXTURE_BASISU.to_string());
        document.strip_extensions(&claimed);

        tracing::debug!(
            extensions = ?registry.names(),
            meshes = document.array_len("meshes"),
            textures = document.array_len("textures"),
            "read document"
        );
        Ok(document)
    }

    /// Runs the write-side hook phases around the resource rebuild and
    /// serializes the result as GLB.
    pub fn write(&mut self, registry: &mut ExtensionRegistry) -> Result<Vec<u8>> {
        registry.run_prewrite(&mut self.json)?;

        rebuild::rebuild_textures(&mut self.json)?;
        self.views = rebuild::repack_buffer_views(&mut self.json, &self.views)?;

        registry.run_write(&mut self.json)?;
        rebuild::recompute_extension_declarations(&mut self.json);

        self.to_glb()
    }

    /// Serializes the document as is.
    pub fn to_glb(&self) -> Result<Vec<u8>> {
        let mut json = self.json.clone();
        let bin = rebuild::layout_binary(&mut json, &self.views);
        let json_bytes = serde_json::to_vec(&json)?;

        // The writer recomputes the header length.
        let glb = Glb {
            header: glb_header(),
            json: Cow::Owned(json_bytes),
            bin: (!bin.is_empty()).then_some(Cow::Owned(bin)),
        };
        let mut out = Vec::new();
        glb.to_writer(&mut out)?;
        Ok(out)
    }

    pub fn json(&self) -> &Value {
        &self.json
    }

    fn array_len(&self, key: &str) -> usize {
        self.json.get(key).and_then(Value::as_array).map_or(0, Vec::len)
    }

    // ─── Geometry ─────────────────────────────────────────────────────────────

    /// Every primitive in document order: meshes first, then their
    /// primitives.
    pub fn primitives(&self) -> Vec<PrimitiveRef> {
        let Some(meshes) = self.json.get("meshes").and_then(Value::as_array) else {
            return Vec::new();
        };
        meshes
            .iter()
            .enumerate()
            .flat_map(|(mesh, value)| {
                value
                    .get("primitives")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .enumerate()
                    .map(move |(primitive, value)| PrimitiveRef {
                        mesh,
                        primitive,
                        position: value
                            .get("attributes")
                            .and_then(|attributes| attributes.get("POSITION"))
                            .and_then(Value::as_u64)
                            .map(|index| index as usize),
                    })
            })
            .collect()
    }

    pub fn read_positions(&self, accessor: usize) -> Result<Vec<Vector3<f32>>> {
        let meta = self.view_backed_accessor(accessor)?;
        accessor::read_vec3_f32(self.segment(meta.view_index)?, &meta)
    }

    /// Stores positions and refreshes the accessor's `min`/`max`.
    pub fn write_positions(&mut self, accessor: usize, values: &[Vector3<f32>]) -> Result<()> {
        let meta = self.view_backed_accessor(accessor)?;
        let segment = self.views.get_mut(meta.view_index).ok_or_else(|| {
            Error::Document(format!("bufferView {} does not exist", meta.view_index))
        })?;
        accessor::write_vec3_f32(segment, &meta, values)?;

        if let Some((min, max)) = accessor::bounds(values) {
            let entry = &mut self.json["accessors"][accessor];
            entry["min"] = min.iter().map(|v| f64::from(*v)).collect();
            entry["max"] = max.iter().map(|v| f64::from(*v)).collect();
        }
        Ok(())
    }

    fn view_backed_accessor(&self, accessor: usize) -> Result<accessor::AccessorMeta> {
        accessor::accessor_meta(&self.json, accessor)?.ok_or_else(|| {
            Error::Document(format!("accessor {accessor} has no bufferView"))
        })
    }

    fn segment(&self, view: usize) -> Result<&[u8]> {
        self.views
            .get(view)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Document(format!("bufferView {view} does not exist")))
    }

    // ─── Textures ─────────────────────────────────────────────────────────────

    /// One record per embedded image that at least one texture samples, in
    /// texture order.
    pub fn texture_records(&self) -> Vec<TextureRecord> {
        let textures = self
            .json
            .get("textures")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut seen = Vec::new();
        let mut records = Vec::new();
        for texture in textures {
            let Some(source) = texture.get("source").and_then(Value::as_u64) else {
                continue;
            };
            let source = source as usize;
            if seen.contains(&source) {
                continue;
            }
            seen.push(source);

            let Some(image) = self.json.get("images").and_then(|images| images.get(source)) else {
                continue;
            };
            let Some(view) = image.get("bufferView").and_then(Value::as_u64) else {
                continue;
            };
            let Some(raw_bytes) = self.views.get(view as usize) else {
                continue;
            };

            records.push(TextureRecord {
                name: texture
                    .get("name")
                    .or_else(|| image.get("name"))
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                source_image_id: source,
                sampler_id: texture
                    .get("sampler")
                    .and_then(Value::as_u64)
                    .map(|sampler| sampler as usize),
                mime_type: image
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                raw_bytes: raw_bytes.clone(),
            });
        }
        records
    }

    /// Replaces an embedded image's bytes and MIME type in place; the image
    /// keeps its index.
    pub fn replace_image(&mut self, image: usize, mime_type: &str, bytes: Vec<u8>) -> Result<()> {
        let entry = self
            .json
            .get_mut("images")
            .and_then(|images| images.get_mut(image))
            .ok_or_else(|| Error::Document(format!("image {image} does not exist")))?;
        let view = entry
            .get("bufferView")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Document(format!("image {image} is not embedded")))?
            as usize;
        entry["mimeType"] = Value::from(mime_type);

        let segment = self
            .views
            .get_mut(view)
            .ok_or_else(|| Error::Document(format!("bufferView {view} does not exist")))?;
        *segment = bytes;
        self.json["bufferViews"][view]["byteLength"] = Value::from(segment.len() as u64);
        Ok(())
    }

    // ─── Read-side finalization ───────────────────────────────────────────────

    fn adopt_basisu_sources(&mut self) {
        let Some(textures) = self.json.get_mut("textures").and_then(Value::as_array_mut) else {
            return;
        };
        for texture in textures {
            let source = texture
                .get("extensions")
                .and_then(|extensions| extensions.get(KHR_TEXTURE_BASISU))
                .and_then(|block| block.get("source"))
                .cloned();
            if let Some(source) = source {
                texture["source"] = source;
            }
        }
    }

    fn check_texture_sources(&self) -> Result<()> {
        let images = self.array_len("images");
        let textures = self
            .json
            .get("textures")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for (index, texture) in textures.iter().enumerate() {
            if let Some(source) = texture.get("source").and_then(Value::as_u64) {
                if source as usize >= images {
                    return Err(Error::Document(format!(
                        "texture {index} references missing image {source}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Removes claimed extension blocks from the root and from every element
    /// that can host one, dropping `extensions` objects left empty.
    fn strip_extensions(&mut self, names: &[String]) {
        strip_from(&mut self.json, names);
        for host in EXTENSION_HOSTS {
            if let Some(items) = self.json.get_mut(host).and_then(Value::as_array_mut) {
                for item in items {
                    strip_from(item, names);
                }
            }
        }
    }
}

fn glb_header() -> Header {
    Header {
        magic: *b"glTF",
        version: 2,
        length: 0,
    }
}

fn strip_from(value: &mut Value, names: &[String]) {
    let Some(object) = value.as_object_mut() else {
        return;
    };
    let now_empty = match object.get_mut("extensions").and_then(Value::as_object_mut) {
        Some(extensions) => {
            extensions.retain(|name, _| !names.contains(name));
            extensions.is_empty()
        }
        None => false,
    };
    if now_empty {
        object.remove("extensions");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extensions::{
        ExtensionHooks, HookContext, MTOON_EXTENSION, MtoonExtension, PREVIEW_MESH_EXTENSION,
        VRM_V0_EXTENSION, VendorExtension,
    };
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Builds a GLB from a JSON document and one binary chunk.
    pub(crate) fn glb_from(json: &Value, bin: Vec<u8>) -> Vec<u8> {
        let json_bytes = serde_json::to_vec(json).unwrap();
        let glb = Glb {
            header: glb_header(),
            json: Cow::Owned(json_bytes),
            bin: Some(Cow::Owned(bin)),
        };
        let mut out = Vec::new();
        glb.to_writer(&mut out).unwrap();
        out
    }

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Two triangles' worth of positions, a PNG-tagged image only MToon
    /// references and a base color image, plus the vendor blocks.
    pub(crate) fn sample_model() -> (Value, Vec<u8>) {
        let mut bin = f32_bytes(&[0.5, 1.0, -0.25, -1.0, 2.0, 0.75, 0.0, -0.5, 3.0]);
        bin.extend_from_slice(&[0x89, b'P', b'N', b'G']);
        bin.extend_from_slice(&[0xff, 0xd8, 0xff, 0xe0]);
        let json = json!({
            "asset": { "version": "2.0" },
            "extensionsUsed": [VRM_V0_EXTENSION, MTOON_EXTENSION, PREVIEW_MESH_EXTENSION, KHR_TEXTURE_BASISU],
            "extensions": {
                "VRM": { "materialProperties": [
                    { "name": "skin", "textureProperties": { "_MainTex": 0, "_ShadeTexture": 1 } }
                ] },
                "PIXIV_vroid_hub_preview_mesh": { "timestamp": "1698286986", "version": "4.0" }
            },
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 4 },
                { "buffer": 0, "byteOffset": 40, "byteLength": 4 }
            ],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [-1.0, -0.5, -0.25], "max": [0.5, 2.0, 3.0] }
            ],
            "images": [
                { "bufferView": 1, "mimeType": "image/png" },
                { "bufferView": 2, "mimeType": "image/jpeg" }
            ],
            "samplers": [{ "magFilter": 9729 }, { "magFilter": 9728 }],
            "textures": [
                { "name": "skin_base", "source": 1, "sampler": 0 },
                { "name": "skin_shade", "sampler": 1,
                  "extensions": { "KHR_texture_basisu": { "source": 0 } } }
            ],
            "materials": [{
                "name": "skin",
                "pbrMetallicRoughness": { "baseColorTexture": { "index": 0 } },
                "extensions": { "VRMC_materials_mtoon": {
                    "specVersion": "1.0",
                    "shadeMultiplyTexture": { "index": 1 }
                } }
            }],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }]
        });
        (json, bin)
    }

    #[test]
    fn given_glb_when_reading_then_claimed_blocks_are_stripped_and_basisu_adopted() {
        let (json, bin) = sample_model();
        let mut registry = ExtensionRegistry::vroid();

        let document = Document::read(&glb_from(&json, bin), &mut registry).unwrap();

        let json = document.json();
        assert!(json["extensions"].get("VRM").is_none());
        assert!(json["materials"][0].get("extensions").is_none());
        assert_eq!(json["textures"][1]["source"], 0);
        assert!(json["textures"][1].get("extensions").is_none());
        assert!(registry.preview_mesh().and_then(|p| p.data()).is_some());
    }

    #[test]
    fn given_positions_when_writing_then_bounds_are_recomputed() {
        let (json, bin) = sample_model();
        let mut document = Document::from_glb(&glb_from(&json, bin)).unwrap();
        let values = vec![
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(-4.0, 0.0, 6.0),
            Vector3::new(0.5, -1.0, 2.0),
        ];

        document.write_positions(0, &values).unwrap();

        assert_eq!(document.read_positions(0).unwrap(), values);
        assert_eq!(document.json()["accessors"][0]["min"], json!([-4.0, -1.0, 2.0]));
        assert_eq!(document.json()["accessors"][0]["max"], json!([1.0, 2.0, 6.0]));
    }

    #[test]
    fn given_read_document_when_writing_then_vendor_textures_survive_the_rebuild() {
        let (json, bin) = sample_model();
        let mut registry = ExtensionRegistry::vroid();
        let mut document = Document::read(&glb_from(&json, bin), &mut registry).unwrap();
        registry.dispose(PREVIEW_MESH_EXTENSION);

        let bytes = document.write(&mut registry).unwrap();
        let written = Document::from_glb(&bytes).unwrap();
        let json = written.json();

        // The rebuild keeps only the base color texture; the shade texture is
        // restored from the pool and both vendor blocks point at it.
        assert_eq!(json["textures"][0]["name"], "skin_base");
        assert_eq!(json["textures"][1]["name"], "skin_shade");
        assert_eq!(json["textures"].as_array().unwrap().len(), 2);
        assert_eq!(
            json["materials"][0]["extensions"]["VRMC_materials_mtoon"]["shadeMultiplyTexture"]["index"],
            1
        );
        assert_eq!(
            json["extensions"]["VRM"]["materialProperties"][0]["textureProperties"]["_ShadeTexture"],
            1
        );
        assert_eq!(json["samplers"].as_array().unwrap().len(), 2);
        assert_eq!(json["extensionsUsed"], json!(["VRM", "VRMC_materials_mtoon"]));
        assert!(json["extensions"].get(PREVIEW_MESH_EXTENSION).is_none());
    }

    #[test]
    fn given_undisposed_preview_block_when_writing_then_protocol_misuse() {
        let (json, bin) = sample_model();
        let mut registry = ExtensionRegistry::vroid();
        let mut document = Document::read(&glb_from(&json, bin), &mut registry).unwrap();

        let err = document.write(&mut registry).unwrap_err();

        assert!(matches!(err, Error::ProtocolMisuse { .. }));
    }

    #[test]
    fn given_image_replacement_when_serializing_then_new_bytes_are_embedded() {
        let (json, bin) = sample_model();
        let mut document = Document::from_glb(&glb_from(&json, bin)).unwrap();

        document.replace_image(1, "image/png", vec![1, 2, 3, 4, 5]).unwrap();
        let reread = Document::from_glb(&document.to_glb().unwrap()).unwrap();

        let record = reread
            .texture_records()
            .into_iter()
            .find(|record| record.source_image_id == 1)
            .unwrap();
        assert_eq!(record.raw_bytes, vec![1, 2, 3, 4, 5]);
        assert_eq!(record.mime_type.as_deref(), Some("image/png"));
        assert_eq!(record.name.as_deref(), Some("skin_base"));
    }

    #[test]
    fn given_mtoon_without_vrm_root_when_writing_then_sampler_references_stay_valid() {
        let mut bin = b"\x89PNG".to_vec();
        bin.extend_from_slice(b"\x89PNG");
        let json = json!({
            "asset": { "version": "2.0" },
            "extensionsUsed": [MTOON_EXTENSION],
            "buffers": [{ "byteLength": 8 }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 4 },
                { "buffer": 0, "byteOffset": 4, "byteLength": 4 }
            ],
            "images": [
                { "bufferView": 0, "mimeType": "image/png" },
                { "bufferView": 1, "mimeType": "image/png" }
            ],
            "samplers": [{ "magFilter": 9729 }, { "magFilter": 9729 }, { "magFilter": 9728 }],
            "textures": [{ "source": 0, "sampler": 1 }, { "source": 1, "sampler": 2 }],
            "materials": [{
                "pbrMetallicRoughness": { "baseColorTexture": { "index": 0 } },
                "extensions": { "VRMC_materials_mtoon": {
                    "specVersion": "1.0",
                    "shadeMultiplyTexture": { "index": 1 }
                } }
            }]
        });
        let mut registry = ExtensionRegistry::new();
        registry.register(VendorExtension::MaterialsMtoon(MtoonExtension::default()));
        let mut document = Document::read(&glb_from(&json, bin), &mut registry).unwrap();

        let bytes = document.write(&mut registry).unwrap();
        let written = Document::from_glb(&bytes).unwrap();
        let json = written.json();

        let samplers = json["samplers"].as_array().unwrap();
        assert_eq!(samplers, &vec![json!({ "magFilter": 9729 }), json!({ "magFilter": 9728 })]);
        for texture in json["textures"].as_array().unwrap() {
            let sampler = texture["sampler"].as_u64().unwrap() as usize;
            assert!(sampler < samplers.len(), "dangling sampler in {texture}");
        }
        let shade = json["materials"][0]["extensions"][MTOON_EXTENSION]["shadeMultiplyTexture"]["index"]
            .as_u64()
            .unwrap() as usize;
        assert_eq!(json["textures"][shade], json!({ "source": 1, "sampler": 1 }));
    }

    #[test]
    fn given_view_offset_near_address_limit_when_parsing_then_document_error() {
        let (mut json, bin) = sample_model();
        json["bufferViews"][1]["byteOffset"] = json!(u64::MAX);

        let err = Document::from_glb(&glb_from(&json, bin)).unwrap_err();

        assert!(matches!(err, Error::Document(_)));
    }

    #[test]
    fn given_accessor_count_beyond_its_view_when_reading_positions_then_document_error() {
        let (mut json, bin) = sample_model();
        json["accessors"][0]["count"] = json!(4_000_000_000_000_000_000u64);
        let document = Document::from_glb(&glb_from(&json, bin)).unwrap();

        assert!(matches!(document.read_positions(0), Err(Error::Document(_))));
    }

    /// Logs each hook call with what the document looked like at that point.
    #[derive(Debug)]
    struct PhaseRecorder {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl PhaseRecorder {
        fn record(&self, phase: &str, ctx: &HookContext<'_>) -> crate::error::Result<()> {
            let textures = if ctx.json["textures"][0].get("name").is_some() {
                "original"
            } else {
                "rebuilt"
            };
            let block = if ctx.json["extensions"].get(self.name).is_some() {
                "block"
            } else {
                "stripped"
            };
            self.log
                .borrow_mut()
                .push(format!("{phase} {} {textures} {block}", self.name));
            Ok(())
        }
    }

    impl ExtensionHooks for PhaseRecorder {
        fn name(&self) -> &str {
            self.name
        }

        fn preread(&mut self, ctx: &mut HookContext<'_>) -> crate::error::Result<()> {
            self.record("preread", ctx)
        }

        fn read(&mut self, ctx: &mut HookContext<'_>) -> crate::error::Result<()> {
            self.record("read", ctx)
        }

        fn prewrite(&mut self, ctx: &mut HookContext<'_>) -> crate::error::Result<()> {
            self.record("prewrite", ctx)
        }

        fn write(&mut self, ctx: &mut HookContext<'_>) -> crate::error::Result<()> {
            self.record("write", ctx)
        }
    }

    #[test]
    fn given_recording_hooks_when_reading_and_writing_then_phases_run_in_contract_order() {
        let (mut json, bin) = sample_model();
        json["extensionsUsed"] = json!(["EXT_first", "EXT_second", KHR_TEXTURE_BASISU]);
        json["extensions"]["EXT_first"] = json!({});
        json["extensions"]["EXT_second"] = json!({});
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ExtensionRegistry::new();
        for name in ["EXT_first", "EXT_second"] {
            registry.register(VendorExtension::Custom(Box::new(PhaseRecorder {
                name,
                log: Rc::clone(&log),
            })));
        }

        let mut document = Document::read(&glb_from(&json, bin), &mut registry).unwrap();
        document.write(&mut registry).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                "preread EXT_first original block",
                "preread EXT_second original block",
                "read EXT_first original block",
                "read EXT_second original block",
                "prewrite EXT_first original stripped",
                "prewrite EXT_second original stripped",
                "write EXT_first rebuilt stripped",
                "write EXT_second rebuilt stripped",
            ]
        );
    }
}
