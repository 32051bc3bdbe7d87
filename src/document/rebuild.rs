use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value, json};

use super::accessor::{accessor_meta, pack_elements};
use crate::error::{Error, Result};

const ALIGNMENT: usize = 4;

// ─── Textures and samplers ────────────────────────────────────────────────────

/// Rebuilds `textures` from the references materials still hold, in
/// first-seen order, deduplicated by `(source, sampler)`. Samplers are
/// deduplicated by value. Texture names are not carried over.
pub(crate) fn rebuild_textures(json: &mut Value) -> Result<()> {
    let old_textures = json
        .get("textures")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let old_samplers = json
        .get("samplers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut textures: Vec<Value> = Vec::new();
    let mut samplers: Vec<Value> = Vec::new();
    let mut texture_by_key = HashMap::<(Option<u64>, Option<usize>), usize>::new();
    let mut sampler_by_old = HashMap::<u64, usize>::new();

    let material_count = json
        .get("materials")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    for material in 0..material_count {
        let Some(material) = json
            .get_mut("materials")
            .and_then(|materials| materials.get_mut(material))
        else {
            continue;
        };
        let mut failure = None;
        visit_texture_infos(material, &mut |info| {
            if failure.is_some() {
                return;
            }
            let Some(old_index) = info.get("index").and_then(Value::as_u64) else {
                return;
            };
            let Some(old) = old_textures.get(old_index as usize) else {
                failure = Some(Error::Document(format!(
                    "material references missing texture {old_index}"
                )));
                return;
            };

            let source = old.get("source").and_then(Value::as_u64);
            let sampler = old.get("sampler").and_then(Value::as_u64).and_then(|old_sampler| {
                if let Some(&index) = sampler_by_old.get(&old_sampler) {
                    return Some(index);
                }
                let value = old_samplers.get(old_sampler as usize)?.clone();
                let index = match samplers.iter().position(|existing| *existing == value) {
                    Some(index) => index,
                    None => {
                        samplers.push(value);
                        samplers.len() - 1
                    }
                };
                sampler_by_old.insert(old_sampler, index);
                Some(index)
            });

            let new_index = *texture_by_key.entry((source, sampler)).or_insert_with(|| {
                let mut texture = Map::new();
                if let Some(source) = source {
                    texture.insert("source".to_string(), Value::from(source));
                }
                if let Some(sampler) = sampler {
                    texture.insert("sampler".to_string(), Value::from(sampler as u64));
                }
                if let Some(extensions) = old.get("extensions").filter(|ext| is_non_empty(ext)) {
                    texture.insert("extensions".to_string(), extensions.clone());
                }
                textures.push(Value::Object(texture));
                textures.len() - 1
            });
            info["index"] = Value::from(new_index as u64);
        });
        if let Some(error) = failure {
            return Err(error);
        }
    }

    tracing::debug!(
        textures_before = old_textures.len(),
        textures_after = textures.len(),
        samplers_before = old_samplers.len(),
        samplers_after = samplers.len(),
        "rebuilt texture list"
    );

    if let Some(root) = json.as_object_mut() {
        set_or_remove(root, "textures", textures);
        set_or_remove(root, "samplers", samplers);
    }
    Ok(())
}

/// Calls `visit` on every texture info object under a material: any member
/// named `*Texture` holding an object, at any depth outside `extras`.
fn visit_texture_infos(value: &mut Value, visit: &mut impl FnMut(&mut Value)) {
    let Some(object) = value.as_object_mut() else {
        return;
    };
    for (key, child) in object.iter_mut() {
        if key == "extras" {
            continue;
        }
        if key.ends_with("Texture") && child.is_object() {
            visit(child);
        }
        visit_texture_infos(child, visit);
    }
}

fn set_or_remove(root: &mut Map<String, Value>, key: &str, items: Vec<Value>) {
    if items.is_empty() {
        root.remove(key);
    } else {
        root.insert(key.to_string(), Value::Array(items));
    }
}

fn is_non_empty(value: &Value) -> bool {
    value.as_object().is_some_and(|object| !object.is_empty())
}

// ─── Buffer layout ────────────────────────────────────────────────────────────

/// Repacks buffer views so that every view-backed accessor owns one tightly
/// packed view. Sparse and image views are carried over unchanged; views
/// nothing references are dropped.
pub(crate) fn repack_buffer_views(json: &mut Value, views: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
    let old_views = json
        .get("bufferViews")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let accessor_count = json
        .get("accessors")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    let mut new_views: Vec<Value> = Vec::new();
    let mut segments: Vec<Vec<u8>> = Vec::new();
    let mut copied = HashMap::<usize, usize>::new();

    let mut copy_view = |old: usize,
                         new_views: &mut Vec<Value>,
                         segments: &mut Vec<Vec<u8>>|
     -> Result<usize> {
        if let Some(&index) = copied.get(&old) {
            return Ok(index);
        }
        let segment = views
            .get(old)
            .ok_or_else(|| Error::Document(format!("bufferView {old} does not exist")))?;
        let mut view = json!({ "buffer": 0, "byteLength": segment.len() });
        if let Some(name) = old_views.get(old).and_then(|view| view.get("name")) {
            view["name"] = name.clone();
        }
        new_views.push(view);
        segments.push(segment.clone());
        copied.insert(old, new_views.len() - 1);
        Ok(new_views.len() - 1)
    };

    for accessor_index in 0..accessor_count {
        if let Some(meta) = accessor_meta(json, accessor_index)? {
            let segment = views.get(meta.view_index).ok_or_else(|| {
                Error::Document(format!("bufferView {} does not exist", meta.view_index))
            })?;
            let packed = pack_elements(segment, &meta)?;
            let mut view = json!({ "buffer": 0, "byteLength": packed.len() });
            if let Some(target) = old_views
                .get(meta.view_index)
                .and_then(|view| view.get("target"))
            {
                view["target"] = target.clone();
            }
            new_views.push(view);
            segments.push(packed);

            let accessor = &mut json["accessors"][accessor_index];
            accessor["bufferView"] = Value::from(new_views.len() as u64 - 1);
            if let Some(accessor) = accessor.as_object_mut() {
                accessor.remove("byteOffset");
            }
        }

        for part in ["indices", "values"] {
            let old = json["accessors"][accessor_index]
                .get("sparse")
                .and_then(|sparse| sparse.get(part))
                .and_then(|part| part.get("bufferView"))
                .and_then(Value::as_u64);
            if let Some(old) = old {
                let index = copy_view(old as usize, &mut new_views, &mut segments)?;
                json["accessors"][accessor_index]["sparse"][part]["bufferView"] =
                    Value::from(index as u64);
            }
        }
    }

    let image_count = json
        .get("images")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    for image_index in 0..image_count {
        let old = json["images"][image_index]
            .get("bufferView")
            .and_then(Value::as_u64);
        if let Some(old) = old {
            let index = copy_view(old as usize, &mut new_views, &mut segments)?;
            json["images"][image_index]["bufferView"] = Value::from(index as u64);
        }
    }

    tracing::debug!(
        views_before = old_views.len(),
        views_after = new_views.len(),
        "repacked buffer views with separate vertex layout"
    );

    if let Some(root) = json.as_object_mut() {
        set_or_remove(root, "bufferViews", new_views);
    }
    Ok(segments)
}

/// Lays `segments` out back to back, 4-byte aligned, updating each view's
/// `byteOffset` and the single buffer's `byteLength`.
pub(crate) fn layout_binary(json: &mut Value, segments: &[Vec<u8>]) -> Vec<u8> {
    let mut bin = Vec::new();
    for (index, segment) in segments.iter().enumerate() {
        if let Some(view) = json
            .get_mut("bufferViews")
            .and_then(|views| views.get_mut(index))
        {
            view["byteOffset"] = Value::from(bin.len() as u64);
            view["byteLength"] = Value::from(segment.len() as u64);
        }
        bin.extend_from_slice(segment);
        bin.resize(bin.len().next_multiple_of(ALIGNMENT), 0);
    }

    if let Some(root) = json.as_object_mut() {
        if bin.is_empty() {
            root.remove("buffers");
        } else {
            root.insert("buffers".to_string(), json!([{ "byteLength": bin.len() }]));
        }
    }
    bin
}

// ─── Extension declarations ───────────────────────────────────────────────────

/// Recomputes `extensionsUsed` from the extension objects actually present,
/// and keeps only still-used names in `extensionsRequired`.
pub(crate) fn recompute_extension_declarations(json: &mut Value) {
    let mut used = BTreeSet::new();
    collect_extension_names(json, &mut used);

    let Some(root) = json.as_object_mut() else {
        return;
    };
    let required: Vec<Value> = root
        .get("extensionsRequired")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter(|name| name.as_str().is_some_and(|name| used.contains(name)))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    set_or_remove(
        root,
        "extensionsUsed",
        used.into_iter().map(Value::String).collect(),
    );
    set_or_remove(root, "extensionsRequired", required);
}

fn collect_extension_names(value: &Value, used: &mut BTreeSet<String>) {
    match value {
        Value::Object(object) => {
            for (key, child) in object {
                if key == "extras" {
                    continue;
                }
                if key == "extensions" {
                    if let Some(extensions) = child.as_object() {
                        used.extend(extensions.keys().cloned());
                    }
                }
                collect_extension_names(child, used);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_extension_names(item, used);
            }
        }
        _ => {}
    }
}
