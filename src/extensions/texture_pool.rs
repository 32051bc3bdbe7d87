use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

/// Read-time identity of one texture entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextureSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampler: Option<u64>,
}

impl TextureSnapshot {
    fn from_json(texture: &Value) -> Self {
        Self {
            name: texture.get("name").and_then(Value::as_str).map(ToOwned::to_owned),
            source: texture.get("source").and_then(Value::as_u64),
            sampler: texture.get("sampler").and_then(Value::as_u64),
        }
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Session-scoped copy of the texture array shared by every vendor block
/// that references textures by index.
///
/// The first `snapshot` wins; later calls are no-ops until `reapply`
/// consumes the pending snapshot.
#[derive(Debug, Default)]
pub struct TexturePool {
    pending: Option<Vec<TextureSnapshot>>,
    /// Sampler array at snapshot time; snapshot sampler ids index into it.
    samplers: Vec<Value>,
}

impl TexturePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current texture array unless a snapshot is outstanding.
    /// Returns `true` when a new snapshot was taken.
    pub fn snapshot(&mut self, json: &Value) -> bool {
        if self.pending.is_some() {
            return false;
        }
        let textures = json
            .get("textures")
            .and_then(Value::as_array)
            .map(|textures| textures.iter().map(TextureSnapshot::from_json).collect())
            .unwrap_or_default();
        self.samplers = json
            .get("samplers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        self.pending = Some(textures);
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&[TextureSnapshot]> {
        self.pending.as_deref()
    }

    /// Restores snapshot entries into a rebuilt texture array: entries whose
    /// source is still present overwrite that slot, the rest are appended.
    /// Snapshot sampler ids are moved onto the rebuilt sampler array.
    pub fn reapply(&mut self, json: &mut Value) {
        let Some(mut snapshot) = self.pending.take() else {
            return;
        };
        let samplers = std::mem::take(&mut self.samplers);
        let Some(root) = json.as_object_mut() else {
            return;
        };
        remap_samplers(root, &samplers, &mut snapshot);
        let textures = root
            .entry("textures")
            .or_insert_with(|| Value::Array(Vec::new()));
        let Some(textures) = textures.as_array_mut() else {
            return;
        };

        let mut source_to_index = HashMap::<Option<u64>, usize>::new();
        for (index, texture) in textures.iter().enumerate() {
            source_to_index.insert(texture.get("source").and_then(Value::as_u64), index);
        }

        for texture in &snapshot {
            match source_to_index.get(&texture.source) {
                Some(&index) => textures[index] = texture.to_json(),
                None => {
                    textures.push(texture.to_json());
                    source_to_index.insert(texture.source, textures.len() - 1);
                }
            }
        }

        tracing::debug!(
            restored = snapshot.len(),
            total = textures.len(),
            "reconciled preserved textures"
        );
    }
}

/// Points each snapshot entry at an equal sampler in the rebuilt array,
/// appending read-time samplers the rebuild dropped. Ids that never
/// resolved are cleared.
fn remap_samplers(root: &mut Map<String, Value>, samplers: &[Value], snapshot: &mut [TextureSnapshot]) {
    let mut remapped = HashMap::<u64, u64>::new();
    for texture in snapshot {
        let Some(old) = texture.sampler else {
            continue;
        };
        if let Some(&new) = remapped.get(&old) {
            texture.sampler = Some(new);
            continue;
        }
        let Some(value) = samplers.get(old as usize) else {
            texture.sampler = None;
            continue;
        };
        let Some(current) = root
            .entry("samplers")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
        else {
            texture.sampler = None;
            continue;
        };
        let new = match current.iter().position(|existing| existing == value) {
            Some(index) => index,
            None => {
                current.push(value.clone());
                current.len() - 1
            }
        } as u64;
        remapped.insert(old, new);
        texture.sampler = Some(new);
    }
}

/// Image source of the texture at `texture_index`, if the texture exists.
pub fn source_of(json: &Value, texture_index: u64) -> Option<Option<u64>> {
    json.get("textures")
        .and_then(Value::as_array)
        .and_then(|textures| textures.get(texture_index as usize))
        .map(|texture| texture.get("source").and_then(Value::as_u64))
}

/// Map from image source to its (last) index in the current texture array.
pub fn source_index_map(json: &Value) -> HashMap<Option<u64>, usize> {
    json.get("textures")
        .and_then(Value::as_array)
        .map(|textures| {
            textures
                .iter()
                .enumerate()
                .map(|(index, texture)| (texture.get("source").and_then(Value::as_u64), index))
                .collect()
        })
        .unwrap_or_default()
}
