use nalgebra::Vector3;
use serde_json::Value;

use crate::error::{Error, Result};

pub(crate) const COMPONENT_FLOAT: u64 = 5126;

// ─── Accessor metadata ────────────────────────────────────────────────────────

/// Where an accessor's elements live inside its buffer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AccessorMeta {
    pub(crate) view_index: usize,
    pub(crate) base_offset: usize,
    pub(crate) stride: usize,
    pub(crate) count: usize,
    pub(crate) component_type: u64,
    pub(crate) element_size: usize,
}

pub(crate) fn component_size(component_type: u64) -> Option<usize> {
    match component_type {
        5120 | 5121 => Some(1),
        5122 | 5123 => Some(2),
        5125 | 5126 => Some(4),
        _ => None,
    }
}

pub(crate) fn element_count(accessor_type: &str) -> Option<usize> {
    match accessor_type {
        "SCALAR" => Some(1),
        "VEC2" => Some(2),
        "VEC3" => Some(3),
        "VEC4" => Some(4),
        "MAT2" => Some(4),
        "MAT3" => Some(9),
        "MAT4" => Some(16),
        _ => None,
    }
}

/// Resolves the layout of a view-backed accessor. Returns `None` for
/// accessors without a `bufferView` (all-zero or sparse-only data).
pub(crate) fn accessor_meta(json: &Value, accessor_index: usize) -> Result<Option<AccessorMeta>> {
    let accessor = json
        .get("accessors")
        .and_then(Value::as_array)
        .and_then(|accessors| accessors.get(accessor_index))
        .ok_or_else(|| Error::Document(format!("accessor {accessor_index} does not exist")))?;

    let Some(view_index) = accessor.get("bufferView").and_then(Value::as_u64) else {
        return Ok(None);
    };
    let view_index = view_index as usize;
    let buffer_view = json
        .get("bufferViews")
        .and_then(Value::as_array)
        .and_then(|views| views.get(view_index))
        .ok_or_else(|| {
            Error::Document(format!(
                "accessor {accessor_index} references missing bufferView {view_index}"
            ))
        })?;

    let component_type = accessor
        .get("componentType")
        .and_then(Value::as_u64)
        .unwrap_or_default();
    let accessor_type = accessor.get("type").and_then(Value::as_str).unwrap_or("");
    let (Some(component_size), Some(element_count)) =
        (component_size(component_type), element_count(accessor_type))
    else {
        return Err(Error::Document(format!(
            "accessor {accessor_index} has unsupported layout {accessor_type}/{component_type}"
        )));
    };

    let accessor_offset = accessor
        .get("byteOffset")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    let element_size = element_count * component_size;
    let stride = buffer_view
        .get("byteStride")
        .and_then(Value::as_u64)
        .map(|value| value as usize)
        .filter(|&value| value != 0)
        .unwrap_or(element_size);

    // Views are held as standalone segments, so offsets are view-relative.
    Ok(Some(AccessorMeta {
        view_index,
        base_offset: accessor_offset,
        stride,
        count: accessor.get("count").and_then(Value::as_u64).unwrap_or(0) as usize,
        component_type,
        element_size,
    }))
}

/// Fails unless every element of the accessor lies inside a view of
/// `segment_len` bytes.
fn check_extent(segment_len: usize, meta: &AccessorMeta) -> Result<()> {
    if meta.count == 0 {
        return Ok(());
    }
    if meta.stride < meta.element_size {
        return Err(Error::Document(format!(
            "bufferView {} stride {} is smaller than its {}-byte elements",
            meta.view_index, meta.stride, meta.element_size
        )));
    }
    let end = (meta.count - 1)
        .checked_mul(meta.stride)
        .and_then(|last| last.checked_add(meta.base_offset))
        .and_then(|last| last.checked_add(meta.element_size));
    match end {
        Some(end) if end <= segment_len => Ok(()),
        _ => Err(Error::Document(format!(
            "accessor with {} elements overruns bufferView {} ({segment_len} bytes)",
            meta.count, meta.view_index
        ))),
    }
}

/// Copies the accessor's elements out of its view with the stride removed.
pub(crate) fn pack_elements(segment: &[u8], meta: &AccessorMeta) -> Result<Vec<u8>> {
    check_extent(segment.len(), meta)?;
    let mut packed = Vec::with_capacity(meta.count * meta.element_size);
    for index in 0..meta.count {
        let start = meta.base_offset + index * meta.stride;
        let element = segment.get(start..start + meta.element_size).ok_or_else(|| {
            Error::Document(format!(
                "accessor element {index} overruns bufferView {}",
                meta.view_index
            ))
        })?;
        packed.extend_from_slice(element);
    }
    Ok(packed)
}

// ─── Vec3 float I/O ───────────────────────────────────────────────────────────

fn ensure_float_vec3(meta: &AccessorMeta) -> Result<()> {
    if meta.component_type != COMPONENT_FLOAT || meta.element_size != 12 {
        return Err(Error::Document(format!(
            "POSITION in bufferView {} is not a FLOAT VEC3 accessor",
            meta.view_index
        )));
    }
    Ok(())
}

pub(crate) fn read_vec3_f32(segment: &[u8], meta: &AccessorMeta) -> Result<Vec<Vector3<f32>>> {
    ensure_float_vec3(meta)?;
    check_extent(segment.len(), meta)?;
    let mut out = Vec::with_capacity(meta.count);
    for vertex in 0..meta.count {
        let offset = meta.base_offset + vertex * meta.stride;
        let bytes = segment.get(offset..offset + 12).ok_or_else(|| {
            Error::Document(format!(
                "vertex {vertex} overruns bufferView {}",
                meta.view_index
            ))
        })?;
        let lane = |i: usize| {
            f32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        out.push(Vector3::new(lane(0), lane(1), lane(2)));
    }
    Ok(out)
}

pub(crate) fn write_vec3_f32(
    segment: &mut [u8],
    meta: &AccessorMeta,
    values: &[Vector3<f32>],
) -> Result<()> {
    ensure_float_vec3(meta)?;
    check_extent(segment.len(), meta)?;
    for (vertex, value) in values.iter().enumerate().take(meta.count) {
        let offset = meta.base_offset + vertex * meta.stride;
        let slot = segment.get_mut(offset..offset + 12).ok_or_else(|| {
            Error::Document(format!(
                "vertex {vertex} overruns bufferView {}",
                meta.view_index
            ))
        })?;
        for (lane, component) in value.iter().enumerate() {
            slot[lane * 4..lane * 4 + 4].copy_from_slice(&component.to_le_bytes());
        }
    }
    Ok(())
}

/// Component-wise bounds, as required on POSITION accessors.
pub(crate) fn bounds(values: &[Vector3<f32>]) -> Option<(Vector3<f32>, Vector3<f32>)> {
    let first = values.first()?;
    Some(
        values
            .iter()
            .skip(1)
            .fold((*first, *first), |(min, max), value| (min.inf(value), max.sup(value))),
    )
}
