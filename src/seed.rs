use std::collections::BTreeMap;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Timestamp key used when the model metadata carries no timestamp.
pub const LEGACY_KEY: &str = "legacy";

/// Query marker identifying an official/optimized preview download URL.
const OPTIMIZED_PREVIEW_MARKER: &str = "s=op";

const API_VERSION_SEGMENTS: [&str; 2] = ["/v1/", "/v2/"];

/// Base offset for every known obfuscation generation, keyed by the
/// timestamp embedded in the model's vendor metadata.
pub const SEED_MAP_BASE: [(&str, i64); 8] = [
    ("612168628", 0),
    ("1599883309", 3549),
    ("1761208024", 3174),
    ("1698286986", 21955),
    ("1689231785", 32123),
    ("1667373233", 5453),
    ("1764841611", 29199),
    (LEGACY_KEY, 0),
];

/// Concrete seeds for one model, one per known timestamp key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedMap {
    seeds: BTreeMap<String, i64>,
}

impl SeedMap {
    fn offset_by(adjustment: i64) -> Self {
        let seeds = SEED_MAP_BASE
            .iter()
            .map(|(key, base)| ((*key).to_string(), base + adjustment))
            .collect();
        Self { seeds }
    }

    /// Seed for the scheme generation identified by `timestamp`.
    pub fn seed_for(&self, timestamp: &str) -> Result<i64> {
        self.seeds
            .get(timestamp)
            .copied()
            .ok_or_else(|| Error::UnknownScheme {
                timestamp: timestamp.to_string(),
            })
    }

}

/// Derives the per-model seed map from the model id and the URL the model
/// was actually fetched from.
pub fn compute_seed_map(model_id: &str, resolved_url: Option<&str>) -> Result<SeedMap> {
    if let Some(url) = resolved_url.filter(|url| url.contains(OPTIMIZED_PREVIEW_MARKER)) {
        let adjustment = optimized_preview_hash(url);
        tracing::debug!(adjustment, "seed map derived from optimized preview URL");
        return Ok(SeedMap::offset_by(i64::from(adjustment)));
    }

    let id = leading_integer(model_id).ok_or_else(|| Error::InvalidModelId(model_id.to_string()))?;
    Ok(SeedMap::offset_by(id))
}

/// Integer prefix of `text` after leading whitespace, with an optional sign.
/// Trailing non-digits are ignored, so `"123abc"` yields 123.
fn leading_integer(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    let digits = unsigned
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(unsigned.len());
    if digits == 0 {
        return None;
    }
    let sign_len = text.len() - unsigned.len();
    text[..sign_len + digits].parse().ok()
}

/// Last four bytes of the SHA-1 of the URL's path tail, little-endian.
fn optimized_preview_hash(url: &str) -> i32 {
    let prefix_segments = if API_VERSION_SEGMENTS
        .iter()
        .any(|segment| url.contains(segment))
    {
        6
    } else {
        5
    };
    let path = url
        .split('/')
        .skip(prefix_segments)
        .collect::<Vec<_>>()
        .join("/");

    let digest = Sha1::digest(path.as_bytes());
    i32::from_le_bytes([digest[16], digest[17], digest[18], digest[19]])
}

/// Model identifier extracted from a numeric id or a hub URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelId(String);

impl ModelId {
    /// Accepts an `https://` URL or text starting with an integer; the id is
    /// the final non-empty path segment.
    pub fn parse(target: &str) -> Result<Self> {
        let is_url = target.starts_with("https://");
        if !is_url && leading_integer(target).is_none() {
            return Err(Error::InvalidModelId(target.to_string()));
        }

        let segment = target
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        if segment.is_empty() {
            return Err(Error::InvalidModelId(target.to_string()));
        }

        Ok(Self(segment.trim().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_plain_url_when_computing_seed_map_then_model_id_is_added() {
        let map = compute_seed_map(
            "12345",
            Some("https://hub.vroid.com/api/character_models/12345/preview"),
        )
        .expect("seed map");

        for (key, base) in SEED_MAP_BASE {
            assert_eq!(map.seed_for(key).unwrap(), base + 12345, "key {key}");
        }
    }

    #[test]
    fn given_no_url_when_computing_seed_map_then_model_id_is_added() {
        let map = compute_seed_map("12345", None).expect("seed map");

        assert_eq!(map.seed_for("1764841611").unwrap(), 29199 + 12345);
        assert_eq!(map.seed_for(LEGACY_KEY).unwrap(), 12345);
    }

    #[test]
    fn given_versioned_marker_url_when_computing_seed_map_then_hash_is_added() {
        // SHA-1("versions/42/optimized/model.vrm?s=op&t=1") ends in 0a 6c 59 03.
        let url =
            "https://vroid-hub.pximg.net/v2/character_models/9876/versions/42/optimized/model.vrm?s=op&t=1";

        let map = compute_seed_map("9876", Some(url)).expect("seed map");

        for (key, base) in SEED_MAP_BASE {
            assert_eq!(map.seed_for(key).unwrap(), base + 56_192_010, "key {key}");
        }
    }

    #[test]
    fn given_unversioned_marker_url_when_computing_seed_map_then_negative_hash_is_added() {
        let url = "https://vroid-hub.pximg.net/character_models/9876/versions/42/model.vrm?s=op";

        let map = compute_seed_map("9876", Some(url)).expect("seed map");

        assert_eq!(map.seed_for("612168628").unwrap(), -2_072_373_424);
        assert_eq!(map.seed_for("1599883309").unwrap(), -2_072_373_424 + 3549);
    }

    #[test]
    fn given_unknown_timestamp_when_selecting_seed_then_unknown_scheme_error() {
        let map = compute_seed_map("1", None).unwrap();

        let err = map.seed_for("1234567890").unwrap_err();

        assert!(matches!(err, Error::UnknownScheme { ref timestamp } if timestamp == "1234567890"));
    }

    #[test]
    fn given_non_numeric_id_without_marker_when_computing_seed_map_then_error() {
        assert!(matches!(
            compute_seed_map("abc", None),
            Err(Error::InvalidModelId(_))
        ));
    }

    #[test]
    fn given_hub_url_with_trailing_slash_when_parsing_then_last_segment_is_id() {
        let id = ModelId::parse("https://hub.vroid.com/en/characters/111/models/2222333/").unwrap();

        assert_eq!(id.as_str(), "2222333");
    }

    #[test]
    fn given_numeric_target_when_parsing_then_id_is_kept() {
        assert_eq!(ModelId::parse("98765").unwrap().as_str(), "98765");
    }

    #[test]
    fn given_id_with_trailing_text_when_parsing_then_leading_digits_seed_the_map() {
        let id = ModelId::parse("123abc").unwrap();
        let map = compute_seed_map(id.as_str(), None).unwrap();

        assert_eq!(id.as_str(), "123abc");
        assert_eq!(map.seed_for(LEGACY_KEY).unwrap(), 123);
        assert_eq!(leading_integer("  -42x"), Some(-42));
        assert_eq!(leading_integer("+"), None);
    }

    #[test]
    fn given_non_url_text_when_parsing_then_error() {
        assert!(matches!(
            ModelId::parse("http://example.com/1"),
            Err(Error::InvalidModelId(_))
        ));
        assert!(matches!(ModelId::parse("model"), Err(Error::InvalidModelId(_))));
    }
}
