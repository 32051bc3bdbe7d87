use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::seed::{LEGACY_KEY, SeedMap};

/// Obfuscation scheme generation named by the preview-mesh block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemeVersion {
    V4,
    V5,
    Legacy,
}

impl SchemeVersion {
    /// Absent version means the pre-versioned legacy scheme.
    pub fn parse(version: Option<&str>) -> Result<Self> {
        version.map_or(Ok(Self::Legacy), str::parse)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::V4 => "4.0",
            Self::V5 => "5.0",
            Self::Legacy => LEGACY_KEY,
        }
    }

    /// Meta texture and lookups come from the external generator rather
    /// than the built-in PRNG.
    pub fn uses_external_generator(self) -> bool {
        matches!(self, Self::V5)
    }

    /// Inverts the displacement of one component. `meta` is the sampled
    /// meta-texture channel normalized to `[0, 1]`.
    pub fn correct(self, value: f32, meta: f64) -> f32 {
        let value = f64::from(value);
        let corrected = match self {
            Self::V4 | Self::V5 => value * 2f64.powf(meta / 8.0),
            Self::Legacy => {
                let sign = if value > 0.0 {
                    1.0
                } else if value < 0.0 {
                    -1.0
                } else {
                    0.0
                };
                value - sign * (meta / 16.0)
            }
        };
        corrected as f32
    }
}

impl FromStr for SchemeVersion {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "4.0" => Ok(Self::V4),
            "5.0" => Ok(Self::V5),
            LEGACY_KEY => Ok(Self::Legacy),
            other => Err(Error::UnsupportedVersion {
                version: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SchemeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheme parameters read once per document from the preview-mesh block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObfuscationParameters {
    pub timestamp_key: String,
    pub version: SchemeVersion,
}

impl ObfuscationParameters {
    /// `timestamp` may be a JSON number or string. Missing fields (or a
    /// missing block) select the legacy scheme.
    pub fn from_block(block: Option<&Value>) -> Result<Self> {
        let field = |key: &str| match block.and_then(|block| block.get(key)) {
            Some(Value::String(value)) => Some(value.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        let version = SchemeVersion::parse(field("version").as_deref())?;
        let timestamp_key = field("timestamp").unwrap_or_else(|| LEGACY_KEY.to_string());
        Ok(Self {
            timestamp_key,
            version,
        })
    }

    pub fn seed(&self, seeds: &SeedMap) -> Result<i64> {
        seeds.seed_for(&self.timestamp_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::compute_seed_map;
    use serde_json::json;

    #[test]
    fn given_version_strings_when_parsing_then_known_versions_dispatch() {
        assert_eq!(SchemeVersion::parse(Some("4.0")).unwrap(), SchemeVersion::V4);
        assert_eq!(SchemeVersion::parse(Some("5.0")).unwrap(), SchemeVersion::V5);
        assert_eq!(SchemeVersion::parse(Some("legacy")).unwrap(), SchemeVersion::Legacy);
        assert_eq!(SchemeVersion::parse(None).unwrap(), SchemeVersion::Legacy);
    }

    #[test]
    fn given_unknown_version_when_parsing_then_unsupported_version() {
        let err = SchemeVersion::parse(Some("6.0")).unwrap_err();

        assert!(matches!(err, Error::UnsupportedVersion { version } if version == "6.0"));
    }

    #[test]
    fn given_full_meta_when_correcting_v4_then_value_doubles_to_the_eighth_root() {
        let corrected = SchemeVersion::V4.correct(1.0, 1.0);

        assert!((f64::from(corrected) - 2f64.powf(0.125)).abs() < 1e-6);
        assert_eq!(SchemeVersion::V5.correct(-3.0, 0.0), -3.0);
    }

    #[test]
    fn given_legacy_scheme_when_correcting_then_magnitude_shrinks_by_a_sixteenth() {
        assert_eq!(SchemeVersion::Legacy.correct(1.0, 1.0), 0.9375);
        assert_eq!(SchemeVersion::Legacy.correct(-1.0, 1.0), -0.9375);
        assert_eq!(SchemeVersion::Legacy.correct(0.0, 1.0), 0.0);
    }

    #[test]
    fn given_numeric_timestamp_when_reading_block_then_key_is_stringified() {
        let block = json!({ "timestamp": 1698286986, "version": "4.0" });

        let params = ObfuscationParameters::from_block(Some(&block)).unwrap();
        let seed = params.seed(&compute_seed_map("100", None).unwrap()).unwrap();

        assert_eq!(params.timestamp_key, "1698286986");
        assert_eq!(params.version, SchemeVersion::V4);
        assert_eq!(seed, 21955 + 100);
    }

    #[test]
    fn given_empty_block_when_reading_then_legacy_scheme_is_selected() {
        let params = ObfuscationParameters::from_block(Some(&json!({}))).unwrap();

        assert_eq!(params.timestamp_key, LEGACY_KEY);
        assert_eq!(params.version, SchemeVersion::Legacy);
    }

    #[test]
    fn given_unregistered_timestamp_when_looking_up_seed_then_unknown_scheme() {
        let block = json!({ "timestamp": "42", "version": "4.0" });
        let params = ObfuscationParameters::from_block(Some(&block)).unwrap();

        let err = params.seed(&compute_seed_map("1", None).unwrap()).unwrap_err();

        assert!(matches!(err, Error::UnknownScheme { .. }));
    }
}
