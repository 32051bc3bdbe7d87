use std::borrow::Cow;
use std::fs;

use aes::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use gltf::binary::{Glb, Header};
use serde_json::{Value, json};

use vrmdeob::config::{DeobOptions, HubSettings};
use vrmdeob::deobfuscate::SchemeVersion;
use vrmdeob::document::Document;
use vrmdeob::envelope::decrypt_and_decode;
use vrmdeob::fetch::ModelCache;
use vrmdeob::seed::ModelId;
use vrmdeob::{PipelineHooks, deobfuscate_model, run_pipeline_on_bytes};

const OPTIMIZED_URL: &str =
    "https://vroid-hub.pximg.net/v2/character_models/9876/versions/42/optimized/model.vrm?s=op&t=1";

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

fn seal(plaintext: &[u8]) -> Vec<u8> {
    let iv = [7u8; 16];
    let key = [42u8; 32];
    let mut inner = (plaintext.len() as u32).to_le_bytes().to_vec();
    inner.extend_from_slice(&zstd::bulk::compress(plaintext, 3).unwrap());
    let ciphertext = Aes256CbcEnc::new_from_slices(&key, &iv)
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(&inner);

    let mut out = iv.to_vec();
    out.extend_from_slice(&key);
    out.extend_from_slice(&ciphertext);
    out
}

fn glb(json: &Value, bin: Vec<u8>) -> Vec<u8> {
    let json = serde_json::to_vec(json).unwrap();
    let glb = Glb {
        header: Header {
            magic: *b"glTF",
            version: 2,
            length: 0,
        },
        json: Cow::Owned(json),
        bin: Some(Cow::Owned(bin)),
    };
    let mut out = Vec::new();
    glb.to_writer(&mut out).unwrap();
    out
}

const POSITIONS: [f32; 9] = [0.25, 1.5, -0.5, -2.0, 0.125, 1.0, 0.75, -0.25, 4.0];

/// A VRM 1.0 avatar: one accessor shared by two primitives, an MToon
/// material sampling a basisu-sourced image, and a spring-bone block.
fn avatar() -> Vec<u8> {
    let mut bin: Vec<u8> = POSITIONS.iter().flat_map(|v| v.to_le_bytes()).collect();
    bin.extend_from_slice(b"\x89PNG\r\n\x1a\n");

    let json = json!({
        "asset": { "version": "2.0", "generator": "VRoid Studio" },
        "extensionsUsed": [
            "VRMC_vrm", "VRMC_materials_mtoon", "VRMC_springBone",
            "PIXIV_vroid_hub_preview_mesh", "KHR_texture_basisu"
        ],
        "extensionsRequired": ["KHR_texture_basisu"],
        "extensions": {
            "VRMC_vrm": { "specVersion": "1.0", "meta": { "name": "Sample" } },
            "VRMC_springBone": { "specVersion": "1.0", "springs": [{ "name": "Hair", "joints": [] }] },
            "PIXIV_vroid_hub_preview_mesh": { "timestamp": 1599883309, "version": "4.0" }
        },
        "buffers": [{ "byteLength": bin.len() }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 8 }
        ],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3" }
        ],
        "images": [{ "name": "Face", "bufferView": 1, "mimeType": "image/png" }],
        "samplers": [{ "magFilter": 9729, "minFilter": 9987 }],
        "textures": [{
            "sampler": 0,
            "extensions": { "KHR_texture_basisu": { "source": 0 } }
        }],
        "materials": [{
            "name": "Face",
            "pbrMetallicRoughness": { "baseColorTexture": { "index": 0 } },
            "extensions": { "VRMC_materials_mtoon": {
                "specVersion": "1.0",
                "shadeMultiplyTexture": { "index": 0 }
            } }
        }],
        "meshes": [
            { "primitives": [{ "attributes": { "POSITION": 0 }, "material": 0 }] },
            { "primitives": [{ "attributes": { "POSITION": 0 }, "material": 0 }] }
        ]
    });
    glb(&json, bin)
}

fn assert_clean_output(bytes: &[u8]) {
    let output = Document::from_glb(bytes).unwrap();
    let json = output.json();

    let extensions = json["extensions"].as_object().unwrap();
    assert!(extensions.contains_key("VRMC_vrm"));
    assert_eq!(json["extensions"]["VRMC_springBone"]["springs"][0]["name"], "Hair");
    assert!(!extensions.contains_key("PIXIV_vroid_hub_preview_mesh"));

    let used: Vec<&str> = json["extensionsUsed"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(used.contains(&"VRMC_materials_mtoon"));
    assert!(!used.contains(&"KHR_texture_basisu"));
    assert!(json.get("extensionsRequired").is_none());

    let mtoon = &json["materials"][0]["extensions"]["VRMC_materials_mtoon"];
    let texture = mtoon["shadeMultiplyTexture"]["index"].as_u64().unwrap() as usize;
    assert_eq!(json["textures"][texture]["source"], 0);

    let positions = output.read_positions(0).unwrap();
    let original: Vec<f32> = positions.iter().flat_map(|p| p.iter().copied()).collect();
    assert_ne!(original, POSITIONS.to_vec());
}

#[test]
fn given_sealed_avatar_when_decrypting_and_running_pipeline_then_vrm_is_restored() {
    let glb = decrypt_and_decode(&seal(&avatar())).unwrap();

    let (bytes, report) =
        run_pipeline_on_bytes("9876", Some(OPTIMIZED_URL), &glb, PipelineHooks::default()).unwrap();

    assert_eq!(report.version, SchemeVersion::V4);
    assert_eq!(report.timestamp_key, "1599883309");
    assert_eq!(report.seed, 3549 + 56192010);
    assert_eq!(report.stats.primitives, 2);
    assert_eq!(report.stats.corrected_vertices, 3);
    assert_eq!(report.stats.skipped_vertices, 3);
    assert_clean_output(&bytes);
}

#[test]
fn given_same_input_when_running_twice_then_output_is_identical() {
    let glb = avatar();

    let (first, _) = run_pipeline_on_bytes("9876", None, &glb, PipelineHooks::default()).unwrap();
    let (second, _) = run_pipeline_on_bytes("9876", None, &glb, PipelineHooks::default()).unwrap();

    assert_eq!(first, second);
}

#[test]
fn given_cached_model_when_deobfuscating_then_no_download_is_needed() {
    let root = tempfile::tempdir().unwrap();
    let cache_dir = root.path().join("cache");
    let id = ModelId::parse("https://hub.vroid.com/characters/1/models/9876").unwrap();
    ModelCache::new(&cache_dir)
        .store(&id, &avatar(), OPTIMIZED_URL)
        .unwrap();

    let options = DeobOptions {
        hub: HubSettings {
            api_base: "http://127.0.0.1:9/api".to_string(),
            ..HubSettings::default()
        },
        cache_dir,
        output_dir: root.path().join("out"),
        debug_dir: Some(root.path().join("debug")),
        ..DeobOptions::default()
    };

    let report = deobfuscate_model("9876", &options, None).unwrap();

    let output_path = report.output_path.unwrap();
    assert_eq!(output_path, root.path().join("out").join("9876.deob.vrm"));
    assert_clean_output(&fs::read(&output_path).unwrap());
    assert!(root.path().join("debug").join("VRMC_springBone.json").is_file());
    assert_eq!(report.seed, 3549 + 56192010);
}
