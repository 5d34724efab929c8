//! Job descriptors and the per-algorithm descriptor builder.
//!
//! A descriptor is the full parameter payload for one unit of work. It is
//! built by copying an explicit allow-list of parameters from the base batch
//! configuration, then applying iteration-specific overrides (which always
//! win), and is immutable once built.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use crate::error::{Error, Result};

/// Generation algorithm a job targets. The wire tag and queue name match
/// what the queue workers expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Animate a source image into a short video clip.
    #[serde(rename = "image-to-video")]
    ImageToVideo,
    /// Generate a still image from a text prompt.
    #[serde(rename = "text-to-image")]
    TextToImage,
    /// Upscale and frame-interpolate an existing video.
    #[serde(rename = "upscale")]
    Upscale,
}

impl Algorithm {
    /// Tag placed in the descriptor's `algorithm` field.
    pub fn wire_tag(&self) -> &'static str {
        match self {
            Self::ImageToVideo => "image-to-video",
            Self::TextToImage => "text-to-image",
            Self::Upscale => "upscale",
        }
    }

    /// Queue name under which the result store namespaces this algorithm's jobs.
    pub fn queue(&self) -> &'static str {
        match self {
            Self::ImageToVideo => "img2vid",
            Self::TextToImage => "txt2img",
            Self::Upscale => "upscale",
        }
    }

    /// Base-config parameters copied into descriptors for this algorithm.
    ///
    /// Unrecognized keys in the base config are ignored, never forwarded.
    pub fn passthrough_params(&self) -> &'static [&'static str] {
        match self {
            Self::ImageToVideo => &[
                "size",
                "duration",
                "num_inference_steps",
                "guidance",
                "seed",
                "negative_prompt",
                "flow_shift",
                "enable_prompt_optimization",
                "enable_safety_checker",
            ],
            Self::TextToImage => &["size", "negative_prompt", "enable_safety_checker"],
            Self::Upscale => &[
                "upscale_factor",
                "interpolation_factor",
                "output_format",
                "tile_size",
                "tile_padding",
                "quality",
                "output_fps",
            ],
        }
    }

    /// Fields that must be present after the merge.
    fn required_params(&self) -> &'static [&'static str] {
        match self {
            Self::ImageToVideo => &["prompt", "image"],
            Self::TextToImage => &["prompt"],
            Self::Upscale => &["source"],
        }
    }

    /// File extension of the artifact this algorithm produces.
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            Self::ImageToVideo | Self::Upscale => "mp4",
            Self::TextToImage => "png",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_tag())
    }
}

/// Immutable parameter payload describing one unit of work.
///
/// Parameters are kept in a `BTreeMap` so serialization is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDescriptor {
    algorithm: Algorithm,
    params: BTreeMap<String, JsonValue>,
}

impl JobDescriptor {
    /// The algorithm this descriptor targets.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Look up a parameter value.
    pub fn param(&self, key: &str) -> Option<&JsonValue> {
        self.params.get(key)
    }

    /// Serialize to the wire shape consumed by the submission command:
    /// a flat JSON object with the algorithm tag alongside the parameters.
    pub fn to_wire(&self) -> JsonValue {
        let mut obj = Map::new();
        obj.insert("algorithm".to_string(), json!(self.algorithm.wire_tag()));
        for (key, value) in &self.params {
            obj.insert(key.clone(), value.clone());
        }
        JsonValue::Object(obj)
    }
}

/// Build a descriptor from a base configuration plus iteration overrides.
///
/// Only allow-listed keys are copied from `base`; `overrides` always win on
/// key collisions. Fails with `Error::Config` if a required field is absent
/// after the merge.
pub fn build_descriptor(
    algorithm: Algorithm,
    base: &JsonValue,
    overrides: impl IntoIterator<Item = (String, JsonValue)>,
) -> Result<JobDescriptor> {
    let mut params = BTreeMap::new();

    if let Some(base_obj) = base.as_object() {
        for key in algorithm.passthrough_params() {
            if let Some(value) = base_obj.get(*key) {
                params.insert((*key).to_string(), value.clone());
            }
        }
    }

    for (key, value) in overrides {
        params.insert(key, value);
    }

    for required in algorithm.required_params() {
        if !params.contains_key(*required) {
            return Err(Error::Config(format!(
                "descriptor for {} is missing required field '{}'",
                algorithm, required
            )));
        }
    }

    Ok(JobDescriptor { algorithm, params })
}

/// Compose the effective prompt for one iteration: base prompt plus the
/// combo suffix, whitespace-trimmed.
pub fn compose_prompt(base_prompt: &str, combo: &str) -> String {
    format!("{} {}", base_prompt, combo).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> JsonValue {
        json!({
            "prompt": "a quiet harbor",
            "size": "832*480",
            "duration": 5,
            "guidance": 5.0,
            "seed": -1,
            "api_key": "should-never-be-copied",
            "image_path": "assets/",
        })
    }

    #[test]
    fn test_build_copies_only_allowlisted_params() {
        let desc = build_descriptor(
            Algorithm::ImageToVideo,
            &base_config(),
            [
                ("prompt".to_string(), json!("a quiet harbor at dusk")),
                ("image".to_string(), json!("boats.png")),
            ],
        )
        .unwrap();

        assert_eq!(desc.param("size"), Some(&json!("832*480")));
        assert_eq!(desc.param("duration"), Some(&json!(5)));
        assert_eq!(desc.param("api_key"), None);
        assert_eq!(desc.param("image_path"), None);
    }

    #[test]
    fn test_build_overrides_win_over_base() {
        let desc = build_descriptor(
            Algorithm::ImageToVideo,
            &base_config(),
            [
                ("prompt".to_string(), json!("override")),
                ("image".to_string(), json!("x.png")),
                ("seed".to_string(), json!(42)),
            ],
        )
        .unwrap();

        assert_eq!(desc.param("seed"), Some(&json!(42)));
        assert_eq!(desc.param("prompt"), Some(&json!("override")));
    }

    #[test]
    fn test_build_missing_required_field_fails() {
        let err = build_descriptor(
            Algorithm::ImageToVideo,
            &base_config(),
            [("prompt".to_string(), json!("no image given"))],
        )
        .unwrap_err();

        match err {
            Error::Config(msg) => assert!(msg.contains("image")),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_build_text_to_image_requires_only_prompt() {
        let desc = build_descriptor(
            Algorithm::TextToImage,
            &json!({"size": "1024*1024"}),
            [("prompt".to_string(), json!("a red door"))],
        )
        .unwrap();

        assert_eq!(desc.param("prompt"), Some(&json!("a red door")));
        // Image-to-video-only params never leak into other algorithms.
        assert_eq!(desc.param("duration"), None);
    }

    #[test]
    fn test_to_wire_includes_algorithm_tag() {
        let desc = build_descriptor(
            Algorithm::TextToImage,
            &json!({}),
            [("prompt".to_string(), json!("p"))],
        )
        .unwrap();

        let wire = desc.to_wire();
        assert_eq!(wire["algorithm"], json!("text-to-image"));
        assert_eq!(wire["prompt"], json!("p"));
    }

    #[test]
    fn test_to_wire_is_deterministic() {
        let build = || {
            build_descriptor(
                Algorithm::ImageToVideo,
                &base_config(),
                [
                    ("prompt".to_string(), json!("p")),
                    ("image".to_string(), json!("i.png")),
                ],
            )
            .unwrap()
        };
        let a = serde_json::to_string(&build().to_wire()).unwrap();
        let b = serde_json::to_string(&build().to_wire()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_compose_prompt() {
        assert_eq!(compose_prompt("a harbor", "at dusk"), "a harbor at dusk");
        assert_eq!(compose_prompt("a harbor", ""), "a harbor");
        assert_eq!(compose_prompt("", "at dusk"), "at dusk");
    }

    #[test]
    fn test_algorithm_queue_names() {
        assert_eq!(Algorithm::ImageToVideo.queue(), "img2vid");
        assert_eq!(Algorithm::TextToImage.queue(), "txt2img");
        assert_eq!(Algorithm::Upscale.queue(), "upscale");
    }

    #[test]
    fn test_algorithm_serde_roundtrip() {
        for algo in [
            Algorithm::ImageToVideo,
            Algorithm::TextToImage,
            Algorithm::Upscale,
        ] {
            let s = serde_json::to_string(&algo).unwrap();
            let back: Algorithm = serde_json::from_str(&s).unwrap();
            assert_eq!(algo, back);
        }
    }
}
