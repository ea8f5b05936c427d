//! Background selection
//!
//! A [`BackgroundSpec`] serializes as `{"type": "color", "value": "#ff0000"}`.
//! Only the kind decides whether compositing has to start or stop; see
//! [`background_transition`].

use super::error::CompositorError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum BackgroundSpec {
    /// Passthrough
    #[default]
    None,
    /// Full-frame Gaussian blur, radius in pixels
    Blur(u32),
    /// Solid fill behind the camera frame, `#rgb`, `#rrggbb` or `#rrggbbaa`
    Color(String),
    /// Decoded bitmap behind the camera frame
    Image(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundKind {
    None,
    Blur,
    Color,
    Image,
}

impl BackgroundSpec {
    pub fn kind(&self) -> BackgroundKind {
        match self {
            BackgroundSpec::None => BackgroundKind::None,
            BackgroundSpec::Blur(_) => BackgroundKind::Blur,
            BackgroundSpec::Color(_) => BackgroundKind::Color,
            BackgroundSpec::Image(_) => BackgroundKind::Image,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, BackgroundSpec::None)
    }

    /// Check the spec can be rendered without touching any resource
    pub fn validate(&self) -> Result<(), CompositorError> {
        match self {
            BackgroundSpec::Color(hex) => parse_hex_color(hex).map(|_| ()),
            BackgroundSpec::Image(uri) if uri.trim().is_empty() => Err(CompositorError::ImageLoad {
                uri: uri.clone(),
                reason: "empty URI".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Side effect implied by switching backgrounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundTransition {
    /// Compositing must start
    Start,
    /// Compositing must stop; the raw stream becomes live again
    Stop,
    /// Compositor keeps running with a new spec
    Update,
    /// Nothing to do
    Unchanged,
}

/// Decide the side effect of moving from `previous` to `next`
pub fn background_transition(previous: &BackgroundSpec, next: &BackgroundSpec) -> BackgroundTransition {
    match (previous.is_none(), next.is_none()) {
        (true, true) => BackgroundTransition::Unchanged,
        (true, false) => BackgroundTransition::Start,
        (false, true) => BackgroundTransition::Stop,
        (false, false) if previous == next => BackgroundTransition::Unchanged,
        (false, false) => BackgroundTransition::Update,
    }
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` into RGBA
pub fn parse_hex_color(hex: &str) -> Result<[u8; 4], CompositorError> {
    let invalid = || CompositorError::InvalidColor(hex.to_string());
    let digits = hex.trim().strip_prefix('#').ok_or_else(invalid)?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let byte = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
    match digits.len() {
        3 => {
            let mut rgba = [255u8; 4];
            for (i, c) in digits.chars().enumerate() {
                let v = byte(&c.to_string())?;
                rgba[i] = v * 17;
            }
            Ok(rgba)
        }
        6 | 8 => {
            let mut rgba = [255u8; 4];
            for i in 0..digits.len() / 2 {
                rgba[i] = byte(&digits[i * 2..i * 2 + 2])?;
            }
            Ok(rgba)
        }
        _ => Err(invalid()),
    }
}

/// A selectable entry of the built-in catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundPreset {
    pub id: &'static str,
    pub label: &'static str,
    pub spec: BackgroundSpec,
}

/// Built-in background catalog
pub fn presets() -> Vec<BackgroundPreset> {
    let blur = |id, label, px| BackgroundPreset {
        id,
        label,
        spec: BackgroundSpec::Blur(px),
    };
    let color = |id, label, hex: &str| BackgroundPreset {
        id,
        label,
        spec: BackgroundSpec::Color(hex.to_string()),
    };

    vec![
        BackgroundPreset {
            id: "none",
            label: "None",
            spec: BackgroundSpec::None,
        },
        blur("blur-light", "Light blur", 5),
        blur("blur-medium", "Medium blur", 10),
        blur("blur-strong", "Strong blur", 20),
        color("studio-blue", "Studio blue", "#3f37c9"),
        color("charcoal", "Charcoal", "#1e1e24"),
        color("chroma-green", "Chroma green", "#00b140"),
        color("warm-white", "Warm white", "#f5efe6"),
    ]
}
