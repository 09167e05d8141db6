//! Resolution tiers, quality ratios and bitrate arithmetic
//!
//! Bitrates are modelled as `width * height * 3 * ratio`, where the ratio is a
//! coarse bits-per-pixel class. All functions here are pure.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Quality ratio buckets, ascending
pub const VERY_LOW: f64 = 0.25;
pub const LOW: f64 = 0.5;
pub const MEDIUM: f64 = 1.0;
pub const HIGH: f64 = 2.0;
pub const VERY_HIGH: f64 = 4.0;

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Length of the longer side
    pub fn longer_side(&self) -> u32 {
        self.width.max(self.height)
    }

    /// `width * height * 3`, the denominator of the quality ratio
    pub fn weighted_area(&self) -> f64 {
        self.width as f64 * self.height as f64 * 3.0
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Resolution class keyed by the longer side
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResolutionTier {
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

impl ResolutionTier {
    /// Longer-side threshold of the tier in pixels
    pub fn pixels(self) -> u32 {
        match self {
            ResolutionTier::P360 => 480,
            ResolutionTier::P480 => 640,
            ResolutionTier::P720 => 1280,
            ResolutionTier::P1080 => 1920,
        }
    }

    /// Parse "360p", "480p", "720p" or "1080p"
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "360p" | "360" => Some(ResolutionTier::P360),
            "480p" | "480" => Some(ResolutionTier::P480),
            "720p" | "720" => Some(ResolutionTier::P720),
            "1080p" | "1080" => Some(ResolutionTier::P1080),
            _ => None,
        }
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResolutionTier::P360 => "360p",
            ResolutionTier::P480 => "480p",
            ResolutionTier::P720 => "720p",
            ResolutionTier::P1080 => "1080p",
        };
        f.write_str(label)
    }
}

/// Tier of a resolution; anything below 640px on the longer side is 360p
pub fn resolution_level(resolution: Resolution) -> ResolutionTier {
    let longer = resolution.longer_side();
    if longer >= ResolutionTier::P1080.pixels() {
        ResolutionTier::P1080
    } else if longer >= ResolutionTier::P720.pixels() {
        ResolutionTier::P720
    } else if longer >= ResolutionTier::P480.pixels() {
        ResolutionTier::P480
    } else {
        ResolutionTier::P360
    }
}

/// One tier down, floored at 360p
pub fn lower_tier(tier: ResolutionTier) -> ResolutionTier {
    match tier {
        ResolutionTier::P1080 => ResolutionTier::P720,
        ResolutionTier::P720 => ResolutionTier::P480,
        ResolutionTier::P480 | ResolutionTier::P360 => ResolutionTier::P360,
    }
}

/// Scale uniformly so the longer side matches the tier, then force even dimensions
pub fn scaled_resolution(resolution: Resolution, tier: ResolutionTier) -> Resolution {
    let longer = resolution.longer_side();
    if longer == 0 {
        return resolution;
    }
    let scale = tier.pixels() as f64 / longer as f64;

    let mut width = (resolution.width as f64 * scale) as u32;
    let mut height = (resolution.height as f64 * scale) as u32;
    if width % 2 == 1 {
        width += 1;
    }
    if height % 2 == 1 {
        height += 1;
    }
    Resolution::new(width, height)
}

/// `bitrate / (w * h * 3)`
pub fn quality_ratio(resolution: Resolution, bitrate: u64) -> f64 {
    let area = resolution.weighted_area();
    if area == 0.0 {
        return 0.0;
    }
    bitrate as f64 / area
}

/// One bucket down; ratios already below MEDIUM are left alone
pub fn lower_quality_ratio(ratio: f64) -> f64 {
    if ratio >= VERY_HIGH {
        HIGH
    } else if ratio >= HIGH {
        MEDIUM
    } else if ratio >= MEDIUM {
        LOW
    } else {
        ratio
    }
}

/// `round(w * h * 3 * ratio)`
pub fn bitrate_for(resolution: Resolution, ratio: f64) -> u64 {
    (resolution.weighted_area() * ratio).round().max(0.0) as u64
}

/// Name of the bucket a ratio falls into
pub fn ratio_label(ratio: f64) -> &'static str {
    if ratio >= VERY_HIGH {
        "very-high"
    } else if ratio >= HIGH {
        "high"
    } else if ratio >= MEDIUM {
        "medium"
    } else if ratio >= LOW {
        "low"
    } else {
        "very-low"
    }
}

/// Resolution plus bitrate of a video rendition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityModel {
    resolution: Resolution,
    bitrate: u64,
}

impl QualityModel {
    pub fn new(resolution: Resolution, bitrate: u64) -> Self {
        Self { resolution, bitrate }
    }

    /// Model whose bitrate is derived from a ratio
    pub fn from_ratio(resolution: Resolution, ratio: f64) -> Self {
        Self::new(resolution, bitrate_for(resolution, ratio))
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    pub fn bitrate(&self) -> u64 {
        self.bitrate
    }

    pub fn tier(&self) -> ResolutionTier {
        resolution_level(self.resolution)
    }

    pub fn ratio(&self) -> f64 {
        quality_ratio(self.resolution, self.bitrate)
    }
}

impl fmt::Display for QualityModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) @ {} bps, ratio {:.3} ({})",
            self.resolution,
            self.tier(),
            self.bitrate,
            self.ratio(),
            ratio_label(self.ratio())
        )
    }
}
