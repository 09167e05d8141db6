// Media formats and coded sample descriptors shared by the ports

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known format keys
pub mod keys {
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const BIT_RATE: &str = "bitrate";
    pub const DURATION_US: &str = "durationUs";
    pub const FRAME_RATE: &str = "frame-rate";
    pub const I_FRAME_INTERVAL: &str = "i-frame-interval";
    pub const MAX_INPUT_SIZE: &str = "max-input-size";
    pub const COLOR_FORMAT: &str = "color-format";
    pub const COLOR_STANDARD: &str = "color-standard";
    pub const COLOR_TRANSFER: &str = "color-transfer";
    pub const COLOR_RANGE: &str = "color-range";
    pub const ROTATION: &str = "rotation-degrees";
    pub const SAMPLE_RATE: &str = "sample-rate";
    pub const CHANNEL_COUNT: &str = "channel-count";
    /// Backend-specific handle to native codec parameters
    pub const NATIVE_HANDLE: &str = "native-handle";
}

/// Colour format value requesting surface (relay) input on an encoder
pub const COLOR_FORMAT_SURFACE: i64 = 0x7F00_0789;

pub const MIME_VIDEO_PREFIX: &str = "video/";
pub const MIME_AUDIO_PREFIX: &str = "audio/";

/// A single format entry value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormatValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatValue::Int(v) => write!(f, "{}", v),
            FormatValue::Float(v) => write!(f, "{}", v),
            FormatValue::Str(v) => f.write_str(v),
        }
    }
}

/// Coded format description of a track or codec (mime plus keyed entries)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaFormat {
    pub mime: String,
    #[serde(default)]
    pub entries: BTreeMap<String, FormatValue>,
}

impl MediaFormat {
    pub fn new(mime: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Video format with dimensions set
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self::new(mime)
            .with_int(keys::WIDTH, width as i64)
            .with_int(keys::HEIGHT, height as i64)
    }

    pub fn with_int(mut self, key: &str, value: i64) -> Self {
        self.set_int(key, value);
        self
    }

    pub fn with_str(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_str(key, value);
        self
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.entries.insert(key.to_string(), FormatValue::Int(value));
    }

    pub fn set_float(&mut self, key: &str, value: f64) {
        self.entries.insert(key.to_string(), FormatValue::Float(value));
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(key.to_string(), FormatValue::Str(value.into()));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.entries.get(key)
    }

    /// Integer value; floats are truncated
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            FormatValue::Int(v) => Some(*v),
            FormatValue::Float(v) => Some(*v as i64),
            FormatValue::Str(_) => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            FormatValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Copy an entry from another format if present there
    pub fn copy_from(&mut self, other: &MediaFormat, key: &str) {
        if let Some(value) = other.get(key) {
            self.entries.insert(key.to_string(), value.clone());
        }
    }

    pub fn is_video(&self) -> bool {
        self.mime.starts_with(MIME_VIDEO_PREFIX)
    }

    pub fn is_audio(&self) -> bool {
        self.mime.starts_with(MIME_AUDIO_PREFIX)
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{mime={}", self.mime)?;
        for (key, value) in &self.entries {
            write!(f, ", {}={}", key, value)?;
        }
        f.write_str("}")
    }
}

/// Flags attached to coded samples and codec buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(2);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(4);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        BufferFlags(bits)
    }

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn union(self, other: BufferFlags) -> Self {
        BufferFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        self.union(rhs)
    }
}

/// Location and timing of one buffer's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn new(offset: usize, size: usize, presentation_time_us: i64, flags: BufferFlags) -> Self {
        Self {
            offset,
            size,
            presentation_time_us,
            flags,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(BufferFlags::CODEC_CONFIG)
    }
}

/// Seek anchoring for demuxers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    PreviousSync,
    NextSync,
    ClosestSync,
}

/// Track indices of the tracks the job will use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackSet {
    pub video: Option<usize>,
    pub audio: Option<usize>,
}

impl TrackSet {
    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}
