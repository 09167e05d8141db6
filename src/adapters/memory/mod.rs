// Memory adapter - In-process media backend for tests and dry runs
//
// Sources live in a `MemoryLibrary` keyed by `MediaSource`. Outputs always
// land on disk: the muxer serializes the movie it received as JSON so callers
// can inspect exactly which tracks and samples were written.

mod codecs;

pub use codecs::{CodecOptions, MemoryCodecs};

use std::collections::BTreeSet;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;

const VIDEO_SAMPLE_BASE: usize = 64;
const AUDIO_FRAME_US: i64 = 23_220;

/// One coded sample of a memory track
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySample {
    pub time_us: i64,
    pub key: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct MemoryTrack {
    format: MediaFormat,
    samples: Vec<MemorySample>,
}

/// A synthetic media file: probe metadata, demuxable tracks and raw bytes
#[derive(Debug, Clone)]
pub struct MemoryMedia {
    metadata: VideoMetadata,
    tracks: Arc<Vec<MemoryTrack>>,
    bytes: Arc<Vec<u8>>,
}

impl MemoryMedia {
    /// Source with one video track of `frame_count` evenly spaced frames
    pub fn video(width: u32, height: u32, bitrate: u64, duration_ms: u64, frame_count: usize) -> Self {
        let interval_us = if frame_count > 0 && duration_ms > 0 {
            (duration_ms * 1000 / frame_count as u64) as i64
        } else {
            33_333
        };
        let samples = (0..frame_count)
            .map(|i| MemorySample {
                time_us: i as i64 * interval_us,
                key: i % 30 == 0,
                data: vec![(i % 251) as u8; VIDEO_SAMPLE_BASE + i % 7],
            })
            .collect();
        let format = MediaFormat::video("video/avc", width, height)
            .with_int(keys::FRAME_RATE, 30)
            .with_int(keys::BIT_RATE, bitrate as i64)
            .with_int(keys::DURATION_US, (duration_ms * 1000) as i64)
            .with_int(keys::MAX_INPUT_SIZE, 4096);

        Self {
            metadata: VideoMetadata {
                width,
                height,
                rotation: 0,
                bitrate,
                duration_ms,
                mime_type: "video/mp4".to_string(),
            },
            tracks: Arc::new(vec![MemoryTrack { format, samples }]),
            bytes: Arc::new(pattern_bytes(2_048)),
        }
    }

    /// Add an audio track of `count` samples of `size` bytes each
    pub fn with_audio(mut self, count: usize, size: usize) -> Self {
        let format = MediaFormat::new("audio/mp4a-latm")
            .with_int(keys::SAMPLE_RATE, 44_100)
            .with_int(keys::CHANNEL_COUNT, 2);
        let samples = (0..count)
            .map(|i| MemorySample {
                time_us: i as i64 * AUDIO_FRAME_US,
                key: true,
                data: vec![(i % 199) as u8; size],
            })
            .collect();
        Arc::make_mut(&mut self.tracks).push(MemoryTrack { format, samples });
        self
    }

    /// Declare a max input size on every audio track
    pub fn with_audio_max_input_size(mut self, size: i64) -> Self {
        for track in Arc::make_mut(&mut self.tracks).iter_mut() {
            if track.format.is_audio() {
                track.format.set_int(keys::MAX_INPUT_SIZE, size);
            }
        }
        self
    }

    /// Drop every video track while keeping the probed metadata
    pub fn without_video(mut self) -> Self {
        Arc::make_mut(&mut self.tracks).retain(|track| !track.format.is_video());
        self
    }

    /// Add an arbitrary track
    pub fn with_track(mut self, format: MediaFormat, samples: Vec<MemorySample>) -> Self {
        Arc::make_mut(&mut self.tracks).push(MemoryTrack { format, samples });
        self
    }

    pub fn with_rotation(mut self, rotation: u32) -> Self {
        self.metadata.rotation = rotation;
        self
    }

    /// Override what the probe reports
    pub fn with_metadata(mut self, metadata: VideoMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Raw file content of `len` patterned bytes
    pub fn with_bytes(mut self, len: usize) -> Self {
        self.bytes = Arc::new(pattern_bytes(len));
        self
    }

    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn demuxer(&self) -> MemoryDemuxer {
        MemoryDemuxer::new(Arc::clone(&self.tracks))
    }
}

fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 256) as u8).collect()
}

/// Registry of memory sources. Implements the probing, demuxing and stream ports.
#[derive(Default)]
pub struct MemoryLibrary {
    media: DashMap<MediaSource, Arc<MemoryMedia>>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register media under a file name and return its source handle
    pub fn insert(&self, name: &str, media: MemoryMedia) -> MediaSource {
        let source = MediaSource::File(PathBuf::from(name));
        self.insert_source(source.clone(), media);
        source
    }

    pub fn insert_source(&self, source: MediaSource, media: MemoryMedia) {
        self.media.insert(source, Arc::new(media));
    }

    fn lookup(&self, source: &MediaSource) -> Result<Arc<MemoryMedia>, DomainError> {
        self.media
            .get(source)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DomainError::FileNotFound(source.to_string()))
    }
}

impl MetadataSource for MemoryLibrary {
    fn probe(&self, source: &MediaSource) -> Result<VideoMetadata, DomainError> {
        Ok(self.lookup(source)?.metadata.clone())
    }
}

impl DemuxerFactory for MemoryLibrary {
    fn open(&self, source: &MediaSource) -> Result<Box<dyn Demuxer>, DomainError> {
        Ok(Box::new(self.lookup(source)?.demuxer()))
    }
}

impl StreamOpener for MemoryLibrary {
    fn open_read(&self, source: &MediaSource) -> Result<Box<dyn Read + Send>, DomainError> {
        let media = self.lookup(source)?;
        Ok(Box::new(Cursor::new((*media.bytes).clone())))
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn Write + Send>, DomainError> {
        Ok(Box::new(fs::File::create(path)?))
    }
}

/// Demuxer over the tracks of a `MemoryMedia`, interleaved by timestamp
pub struct MemoryDemuxer {
    tracks: Arc<Vec<MemoryTrack>>,
    order: Vec<(usize, usize)>,
    selected: BTreeSet<usize>,
    position: usize,
}

impl MemoryDemuxer {
    fn new(tracks: Arc<Vec<MemoryTrack>>) -> Self {
        let mut order: Vec<(usize, usize)> = tracks
            .iter()
            .enumerate()
            .flat_map(|(track, data)| (0..data.samples.len()).map(move |sample| (track, sample)))
            .collect();
        order.sort_by_key(|&(track, sample)| (tracks[track].samples[sample].time_us, track));
        Self {
            tracks,
            order,
            selected: BTreeSet::new(),
            position: 0,
        }
    }

    pub fn selected_tracks(&self) -> Vec<usize> {
        self.selected.iter().copied().collect()
    }

    fn sample(&self, entry: (usize, usize)) -> &MemorySample {
        &self.tracks[entry.0].samples[entry.1]
    }

    fn current_entry(&self) -> Option<(usize, (usize, usize))> {
        self.order
            .iter()
            .enumerate()
            .skip(self.position)
            .find(|(_, (track, _))| self.selected.contains(track))
            .map(|(at, entry)| (at, *entry))
    }

    fn current(&self) -> Option<(usize, &MemorySample)> {
        self.current_entry()
            .map(|(_, entry)| (entry.0, self.sample(entry)))
    }
}

impl Demuxer for MemoryDemuxer {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<MediaFormat, DomainError> {
        self.tracks
            .get(index)
            .map(|track| track.format.clone())
            .ok_or_else(|| DomainError::BadArgs(format!("no track {}", index)))
    }

    fn select_track(&mut self, index: usize) -> Result<(), DomainError> {
        if index >= self.tracks.len() {
            return Err(DomainError::BadArgs(format!("no track {}", index)));
        }
        self.selected.insert(index);
        Ok(())
    }

    fn unselect_track(&mut self, index: usize) {
        self.selected.remove(&index);
    }

    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<(), DomainError> {
        let candidates = self
            .order
            .iter()
            .enumerate()
            .filter(|(_, entry)| self.selected.contains(&entry.0));
        self.position = match mode {
            SeekMode::PreviousSync => candidates
                .filter(|(_, entry)| {
                    let sample = self.sample(**entry);
                    sample.key && sample.time_us <= time_us
                })
                .map(|(at, _)| at)
                .last()
                .unwrap_or(0),
            SeekMode::NextSync | SeekMode::ClosestSync => candidates
                .filter(|(_, entry)| self.sample(**entry).time_us >= time_us)
                .map(|(at, _)| at)
                .next()
                .unwrap_or(self.order.len()),
        };
        Ok(())
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|(track, _)| track)
    }

    fn sample_time_us(&self) -> i64 {
        self.current().map(|(_, sample)| sample.time_us).unwrap_or(-1)
    }

    fn sample_size(&self) -> Option<usize> {
        self.current().map(|(_, sample)| sample.data.len())
    }

    fn read_sample_data(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, DomainError> {
        let Some((_, sample)) = self.current() else {
            return Ok(None);
        };
        let size = sample.data.len();
        let available = buffer.len();
        let target = buffer.get_mut(..size).ok_or_else(|| {
            DomainError::ContainerFailure(format!(
                "sample of {} bytes does not fit into {} bytes",
                size, available
            ))
        })?;
        target.copy_from_slice(&sample.data);
        Ok(Some(size))
    }

    fn advance(&mut self) -> bool {
        match self.current_entry() {
            Some((at, _)) => {
                self.position = at + 1;
                self.current_entry().is_some()
            }
            None => false,
        }
    }
}

/// Everything a memory muxer received
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MuxedMovie {
    pub rotation: u32,
    pub tracks: Vec<MuxedTrack>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxedTrack {
    pub format: MediaFormat,
    pub is_audio: bool,
    pub samples: Vec<MuxedSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxedSample {
    pub presentation_time_us: i64,
    pub flags: u32,
    pub data: Vec<u8>,
}

impl MuxedMovie {
    /// Load a movie written by a finished memory muxer
    pub fn read(path: &Path) -> Result<Self, DomainError> {
        let content = fs::read(path)?;
        serde_json::from_slice(&content)
            .map_err(|e| DomainError::InvalidFormat(format!("{}: {}", path.display(), e)))
    }
}

/// Muxer collecting samples in memory and writing them as JSON on finish
pub struct MemoryMuxer {
    path: Option<PathBuf>,
    movie: MuxedMovie,
}

impl MemoryMuxer {
    /// Muxer with no backing file
    pub fn detached(rotation: u32) -> Self {
        Self {
            path: None,
            movie: MuxedMovie {
                rotation,
                tracks: Vec::new(),
            },
        }
    }

    /// Create the output file right away, like a container builder would
    pub fn create(target: &MuxTarget) -> Result<Self, DomainError> {
        fs::File::create(&target.path)?;
        Ok(Self {
            path: Some(target.path.clone()),
            movie: MuxedMovie {
                rotation: target.rotation,
                tracks: Vec::new(),
            },
        })
    }

    pub fn movie(&self) -> MuxedMovie {
        self.movie.clone()
    }
}

impl Muxer for MemoryMuxer {
    fn add_track(&mut self, format: &MediaFormat, is_audio: bool) -> Result<usize, DomainError> {
        self.movie.tracks.push(MuxedTrack {
            format: format.clone(),
            is_audio,
            samples: Vec::new(),
        });
        Ok(self.movie.tracks.len() - 1)
    }

    fn write_sample_data(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
        is_audio: bool,
    ) -> Result<(), DomainError> {
        let target = self
            .movie
            .tracks
            .get_mut(track)
            .ok_or_else(|| DomainError::ContainerFailure(format!("no muxer track {}", track)))?;
        if target.is_audio != is_audio {
            return Err(DomainError::ContainerFailure(format!(
                "track {} kind mismatch",
                track
            )));
        }
        target.samples.push(MuxedSample {
            presentation_time_us: info.presentation_time_us,
            flags: info.flags.bits(),
            data: data.to_vec(),
        });
        Ok(())
    }

    fn finish(self: Box<Self>, discard: bool) -> Result<(), DomainError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if discard {
            debug!("discarding memory movie {}", path.display());
            return Ok(());
        }
        let content = serde_json::to_vec_pretty(&self.movie)
            .map_err(|e| DomainError::ContainerFailure(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Muxer factory for `MemoryMuxer`
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryMuxers;

impl MuxerFactory for MemoryMuxers {
    fn create(&self, target: &MuxTarget) -> Result<Box<dyn Muxer>, DomainError> {
        Ok(Box::new(MemoryMuxer::create(target)?))
    }
}

/// Port bundle backed entirely by memory
pub fn memory_ports(library: Arc<MemoryLibrary>, codecs: Arc<MemoryCodecs>) -> MediaPorts {
    MediaPorts {
        metadata: Arc::clone(&library) as Arc<dyn MetadataSource>,
        demuxers: Arc::clone(&library) as Arc<dyn DemuxerFactory>,
        muxers: Arc::new(MemoryMuxers),
        codecs,
        streams: library,
    }
}
