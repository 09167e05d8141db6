//! Track routing by media type

use crate::domain::errors::DomainError;
use crate::domain::model::{MediaFormat, TrackSet, MIME_AUDIO_PREFIX, MIME_VIDEO_PREFIX};
use crate::ports::Demuxer;

/// A demuxer track and its coded format
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRoute {
    pub index: usize,
    pub format: MediaFormat,
}

/// First video and first audio track of a source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutedTracks {
    pub video: Option<TrackRoute>,
    pub audio: Option<TrackRoute>,
}

impl RoutedTracks {
    /// Partition formats by mime prefix, first match of each kind wins
    pub fn from_formats(formats: impl IntoIterator<Item = MediaFormat>) -> Self {
        let mut routed = RoutedTracks::default();
        for (index, format) in formats.into_iter().enumerate() {
            if routed.video.is_none() && format.mime.starts_with(MIME_VIDEO_PREFIX) {
                routed.video = Some(TrackRoute { index, format });
            } else if routed.audio.is_none() && format.mime.starts_with(MIME_AUDIO_PREFIX) {
                routed.audio = Some(TrackRoute { index, format });
            }
        }
        routed
    }

    pub fn track_set(&self) -> TrackSet {
        TrackSet {
            video: self.video.as_ref().map(|track| track.index),
            audio: self.audio.as_ref().map(|track| track.index),
        }
    }
}

/// Route every track the demuxer exposes
pub fn route(demuxer: &dyn Demuxer) -> Result<RoutedTracks, DomainError> {
    let formats = (0..demuxer.track_count())
        .map(|index| demuxer.track_format(index))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RoutedTracks::from_formats(formats))
}
