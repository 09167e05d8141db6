//! Passthrough copies: whole-file bytes and the audio track's samples

use std::io::{Read, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::domain::model::*;
use crate::engine::tracks::TrackRoute;
use crate::engine::{CancellationFlag, StageOutcome};
use crate::error::{CompressXError, CompressXResult};
use crate::ports::{Demuxer, Muxer, StreamOpener};

/// Copy the source bytes to `output` unchanged.
///
/// Both handles are dropped, and so closed, on every exit path.
pub fn copy_whole_file(
    streams: &dyn StreamOpener,
    source: &MediaSource,
    output: &Path,
    chunk_size: usize,
    cancel: &CancellationFlag,
) -> CompressXResult<StageOutcome> {
    let mut reader = streams
        .open_read(source)
        .map_err(|e| CompressXError::SourceNotFound {
            message: e.to_string(),
        })?;
    let mut writer = streams.open_write(output)?;

    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut copied: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            info!("whole-file copy cancelled after {} bytes", copied);
            return Ok(StageOutcome::Cancelled);
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buffer[..read])?;
        copied += read as u64;
    }
    writer.flush()?;

    info!("copied {} bytes from {} to {}", copied, source, output.display());
    Ok(StageOutcome::Completed)
}

/// Copy every sample of the audio track into the muxer, unmodified.
///
/// The muxer track is created from the source format on the first sample.
pub fn copy_audio_track(
    demuxer: &mut dyn Demuxer,
    muxer: &mut dyn Muxer,
    track: &TrackRoute,
    buffer_floor: usize,
    cancel: &CancellationFlag,
) -> CompressXResult<StageOutcome> {
    demuxer.select_track(track.index)?;
    let result = copy_selected_audio(demuxer, muxer, track, buffer_floor, cancel);
    demuxer.unselect_track(track.index);
    result
}

fn copy_selected_audio(
    demuxer: &mut dyn Demuxer,
    muxer: &mut dyn Muxer,
    track: &TrackRoute,
    buffer_floor: usize,
    cancel: &CancellationFlag,
) -> CompressXResult<StageOutcome> {
    let declared = track
        .format
        .get_int(keys::MAX_INPUT_SIZE)
        .filter(|size| *size > 0)
        .map(|size| size as usize);
    let mut buffer = vec![0u8; declared.unwrap_or(buffer_floor).max(1)];

    demuxer.seek_to(0, SeekMode::PreviousSync)?;

    let mut muxer_track: Option<usize> = None;
    let mut written: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            info!("audio copy cancelled after {} samples", written);
            return Ok(StageOutcome::Cancelled);
        }

        match demuxer.sample_track_index() {
            None => break,
            Some(index) if index != track.index => {
                demuxer.advance();
                continue;
            }
            Some(_) => {}
        }

        if let Some(size) = demuxer.sample_size() {
            if size > buffer.len() {
                debug!("growing audio buffer from {} to {}", buffer.len(), size + 1024);
                buffer.resize(size + 1024, 0);
            }
        }

        let Some(size) = demuxer.read_sample_data(&mut buffer)? else {
            break;
        };
        let target = match muxer_track {
            Some(target) => target,
            None => {
                let target = muxer.add_track(&track.format, true)?;
                debug!("muxer audio track {} added with {}", target, track.format);
                *muxer_track.insert(target)
            }
        };
        let info = BufferInfo::new(0, size, demuxer.sample_time_us(), BufferFlags::KEY_FRAME);
        muxer.write_sample_data(target, &buffer[..size], &info, true)?;
        written += 1;
        demuxer.advance();
    }

    info!("copied {} audio samples", written);
    Ok(StageOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryLibrary, MemoryMedia, MemoryMuxer};
    use crate::engine::tracks::route;

    #[test]
    fn test_whole_file_copy_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("copy.mp4");
        let media = MemoryMedia::video(480, 360, 100_000, 1_000, 3).with_bytes(5_000);
        let expected = media.bytes().to_vec();
        let library = MemoryLibrary::new();
        let source = library.insert("in.mp4", media);

        let outcome =
            copy_whole_file(&library, &source, &output, 1024, &CancellationFlag::new()).unwrap();
        assert_eq!(outcome, StageOutcome::Completed);
        assert_eq!(std::fs::read(&output).unwrap(), expected);
    }

    #[test]
    fn test_whole_file_copy_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let library = MemoryLibrary::new();
        let err = copy_whole_file(
            &library,
            &MediaSource::File("missing.mp4".into()),
            &dir.path().join("out.mp4"),
            1024,
            &CancellationFlag::new(),
        )
        .unwrap_err();
        assert_eq!(err.code(), crate::domain::errors::ErrorCode::SourceNotFound);
    }

    #[test]
    fn test_whole_file_copy_observes_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let library = MemoryLibrary::new();
        let source = library.insert("in.mp4", MemoryMedia::video(480, 360, 1, 1, 1));
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let outcome =
            copy_whole_file(&library, &source, &dir.path().join("out.mp4"), 1024, &cancel).unwrap();
        assert_eq!(outcome, StageOutcome::Cancelled);
    }

    #[test]
    fn test_audio_copy_writes_key_frames_in_order() {
        let media = MemoryMedia::video(1280, 720, 1_000_000, 1_000, 10).with_audio(20, 300);
        let mut demuxer = media.demuxer();
        let mut muxer = MemoryMuxer::detached(0);
        let audio = route(&demuxer).unwrap().audio.unwrap();

        let outcome =
            copy_audio_track(&mut demuxer, &mut muxer, &audio, 64 * 1024, &CancellationFlag::new())
                .unwrap();
        assert_eq!(outcome, StageOutcome::Completed);

        let movie = muxer.movie();
        assert_eq!(movie.tracks.len(), 1);
        let track = &movie.tracks[0];
        assert!(track.is_audio);
        assert_eq!(track.format, audio.format);
        assert_eq!(track.samples.len(), 20);
        assert!(track
            .samples
            .iter()
            .all(|s| s.flags == BufferFlags::KEY_FRAME.bits() && s.data.len() == 300));
        assert!(track
            .samples
            .windows(2)
            .all(|w| w[0].presentation_time_us < w[1].presentation_time_us));
        assert!(demuxer.selected_tracks().is_empty());
    }

    #[test]
    fn test_audio_copy_grows_buffer_for_large_samples() {
        let media = MemoryMedia::video(1280, 720, 1_000_000, 1_000, 2)
            .with_audio(4, 5_000)
            .with_audio_max_input_size(1_000);
        let mut demuxer = media.demuxer();
        let mut muxer = MemoryMuxer::detached(0);
        let audio = route(&demuxer).unwrap().audio.unwrap();

        copy_audio_track(&mut demuxer, &mut muxer, &audio, 64 * 1024, &CancellationFlag::new())
            .unwrap();
        let movie = muxer.movie();
        assert_eq!(movie.tracks[0].samples.len(), 4);
        assert!(movie.tracks[0].samples.iter().all(|s| s.data.len() == 5_000));
    }

    #[test]
    fn test_audio_copy_cancelled_before_start() {
        let media = MemoryMedia::video(1280, 720, 1_000_000, 1_000, 2).with_audio(4, 100);
        let mut demuxer = media.demuxer();
        let mut muxer = MemoryMuxer::detached(0);
        let audio = route(&demuxer).unwrap().audio.unwrap();
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let outcome = copy_audio_track(&mut demuxer, &mut muxer, &audio, 1024, &cancel).unwrap();
        assert_eq!(outcome, StageOutcome::Cancelled);
        assert!(muxer.movie().tracks.is_empty());
    }
}
