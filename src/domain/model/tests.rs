// Unit tests for domain models

#[cfg(test)]
mod tests {
    use crate::domain::errors::*;
    use crate::domain::model::*;
    use std::path::PathBuf;

    #[test]
    fn test_resolution_level_thresholds() {
        assert_eq!(resolution_level(Resolution::new(1920, 1080)), ResolutionTier::P1080);
        assert_eq!(resolution_level(Resolution::new(1080, 1920)), ResolutionTier::P1080);
        assert_eq!(resolution_level(Resolution::new(1280, 720)), ResolutionTier::P720);
        assert_eq!(resolution_level(Resolution::new(1279, 720)), ResolutionTier::P480);
        assert_eq!(resolution_level(Resolution::new(640, 480)), ResolutionTier::P480);
        assert_eq!(resolution_level(Resolution::new(480, 360)), ResolutionTier::P360);
        assert_eq!(resolution_level(Resolution::new(160, 120)), ResolutionTier::P360);
        assert_eq!(resolution_level(Resolution::new(3840, 2160)), ResolutionTier::P1080);
    }

    #[test]
    fn test_lower_tier_stabilizes_at_360p() {
        assert_eq!(lower_tier(ResolutionTier::P1080), ResolutionTier::P720);
        assert_eq!(lower_tier(ResolutionTier::P720), ResolutionTier::P480);
        assert_eq!(lower_tier(ResolutionTier::P480), ResolutionTier::P360);
        assert_eq!(lower_tier(ResolutionTier::P360), ResolutionTier::P360);
    }

    #[test]
    fn test_lower_quality_ratio_stabilizes_at_low() {
        assert_eq!(lower_quality_ratio(8.0), HIGH);
        assert_eq!(lower_quality_ratio(VERY_HIGH), HIGH);
        assert_eq!(lower_quality_ratio(3.0), MEDIUM);
        assert_eq!(lower_quality_ratio(HIGH), MEDIUM);
        assert_eq!(lower_quality_ratio(MEDIUM), LOW);
        assert_eq!(lower_quality_ratio(LOW), LOW);
        assert_eq!(lower_quality_ratio(0.7), 0.7);
        assert_eq!(lower_quality_ratio(VERY_LOW), VERY_LOW);

        let mut ratio = 10.0;
        for _ in 0..8 {
            ratio = lower_quality_ratio(ratio);
        }
        assert_eq!(ratio, LOW);
    }

    #[test]
    fn test_scaled_resolution_is_even_and_keeps_aspect() {
        let scaled = scaled_resolution(Resolution::new(1920, 1080), ResolutionTier::P720);
        assert_eq!(scaled, Resolution::new(1280, 720));

        // 1000x563 -> 640 / 1000 = 0.64 -> 640 x 360.32 -> 640 x 360
        let scaled = scaled_resolution(Resolution::new(1000, 563), ResolutionTier::P480);
        assert_eq!(scaled, Resolution::new(640, 360));

        for (w, h) in [(1921, 1081), (1366, 768), (720, 1280), (999, 333), (853, 480)] {
            for tier in [
                ResolutionTier::P360,
                ResolutionTier::P480,
                ResolutionTier::P720,
                ResolutionTier::P1080,
            ] {
                let scaled = scaled_resolution(Resolution::new(w, h), tier);
                assert_eq!(scaled.width % 2, 0, "{}x{} -> {}", w, h, scaled);
                assert_eq!(scaled.height % 2, 0, "{}x{} -> {}", w, h, scaled);
                let before = w as f64 / h as f64;
                let after = scaled.width as f64 / scaled.height as f64;
                assert!((before - after).abs() / before < 0.02, "{}x{} -> {}", w, h, scaled);
            }
        }
    }

    #[test]
    fn test_scaled_resolution_rounds_odd_up() {
        // 1280 * (480 / 1280) = 480, 717 * 0.375 = 268.875 -> 268
        let scaled = scaled_resolution(Resolution::new(1280, 717), ResolutionTier::P360);
        assert_eq!(scaled, Resolution::new(480, 268));

        // 1280 * (480 / 1280) = 480, 723 * 0.375 = 271.125 -> 271 -> 272
        let scaled = scaled_resolution(Resolution::new(1280, 723), ResolutionTier::P360);
        assert_eq!(scaled, Resolution::new(480, 272));
    }

    #[test]
    fn test_ratio_round_trips_through_bitrate() {
        for (w, h) in [(1920, 1080), (1280, 720), (640, 360), (482, 270)] {
            let resolution = Resolution::new(w, h);
            for ratio in [VERY_LOW, LOW, MEDIUM, HIGH, VERY_HIGH, 0.37] {
                let bitrate = bitrate_for(resolution, ratio);
                let back = quality_ratio(resolution, bitrate);
                assert!((back - ratio).abs() <= 1.0 / resolution.weighted_area());
            }
        }
    }

    #[test]
    fn test_bitrate_for_rounds() {
        assert_eq!(bitrate_for(Resolution::new(1280, 720), LOW), 1_382_400);
        assert_eq!(bitrate_for(Resolution::new(1, 1), 0.5), 2);
        assert_eq!(bitrate_for(Resolution::new(1, 1), 0.1), 0);
    }

    #[test]
    fn test_quality_ratio_zero_area() {
        assert_eq!(quality_ratio(Resolution::new(0, 720), 1000), 0.0);
    }

    #[test]
    fn test_quality_model_derived_values() {
        let model = QualityModel::new(Resolution::new(1920, 1080), 6_220_800);
        assert_eq!(model.tier(), ResolutionTier::P1080);
        assert_eq!(model.ratio(), 1.0);
        assert_eq!(model.width(), 1920);
        assert_eq!(model.height(), 1080);

        let derived = QualityModel::from_ratio(Resolution::new(1280, 720), LOW);
        assert_eq!(derived.bitrate(), 1_382_400);
        assert_eq!(ratio_label(derived.ratio()), "low");
    }

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!(ResolutionTier::parse("720p"), Some(ResolutionTier::P720));
        assert_eq!(ResolutionTier::parse(" 1080P "), Some(ResolutionTier::P1080));
        assert_eq!(ResolutionTier::parse("360"), Some(ResolutionTier::P360));
        assert_eq!(ResolutionTier::parse("4k"), None);
        assert_eq!(ResolutionTier::P480.to_string(), "480p");
        assert!(ResolutionTier::P360 < ResolutionTier::P1080);
    }

    #[test]
    fn test_metadata_normalize_orientation() {
        let mut metadata = VideoMetadata {
            width: 1920,
            height: 1080,
            rotation: 90,
            bitrate: 8_000_000,
            duration_ms: 1000,
            mime_type: "video/mp4".to_string(),
        };
        metadata.normalize_orientation();
        assert_eq!((metadata.width, metadata.height, metadata.rotation), (1080, 1920, 0));

        metadata.rotation = 180;
        metadata.normalize_orientation();
        assert_eq!((metadata.width, metadata.height, metadata.rotation), (1080, 1920, 0));

        metadata.rotation = 270;
        metadata.normalize_orientation();
        assert_eq!((metadata.width, metadata.height, metadata.rotation), (1920, 1080, 0));
    }

    #[test]
    fn test_metadata_validate() {
        let mut metadata = VideoMetadata {
            width: 0,
            height: 720,
            ..Default::default()
        };
        assert!(matches!(metadata.validate(), Err(DomainError::InvalidFormat(_))));
        metadata.width = 1280;
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn test_media_format_entries() {
        let mut format = MediaFormat::video("video/avc", 1280, 720)
            .with_int(keys::FRAME_RATE, 25)
            .with_str("language", "und");
        format.set_float(keys::I_FRAME_INTERVAL, 2.5);

        assert!(format.is_video());
        assert!(!format.is_audio());
        assert_eq!(format.get_int(keys::WIDTH), Some(1280));
        assert_eq!(format.get_int(keys::I_FRAME_INTERVAL), Some(2));
        assert_eq!(format.get_str("language"), Some("und"));
        assert_eq!(format.get_int("language"), None);
        assert_eq!(format.get_int(keys::MAX_INPUT_SIZE), None);

        let mut target = MediaFormat::new("video/avc");
        target.copy_from(&format, keys::FRAME_RATE);
        target.copy_from(&format, keys::COLOR_RANGE);
        assert_eq!(target.get_int(keys::FRAME_RATE), Some(25));
        assert!(!target.contains(keys::COLOR_RANGE));
    }

    #[test]
    fn test_buffer_flags() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.contains(BufferFlags::KEY_FRAME));
        assert!(flags.contains(BufferFlags::END_OF_STREAM));
        assert!(!flags.contains(BufferFlags::CODEC_CONFIG));
        assert!(!flags.contains(BufferFlags::NONE));

        let info = BufferInfo::new(0, 10, 33_000, BufferFlags::CODEC_CONFIG);
        assert!(info.is_codec_config());
        assert!(!info.is_end_of_stream());
    }

    #[test]
    fn test_media_source_parse() {
        assert_eq!(
            MediaSource::parse("clips/a.mp4"),
            MediaSource::File(PathBuf::from("clips/a.mp4"))
        );
        assert_eq!(
            MediaSource::parse("C:\\videos\\a.mp4"),
            MediaSource::File(PathBuf::from("C:\\videos\\a.mp4"))
        );
        assert!(matches!(
            MediaSource::parse("content://media/external/video/12"),
            MediaSource::Uri(_)
        ));
    }

    #[test]
    fn test_media_source_local_path() {
        let source = MediaSource::Uri("file:///tmp/in.mp4".to_string());
        assert_eq!(source.local_path(), Some(PathBuf::from("/tmp/in.mp4")));
        assert_eq!(source.file_name().as_deref(), Some("in.mp4"));

        let remote = MediaSource::Uri("https://example.com/v/clip.mov".to_string());
        assert_eq!(remote.local_path(), None);
        assert_eq!(remote.file_name().as_deref(), Some("clip.mov"));

        let file = MediaSource::from(PathBuf::from("/data/x.mkv"));
        assert_eq!(file.file_name().as_deref(), Some("x.mkv"));
    }

    #[test]
    fn test_job_outcome_state() {
        let done = JobOutcome::Completed {
            output: PathBuf::from("out.mp4"),
        };
        assert!(done.is_success());
        assert_eq!(done.state(), JobState::Completed);

        let failed = JobOutcome::Failed {
            code: ErrorCode::VideoTrackNotFound,
            message: "no video".to_string(),
        };
        assert!(!failed.is_success());
        assert!(failed.state().is_terminal());
        assert!(!JobState::Transcoding.is_terminal());
        assert_eq!(JobOutcome::Cancelled.state(), JobState::Cancelled);
    }

    #[test]
    fn test_plan_accessors() {
        let source = QualityModel::new(Resolution::new(1920, 1080), 6_220_800);
        let target = QualityModel::new(Resolution::new(1280, 720), 1_382_400);
        let plan = CompressionPlan::Transcode { source, target };
        assert_eq!(plan.source(), source);
        assert_eq!(plan.target(), Some(target));
        assert_eq!(CompressionPlan::Passthrough { source }.target(), None);
    }
}
