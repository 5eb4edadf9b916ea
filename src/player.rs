//! Multi-sequence playback
//!
//! Chains sequences through the engine at capture rate. Between sequences
//! the engine's trajectory is checkpointed as a submap and the engine is
//! told the dataset changed; after the last one the run is finalized.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use opencv::core::{Mat, Size};
use opencv::imgcodecs;
use opencv::prelude::*;

use crate::config::*;
use crate::dataset::{CameraMode, FrameImages, Sequence};
use crate::engine::SlamEngine;
use crate::pacer::{self, Sleeper};

pub trait FrameReader {
    /// An image that cannot be read is an error, never an empty [Mat].
    fn read(&mut self, path: &str) -> Result<Mat>;
}

#[derive(Debug, Default)]
pub struct ImreadReader;

impl FrameReader for ImreadReader {
    fn read(&mut self, path: &str) -> Result<Mat> {
        let img = imgcodecs::imread(path, imgcodecs::IMREAD_UNCHANGED)
            .with_context(|| format!("Failed to load image at: {}", path))?;
        if img.empty() {
            bail!("Failed to load image at: {}", path);
        }
        Ok(img)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing(usize),
    Checkpointing(usize),
    Finalizing,
    Done,
}

/// Mutable state of one run.
#[derive(Debug, Default)]
pub struct PlaybackSession {
    pub current: usize,
    /// engine time per frame, all sequences
    pub track_times: Vec<Duration>,
    pub output_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSummary {
    pub frames: usize,
    pub median: Duration,
    pub mean: Duration,
}

impl PlaybackSession {
    pub fn summary(&self) -> PlaybackSummary {
        let mut times = self.track_times.clone();
        times.sort();
        let frames = times.len();
        let median = times.get(frames / 2).copied().unwrap_or_default();
        let mean = if frames == 0 {
            Duration::ZERO
        } else {
            times.iter().sum::<Duration>() / frames as u32
        };
        PlaybackSummary {
            frames,
            median,
            mean,
        }
    }
}

/// Files written when a sequence other than the last one ends.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub trajectory: PathBuf,
    /// monocular only
    pub keyframe_trajectory: Option<PathBuf>,
}

impl Checkpoint {
    pub fn for_sequence(submap_dir: &Path, seq: &str, mode: CameraMode) -> Self {
        let keyframe_trajectory = match mode {
            CameraMode::Monocular => Some(submap_dir.join(format!("kf_SubMap_{}.txt", seq))),
            CameraMode::Stereo => None,
        };
        Self {
            trajectory: submap_dir.join(format!("f_SubMap_{}.txt", seq)),
            keyframe_trajectory,
        }
    }
}

/// Files written once every sequence has been played.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalOutput {
    Monocular {
        trajectory: PathBuf,
        keyframe_trajectory: PathBuf,
    },
    Stereo {
        trajectory: PathBuf,
        lost_frames: PathBuf,
    },
}

impl FinalOutput {
    pub fn new(tag: Option<&str>, mode: CameraMode) -> Self {
        let trajectory = match tag {
            Some(tag) => PathBuf::from(format!("f_{}.txt", tag)),
            None => PathBuf::from(DEFAULT_TRAJECTORY_FILE),
        };
        match mode {
            CameraMode::Monocular => Self::Monocular {
                trajectory,
                keyframe_trajectory: match tag {
                    Some(tag) => PathBuf::from(format!("kf_{}.txt", tag)),
                    None => PathBuf::from(DEFAULT_KEYFRAME_TRAJECTORY_FILE),
                },
            },
            CameraMode::Stereo => Self::Stereo {
                trajectory,
                lost_frames: match tag {
                    Some(tag) => PathBuf::from(format!("lost_{}.txt", tag)),
                    None => PathBuf::from(DEFAULT_LOST_FRAMES_FILE),
                },
            },
        }
    }

    fn in_dir(self, dir: &Path) -> Self {
        match self {
            Self::Monocular {
                trajectory,
                keyframe_trajectory,
            } => Self::Monocular {
                trajectory: dir.join(trajectory),
                keyframe_trajectory: dir.join(keyframe_trajectory),
            },
            Self::Stereo {
                trajectory,
                lost_frames,
            } => Self::Stereo {
                trajectory: dir.join(trajectory),
                lost_frames: dir.join(lost_frames),
            },
        }
    }
}

pub struct Player<E, R, S>
where
    E: SlamEngine,
    R: FrameReader,
    S: Sleeper,
{
    engine: E,
    reader: R,
    sleeper: S,
    mode: CameraMode,
    sequences: Vec<Sequence>,
    submap_dir: PathBuf,
    output_dir: PathBuf,
    state: PlaybackState,
    pub session: PlaybackSession,
}

impl<E, R, S> Player<E, R, S>
where
    E: SlamEngine,
    R: FrameReader,
    S: Sleeper,
{
    pub fn new(engine: E, reader: R, sleeper: S, mode: CameraMode, sequences: Vec<Sequence>) -> Self {
        Self {
            engine,
            reader,
            sleeper,
            mode,
            sequences,
            submap_dir: PathBuf::from(DEFAULT_SUBMAP_DIR),
            output_dir: PathBuf::new(),
            state: PlaybackState::Idle,
            session: PlaybackSession::default(),
        }
    }

    pub fn with_output_tag(mut self, tag: Option<String>) -> Self {
        self.session.output_tag = tag;
        self
    }

    pub fn with_submap_dir(mut self, dir: PathBuf) -> Self {
        self.submap_dir = dir;
        self
    }

    /// Directory the final trajectory files are written to; defaults to the
    /// working directory.
    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = dir;
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn transition(&mut self, next: PlaybackState) {
        log::debug!(
            "{:?} -> {:?} (sequence {})",
            self.state,
            next,
            self.session.current
        );
        self.state = next;
    }

    /// Play every sequence, checkpoint between them and write the final
    /// trajectory. Any unreadable image aborts the whole run.
    pub fn run(&mut self) -> Result<PlaybackSummary> {
        let num_seq = self.sequences.len();
        for i in 0..num_seq {
            self.session.current = i;
            self.transition(PlaybackState::Playing(i));
            self.play_sequence(i)?;

            if i + 1 < num_seq {
                self.transition(PlaybackState::Checkpointing(i));
                self.checkpoint(i)?;
            }
        }

        self.transition(PlaybackState::Finalizing);
        self.engine.shutdown();
        self.finalize()?;
        self.transition(PlaybackState::Done);

        let summary = self.session.summary();
        log::info!(
            "processed {} frames, median tracking time {:.4} s, mean tracking time {:.4} s",
            summary.frames,
            summary.median.as_secs_f64(),
            summary.mean.as_secs_f64()
        );
        Ok(summary)
    }

    fn play_sequence(&mut self, i: usize) -> Result<()> {
        let seq = &self.sequences[i];
        if seq.is_empty() {
            log::warn!("sequence {} has no frames", seq.id);
            return Ok(());
        }
        log::info!("playing sequence {} ({} frames)", seq.id, seq.len());
        let timestamps = seq.timestamps();
        let image_scale = self.engine.image_scale();

        for frame in &seq.frames {
            let mut resize_ms = 0.0;
            let elapsed = match &frame.images {
                FrameImages::Mono(path) => {
                    let mut img = self.reader.read(path)?;
                    if image_scale != 1.0 {
                        let start = Instant::now();
                        img = resize(&img, image_scale)?;
                        resize_ms = start.elapsed().as_secs_f64() * 1e3;
                        self.engine.insert_resize_time(resize_ms);
                    }
                    let start = Instant::now();
                    self.engine.track_monocular(&img, frame.timestamp)?;
                    start.elapsed()
                }
                FrameImages::Stereo { left, right } => {
                    let img_left = self.reader.read(left)?;
                    let img_right = self.reader.read(right)?;
                    let start = Instant::now();
                    self.engine
                        .track_stereo(&img_left, &img_right, frame.timestamp, &[], left)?;
                    start.elapsed()
                }
            };
            self.engine
                .insert_track_time(resize_ms + elapsed.as_secs_f64() * 1e3);
            self.session.track_times.push(elapsed);

            let delay = pacer::delay_before(frame.index, &timestamps, elapsed);
            self.sleeper.sleep(delay);
        }
        Ok(())
    }

    fn checkpoint(&mut self, i: usize) -> Result<()> {
        let seq_id = &self.sequences[i].id;
        std::fs::create_dir_all(&self.submap_dir)
            .with_context(|| format!("Failed to create {}", self.submap_dir.display()))?;
        let checkpoint = Checkpoint::for_sequence(&self.submap_dir, seq_id, self.mode);
        self.engine.save_trajectory(&checkpoint.trajectory)?;
        if let Some(kf_file) = &checkpoint.keyframe_trajectory {
            self.engine.save_keyframe_trajectory(kf_file)?;
        }
        log::info!("submap {} saved, changing the dataset", seq_id);
        self.engine.change_dataset()
    }

    fn finalize(&mut self) -> Result<()> {
        let output = FinalOutput::new(self.session.output_tag.as_deref(), self.mode)
            .in_dir(&self.output_dir);
        match &output {
            FinalOutput::Monocular {
                trajectory,
                keyframe_trajectory,
            } => {
                self.engine.save_trajectory(trajectory)?;
                self.engine.save_keyframe_trajectory(keyframe_trajectory)?;
                log::info!("trajectory saved to {}", trajectory.display());
            }
            FinalOutput::Stereo {
                trajectory,
                lost_frames,
            } => {
                self.engine.save_trajectory(trajectory)?;
                self.engine.save_lost_frames(lost_frames)?;
                log::info!("trajectory saved to {}", trajectory.display());
            }
        }
        Ok(())
    }
}

fn resize(img: &Mat, scale: f32) -> Result<Mat> {
    let width = (img.cols() as f32 * scale) as i32;
    let height = (img.rows() as f32 * scale) as i32;
    let mut resized = Mat::default();
    opencv::imgproc::resize(
        img,
        &mut resized,
        Size::new(width, height),
        0.0,
        0.0,
        opencv::imgproc::INTER_LINEAR,
    )?;
    Ok(resized)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use opencv::prelude::*;

    use super::*;
    use crate::dataset::Frame;
    use crate::engine::{ImuSample, Pose};
    use crate::pacer::NoSleep;
    use crate::test_utils::scratch_dir;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Track(f64),
        SaveTrajectory(PathBuf),
        SaveKeyFrames(PathBuf),
        SaveLost(PathBuf),
        ChangeDataset,
        Shutdown,
    }

    /// Logs every engine call in order; saves also touch the target file.
    #[derive(Debug, Default)]
    struct RecordingEngine {
        events: RefCell<Vec<Event>>,
        tags: Vec<String>,
        scale: Option<f32>,
        /// (rows, cols) of every image handed to tracking
        sizes: Vec<(i32, i32)>,
        resize_times: Vec<f64>,
        track_times: Vec<f64>,
    }

    impl RecordingEngine {
        fn events(&self) -> Vec<Event> {
            self.events.borrow().clone()
        }

        fn save(&self, event: Event, path: &Path) -> Result<()> {
            self.events.borrow_mut().push(event);
            std::fs::write(path, "")?;
            Ok(())
        }
    }

    impl SlamEngine for RecordingEngine {
        fn track_monocular(&mut self, image: &Mat, timestamp: f64) -> Result<Option<Pose>> {
            self.events.borrow_mut().push(Event::Track(timestamp));
            self.sizes.push((image.rows(), image.cols()));
            Ok(Some(Pose::identity()))
        }

        fn track_stereo(
            &mut self,
            left: &Mat,
            right: &Mat,
            timestamp: f64,
            imu: &[ImuSample],
            tag: &str,
        ) -> Result<Option<Pose>> {
            assert!(imu.is_empty());
            self.events.borrow_mut().push(Event::Track(timestamp));
            self.sizes.push((left.rows(), left.cols()));
            self.sizes.push((right.rows(), right.cols()));
            self.tags.push(tag.to_string());
            Ok(None)
        }

        fn image_scale(&self) -> f32 {
            self.scale.unwrap_or(1.0)
        }

        fn change_dataset(&mut self) -> Result<()> {
            self.events.borrow_mut().push(Event::ChangeDataset);
            Ok(())
        }

        fn shutdown(&mut self) {
            self.events.borrow_mut().push(Event::Shutdown);
        }

        fn save_trajectory(&self, path: &Path) -> Result<()> {
            self.save(Event::SaveTrajectory(path.to_path_buf()), path)
        }

        fn save_keyframe_trajectory(&self, path: &Path) -> Result<()> {
            self.save(Event::SaveKeyFrames(path.to_path_buf()), path)
        }

        fn save_lost_frames(&self, path: &Path) -> Result<()> {
            self.save(Event::SaveLost(path.to_path_buf()), path)
        }

        fn insert_resize_time(&mut self, ms: f64) {
            self.resize_times.push(ms);
        }

        fn insert_track_time(&mut self, ms: f64) {
            self.track_times.push(ms);
        }
    }

    #[derive(Debug, Default)]
    struct FakeReader {
        reads: Vec<String>,
        missing: Option<String>,
        image: Option<Mat>,
    }

    impl FrameReader for FakeReader {
        fn read(&mut self, path: &str) -> Result<Mat> {
            if self.missing.as_deref() == Some(path) {
                bail!("Failed to load image at: {}", path);
            }
            self.reads.push(path.to_string());
            Ok(self.image.clone().unwrap_or_default())
        }
    }

    #[derive(Debug, Default)]
    struct RecordingSleeper(Vec<Duration>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&mut self, delay: Duration) {
            self.0.push(delay);
        }
    }

    fn mono_sequence(id: &str, times: &[f64]) -> Sequence {
        Sequence {
            id: id.to_string(),
            frames: times
                .iter()
                .enumerate()
                .map(|(index, &timestamp)| Frame {
                    index,
                    images: FrameImages::Mono(format!("/{}/{}.png", id, index)),
                    timestamp,
                })
                .collect(),
        }
    }

    fn stereo_sequence(id: &str, times: &[f64]) -> Sequence {
        Sequence {
            id: id.to_string(),
            frames: times
                .iter()
                .enumerate()
                .map(|(index, &timestamp)| Frame {
                    index,
                    images: FrameImages::Stereo {
                        left: format!("/cam0/{}/{}.png", id, index),
                        right: format!("/cam1/{}/{}.png", id, index),
                    },
                    timestamp,
                })
                .collect(),
        }
    }

    #[test]
    fn test_checkpoints_between_sequences() {
        let dir = scratch_dir("player_checkpoints");
        let submaps = dir.join("SubMaps");
        let sequences = vec![
            mono_sequence("0", &[0.0, 0.05]),
            mono_sequence("1", &[1.0, 1.05]),
            mono_sequence("2", &[2.0, 2.05]),
        ];
        let mut player = Player::new(
            RecordingEngine::default(),
            FakeReader::default(),
            NoSleep,
            CameraMode::Monocular,
            sequences,
        )
        .with_submap_dir(submaps.clone())
        .with_output_dir(dir.clone())
        .with_output_tag(Some("run".to_string()));

        let summary = player.run().unwrap();
        assert_eq!(summary.frames, 6);
        assert_eq!(player.state(), PlaybackState::Done);

        let events = player.engine().events();

        let expected = vec![
            Event::Track(0.0),
            Event::Track(0.05),
            Event::SaveTrajectory(submaps.join("f_SubMap_0.txt")),
            Event::SaveKeyFrames(submaps.join("kf_SubMap_0.txt")),
            Event::ChangeDataset,
            Event::Track(1.0),
            Event::Track(1.05),
            Event::SaveTrajectory(submaps.join("f_SubMap_1.txt")),
            Event::SaveKeyFrames(submaps.join("kf_SubMap_1.txt")),
            Event::ChangeDataset,
            Event::Track(2.0),
            Event::Track(2.05),
            Event::Shutdown,
            Event::SaveTrajectory(dir.join("f_run.txt")),
            Event::SaveKeyFrames(dir.join("kf_run.txt")),
        ];
        assert_eq!(events, expected);
        assert!(!submaps.join("f_SubMap_2.txt").exists());
        assert!(dir.join("kf_run.txt").exists());
    }

    #[test]
    fn test_stereo_finalize() {
        let dir = scratch_dir("player_stereo");
        let sequences = vec![stereo_sequence("4", &[0.0, 0.1]), stereo_sequence("5", &[0.0])];
        let mut player = Player::new(
            RecordingEngine::default(),
            FakeReader::default(),
            NoSleep,
            CameraMode::Stereo,
            sequences,
        )
        .with_submap_dir(dir.join("SubMaps"))
        .with_output_dir(dir.clone());
        player.run().unwrap();

        assert!(dir.join("SubMaps/f_SubMap_4.txt").exists());
        assert!(!dir.join("SubMaps/kf_SubMap_4.txt").exists());
        assert!(dir.join(DEFAULT_TRAJECTORY_FILE).exists());
        assert!(dir.join(DEFAULT_LOST_FRAMES_FILE).exists());
        assert!(!dir.join(DEFAULT_KEYFRAME_TRAJECTORY_FILE).exists());
        assert_eq!(player.engine().tags[0], "/cam0/4/0.png");
        assert_eq!(
            player.engine().events().iter().filter(|e| **e == Event::ChangeDataset).count(),
            1
        );
    }

    #[test]
    fn test_unreadable_image_aborts() {
        let dir = scratch_dir("player_abort");
        let sequences = vec![
            mono_sequence("0", &[0.0, 0.05, 0.10]),
            mono_sequence("1", &[1.0]),
        ];
        let reader = FakeReader {
            missing: Some("/0/1.png".to_string()),
            ..Default::default()
        };
        let mut player = Player::new(
            RecordingEngine::default(),
            reader,
            NoSleep,
            CameraMode::Monocular,
            sequences,
        )
        .with_submap_dir(dir.join("SubMaps"))
        .with_output_dir(dir.clone());

        let err = player.run().unwrap_err();
        assert!(err.to_string().contains("/0/1.png"));
        assert_eq!(player.state(), PlaybackState::Playing(0));
        assert_eq!(player.engine().events(), vec![Event::Track(0.0)]);
        assert!(!dir.join(DEFAULT_TRAJECTORY_FILE).exists());
    }

    #[test]
    fn test_pacing_per_frame() {
        let dir = scratch_dir("player_pacing");
        let sequences = vec![mono_sequence("0", &[0.0, 0.05, 0.10, 0.15, 0.20])];
        let mut player = Player::new(
            RecordingEngine::default(),
            FakeReader::default(),
            RecordingSleeper::default(),
            CameraMode::Monocular,
            sequences,
        )
        .with_output_dir(dir);
        player.run().unwrap();

        let delays = &player.sleeper.0;
        assert_eq!(delays.len(), 5);
        for (delay, processing) in delays.iter().zip(&player.session.track_times) {
            let expected = 0.05 - processing.as_secs_f64();
            assert!((delay.as_secs_f64() - expected.max(0.0)).abs() < 1e-6);
        }
    }

    fn gray_reader() -> FakeReader {
        let image = Mat::new_rows_cols_with_default(
            4,
            6,
            opencv::core::CV_8UC1,
            opencv::core::Scalar::all(0.),
        )
        .unwrap();
        FakeReader {
            image: Some(image),
            ..Default::default()
        }
    }

    #[test]
    fn test_mono_frames_rescaled() {
        let dir = scratch_dir("player_rescale");
        let engine = RecordingEngine {
            scale: Some(0.5),
            ..Default::default()
        };
        let sequences = vec![mono_sequence("0", &[0.0, 0.05, 0.10])];
        let mut player = Player::new(engine, gray_reader(), NoSleep, CameraMode::Monocular, sequences)
            .with_output_dir(dir);
        player.run().unwrap();

        let engine = player.engine();
        assert_eq!(engine.sizes, vec![(2, 3); 3]);
        assert_eq!(engine.resize_times.len(), 3);
        assert_eq!(engine.track_times.len(), 3);
        // reported track time includes the resize
        for (track, resize) in engine.track_times.iter().zip(&engine.resize_times) {
            assert!(track >= resize);
        }
    }

    #[test]
    fn test_stereo_frames_not_rescaled() {
        let dir = scratch_dir("player_stereo_scale");
        let engine = RecordingEngine {
            scale: Some(0.5),
            ..Default::default()
        };
        let sequences = vec![stereo_sequence("0", &[0.0, 0.05])];
        let mut player = Player::new(engine, gray_reader(), NoSleep, CameraMode::Stereo, sequences)
            .with_output_dir(dir);
        player.run().unwrap();

        let engine = player.engine();
        assert_eq!(engine.sizes, vec![(4, 6); 4]);
        assert!(engine.resize_times.is_empty());
        assert_eq!(engine.track_times.len(), 2);
    }

    #[test]
    fn test_final_output_names() {
        assert_eq!(
            FinalOutput::new(None, CameraMode::Monocular),
            FinalOutput::Monocular {
                trajectory: PathBuf::from("CameraTrajectory.txt"),
                keyframe_trajectory: PathBuf::from("KeyFrameTrajectory.txt"),
            }
        );
        assert_eq!(
            FinalOutput::new(Some("day1"), CameraMode::Stereo),
            FinalOutput::Stereo {
                trajectory: PathBuf::from("f_day1.txt"),
                lost_frames: PathBuf::from("lost_day1.txt"),
            }
        );
    }

    #[test]
    fn test_summary() {
        let session = PlaybackSession {
            track_times: vec![
                Duration::from_millis(30),
                Duration::from_millis(10),
                Duration::from_millis(20),
            ],
            ..Default::default()
        };
        let summary = session.summary();
        assert_eq!(summary.median, Duration::from_millis(20));
        assert_eq!(summary.mean, Duration::from_millis(20));
        assert_eq!(PlaybackSession::default().summary().frames, 0);
    }
}
