use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use opencv::core::{FileNodeTraitConst, FileStorageTraitConst, Mat};

use super::{ImuSample, Pose, SlamEngine};
use crate::config::IMAGE_SCALE_KEY;
use crate::timestamp::TimestampPair;

/// Every n-th frame of a map is reported as a keyframe.
const KEYFRAME_STRIDE: usize = 5;

#[derive(Debug, Clone)]
struct TrackedFrame {
    stamp: TimestampPair,
    pose: Pose,
    is_key_frame: bool,
}

#[derive(Debug, Clone)]
struct LostFrame {
    stamp: TimestampPair,
    tag: String,
}

/// Stand-in engine that localizes every frame at the origin.
///
/// It keeps the bookkeeping a real backend exposes (one map per dataset,
/// keyframes, lost frames) so playback runs end to end without a native
/// SLAM library. A frame is lost when its time does not advance over the
/// active map's last frame.
#[derive(Debug)]
pub struct DryRunEngine {
    image_scale: f32,
    /// closed submaps followed by the active map
    maps: Vec<Vec<TrackedFrame>>,
    lost: Vec<LostFrame>,
    track_times: Vec<f64>,
    shut_down: bool,
}

impl Default for DryRunEngine {
    fn default() -> Self {
        Self {
            image_scale: 1.0,
            maps: vec![Vec::new()],
            lost: Vec::new(),
            track_times: Vec::new(),
            shut_down: false,
        }
    }
}

impl DryRunEngine {
    pub fn new(vocabulary: &Path, settings: &Path) -> Result<Self> {
        ensure!(
            vocabulary.is_file(),
            "vocabulary {} does not exist",
            vocabulary.display()
        );
        let image_scale = Self::read_image_scale(settings)?;
        log::info!("dry-run engine, image scale {}", image_scale);
        Ok(Self {
            image_scale,
            ..Default::default()
        })
    }

    fn read_image_scale(settings: &Path) -> Result<f32> {
        let path = settings
            .to_str()
            .with_context(|| format!("non utf-8 settings path {}", settings.display()))?;
        let fs = opencv::core::FileStorage::new(
            path,
            opencv::core::FileStorage_Mode::READ as i32,
            "utf-8",
        )
        .with_context(|| format!("Failed to open settings {}", path))?;
        if !fs.is_opened()? {
            bail!("Failed to open settings {}", path);
        }
        let node = fs.get(IMAGE_SCALE_KEY)?;
        if node.empty()? {
            return Ok(1.0);
        }
        let scale = node.to_f64()? as f32;
        ensure!(scale > 0.0, "{} must be positive, got {}", IMAGE_SCALE_KEY, scale);
        Ok(scale)
    }

    pub fn num_maps(&self) -> usize {
        self.maps.len()
    }

    pub fn num_lost(&self) -> usize {
        self.lost.len()
    }

    fn track(&mut self, timestamp: f64, tag: &str) -> Result<Option<Pose>> {
        ensure!(!self.shut_down, "engine already shut down");
        let stamp = TimestampPair::try_from(timestamp)?;
        let map = self.maps.last_mut().context("no active map")?;
        if map.last().is_some_and(|last| stamp <= last.stamp) {
            self.lost.push(LostFrame {
                stamp,
                tag: tag.to_string(),
            });
            return Ok(None);
        }
        let pose = Pose::identity();
        let is_key_frame = map.len() % KEYFRAME_STRIDE == 0;
        map.push(TrackedFrame {
            stamp,
            pose,
            is_key_frame,
        });
        Ok(Some(pose))
    }

    fn write_poses<'a>(path: &Path, frames: impl Iterator<Item = &'a TrackedFrame>) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for frame in frames {
            let stamp = frame.stamp;
            let t = frame.pose.translation.vector;
            let q = frame.pose.rotation;
            writer.write_record(&[
                stamp.sec.to_string(),
                stamp.nsec.to_string(),
                format!("{:.9}", t.x),
                format!("{:.9}", t.y),
                format!("{:.9}", t.z),
                format!("{:.9}", q.i),
                format!("{:.9}", q.j),
                format!("{:.9}", q.k),
                format!("{:.9}", q.w),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl SlamEngine for DryRunEngine {
    fn track_monocular(&mut self, _image: &Mat, timestamp: f64) -> Result<Option<Pose>> {
        self.track(timestamp, "")
    }

    fn track_stereo(
        &mut self,
        _left: &Mat,
        _right: &Mat,
        timestamp: f64,
        _imu: &[ImuSample],
        tag: &str,
    ) -> Result<Option<Pose>> {
        self.track(timestamp, tag)
    }

    fn image_scale(&self) -> f32 {
        self.image_scale
    }

    fn change_dataset(&mut self) -> Result<()> {
        let frames = self.maps.last().map_or(0, Vec::len);
        log::info!("closing map {} with {} frames", self.maps.len() - 1, frames);
        self.maps.push(Vec::new());
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.shut_down && !self.track_times.is_empty() {
            let total: f64 = self.track_times.iter().sum();
            log::debug!(
                "engine tracked {} frames in {:.1} ms",
                self.track_times.len(),
                total
            );
        }
        self.shut_down = true;
    }

    fn save_trajectory(&self, path: &Path) -> Result<()> {
        Self::write_poses(path, self.maps.iter().flatten())
    }

    fn save_keyframe_trajectory(&self, path: &Path) -> Result<()> {
        Self::write_poses(path, self.maps.iter().flatten().filter(|f| f.is_key_frame))
    }

    fn save_lost_frames(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for frame in &self.lost {
            writer.write_record(&[
                format!("{:.9}", frame.stamp.to_seconds()),
                frame.tag.clone(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn insert_track_time(&mut self, ms: f64) {
        self.track_times.push(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::scratch_dir;

    #[test]
    fn test_maps_and_lost_frames() {
        let mut engine = DryRunEngine::default();
        let img = Mat::default();
        assert!(engine.track_monocular(&img, 1.0).unwrap().is_some());
        assert!(engine.track_monocular(&img, 1.1).unwrap().is_some());
        // time went backwards
        assert!(engine.track_stereo(&img, &img, 1.05, &[], "a.png").unwrap().is_none());
        engine.change_dataset().unwrap();
        assert!(engine.track_monocular(&img, 0.5).unwrap().is_some());
        assert_eq!(engine.num_maps(), 2);
        assert_eq!(engine.num_lost(), 1);

        engine.shutdown();
        assert!(engine.track_monocular(&img, 2.0).is_err());
    }

    #[test]
    fn test_trajectory_format() {
        let dir = scratch_dir("dry_run_trajectory");
        let mut engine = DryRunEngine::default();
        let img = Mat::default();
        for i in 0..7 {
            engine.track_monocular(&img, 10.0 + i as f64 * 0.25).unwrap();
        }
        engine.track_stereo(&img, &img, 10.0, &[], "/x/left_7.jpg").unwrap();

        let f_file = dir.join("f.txt");
        engine.save_trajectory(&f_file).unwrap();
        let text = std::fs::read_to_string(&f_file).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(
            lines[1],
            "10 250000000 0.000000000 0.000000000 0.000000000 0.000000000 0.000000000 0.000000000 1.000000000"
        );

        let kf_file = dir.join("kf.txt");
        engine.save_keyframe_trajectory(&kf_file).unwrap();
        let kf = std::fs::read_to_string(&kf_file).unwrap();
        assert_eq!(kf.lines().count(), 2);

        let lost_file = dir.join("lost.txt");
        engine.save_lost_frames(&lost_file).unwrap();
        let lost = std::fs::read_to_string(&lost_file).unwrap();
        assert_eq!(lost.trim_end(), "10.000000000 /x/left_7.jpg");
    }

    #[test]
    fn test_unrepresentable_time_rejected() {
        let mut engine = DryRunEngine::default();
        let err = engine.track_monocular(&Mat::default(), -1.0).unwrap_err();
        assert!(err.to_string().contains("out of dual 32-bit range"));
        assert_eq!(engine.num_lost(), 0);
    }

    #[test]
    fn test_settings_scale() {
        let dir = scratch_dir("dry_run_settings");
        let vocabulary = dir.join("ORBvoc.txt");
        std::fs::write(&vocabulary, "").unwrap();
        let settings = dir.join("settings.yaml");
        std::fs::write(&settings, "%YAML:1.0\nCamera.imageScale: 0.5\n").unwrap();
        let engine = DryRunEngine::new(&vocabulary, &settings).unwrap();
        assert_eq!(engine.image_scale(), 0.5);

        let plain = dir.join("plain.yaml");
        std::fs::write(&plain, "%YAML:1.0\nCamera.fps: 20\n").unwrap();
        let engine = DryRunEngine::new(&vocabulary, &plain).unwrap();
        assert_eq!(engine.image_scale(), 1.0);

        assert!(DryRunEngine::new(&dir.join("missing.txt"), &settings).is_err());
    }
}
