//! Mapping engine contract
//!
//! The playback driver only needs this narrow surface from a visual SLAM
//! system. Tracking calls are synchronous from the caller's side even if the
//! engine runs its own worker threads.

mod dry_run;

pub use dry_run::DryRunEngine;

use std::path::Path;

use anyhow::Result;
use opencv::core::Mat;

/// Camera pose in the active map.
pub type Pose = nalgebra::Isometry3<f64>;

/// Camera-only playback passes none of these.
#[allow(dead_code)]
#[derive(Debug, Clone, Default)]
pub struct ImuSample {
    /// seconds
    pub timestamp: f64,
    pub acc: nalgebra::Vector3<f64>,
    pub gyro: nalgebra::Vector3<f64>,
}

pub trait SlamEngine {
    /// Returns `None` when the frame could not be localized.
    fn track_monocular(&mut self, image: &Mat, timestamp: f64) -> Result<Option<Pose>>;
    fn track_stereo(
        &mut self,
        left: &Mat,
        right: &Mat,
        timestamp: f64,
        imu: &[ImuSample],
        tag: &str,
    ) -> Result<Option<Pose>>;
    /// 1.0 means images are used as read.
    fn image_scale(&self) -> f32;
    /// Close the active map as a submap and start a fresh one.
    fn change_dataset(&mut self) -> Result<()>;
    fn shutdown(&mut self);

    fn save_trajectory(&self, path: &Path) -> Result<()>;
    fn save_keyframe_trajectory(&self, path: &Path) -> Result<()>;
    fn save_lost_frames(&self, path: &Path) -> Result<()>;

    // timing instrumentation, in milliseconds
    fn insert_resize_time(&mut self, _ms: f64) {}
    fn insert_track_time(&mut self, _ms: f64) {}
}
