use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Substring of the file prefix that marks rectified 2D imagery.
pub const RECT_2D_MARKER: &str = "2d_rect";
/// Rectified 2D images are stored lossy.
pub const RECT_2D_EXTENSION: &str = ".jpg";
pub const RAW_EXTENSION: &str = ".png";

pub const LEFT_CAMERA_DIR: &str = "cam0";
pub const RIGHT_CAMERA_DIR: &str = "cam1";
/// `<times_root>/<seq>.txt`
pub const TIMES_EXTENSION: &str = ".txt";

/// Placeholder substituted with the sequence id in configured prefixes.
pub const SEQUENCE_PLACEHOLDER: &str = "{seq}";

pub const DEFAULT_SUBMAP_DIR: &str = "./SubMaps/CODa";
pub const DEFAULT_TRAJECTORY_FILE: &str = "CameraTrajectory.txt";
pub const DEFAULT_KEYFRAME_TRAJECTORY_FILE: &str = "KeyFrameTrajectory.txt";
pub const DEFAULT_LOST_FRAMES_FILE: &str = "LostFrames.txt";

/// Settings key holding the engine's image scale factor.
pub const IMAGE_SCALE_KEY: &str = "Camera.imageScale";

/// Where one logical camera stream lives under the images root.
///
/// `prefix` and `extension` fall back to inference from the resolved
/// directory when they are not given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamLayout {
    pub subdir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl StreamLayout {
    pub fn inferred(subdir: &str) -> Self {
        Self {
            subdir: subdir.to_string(),
            prefix: None,
            extension: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetLayout {
    #[serde(default = "default_left")]
    pub left: StreamLayout,
    #[serde(default = "default_right")]
    pub right: StreamLayout,
}

fn default_left() -> StreamLayout {
    StreamLayout::inferred(LEFT_CAMERA_DIR)
}

fn default_right() -> StreamLayout {
    StreamLayout::inferred(RIGHT_CAMERA_DIR)
}

impl Default for DatasetLayout {
    fn default() -> Self {
        Self {
            left: default_left(),
            right: default_right(),
        }
    }
}

impl DatasetLayout {
    pub fn read_from_json(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read layout {}", path.display()))?;
        let layout = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse layout {}", path.display()))?;
        Ok(layout)
    }
}
