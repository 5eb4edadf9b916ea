use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

use super::{CameraMode, DatasetTrait, Frame, FrameImages, MissingTimes, Sequence};
use crate::config::*;
use crate::timestamp;

/// Last three non-empty path segments joined with `_`, plus a trailing `_`.
///
/// `/Dataset/CODa/2d_rect/cam0/0` => `2d_rect_cam0_0_`
pub fn file_prefix(image_dir: &str) -> String {
    let elems: Vec<&str> = image_dir.split('/').filter(|s| !s.is_empty()).collect();
    if elems.len() < 3 {
        return String::new();
    }
    let mut prefix = elems[elems.len() - 3..].join("_");
    prefix.push('_');
    prefix
}

/// Rectified 2D imagery is stored as jpg, everything else as png.
pub fn image_extension(prefix: &str) -> &'static str {
    if prefix.contains(RECT_2D_MARKER) {
        RECT_2D_EXTENSION
    } else {
        RAW_EXTENSION
    }
}

/// Fully resolved image stream of one sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSource {
    pub dir: String,
    pub prefix: String,
    pub extension: String,
}

impl StreamSource {
    /// Infer prefix and extension from the directory path.
    pub fn infer(dir: &str) -> Self {
        let prefix = file_prefix(dir);
        let extension = image_extension(&prefix).to_string();
        Self {
            dir: dir.to_string(),
            prefix,
            extension,
        }
    }

    pub fn resolve(layout: &StreamLayout, images_root: &str, seq: &str) -> Self {
        let dir = format!("{}/{}/{}", images_root.trim_end_matches('/'), layout.subdir, seq);
        let inferred = Self::infer(&dir);
        let prefix = match &layout.prefix {
            Some(prefix) => prefix.replace(SEQUENCE_PLACEHOLDER, seq),
            None => inferred.prefix,
        };
        let extension = match &layout.extension {
            Some(extension) => extension.clone(),
            None => image_extension(&prefix).to_string(),
        };
        Self {
            dir,
            prefix,
            extension,
        }
    }

    pub fn image_path(&self, index: usize) -> String {
        format!("{}/{}{}{}", self.dir, self.prefix, index, self.extension)
    }
}

/// Parse a timestamp file: one decimal seconds value per non-blank line.
pub fn read_timestamps(path: &Path, missing: MissingTimes) -> Result<Vec<f64>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if missing == MissingTimes::Empty => {
            log::warn!(
                "could not open {}: {}; sequence will be empty",
                path.display(),
                e
            );
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open {}", path.display()));
        }
    };

    let mut timestamps = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let t: f64 = line
            .parse()
            .with_context(|| format!("{}:{}: bad timestamp {:?}", path.display(), line_no + 1, line))?;
        timestamp::to_pair(t)
            .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
        if let Some(&prev) = timestamps.last() {
            if t <= prev {
                log::warn!(
                    "{}:{}: timestamp {} does not increase over {}",
                    path.display(),
                    line_no + 1,
                    t,
                    prev
                );
            }
        }
        timestamps.push(t);
    }
    Ok(timestamps)
}

pub fn load_mono(id: &str, stream: &StreamSource, times: &Path, missing: MissingTimes) -> Result<Sequence> {
    let frames = read_timestamps(times, missing)?
        .into_iter()
        .enumerate()
        .map(|(index, timestamp)| Frame {
            index,
            images: FrameImages::Mono(stream.image_path(index)),
            timestamp,
        })
        .collect();
    Ok(Sequence {
        id: id.to_string(),
        frames,
    })
}

/// Both streams are indexed from the same timestamp file so left, right
/// and time stay aligned.
pub fn load_stereo(
    id: &str,
    left: &StreamSource,
    right: &StreamSource,
    times: &Path,
    missing: MissingTimes,
) -> Result<Sequence> {
    let frames = read_timestamps(times, missing)?
        .into_iter()
        .enumerate()
        .map(|(index, timestamp)| Frame {
            index,
            images: FrameImages::Stereo {
                left: left.image_path(index),
                right: right.image_path(index),
            },
            timestamp,
        })
        .collect();
    Ok(Sequence {
        id: id.to_string(),
        frames,
    })
}

#[derive(Debug, Clone)]
pub struct CodaDataset {
    pub images_root: String,
    pub times_root: String,
    pub mode: CameraMode,
    pub layout: DatasetLayout,
    pub missing_times: MissingTimes,
}

impl CodaDataset {
    pub fn new(images_root: &str, times_root: &str, mode: CameraMode) -> Self {
        Self {
            images_root: images_root.to_string(),
            times_root: times_root.to_string(),
            mode,
            layout: DatasetLayout::default(),
            missing_times: MissingTimes::default(),
        }
    }

    pub fn with_layout(mut self, layout: DatasetLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_missing_times(mut self, missing_times: MissingTimes) -> Self {
        self.missing_times = missing_times;
        self
    }

    fn times_path(&self, id: &str) -> String {
        format!("{}/{}{}", self.times_root.trim_end_matches('/'), id, TIMES_EXTENSION)
    }
}

impl DatasetTrait for CodaDataset {
    fn load_sequence(&self, id: &str) -> Result<Sequence> {
        let times = self.times_path(id);
        let times = Path::new(&times);
        let left = StreamSource::resolve(&self.layout.left, &self.images_root, id);
        match self.mode {
            CameraMode::Monocular => load_mono(id, &left, times, self.missing_times),
            CameraMode::Stereo => {
                let mut right = StreamSource::resolve(&self.layout.right, &self.images_root, id);
                // an inferred right stream follows the left one's format
                if self.layout.right.extension.is_none() && self.layout.right.prefix.is_none() {
                    right.extension = left.extension.clone();
                }
                load_stereo(id, &left, &right, times, self.missing_times)
            }
        }
    }
}
