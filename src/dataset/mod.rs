//! Dataset handling
//!
//! UT Campus Object Dataset (CODa) https://amrl.cs.utexas.edu/coda/
mod coda;

pub use coda::CodaDataset;

/// Image reference(s) of one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameImages {
    Mono(String),
    Stereo { left: String, right: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: usize,
    pub images: FrameImages,
    /// capture time in seconds
    pub timestamp: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    pub id: String,
    pub frames: Vec<Frame>,
}

impl Sequence {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.frames.iter().map(|f| f.timestamp).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CameraMode {
    #[default]
    Monocular,
    Stereo,
}

/// What to do when a sequence's timestamp file cannot be opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingTimes {
    /// Report the missing file as an error.
    #[default]
    Error,
    /// Legacy behavior: the sequence loads with zero frames.
    Empty,
}

pub trait DatasetTrait {
    /// Materialize one sequence: ordered frames with their timestamps.
    fn load_sequence(&self, id: &str) -> anyhow::Result<Sequence>;
}
