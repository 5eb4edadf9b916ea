/// opencv
/// https://docs.rs/opencv/latest/opencv/all.html
///
/// nalgebra
/// https://docs.rs/nalgebra/latest/nalgebra/
///
// images  <images_root>/cam0/<seq>/2d_rect_cam0_<seq>_<frame>.jpg
// times   <times_root>/<seq>.txt
extern crate opencv;

mod config;
mod dataset;
mod engine;
mod pacer;
mod player;
mod timestamp;

#[cfg(test)]
mod test_utils;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, ensure, Result};
use clap::{Parser, ValueEnum};

use crate::config::{DatasetLayout, DEFAULT_SUBMAP_DIR};
use crate::dataset::{CameraMode, CodaDataset, DatasetTrait, MissingTimes, Sequence};
use crate::engine::DryRunEngine;
use crate::pacer::{NoSleep, Sleeper, ThreadSleeper};
use crate::player::{ImreadReader, PlaybackState, Player};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Mono,
    Stereo,
}

impl From<Mode> for CameraMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Mono => CameraMode::Monocular,
            Mode::Stereo => CameraMode::Stereo,
        }
    }
}

/// Replay CODa sequences into a SLAM engine at their capture rate.
#[derive(Debug, Parser)]
#[command(version)]
struct CommandLine {
    #[arg(long, value_enum, default_value_t = Mode::Mono)]
    mode: Mode,
    /// JSON file mapping the left/right streams to subdirectory, prefix and extension
    #[arg(long)]
    layout: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_SUBMAP_DIR)]
    submap_dir: PathBuf,
    /// Directory for the final trajectory files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
    /// Load a sequence with an unreadable timestamp file as empty
    #[arg(long)]
    allow_missing_times: bool,
    /// Do not wait between frames
    #[arg(long)]
    no_pacing: bool,
    vocabulary: PathBuf,
    settings: PathBuf,
    images_root: String,
    times_root: String,
    /// seq1 [seq2 ... seqN] [trajectory_file_name]
    #[arg(required = true, num_args = 1..)]
    sequences: Vec<String>,
}

fn is_numeric(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_digit())
}

/// The last argument names the output files unless it is purely numeric.
fn split_output_tag(mut args: Vec<String>) -> (Vec<String>, Option<String>) {
    match args.last() {
        Some(last) if !is_numeric(last) => {
            let tag = args.pop();
            (args, tag)
        }
        _ => (args, None),
    }
}

fn run(cli: CommandLine) -> Result<()> {
    let (sequences, output_tag) = split_output_tag(cli.sequences);
    if sequences.is_empty() {
        bail!("at least one sequence is required");
    }
    if let Some(tag) = &output_tag {
        log::info!("file name: {}", tag);
    }
    log::info!("num_seq = {}", sequences.len());

    let layout = match &cli.layout {
        Some(path) => DatasetLayout::read_from_json(path)?,
        None => DatasetLayout::default(),
    };
    let missing_times = if cli.allow_missing_times {
        MissingTimes::Empty
    } else {
        MissingTimes::Error
    };
    let mode = CameraMode::from(cli.mode);
    let dataset = CodaDataset::new(&cli.images_root, &cli.times_root, mode)
        .with_layout(layout)
        .with_missing_times(missing_times);

    let sequences = sequences
        .iter()
        .map(|id| {
            let seq = dataset.load_sequence(id)?;
            log::info!("loaded sequence {}: {} frames", id, seq.len());
            Ok(seq)
        })
        .collect::<Result<Vec<_>>>()?;

    let outputs = Outputs {
        submap_dir: cli.submap_dir,
        output_dir: cli.output_dir,
        output_tag,
    };
    if cli.no_pacing {
        play(&cli.vocabulary, &cli.settings, mode, sequences, outputs, NoSleep)
    } else {
        play(&cli.vocabulary, &cli.settings, mode, sequences, outputs, ThreadSleeper)
    }
}

struct Outputs {
    submap_dir: PathBuf,
    output_dir: PathBuf,
    output_tag: Option<String>,
}

fn play<S: Sleeper>(
    vocabulary: &Path,
    settings: &Path,
    mode: CameraMode,
    sequences: Vec<Sequence>,
    outputs: Outputs,
    sleeper: S,
) -> Result<()> {
    let engine = DryRunEngine::new(vocabulary, settings)?;
    let mut player = Player::new(engine, ImreadReader, sleeper, mode, sequences)
        .with_submap_dir(outputs.submap_dir)
        .with_output_dir(outputs.output_dir)
        .with_output_tag(outputs.output_tag);
    player.run()?;
    ensure!(player.state() == PlaybackState::Done, "playback stopped in {:?}", player.state());
    log::info!(
        "{} maps, {} lost frames",
        player.engine().num_maps(),
        player.engine().num_lost()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_nanos()
        .parse_default_env()
        .init();

    let cli = match CommandLine::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
