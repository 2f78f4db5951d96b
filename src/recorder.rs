//! Debug recordings: raw mic, raw reference and the filtered mic stream,
//! written as 16 kHz mono 16-bit WAV files alongside the running loop.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{debug, info};

use crate::audio::{Frame, SAMPLE_RATE};
use crate::{Error, Result};

/// Headers are rewritten every this many cycles (~4 s) so the files stay
/// playable while the loop runs.
pub const FLUSH_EVERY_FRAMES: u64 = 50;

/// One of the three recorded streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Mic,
    Reference,
    Filtered,
}

impl Track {
    pub const ALL: [Track; 3] = [Track::Mic, Track::Reference, Track::Filtered];

    pub fn file_name(self) -> &'static str {
        match self {
            Track::Mic => "wake_mic.wav",
            Track::Reference => "wake_reference.wav",
            Track::Filtered => "wake_filtered.wav",
        }
    }

    fn index(self) -> usize {
        match self {
            Track::Mic => 0,
            Track::Reference => 1,
            Track::Filtered => 2,
        }
    }
}

type Writer = WavWriter<BufWriter<File>>;

fn spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn recording_error(track: Track, e: hound::Error) -> Error {
    Error::Recording(format!("{}: {e}", track.file_name()))
}

pub struct DebugRecorder {
    writers: [Writer; 3],
    dir: PathBuf,
    frames: u64,
}

impl DebugRecorder {
    /// Create (truncating) the three files in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Recording`] if any file cannot be created.
    pub fn create(dir: &Path) -> Result<Self> {
        let open = |track: Track| {
            WavWriter::create(dir.join(track.file_name()), spec()).map_err(|e| recording_error(track, e))
        };
        let writers = [open(Track::Mic)?, open(Track::Reference)?, open(Track::Filtered)?];
        info!(dir = %dir.display(), "debug_recording_started");
        Ok(Self {
            writers,
            dir: dir.to_path_buf(),
            frames: 0,
        })
    }

    pub fn path(&self, track: Track) -> PathBuf {
        self.dir.join(track.file_name())
    }

    /// Append one frame to `track`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Recording`] if the write fails.
    pub fn write(&mut self, track: Track, frame: &Frame) -> Result<()> {
        let writer = &mut self.writers[track.index()];
        let mut samples = writer.get_i16_writer(frame.len() as u32);
        for &s in frame.samples() {
            samples.write_sample(s);
        }
        samples.flush().map_err(|e| recording_error(track, e))
    }

    /// Mark the end of a loop cycle; periodically rewrites the headers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Recording`] if a header update fails.
    pub fn end_cycle(&mut self) -> Result<()> {
        self.frames += 1;
        if self.frames % FLUSH_EVERY_FRAMES == 0 {
            for track in Track::ALL {
                self.writers[track.index()]
                    .flush()
                    .map_err(|e| recording_error(track, e))?;
            }
            debug!(frames = self.frames, "debug_recording_flushed");
        }
        Ok(())
    }

    /// Write final headers and close the files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Recording`] for the first file that fails to finalize.
    pub fn finalize(self) -> Result<()> {
        let frames = self.frames;
        let mut first_error = None;
        for (track, writer) in Track::ALL.into_iter().zip(self.writers) {
            if let Err(e) = writer.finalize() {
                first_error.get_or_insert(recording_error(track, e));
            }
        }
        info!(frames, dir = %self.dir.display(), "debug_recording_finalized");
        first_error.map_or(Ok(()), Err)
    }
}
