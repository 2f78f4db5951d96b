//! System-output monitor capture: a `parec` subprocess streaming s16le PCM
//! from a PulseAudio monitor source over a non-blocking pipe.
//! Reads never block. When no full frame is ready the last good frame is held
//! (silence until the first one arrives), so the loop never stalls on the
//! reference stream.

use std::io::{ErrorKind, Read};
use std::os::fd::AsRawFd;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tracing::{debug, info, warn};

use super::{AudioSource, Frame, FRAME_BYTES, SAMPLE_RATE};
use crate::config::DeviceSelector;
use crate::{Error, Result};

/// Pending bytes kept beyond this many frames are dropped, oldest first.
pub const MAX_PENDING_FRAMES: usize = 4;
/// Time given to `parec` to start before its startup backlog is purged.
pub const STARTUP_PURGE_DELAY: Duration = Duration::from_millis(200);
/// PulseAudio monitor of the default sink, used when no source is selected.
pub const DEFAULT_MONITOR: &str = "@DEFAULT_MONITOR@";
/// UI device indexes for system sources are offset by this from PulseAudio ids.
pub const UI_INDEX_OFFSET: i64 = 100;

const READ_CHUNK: usize = 4096;
const MAX_READS_PER_CALL: usize = 64;

/// Frame reader over a non-blocking byte stream with hold-last-value fallback.
pub struct HoldingReader<R> {
    inner: R,
    pending: Vec<u8>,
    last_good: Option<Frame>,
    closed: bool,
}

impl<R: Read> HoldingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::with_capacity(FRAME_BYTES * (MAX_PENDING_FRAMES + 1)),
            last_good: None,
            closed: false,
        }
    }

    /// Pull everything currently readable into `pending`. Returns bytes read.
    fn fill(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        let mut buf = [0u8; READ_CHUNK];
        let mut total = 0;
        for _ in 0..MAX_READS_PER_CALL {
            match self.inner.read(&mut buf) {
                Ok(0) => {
                    warn!("reference capture stream closed, holding last frame");
                    self.closed = true;
                    break;
                }
                Ok(n) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "reference read failed");
                    break;
                }
            }
        }
        total
    }

    /// Bound latency: keep at most [`MAX_PENDING_FRAMES`] frames of backlog.
    fn trim_backlog(&mut self) {
        let max = FRAME_BYTES * MAX_PENDING_FRAMES;
        if self.pending.len() > max {
            let mut excess = self.pending.len() - max;
            // stay sample-aligned
            excess += excess % 2;
            self.pending.drain(..excess);
            debug!(dropped_bytes = excess, "reference backlog trimmed");
        }
    }

    /// Next frame: a fresh one if a full frame is pending, else the held one.
    /// Returns the frame and whether it is fresh.
    pub fn next_frame(&mut self) -> (Frame, bool) {
        self.fill();
        self.trim_backlog();
        if self.pending.len() >= FRAME_BYTES {
            let bytes: Vec<u8> = self.pending.drain(..FRAME_BYTES).collect();
            if let Some(frame) = Frame::from_le_bytes(&bytes) {
                self.last_good = Some(frame.clone());
                return (frame, true);
            }
        }
        let held = self.last_good.clone().unwrap_or_else(Frame::silence);
        (held, false)
    }

    /// Read until empty, discard everything, and forget the held frame.
    /// Returns samples discarded.
    pub fn drain(&mut self) -> usize {
        self.fill();
        let bytes = self.pending.len();
        self.pending.clear();
        self.last_good = None;
        bytes / 2
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

/// Non-blocking reference source backed by a `parec` child process.
pub struct MonitorSource {
    reader: HoldingReader<ChildStdout>,
    child: Child,
    source_name: String,
}

impl MonitorSource {
    /// Spawn `parec` on the resolved monitor source and purge its startup backlog.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the source cannot be resolved or `parec`
    /// cannot be spawned.
    pub fn open(selector: Option<&DeviceSelector>) -> Result<Self> {
        let source_name = match selector {
            Some(selector) => resolve_pulse_source(selector)
                .ok_or_else(|| Error::Device(format!("monitor source {selector} not found")))?,
            None => DEFAULT_MONITOR.to_string(),
        };

        let mut child = Command::new("parec")
            .arg("--format=s16le")
            .arg(format!("--rate={SAMPLE_RATE}"))
            .arg("--channels=1")
            .arg("--device")
            .arg(&source_name)
            .arg("--latency-msec=10")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Device(format!("failed to spawn parec: {e}")))?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Device("failed to get parec stdout".into()));
            }
        };

        if let Err(e) = set_non_blocking(&stdout) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }

        info!(source = %source_name, pid = child.id(), "reference capture spawned");

        let mut source = Self {
            reader: HoldingReader::new(stdout),
            child,
            source_name,
        };

        std::thread::sleep(STARTUP_PURGE_DELAY);
        let purged = source.reader.drain();
        debug!(samples = purged, "reference startup backlog purged");

        Ok(source)
    }
}

impl AudioSource for MonitorSource {
    fn read_frame(&mut self) -> Result<Frame> {
        let (frame, fresh) = self.reader.next_frame();
        if !fresh {
            tracing::trace!("reference frame held");
        }
        Ok(frame)
    }

    fn drain(&mut self) -> usize {
        self.reader.drain()
    }

    fn name(&self) -> &'static str {
        "reference"
    }
}

impl Drop for MonitorSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        debug!(source = %self.source_name, "reference capture terminated");
    }
}

fn set_non_blocking(stdout: &ChildStdout) -> Result<()> {
    let fd = stdout.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFL)
        .map_err(|e| Error::Device(format!("F_GETFL on parec pipe: {e}")))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))
        .map_err(|e| Error::Device(format!("F_SETFL on parec pipe: {e}")))?;
    Ok(())
}

/// Map a configured selector to a PulseAudio source name.
/// Numeric selectors are UI indexes (`100 + PulseAudio id`); names pass through.
pub fn resolve_pulse_source(selector: &DeviceSelector) -> Option<String> {
    match selector {
        DeviceSelector::Name(name) => Some(name.clone()),
        DeviceSelector::Index(index) => {
            let pa_id = index - UI_INDEX_OFFSET;
            let output = Command::new("pactl")
                .args(["list", "sources", "short"])
                .stderr(Stdio::null())
                .output()
                .ok()?;
            if !output.status.success() {
                return None;
            }
            let listing = String::from_utf8_lossy(&output.stdout);
            let name = find_source_name(&listing, pa_id);
            if let Some(name) = &name {
                info!(pa_id, source = %name, "monitor source resolved");
            }
            name
        }
    }
}

/// Find the source name for `id` in `pactl list sources short` output.
pub fn find_source_name(listing: &str, id: i64) -> Option<String> {
    let id = id.to_string();
    listing.lines().find_map(|line| {
        let mut fields = line.split('\t');
        if fields.next()?.trim() == id {
            fields.next().map(|name| name.trim().to_string())
        } else {
            None
        }
    })
}
