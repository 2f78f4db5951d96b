//! Microphone capture via cpal.
//! The cpal callback thread accumulates samples and hands complete frames to
//! the loop over a crossbeam channel. `read_frame` blocks on that channel and
//! is the detection loop's heartbeat.

use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel as cb;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{AudioSource, Frame, FRAME_SAMPLES, SAMPLE_RATE};
use crate::config::DeviceSelector;
use crate::{Error, Result};

/// How long `read_frame` waits before reporting a stalled stream.
pub const MIC_STALL_TIMEOUT: Duration = Duration::from_secs(1);
/// Frames queued between the callback and the loop (~320 ms). When the loop
/// falls behind the oldest queued frame is discarded.
pub const MIC_QUEUE_FRAMES: usize = 4;

/// Splits callback-sized sample bursts into whole frames.
struct FrameAssembler {
    pending: Vec<i16>,
    tx: cb::Sender<Frame>,
    // Second handle on the queue, used only to evict the oldest frame.
    evict: cb::Receiver<Frame>,
    overflows: u64,
}

impl FrameAssembler {
    fn new(tx: cb::Sender<Frame>, evict: cb::Receiver<Frame>) -> Self {
        Self {
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
            tx,
            evict,
            overflows: 0,
        }
    }

    /// Append samples and queue every complete frame. Returns frames queued.
    fn push(&mut self, data: &[i16]) -> usize {
        self.pending.extend_from_slice(data);
        let mut sent = 0;
        while self.pending.len() >= FRAME_SAMPLES {
            let chunk: Vec<i16> = self.pending.drain(..FRAME_SAMPLES).collect();
            if self.enqueue(Frame::from_samples(chunk)) {
                sent += 1;
            }
        }
        sent
    }

    fn enqueue(&mut self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(cb::TrySendError::Full(frame)) => {
                let _ = self.evict.try_recv();
                self.overflows += 1;
                debug!(overflows = self.overflows, "mic_queue_overflow");
                self.tx.try_send(frame).is_ok()
            }
            Err(cb::TrySendError::Disconnected(_)) => false,
        }
    }

    /// Drop the partial frame. Returns samples discarded.
    fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }
}

#[inline]
fn f32_to_i16(s: f32) -> i16 {
    (s * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Blocking microphone source.
pub struct MicrophoneSource {
    // Held for its lifetime: capture stops when the stream is dropped.
    _stream: cpal::Stream,
    frames: cb::Receiver<Frame>,
    assembler: Arc<Mutex<FrameAssembler>>,
    stall_timeout: Duration,
}

impl MicrophoneSource {
    /// Open the selected input device (falling back to the host default) as a
    /// 16 kHz mono stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if no input device can be opened at all.
    pub fn open(selector: Option<&DeviceSelector>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match selector.and_then(|s| resolve_input_device(&host, s)) {
            Some(device) => device,
            None => {
                if let Some(selector) = selector {
                    warn!(selector = %selector, "microphone selector did not resolve, using default input");
                }
                host.default_input_device()
                    .ok_or_else(|| Error::Device("no audio input device available".into()))?
            }
        };
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());

        let (tx, rx) = cb::bounded(MIC_QUEUE_FRAMES);
        let assembler = Arc::new(Mutex::new(FrameAssembler::new(tx, rx.clone())));

        let stream = build_stream(&device, Arc::clone(&assembler))?;
        stream
            .play()
            .map_err(|e| Error::Device(format!("failed to start microphone stream: {e}")))?;

        info!(device = %device_name, sample_rate = SAMPLE_RATE, "microphone stream started");

        Ok(Self {
            _stream: stream,
            frames: rx,
            assembler,
            stall_timeout: MIC_STALL_TIMEOUT,
        })
    }
}

impl AudioSource for MicrophoneSource {
    fn read_frame(&mut self) -> Result<Frame> {
        match self.frames.recv_timeout(self.stall_timeout) {
            Ok(frame) => Ok(frame),
            Err(cb::RecvTimeoutError::Timeout) => Err(Error::Audio(format!(
                "no microphone frame within {} ms",
                self.stall_timeout.as_millis()
            ))),
            Err(cb::RecvTimeoutError::Disconnected) => {
                Err(Error::Audio("microphone channel closed".into()))
            }
        }
    }

    fn drain(&mut self) -> usize {
        let queued = self.frames.try_iter().count() * FRAME_SAMPLES;
        let partial = self.assembler.lock().clear();
        queued + partial
    }

    fn name(&self) -> &'static str {
        "microphone"
    }
}

/// Resolve a configured selector to a concrete input device.
fn resolve_input_device(host: &cpal::Host, selector: &DeviceSelector) -> Option<cpal::Device> {
    let mut devices = host.input_devices().ok()?;
    match selector {
        DeviceSelector::Index(index) => {
            let index = usize::try_from(*index).ok()?;
            devices.nth(index)
        }
        DeviceSelector::Name(name) => devices.find(|d| d.name().is_ok_and(|n| n == *name)),
    }
}

/// Build a 16 kHz mono input stream, preferring i16 samples and falling back to f32.
fn build_stream(device: &cpal::Device, assembler: Arc<Mutex<FrameAssembler>>) -> Result<cpal::Stream> {
    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err: cpal::StreamError| {
        error!(error = %err, "microphone capture error");
    };

    let i16_assembler = Arc::clone(&assembler);
    let i16_stream = device.build_input_stream(
        &config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            i16_assembler.lock().push(data);
        },
        err_fn,
        None,
    );

    match i16_stream {
        Ok(stream) => Ok(stream),
        Err(e) => {
            debug!(error = %e, "i16 input stream unavailable, trying f32");
            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let samples: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                        assembler.lock().push(&samples);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| Error::Device(format!("failed to build microphone stream: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_emits_whole_frames_only() {
        let (tx, rx) = cb::bounded(MIC_QUEUE_FRAMES);
        let mut assembler = FrameAssembler::new(tx, rx.clone());

        assert_eq!(assembler.push(&vec![1i16; 1000]), 0);
        assert_eq!(assembler.push(&vec![2i16; 1000]), 1);
        assert_eq!(assembler.push(&vec![3i16; 2000]), 2);

        let frames: Vec<Frame> = rx.try_iter().collect();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == FRAME_SAMPLES));
        assert_eq!(frames[0].samples()[999], 1);
        assert_eq!(frames[0].samples()[1000], 2);
        // 4000 pushed, 3 * 1280 = 3840 sent
        assert_eq!(assembler.clear(), 160);
        assert_eq!(assembler.clear(), 0);
    }

    #[test]
    fn stalled_reader_keeps_only_newest_frames() {
        let (tx, rx) = cb::bounded(MIC_QUEUE_FRAMES);
        let mut assembler = FrameAssembler::new(tx, rx.clone());

        // 60 s of 1024-sample callbacks with nobody reading.
        let callbacks = 60 * SAMPLE_RATE as usize / 1024;
        for n in 0..callbacks {
            assembler.push(&vec![(n % 1000) as i16; 1024]);
            assert!(rx.len() <= MIC_QUEUE_FRAMES);
        }

        let total_frames = callbacks * 1024 / FRAME_SAMPLES;
        assert_eq!(rx.len(), MIC_QUEUE_FRAMES);
        assert_eq!(assembler.overflows as usize, total_frames - MIC_QUEUE_FRAMES);

        // The queue holds the most recent audio, not the first seconds.
        let last = rx.try_iter().last().unwrap();
        let newest = ((callbacks - 1) % 1000) as i16;
        assert_eq!(last.samples()[FRAME_SAMPLES - 1], newest);
    }

    #[test]
    fn f32_conversion_saturates() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }
}
