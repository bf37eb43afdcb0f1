//! Local backend: symphonia decode + cpal output.
//!
//! Pipeline:
//! 1. one decoder thread per stream decodes with symphonia, converts the
//!    channel layout and sample rate to the device's, and pushes into a ring
//! 2. a single cpal stream, opened once per process at the device's default
//!    rate, pulls from the ring and applies volume
//!
//! The `Mixer` mutex is the render lock: the output callback holds it while
//! pulling, and every control call (pause, seek, close, position) takes it
//! before touching the ring or the decode cursor.

use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use super::resample::{adapt_channels, LinearResampler, SampleRing};
use super::{AudioBackend, EndOfStream, StreamInfo};
use crate::error::{PlayerError, PlayerResult};
use crate::models::Track;
use crate::volume;

/// Seconds of device audio the ring can hold.
const RING_SECONDS: usize = 2;

/// Shape of the opened output device. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

pub struct LocalBackend {
    shared: Arc<Shared>,
    /// `None` until the first start; afterwards the one init result, kept
    /// so a failed device is never reopened.
    device: Mutex<Option<Result<DeviceSpec, String>>>,
    voice: Mutex<Option<Voice>>,
}

struct Shared {
    mixer: Mutex<Mixer>,
    /// Tells the output thread to drop the cpal stream.
    shutdown: AtomicBool,
    output_thread: Mutex<Option<JoinHandle<()>>>,
}

struct Mixer {
    ring: SampleRing,
    /// A stream is loaded (playing or paused).
    active: bool,
    paused: bool,
    gain: f32,
    /// Decode cursor in source frames.
    cursor: u64,
    source_rate: u32,
    length: Option<Duration>,
    seek_to: Option<Duration>,
}

impl Mixer {
    fn position(&self) -> Option<Duration> {
        if !self.active || self.source_rate == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            self.cursor as f64 / self.source_rate as f64,
        ))
    }
}

/// Handle to the decoder thread of the active stream.
struct Voice {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// An opened, probed file ready to hand to a decoder thread.
struct Source {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    length: Option<Duration>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                mixer: Mutex::new(Mixer {
                    ring: SampleRing::new(1),
                    active: false,
                    paused: false,
                    gain: 1.0,
                    cursor: 0,
                    source_rate: 0,
                    length: None,
                    seek_to: None,
                }),
                shutdown: AtomicBool::new(false),
                output_thread: Mutex::new(None),
            }),
            device: Mutex::new(None),
            voice: Mutex::new(None),
        }
    }

    /// Open the output device if it is not open yet. Idempotent: the device
    /// is opened at most once per backend, and a failure is remembered.
    pub fn open_device(&self) -> PlayerResult<DeviceSpec> {
        let mut device = self.device.lock();
        if let Some(result) = device.as_ref() {
            return result.clone().map_err(PlayerError::Device);
        }

        let result = spawn_output(Arc::clone(&self.shared));
        match &result {
            Ok(spec) => {
                log::info!(
                    "rondo: output device open at {}Hz, {} channels",
                    spec.sample_rate,
                    spec.channels
                );
                let mut mixer = self.shared.mixer.lock();
                mixer.ring =
                    SampleRing::new(spec.sample_rate as usize * spec.channels as usize * RING_SECONDS);
            }
            Err(e) => log::error!("rondo: output device init failed: {}", e),
        }
        *device = Some(result.clone());
        result.map_err(PlayerError::Device)
    }

    /// Stop the decoder thread and unload the stream. Joins the thread unless
    /// we are running on it.
    fn stop_voice(&self) {
        let voice = self.voice.lock().take();
        if let Some(voice) = &voice {
            voice.stop.store(true, Ordering::SeqCst);
        }
        {
            let mut mixer = self.shared.mixer.lock();
            mixer.active = false;
            mixer.paused = false;
            mixer.seek_to = None;
            mixer.cursor = 0;
            mixer.length = None;
            mixer.ring.clear();
        }
        if let Some(voice) = voice {
            if voice.thread.thread().id() != thread::current().id() {
                let _ = voice.thread.join();
            }
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalBackend {
    fn drop(&mut self) {
        self.stop_voice();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.shared.output_thread.lock().take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl AudioBackend for LocalBackend {
    fn start(&self, track: &Track, volume: f64, on_end: EndOfStream) -> PlayerResult<StreamInfo> {
        let device = self.open_device()?;

        // Probe before tearing anything down so a bad file leaves the
        // error with the caller.
        let source = open_source(track)?;
        let info = StreamInfo {
            length: source.length,
        };

        self.stop_voice();

        let stop = Arc::new(AtomicBool::new(false));
        {
            let mut mixer = self.shared.mixer.lock();
            mixer.ring.clear();
            mixer.active = true;
            mixer.paused = false;
            mixer.gain = volume::gain(volume);
            mixer.cursor = 0;
            mixer.source_rate = source.sample_rate;
            mixer.length = source.length;
            mixer.seek_to = None;
        }

        let shared = Arc::clone(&self.shared);
        let thread_stop = Arc::clone(&stop);
        let name = track.name().to_string();
        let thread = thread::Builder::new()
            .name("rondo-decoder".into())
            .spawn(move || {
                let outcome = decode_to_ring(source, device, &shared, &thread_stop);
                if let Err(e) = &outcome {
                    log::error!("rondo: decode error in {}: {}", name, e);
                }
                // Source is dropped by now. Unload under the render lock
                // unless a close/replace already took over.
                {
                    let mut mixer = shared.mixer.lock();
                    if thread_stop.load(Ordering::SeqCst) {
                        return;
                    }
                    mixer.active = false;
                    mixer.ring.clear();
                }
                on_end();
            })
            .map_err(|e| PlayerError::io(track.path(), e))?;

        *self.voice.lock() = Some(Voice { stop, thread });
        Ok(info)
    }

    fn pause(&self) -> PlayerResult<()> {
        self.shared.mixer.lock().paused = true;
        Ok(())
    }

    fn resume(&self) -> PlayerResult<()> {
        self.shared.mixer.lock().paused = false;
        Ok(())
    }

    fn close(&self) -> PlayerResult<()> {
        self.stop_voice();
        Ok(())
    }

    fn seek(&self, position: Duration) -> PlayerResult<()> {
        let mut mixer = self.shared.mixer.lock();
        if !mixer.active {
            return Err(PlayerError::State("no active stream"));
        }
        mixer.cursor = (position.as_secs_f64() * mixer.source_rate as f64) as u64;
        mixer.seek_to = Some(position);
        mixer.ring.clear();
        Ok(())
    }

    fn set_volume(&self, volume: f64) -> PlayerResult<()> {
        self.shared.mixer.lock().gain = volume::gain(volume);
        Ok(())
    }

    fn position(&self) -> Option<Duration> {
        self.shared.mixer.lock().position()
    }

    fn length(&self) -> Option<Duration> {
        let mixer = self.shared.mixer.lock();
        if mixer.active {
            mixer.length
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Output device
// ---------------------------------------------------------------------------

/// Build the cpal stream on its own thread (streams are not `Send`) and keep
/// it alive until the backend shuts down.
fn spawn_output(shared: Arc<Shared>) -> Result<DeviceSpec, String> {
    let (tx, rx) = mpsc::channel();
    let thread_shared = Arc::clone(&shared);

    let handle = thread::Builder::new()
        .name("rondo-output".into())
        .spawn(move || {
            let stream = match build_stream(&thread_shared) {
                Ok((stream, spec)) => {
                    let _ = tx.send(Ok(spec));
                    stream
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            while !thread_shared.shutdown.load(Ordering::SeqCst) {
                thread::park_timeout(Duration::from_millis(500));
            }
            drop(stream);
        })
        .map_err(|e| e.to_string())?;

    let result = rx
        .recv()
        .unwrap_or_else(|_| Err("output thread exited during init".into()));
    *shared.output_thread.lock() = Some(handle);
    result
}

fn build_stream(shared: &Arc<Shared>) -> Result<(cpal::Stream, DeviceSpec), String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or("no output device")?;

    let default_cfg = device.default_output_config().map_err(|e| e.to_string())?;
    let rate = default_cfg.sample_rate();

    let config: cpal::StreamConfig = if default_cfg.sample_format() == cpal::SampleFormat::F32 {
        default_cfg.into()
    } else {
        // Look for an f32 variant at the default rate.
        device
            .supported_output_configs()
            .map_err(|e| e.to_string())?
            .find(|range| {
                range.sample_format() == cpal::SampleFormat::F32
                    && range.min_sample_rate() <= rate
                    && range.max_sample_rate() >= rate
            })
            .map(|range| range.with_sample_rate(rate).config())
            .ok_or_else(|| {
                format!(
                    "device does not support f32 output (got {:?})",
                    default_cfg.sample_format()
                )
            })?
    };

    let spec = DeviceSpec {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    let cb_shared = Arc::clone(shared);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut mixer = cb_shared.mixer.lock();
                if !mixer.active || mixer.paused {
                    data.fill(0.0);
                    return;
                }
                mixer.ring.pull(data);
                let gain = mixer.gain;
                drop(mixer);
                for s in data.iter_mut() {
                    *s *= gain;
                }
            },
            move |err| {
                log::error!("rondo: cpal error: {}", err);
            },
            None,
        )
        .map_err(|e| e.to_string())?;

    stream.play().map_err(|e| e.to_string())?;
    Ok((stream, spec))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn open_source(track: &Track) -> PlayerResult<Source> {
    let path = track.path();
    let file = File::open(path).map_err(|e| PlayerError::io(path, e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = track.extension() {
        hint.with_extension(&ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PlayerError::io(path, e))?;

    let format = probed.format;
    let stream = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PlayerError::io(path, "no audio track"))?;

    let track_id = stream.id;
    let sample_rate = stream.codec_params.sample_rate.unwrap_or(44100);
    let length = stream
        .codec_params
        .n_frames
        .map(|frames| Duration::from_secs_f64(frames as f64 / sample_rate as f64));

    let decoder = symphonia::default::get_codecs()
        .make(&stream.codec_params, &DecoderOptions::default())
        .map_err(|e| PlayerError::io(path, e))?;

    Ok(Source {
        format,
        decoder,
        track_id,
        sample_rate,
        length,
    })
}

/// Decode `source` into the ring until it runs out or `stop` is set.
/// Returns once the ring has drained, so the caller can report the end.
fn decode_to_ring(
    mut source: Source,
    device: DeviceSpec,
    shared: &Shared,
    stop: &AtomicBool,
) -> Result<(), SymphoniaError> {
    let mut resampler: Option<LinearResampler> = None;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    'decode: loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        let seek = shared.mixer.lock().seek_to;
        if let Some(to) = seek {
            let target = SeekTo::Time {
                time: Time::from(to.as_secs_f64()),
                track_id: Some(source.track_id),
            };
            if let Err(e) = source.format.seek(SeekMode::Accurate, target) {
                log::warn!("rondo: seek to {:?} failed: {}", to, e);
            }
            source.decoder.reset();
            if let Some(rs) = resampler.as_mut() {
                rs.reset();
            }
            let mut mixer = shared.mixer.lock();
            if mixer.seek_to == Some(to) {
                mixer.seek_to = None;
            }
        }

        if shared.mixer.lock().paused {
            thread::sleep(Duration::from_millis(10));
            continue;
        }

        let packet = match source.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                // Let the device play out what is buffered. A seek during
                // the drain sends us back to decoding.
                loop {
                    {
                        let mixer = shared.mixer.lock();
                        if stop.load(Ordering::SeqCst) || mixer.ring.len() == 0 {
                            break 'decode;
                        }
                        if mixer.seek_to.is_some() {
                            continue 'decode;
                        }
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            }
            Err(e) => return Err(e),
        };

        if packet.track_id() != source.track_id {
            continue;
        }

        let decoded = match source.decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("rondo: skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames() as u64;
        let needed = decoded.capacity() * spec.channels.count();
        if sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        let src_channels = spec.channels.count() as u16;
        let mut samples = adapt_channels(buf.samples(), src_channels, device.channels);
        let rs = resampler.get_or_insert_with(|| {
            LinearResampler::new(spec.rate, device.sample_rate, device.channels)
        });
        if rs.is_needed() {
            samples = rs.process(&samples);
        }

        // Push with back-pressure. Audio decoded before a seek is stale.
        let mut offset = 0;
        let mut advanced = false;
        while offset < samples.len() {
            {
                let mut mixer = shared.mixer.lock();
                if stop.load(Ordering::SeqCst) {
                    return Ok(());
                }
                if mixer.seek_to.is_some() {
                    continue 'decode;
                }
                if !advanced {
                    mixer.cursor += frames;
                    advanced = true;
                }
                offset += mixer.ring.push(&samples[offset..]);
            }
            if offset < samples.len() {
                thread::sleep(Duration::from_millis(5));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::scripted::wait_for;
    use std::path::Path;

    const RATE: u32 = 8000;
    const FRAMES: u64 = 16_000;
    const MONO: DeviceSpec = DeviceSpec {
        sample_rate: RATE,
        channels: 1,
    };

    /// 16-bit mono PCM, `frames` long.
    fn write_wav(path: &Path, frames: u32) {
        let data_len = frames * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&RATE.to_le_bytes());
        bytes.extend_from_slice(&(RATE * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for i in 0..frames {
            let sample = ((i % 80) as i16 - 40) * 400;
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    fn tone() -> (tempfile::TempDir, Track) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, FRAMES as u32);
        (dir, Track::new(path, "tone"))
    }

    /// A backend with a ring and a loaded stream but no output device.
    fn loaded(capacity: usize) -> LocalBackend {
        let backend = LocalBackend::new();
        {
            let mut mixer = backend.shared.mixer.lock();
            mixer.ring = SampleRing::new(capacity);
            mixer.active = true;
            mixer.source_rate = RATE;
        }
        backend
    }

    /// Stand-in for the output callback: pulls until `done`, returns the
    /// number of samples it consumed.
    fn drain(shared: Arc<Shared>, done: Arc<AtomicBool>) -> JoinHandle<usize> {
        thread::spawn(move || {
            let mut out = [0.0f32; 256];
            let mut pulled = 0;
            while !done.load(Ordering::SeqCst) {
                pulled += shared.mixer.lock().ring.pull(&mut out);
                thread::sleep(Duration::from_millis(1));
            }
            pulled
        })
    }

    #[test]
    fn open_source_reads_rate_and_length() {
        let (_dir, track) = tone();
        let source = open_source(&track).unwrap();
        assert_eq!(source.sample_rate, RATE);
        assert_eq!(source.length, Some(Duration::from_secs(2)));
    }

    #[test]
    fn open_source_rejects_missing_and_garbage_files() {
        let missing = Track::new("/no/such/file.wav", "missing");
        assert!(matches!(open_source(&missing), Err(PlayerError::Io { .. })));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.mp3");
        std::fs::write(&path, b"this is not audio at all").unwrap();
        let junk = Track::new(path, "junk");
        assert!(matches!(open_source(&junk), Err(PlayerError::Io { .. })));
    }

    #[test]
    fn decodes_to_the_end_and_waits_for_the_drain() {
        let (_dir, track) = tone();
        let backend = loaded(4096);
        let done = Arc::new(AtomicBool::new(false));
        let drainer = drain(Arc::clone(&backend.shared), Arc::clone(&done));

        let stop = AtomicBool::new(false);
        decode_to_ring(open_source(&track).unwrap(), MONO, &backend.shared, &stop).unwrap();
        done.store(true, Ordering::SeqCst);
        let pulled = drainer.join().unwrap();

        let mixer = backend.shared.mixer.lock();
        assert_eq!(mixer.cursor, FRAMES);
        assert_eq!(mixer.ring.len(), 0);
        assert_eq!(pulled as u64, FRAMES);
        assert_eq!(mixer.position(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn seek_repositions_the_cursor() {
        let (_dir, track) = tone();
        let backend = loaded(4096);
        backend.seek(Duration::from_secs(1)).unwrap();
        assert_eq!(backend.position(), Some(Duration::from_secs(1)));

        let done = Arc::new(AtomicBool::new(false));
        let drainer = drain(Arc::clone(&backend.shared), Arc::clone(&done));
        let stop = AtomicBool::new(false);
        decode_to_ring(open_source(&track).unwrap(), MONO, &backend.shared, &stop).unwrap();
        done.store(true, Ordering::SeqCst);
        let pulled = drainer.join().unwrap() as u64;

        let mixer = backend.shared.mixer.lock();
        assert_eq!(mixer.seek_to, None);
        assert!(mixer.cursor >= u64::from(RATE));
        // Only the second half went through the ring.
        assert!(pulled < FRAMES * 3 / 4);
    }

    #[test]
    fn stop_ends_decoding_early() {
        let (_dir, track) = tone();
        // Too small to hold the file and nobody drains it.
        let backend = loaded(512);
        let shared = Arc::clone(&backend.shared);
        let stop = Arc::new(AtomicBool::new(false));

        let decoder = {
            let (shared, stop) = (Arc::clone(&shared), Arc::clone(&stop));
            let source = open_source(&track).unwrap();
            thread::spawn(move || decode_to_ring(source, MONO, &shared, &stop))
        };
        assert!(wait_for(|| shared.mixer.lock().ring.free() == 0));
        assert!(!decoder.is_finished());

        stop.store(true, Ordering::SeqCst);
        assert!(wait_for(|| decoder.is_finished()));
        assert!(decoder.join().unwrap().is_ok());
        assert!(shared.mixer.lock().cursor < FRAMES);
    }

    #[test]
    fn position_is_none_without_a_stream() {
        let backend = LocalBackend::new();
        assert_eq!(backend.position(), None);
        assert_eq!(backend.length(), None);
        assert!(matches!(
            backend.seek(Duration::from_secs(1)),
            Err(PlayerError::State(_))
        ));

        let backend = loaded(16);
        backend.shared.mixer.lock().cursor = 12_000;
        assert_eq!(backend.position(), Some(Duration::from_millis(1500)));
        backend.close().unwrap();
        assert_eq!(backend.position(), None);
    }

    #[test]
    fn device_failure_is_remembered() {
        let backend = LocalBackend::new();
        *backend.device.lock() = Some(Err("no output device".into()));

        assert!(matches!(backend.open_device(), Err(PlayerError::Device(_))));
        let (_dir, track) = tone();
        let result = backend.start(&track, 0.0, Box::new(|| {}));
        assert!(matches!(result, Err(PlayerError::Device(_))));
        assert!(backend.voice.lock().is_none());
    }
}
