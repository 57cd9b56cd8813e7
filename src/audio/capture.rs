use super::channel::ChannelExtractor;
use super::chunk::{f32_to_s16le_bytes, AudioChunk, AudioFormat, INPUT_SAMPLE_RATE};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, FromSample, Sample, SampleFormat, SizedSample, Stream as CpalStream,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Resampler input block size (in samples)
pub const CHUNK_SIZE: usize = 1280;

/// Upper bound on how long the read loop waits before re-checking cancellation.
pub const READ_CYCLE: Duration = Duration::from_millis(50);

/// Device blocks buffered between the audio callback and the read loop.
/// One second of headroom for callback periods of 5 ms or longer.
const HEADROOM_BLOCKS: usize = 200;

#[derive(Error, Debug)]
pub enum AudioCaptureError {
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Resampling error: {0}")]
    Resampling(String),
}

/// Receives every captured chunk, on the capture thread.
pub type ChunkConsumer = Arc<dyn Fn(AudioChunk) + Send + Sync>;

/// Audio capture configuration
#[derive(Debug, Clone)]
pub struct AudioCaptureConfig {
    /// Input device name (None = default device)
    pub device_name: Option<String>,
    /// Channel to capture (0-based index)
    pub channel: u32,
    /// Duration of each delivered chunk
    pub chunk_ms: u32,
}

impl Default for AudioCaptureConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            channel: 0,
            chunk_ms: 100,
        }
    }
}

/// Audio device information
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub channel_count: u32,
}

struct CaptureWorker {
    cancel: CancellationToken,
    handle: thread::JoinHandle<()>,
}

/// Microphone capture producing mono 16kHz s16le chunks.
///
/// The cpal stream lives on a dedicated thread for the whole active period;
/// `stop` cancels that thread and joins it, so the device is released by the
/// time `stop` returns.
pub struct AudioCapture {
    config: AudioCaptureConfig,
    consumer: ChunkConsumer,
    worker: Mutex<Option<CaptureWorker>>,
}

impl AudioCapture {
    pub fn new(config: AudioCaptureConfig, consumer: ChunkConsumer) -> Self {
        Self {
            config,
            consumer,
            worker: Mutex::new(None),
        }
    }

    /// Open the device and begin delivering chunks. No-op while already active.
    ///
    /// Blocks until the device is either streaming or has failed to open.
    pub fn start(&self) -> Result<(), AudioCaptureError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            log::debug!("🎤 Capture already active");
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded(1);
        let cancel = CancellationToken::new();
        let thread_cancel = cancel.clone();
        let config = self.config.clone();
        let consumer = Arc::clone(&self.consumer);

        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                if let Err(e) = Self::run_capture_thread(config, consumer, thread_cancel, &ready_tx)
                {
                    log::error!("Audio capture thread failed: {}", e);
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| AudioCaptureError::Stream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *worker = Some(CaptureWorker { cancel, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioCaptureError::Stream(
                    "capture thread exited before the device opened".into(),
                ))
            }
        }
    }

    /// Cancel the read loop and release the device. Returns whether capture was active.
    pub fn stop(&self) -> bool {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match worker {
            Some(worker) => {
                log::debug!("🎤 Stopping audio capture");
                worker.cancel.cancel();
                if worker.handle.join().is_err() {
                    log::error!("Audio capture thread panicked");
                }
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Internal function that runs in the CPAL thread
    fn run_capture_thread(
        config: AudioCaptureConfig,
        consumer: ChunkConsumer,
        cancel: CancellationToken,
        ready: &Sender<Result<(), AudioCaptureError>>,
    ) -> Result<(), AudioCaptureError> {
        let host = cpal::default_host();
        log::info!("🎤 Initializing audio capture with host: {:?}", host.id());

        let device = match &config.device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| AudioCaptureError::Device(e.to_string()))?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| AudioCaptureError::Device(format!("Device not found: {}", name)))?,
            None => host
                .default_input_device()
                .ok_or_else(|| AudioCaptureError::Device("No default input device found".into()))?,
        };

        log::info!("🎤 Using input device: {:?}", device.name());

        let supported_config = match Self::select_input_config(&device, config.channel) {
            Ok(config) => config,
            Err(err) => {
                log::warn!(
                    "⚠️  Failed to select preferred input config: {}. Falling back to default input config.",
                    err
                );
                device
                    .default_input_config()
                    .map_err(|e| AudioCaptureError::Config(e.to_string()))?
            }
        };

        let stream_config = supported_config.config();
        let hardware_rate = stream_config.sample_rate.0;
        let extractor =
            ChannelExtractor::new(config.channel as usize, stream_config.channels as usize)?;

        log::info!(
            "🎤 Hardware: {}Hz, {} channels, {:?} → Output: 16kHz mono s16le",
            hardware_rate,
            stream_config.channels,
            supported_config.sample_format()
        );

        let mut assembler = ChunkAssembler::new(hardware_rate, config.chunk_ms, consumer)?;
        let (block_tx, block_rx) = bounded::<Vec<f32>>(HEADROOM_BLOCKS);

        let stream = match supported_config.sample_format() {
            SampleFormat::I16 => {
                Self::create_input_stream::<i16>(&device, &stream_config, extractor, block_tx)?
            }
            SampleFormat::U16 => {
                Self::create_input_stream::<u16>(&device, &stream_config, extractor, block_tx)?
            }
            SampleFormat::F32 => {
                Self::create_input_stream::<f32>(&device, &stream_config, extractor, block_tx)?
            }
            other => {
                return Err(AudioCaptureError::Config(format!(
                    "Unsupported sample format: {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| AudioCaptureError::Stream(e.to_string()))?;

        let _ = ready.send(Ok(()));
        log::info!("🎤 Audio capture started");

        Self::read_loop(&block_rx, &mut assembler, &cancel);

        // Release the device before delivering the tail
        drop(stream);
        assembler.flush();
        log::info!("🎤 Audio capture stopped, device released");
        Ok(())
    }

    fn read_loop(
        blocks: &Receiver<Vec<f32>>,
        assembler: &mut ChunkAssembler,
        cancel: &CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match blocks.recv_timeout(READ_CYCLE) {
                Ok(block) => assembler.push(&block),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("🎤 Audio stream ended unexpectedly");
                    break;
                }
            }
        }
    }

    fn select_input_config(
        device: &Device,
        channel: u32,
    ) -> Result<cpal::SupportedStreamConfig, AudioCaptureError> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| AudioCaptureError::Config(e.to_string()))?;

        let mut best: Option<(u8, u32, cpal::SupportedStreamConfig)> = None;

        for range in configs {
            if channel >= range.channels() as u32 {
                continue;
            }

            let format_rank = match range.sample_format() {
                SampleFormat::I16 => 0,
                SampleFormat::F32 => 1,
                SampleFormat::U16 => 2,
                _ => continue,
            };

            let rate =
                INPUT_SAMPLE_RATE.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
            let rate_diff = rate.abs_diff(INPUT_SAMPLE_RATE);

            let better = match &best {
                None => true,
                Some((rank, diff, _)) => {
                    rate_diff < *diff || (rate_diff == *diff && format_rank < *rank)
                }
            };
            if better {
                let config = range.with_sample_rate(cpal::SampleRate(rate));
                best = Some((format_rank, rate_diff, config));
            }
        }

        best.map(|(_, _, config)| config).ok_or_else(|| {
            AudioCaptureError::Config("No supported input configs found".to_string())
        })
    }

    fn create_input_stream<T>(
        device: &Device,
        config: &cpal::StreamConfig,
        extractor: ChannelExtractor,
        sender: Sender<Vec<f32>>,
    ) -> Result<CpalStream, AudioCaptureError>
    where
        T: Sample + SizedSample + Send + Sync + 'static,
        f32: FromSample<T>,
    {
        device
            .build_input_stream(
                config,
                move |data: &[T], _| {
                    let mut block = Vec::with_capacity(data.len());
                    extractor.extract_into(data, &mut block, f32::from_sample);
                    if !block.is_empty() && sender.try_send(block).is_err() {
                        log::warn!("🎤 Capture backlog full, dropping block");
                    }
                },
                move |err| log::error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| AudioCaptureError::Stream(e.to_string()))
    }

    /// List available input devices
    pub fn list_devices() -> Result<Vec<AudioDeviceInfo>, AudioCaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| AudioCaptureError::Device(e.to_string()))?;

        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let mut infos = Vec::new();
        for device in devices {
            let name = device
                .name()
                .map_err(|e| AudioCaptureError::Device(e.to_string()))?;
            let channel_count = match device.default_input_config() {
                Ok(config) => config.channels() as u32,
                Err(e) => {
                    log::debug!("Skipping input device {}: {}", name, e);
                    continue;
                }
            };

            infos.push(AudioDeviceInfo {
                is_default: default_name.as_ref() == Some(&name),
                name,
                channel_count,
            });
        }

        Ok(infos)
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if self.stop() {
            log::debug!("🎤 Dropped active AudioCapture");
        }
    }
}

/// Turns device-rate f32 blocks into fixed-duration 16kHz s16le chunks.
pub(crate) struct ChunkAssembler {
    resampler: Option<SincFixedIn<f32>>,
    pending_input: Vec<f32>,
    output: Vec<u8>,
    chunk_bytes: usize,
    consumer: ChunkConsumer,
}

impl ChunkAssembler {
    pub(crate) fn new(
        hardware_rate: u32,
        chunk_ms: u32,
        consumer: ChunkConsumer,
    ) -> Result<Self, AudioCaptureError> {
        let resampler = if hardware_rate != INPUT_SAMPLE_RATE {
            let ratio = INPUT_SAMPLE_RATE as f64 / hardware_rate as f64;
            let params = SincInterpolationParameters {
                sinc_len: 32,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_SIZE, 1)
                .map_err(|e| AudioCaptureError::Resampling(e.to_string()))?;
            log::info!(
                "🔄 Created resampler: {}Hz → 16kHz (ratio: {:.3})",
                hardware_rate,
                ratio
            );
            Some(resampler)
        } else {
            log::info!("🔄 No resampling needed (hardware is 16kHz)");
            None
        };

        Ok(Self {
            resampler,
            pending_input: Vec::new(),
            output: Vec::new(),
            chunk_bytes: AudioFormat::INPUT.bytes_for_ms(chunk_ms.max(1)).max(2),
            consumer,
        })
    }

    pub(crate) fn push(&mut self, block: &[f32]) {
        match self.resampler.as_mut() {
            Some(resampler) => {
                self.pending_input.extend_from_slice(block);
                loop {
                    let needed = resampler.input_frames_next();
                    if self.pending_input.len() < needed {
                        break;
                    }
                    let frames: Vec<f32> = self.pending_input.drain(..needed).collect();
                    match resampler.process(&[frames], None) {
                        Ok(out) => self.output.extend(f32_to_s16le_bytes(&out[0])),
                        Err(e) => log::error!("Resampling error: {}", e),
                    }
                }
            }
            None => self.output.extend(f32_to_s16le_bytes(block)),
        }

        while self.output.len() >= self.chunk_bytes {
            let rest = self.output.split_off(self.chunk_bytes);
            let chunk = std::mem::replace(&mut self.output, rest);
            (self.consumer)(AudioChunk::input(chunk));
        }
    }

    /// Deliver whatever is left, including the resampler's partial block.
    pub(crate) fn flush(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            if !self.pending_input.is_empty() {
                let rest = std::mem::take(&mut self.pending_input);
                match resampler.process_partial(Some(&[rest][..]), None) {
                    Ok(out) => self.output.extend(f32_to_s16le_bytes(&out[0])),
                    Err(e) => log::error!("Resampling error: {}", e),
                }
            }
        }

        if !self.output.is_empty() {
            let chunk = std::mem::take(&mut self.output);
            (self.consumer)(AudioChunk::input(chunk));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_consumer() -> (ChunkConsumer, Arc<Mutex<Vec<AudioChunk>>>) {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&chunks);
        let consumer: ChunkConsumer = Arc::new(move |chunk| sink.lock().unwrap().push(chunk));
        (consumer, chunks)
    }

    #[test]
    fn test_assembler_emits_fixed_chunks_at_16k() {
        let (consumer, chunks) = collecting_consumer();
        let mut assembler = ChunkAssembler::new(16000, 100, consumer).unwrap();

        // 250 ms of audio in uneven blocks
        for block in [vec![0.25f32; 1000], vec![0.25; 2500], vec![0.25; 500]] {
            assembler.push(&block);
        }
        {
            let chunks = chunks.lock().unwrap();
            assert_eq!(chunks.len(), 2);
            assert!(chunks.iter().all(|c| c.len() == 3200));
            assert!(chunks.iter().all(|c| c.format() == AudioFormat::INPUT));
        }

        assembler.flush();
        let chunks = chunks.lock().unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 1600);
    }

    #[test]
    fn test_flush_without_data_delivers_nothing() {
        let (consumer, chunks) = collecting_consumer();
        let mut assembler = ChunkAssembler::new(16000, 100, consumer).unwrap();
        assembler.flush();
        assert!(chunks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_assembler_resamples_48k() {
        let (consumer, chunks) = collecting_consumer();
        let mut assembler = ChunkAssembler::new(48000, 100, consumer).unwrap();

        // One second at 48 kHz
        for _ in 0..48 {
            assembler.push(&vec![0.1f32; 1000]);
        }
        assembler.flush();

        let chunks = chunks.lock().unwrap();
        let total_samples: usize = chunks.iter().map(|c| c.len() / 2).sum();
        assert!(
            (15000..=17500).contains(&total_samples),
            "unexpected output length {}",
            total_samples
        );
        assert!(chunks.iter().all(|c| !c.is_empty() && c.len() % 2 == 0));
    }

    #[test]
    fn test_stop_when_inactive_is_noop() {
        let (consumer, _) = collecting_consumer();
        let capture = AudioCapture::new(AudioCaptureConfig::default(), consumer);
        assert!(!capture.is_active());
        assert!(!capture.stop());
        assert!(!capture.stop());
    }
}
