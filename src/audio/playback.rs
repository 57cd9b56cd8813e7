use super::chunk::AudioChunk;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug, Clone)]
pub enum AudioError {
    #[error("Failed to write audio data: {0}")]
    WriteError(String),

    #[error("Failed to stop audio playback: {0}")]
    StopError(String),

    #[error("Buffer full")]
    BufferFull,

    #[error("Audio device error: {0}")]
    DeviceError(String),
}

/// Core trait for audio output handling
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    /// Queue 16-bit PCM for playback at the chunk's own sample rate.
    /// Returns `true` when this call activated the output device.
    async fn write(&self, chunk: &AudioChunk) -> Result<bool, AudioError>;

    /// Halt playback, discard buffered audio and release the device.
    /// Returns `true` when the device was active.
    async fn stop(&self) -> Result<bool, AudioError>;

    fn is_active(&self) -> bool;
}

pub struct PlaybackConfig {
    /// Output device name (None = default device)
    pub device_name: Option<String>,
    /// Most audio allowed to sit in the device queue before writes are refused
    pub buffer_size_ms: u32,
    /// Depth of the command channel feeding the device thread
    pub queue_depth: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            buffer_size_ms: 45000,
            queue_depth: 64,
        }
    }
}

enum AudioCommand {
    Play(AudioChunk),
    Stop,
}

type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

/// Handle to the running device thread of one play cycle
struct PlaybackDevice {
    commands: mpsc::Sender<AudioCommand>,
    queue: SampleQueue,
    device_rate: u32,
    stopped: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PlaybackDevice {
    async fn open(config: &PlaybackConfig) -> Result<Self, AudioError> {
        let (commands, command_rx) = mpsc::channel(config.queue_depth.max(1));
        let (ready_tx, ready_rx) = oneshot::channel();
        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        let stopped = Arc::new(AtomicBool::new(false));

        let device_name = config.device_name.clone();
        let thread_queue = Arc::clone(&queue);
        let thread_stopped = Arc::clone(&stopped);

        let thread = thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || {
                run_device_thread(device_name, thread_queue, thread_stopped, command_rx, ready_tx)
            })
            .map_err(|e| AudioError::DeviceError(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(device_rate)) => Ok(Self {
                commands,
                queue,
                device_rate,
                stopped,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                join_in_background(thread).await;
                Err(e)
            }
            Err(_) => {
                join_in_background(thread).await;
                Err(AudioError::DeviceError(
                    "playback thread exited before the device opened".to_string(),
                ))
            }
        }
    }

    fn buffered_ms(&self) -> u64 {
        let samples = self.queue.lock().unwrap_or_else(PoisonError::into_inner).len() as u64;
        samples * 1000 / self.device_rate.max(1) as u64
    }

    fn halt(&self) {
        self.stopped.store(true, Ordering::Release);
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

async fn join_in_background(thread: thread::JoinHandle<()>) {
    match tokio::task::spawn_blocking(move || thread.join()).await {
        Ok(Ok(())) => {}
        _ => log::error!("AudioSink: Failed to join audio thread"),
    }
}

/// cpal output sink that opens the device on the first write of a play cycle
pub struct CpalPlayback {
    config: PlaybackConfig,
    device: tokio::sync::Mutex<Option<PlaybackDevice>>,
    active: AtomicBool,
}

impl CpalPlayback {
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            device: tokio::sync::Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }
}

impl Default for CpalPlayback {
    fn default() -> Self {
        Self::new(PlaybackConfig::default())
    }
}

#[async_trait::async_trait]
impl AudioSink for CpalPlayback {
    async fn write(&self, chunk: &AudioChunk) -> Result<bool, AudioError> {
        if chunk.is_empty() {
            return Ok(false);
        }

        let mut guard = self.device.lock().await;
        let activated = guard.is_none();
        if activated {
            log::debug!("AudioSink: Activating output device");
            *guard = Some(PlaybackDevice::open(&self.config).await?);
            self.active.store(true, Ordering::Release);
        }

        let device = guard
            .as_ref()
            .ok_or_else(|| AudioError::WriteError("device not open".to_string()))?;

        let buffered = device.buffered_ms();
        if buffered >= self.config.buffer_size_ms as u64 {
            log::warn!("AudioSink: Buffer full ({} ms queued)", buffered);
            return Err(AudioError::BufferFull);
        }

        log::trace!(
            "AudioSink: Writing {} bytes at {} Hz (buffer: {} ms)",
            chunk.len(),
            chunk.format().sample_rate,
            buffered
        );

        device
            .commands
            .send(AudioCommand::Play(chunk.clone()))
            .await
            .map_err(|e| AudioError::WriteError(e.to_string()))?;

        Ok(activated)
    }

    async fn stop(&self) -> Result<bool, AudioError> {
        let device = self.device.lock().await.take();
        let Some(mut device) = device else {
            return Ok(false);
        };

        log::debug!("AudioSink: Stopping playback");
        self.active.store(false, Ordering::Release);
        device.halt();

        // A full channel is fine, closing it ends the thread as well
        let _ = device.commands.try_send(AudioCommand::Stop);
        drop(device.commands);

        if let Some(thread) = device.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|e| AudioError::StopError(e.to_string()))?
                .map_err(|_| AudioError::StopError("audio thread panicked".to_string()))?;
        }
        Ok(true)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.get_mut().take() {
            device.halt();
            drop(device.commands);
            if let Some(thread) = device.thread.take() {
                if thread.join().is_err() {
                    log::error!("AudioSink: Failed to join audio thread");
                }
            }
        }
    }
}

fn run_device_thread(
    device_name: Option<String>,
    queue: SampleQueue,
    stopped: Arc<AtomicBool>,
    mut commands: mpsc::Receiver<AudioCommand>,
    ready: oneshot::Sender<Result<u32, AudioError>>,
) {
    let (stream, device_rate) = match open_output_stream(device_name.as_deref(), &queue) {
        Ok(opened) => opened,
        Err(e) => {
            log::error!("AudioSink: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(device_rate)).is_err() {
        return;
    }
    log::debug!("AudioSink: Audio stream started at {} Hz", device_rate);

    let mut resampler = LinearResampler::new(device_rate);
    while let Some(command) = commands.blocking_recv() {
        match command {
            AudioCommand::Play(chunk) => {
                if stopped.load(Ordering::Acquire) {
                    continue;
                }
                let samples = chunk.samples();
                let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
                resampler.process(chunk.format().sample_rate, &samples, &mut queue);
            }
            AudioCommand::Stop => {
                log::debug!("AudioSink: Received stop command");
                break;
            }
        }
    }

    drop(stream);
    log::debug!("AudioSink: Audio thread exiting, device released");
}

fn open_output_stream(
    device_name: Option<&str>,
    queue: &SampleQueue,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceError(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceError(format!("Device not found: {}", name)))?,
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceError("No output device found".to_string()))?,
    };
    log::debug!("AudioSink: Using output device: {:?}", device.name());

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceError(e.to_string()))?;
    let config = supported.config();
    let device_rate = config.sample_rate.0;

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output_stream::<f32>(&device, &config, queue)?,
        SampleFormat::I16 => build_output_stream::<i16>(&device, &config, queue)?,
        SampleFormat::U16 => build_output_stream::<u16>(&device, &config, queue)?,
        other => {
            return Err(AudioError::DeviceError(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::DeviceError(e.to_string()))?;
    Ok((stream, device_rate))
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &SampleQueue,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = config.channels.max(1) as usize;
    let queue = Arc::clone(queue);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
                for frame in data.chunks_mut(channels) {
                    let value = T::from_sample(queue.pop_front().unwrap_or(0.0));
                    frame.fill(value);
                }
            },
            move |err| log::error!("AudioSink: Stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::DeviceError(e.to_string()))
}

/// Streaming linear interpolator that keeps its phase across chunks.
struct LinearResampler {
    target_rate: u32,
    source_rate: u32,
    position: f64,
    previous: Option<f32>,
}

impl LinearResampler {
    fn new(target_rate: u32) -> Self {
        Self {
            target_rate,
            source_rate: target_rate,
            position: 0.0,
            previous: None,
        }
    }

    fn process(&mut self, source_rate: u32, input: &[f32], out: &mut VecDeque<f32>) {
        if source_rate != self.source_rate {
            self.source_rate = source_rate;
            self.position = 0.0;
            self.previous = None;
        }
        if source_rate == self.target_rate || source_rate == 0 {
            out.extend(input.iter().copied());
            return;
        }

        let step = source_rate as f64 / self.target_rate as f64;
        let at = |i: usize| -> f32 {
            match self.previous {
                Some(prev) if i == 0 => prev,
                Some(_) => input[i - 1],
                None => input[i],
            }
        };
        let len = input.len() + usize::from(self.previous.is_some());
        if len == 0 {
            return;
        }

        let mut position = self.position;
        while position + 1.0 < len as f64 {
            let index = position.floor() as usize;
            let frac = (position - index as f64) as f32;
            out.push_back(at(index) * (1.0 - frac) + at(index + 1) * frac);
            position += step;
        }

        let last = at(len - 1);
        self.position = position - (len - 1) as f64;
        self.previous = Some(last);
    }
}
