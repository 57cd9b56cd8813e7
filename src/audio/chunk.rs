/// Microphone audio sent to the model: 16 kHz
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Synthesized audio returned by the model: 24 kHz
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// PCM layout of an [`AudioChunk`]. Always signed little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl AudioFormat {
    /// 16-bit mono at 16 kHz
    pub const INPUT: AudioFormat = AudioFormat {
        sample_rate: INPUT_SAMPLE_RATE,
        bits_per_sample: 16,
        channels: 1,
    };

    /// 16-bit mono at 24 kHz
    pub const OUTPUT: AudioFormat = AudioFormat {
        sample_rate: OUTPUT_SAMPLE_RATE,
        bits_per_sample: 16,
        channels: 1,
    };

    /// Parse a mime type such as `audio/pcm;rate=24000`.
    /// A missing or unreadable rate falls back to the output rate.
    pub fn from_mime(mime_type: &str) -> Self {
        let sample_rate = mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.trim().parse::<u32>().ok())
            .filter(|rate| *rate > 0)
            .unwrap_or(OUTPUT_SAMPLE_RATE);

        Self {
            sample_rate,
            ..Self::OUTPUT
        }
    }

    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    pub fn bytes_per_frame(&self) -> usize {
        (self.bits_per_sample as usize / 8) * self.channels as usize
    }

    /// Byte length of `ms` milliseconds of audio in this format.
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        (self.sample_rate as usize * ms as usize / 1000) * self.bytes_per_frame()
    }
}

/// Immutable block of PCM audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Vec<u8>,
    format: AudioFormat,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self { data, format }
    }

    /// Chunk of captured microphone audio
    pub fn input(data: Vec<u8>) -> Self {
        Self::new(data, AudioFormat::INPUT)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        let frame = self.format.bytes_per_frame();
        if frame == 0 || self.format.sample_rate == 0 {
            return 0;
        }
        (self.data.len() / frame) as u64 * 1000 / self.format.sample_rate as u64
    }

    /// Decode the 16-bit samples to f32 in [-1.0, 1.0). A trailing odd byte is ignored.
    pub fn samples(&self) -> Vec<f32> {
        self.data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect()
    }
}

/// Convert f32 samples to s16le bytes
pub fn f32_to_s16le_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
