use super::capture::AudioCaptureError;

/// Extracts a specific channel from interleaved multi-channel audio
#[derive(Debug, Clone, Copy)]
pub struct ChannelExtractor {
    target_channel: usize,
    total_channels: usize,
}

impl ChannelExtractor {
    pub fn new(target_channel: usize, total_channels: usize) -> Result<Self, AudioCaptureError> {
        if target_channel >= total_channels {
            return Err(AudioCaptureError::Config(format!(
                "Selected channel {} is not available (device has {} channels)",
                target_channel, total_channels
            )));
        }

        Ok(Self {
            target_channel,
            total_channels,
        })
    }

    /// Append the target channel of `interleaved` to `out`, converting each sample with `convert`.
    pub fn extract_into<T: Copy>(
        &self,
        interleaved: &[T],
        out: &mut Vec<f32>,
        convert: impl Fn(T) -> f32,
    ) {
        if self.total_channels == 1 {
            out.extend(interleaved.iter().map(|&s| convert(s)));
        } else {
            out.extend(
                interleaved
                    .chunks(self.total_channels)
                    .filter_map(|frame| frame.get(self.target_channel))
                    .map(|&s| convert(s)),
            );
        }
    }
}
