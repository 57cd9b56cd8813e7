use crate::audio::AudioChunk;
use std::collections::VecDeque;

/// Chunks held while the handshake is incomplete
pub const PENDING_AUDIO_CAPACITY: usize = 60;

/// Bounded FIFO of captured audio. When full, the oldest chunk is evicted.
#[derive(Debug)]
pub struct PendingAudioQueue {
    chunks: VecDeque<AudioChunk>,
    capacity: usize,
}

impl PendingAudioQueue {
    /// Capacity is clamped to `1..=PENDING_AUDIO_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, PENDING_AUDIO_CAPACITY);
        Self {
            chunks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a chunk, returning the evicted oldest chunk if the queue was full.
    pub fn push(&mut self, chunk: AudioChunk) -> Option<AudioChunk> {
        let evicted = if self.chunks.len() >= self.capacity {
            self.chunks.pop_front()
        } else {
            None
        };
        self.chunks.push_back(chunk);
        evicted
    }

    /// Remove and return every chunk, oldest first.
    pub fn drain(&mut self) -> Vec<AudioChunk> {
        self.chunks.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PendingAudioQueue {
    fn default() -> Self {
        Self::new(PENDING_AUDIO_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: u8) -> AudioChunk {
        AudioChunk::input(vec![tag, 0])
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = PendingAudioQueue::default();
        for i in 0..5 {
            assert!(queue.push(chunk(i)).is_none());
        }
        let tags: Vec<u8> = queue.drain().iter().map(|c| c.data()[0]).collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut queue = PendingAudioQueue::default();
        for i in 0..60 {
            queue.push(chunk(i));
        }
        assert_eq!(queue.len(), 60);

        let evicted = queue.push(chunk(60)).expect("oldest chunk evicted");
        assert_eq!(evicted.data()[0], 0);
        assert_eq!(queue.len(), 60);

        let drained = queue.drain();
        assert_eq!(drained.first().unwrap().data()[0], 1);
        assert_eq!(drained.last().unwrap().data()[0], 60);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut queue = PendingAudioQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(chunk(1));
        queue.push(chunk(2));
        assert_eq!(queue.drain(), vec![chunk(2)]);
    }

    #[test]
    fn test_capacity_never_exceeds_limit() {
        let mut queue = PendingAudioQueue::new(500);
        assert_eq!(queue.capacity(), PENDING_AUDIO_CAPACITY);
        for i in 0..100 {
            queue.push(chunk(i));
        }
        assert_eq!(queue.len(), PENDING_AUDIO_CAPACITY);
        assert_eq!(queue.drain()[0].data()[0], 40);
    }
}
