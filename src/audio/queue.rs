//! Unbounded FIFO of audio chunks for one play session, closed by a single
//! end marker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioMessage {
    Chunk(Bytes),
    /// No more audio for this session
    End,
}

/// Single-producer (dispatcher) / single-consumer (playback) chunk queue.
///
/// Tracks how many bytes are waiting so playback can report buffered seconds.
#[derive(Clone)]
pub struct AudioQueue {
    tx: Sender<AudioMessage>,
    rx: Receiver<AudioMessage>,
    queued_bytes: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
}

impl Default for AudioQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            queued_bytes: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueue a chunk. Empty chunks and chunks after `finish` are dropped.
    pub fn push(&self, chunk: Bytes) {
        if chunk.is_empty() || self.is_finished() {
            return;
        }
        self.queued_bytes.fetch_add(chunk.len(), Ordering::AcqRel);
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(AudioMessage::Chunk(chunk));
    }

    /// Close the queue with the end marker. Only the first call has an effect.
    pub fn finish(&self) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(AudioMessage::End);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the next message
    pub fn recv_timeout(&self, timeout: Duration) -> Option<AudioMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(AudioMessage::Chunk(chunk)) => {
                self.queued_bytes.fetch_sub(chunk.len(), Ordering::AcqRel);
                Some(AudioMessage::Chunk(chunk))
            }
            Ok(AudioMessage::End) => Some(AudioMessage::End),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Bytes enqueued but not yet taken by playback
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Drop everything still waiting, including the end marker
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while let Ok(message) = self.rx.try_recv() {
            if let AudioMessage::Chunk(chunk) = message {
                self.queued_bytes.fetch_sub(chunk.len(), Ordering::AcqRel);
                dropped += chunk.len();
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(10);

    #[test]
    fn chunks_arrive_in_order_then_end() {
        let queue = AudioQueue::new();
        queue.push(Bytes::from_static(b"ab"));
        queue.push(Bytes::from_static(b"cde"));
        queue.finish();
        queue.finish();
        assert_eq!(queue.queued_bytes(), 5);

        assert_eq!(
            queue.recv_timeout(WAIT),
            Some(AudioMessage::Chunk(Bytes::from_static(b"ab")))
        );
        assert_eq!(queue.queued_bytes(), 3);
        assert_eq!(
            queue.recv_timeout(WAIT),
            Some(AudioMessage::Chunk(Bytes::from_static(b"cde")))
        );
        assert_eq!(queue.recv_timeout(WAIT), Some(AudioMessage::End));
        assert_eq!(queue.recv_timeout(WAIT), None);
    }

    #[test]
    fn nothing_is_accepted_after_finish() {
        let queue = AudioQueue::new();
        queue.finish();
        queue.push(Bytes::from_static(b"late"));
        assert_eq!(queue.queued_bytes(), 0);
        assert_eq!(queue.recv_timeout(WAIT), Some(AudioMessage::End));
    }

    #[test]
    fn clear_resets_the_byte_count() {
        let queue = AudioQueue::new();
        queue.push(Bytes::from_static(b"1234"));
        queue.push(Bytes::new());
        assert_eq!(queue.clear(), 4);
        assert_eq!(queue.queued_bytes(), 0);
        assert!(queue.is_empty());
    }
}
