//! Bounded frame queues for the stream proxy.
//!
//! Two queues feed the client-bound pump: key frames (SPS/PPS/IDR) and
//! everything else. The message queue admits new frames by dropping the
//! oldest when full; key frames are never silently overwritten — the pump
//! makes room by draining stale messages and only drops a key frame when
//! that fails.

use std::collections::VecDeque;
use std::sync::Mutex;

/// NAL unit types a decoder needs to initialise or recover.
const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;

/// True when the frame is an SPS, PPS or IDR NAL unit.
pub fn is_key_frame(frame: &[u8]) -> bool {
    matches!(
        shared::h264::nal_unit_type(frame),
        Some(NAL_IDR) | Some(NAL_SPS) | Some(NAL_PPS)
    )
}

/// Fixed-capacity FIFO of owned frames.
pub struct FrameQueue {
    frames: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends a frame, rejecting it when the queue is full.
    pub fn try_push(&self, frame: Vec<u8>) -> Result<(), Vec<u8>> {
        let mut frames = self.frames.lock().expect("frame queue poisoned");
        if frames.len() >= self.capacity {
            Err(frame)
        } else {
            frames.push_back(frame);
            Ok(())
        }
    }

    /// Appends a frame, evicting the oldest when full. Returns true when an
    /// eviction happened.
    pub fn push_drop_oldest(&self, frame: Vec<u8>) -> bool {
        let mut frames = self.frames.lock().expect("frame queue poisoned");
        let dropped = if frames.len() >= self.capacity {
            frames.pop_front();
            true
        } else {
            false
        };
        frames.push_back(frame);
        dropped
    }

    pub fn pop(&self) -> Option<Vec<u8>> {
        self.frames.lock().expect("frame queue poisoned").pop_front()
    }

    /// Removes up to `count` frames from the front.
    pub fn drain_front(&self, count: usize) -> usize {
        let mut frames = self.frames.lock().expect("frame queue poisoned");
        let n = count.min(frames.len());
        frames.drain(..n);
        n
    }

    pub fn len(&self) -> usize {
        self.frames.lock().expect("frame queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
