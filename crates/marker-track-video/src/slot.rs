use std::sync::Mutex;

use marker_track_core::VideoFrame;

/// Single-frame exchange between the capture worker and the consumer.
///
/// Last value wins: publishing overwrites whatever the consumer has not
/// taken yet. There is no queue and no producer backpressure; the consumer
/// always observes either nothing new or the most recent frame.
#[derive(Default)]
pub struct FrameSlot {
    slot: Mutex<Option<VideoFrame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, replacing any unconsumed one. Returns the sequence
    /// number of the frame that was dropped, if any.
    pub fn publish(&self, frame: VideoFrame) -> Option<u64> {
        let mut slot = self.lock();
        slot.replace(frame).map(|dropped| dropped.sequence)
    }

    /// Take the pending frame, leaving the slot empty.
    pub fn try_take(&self) -> Option<VideoFrame> {
        self.lock().take()
    }

    /// Drop any pending frame without handing it out.
    pub fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<VideoFrame>> {
        match self.slot.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_track_core::GrayImage;

    fn frame(seq: u64) -> VideoFrame {
        VideoFrame::new(GrayImage::filled(4, 4, 0), seq)
    }

    #[test]
    fn take_yields_latest_published_frame() {
        let slot = FrameSlot::new();
        assert!(slot.try_take().is_none());

        assert_eq!(slot.publish(frame(1)), None);
        assert_eq!(slot.publish(frame(2)), Some(1));
        assert_eq!(slot.publish(frame(3)), Some(2));

        let taken = slot.try_take().unwrap();
        assert_eq!(taken.sequence, 3);
        assert!(slot.try_take().is_none());
    }

    #[test]
    fn consumer_sequences_are_strictly_increasing() {
        let slot = FrameSlot::new();
        let mut last_seen = 0u64;
        for seq in 1..=20 {
            slot.publish(frame(seq));
            if seq % 3 == 0 {
                let taken = slot.try_take().unwrap();
                assert!(taken.sequence > last_seen);
                last_seen = taken.sequence;
            }
        }
        assert_eq!(last_seen, 18);
    }

    #[test]
    fn clear_discards_pending_frame() {
        let slot = FrameSlot::new();
        slot.publish(frame(7));
        slot.clear();
        assert!(slot.try_take().is_none());
    }

    #[test]
    fn concurrent_publish_and_take_never_go_backwards() {
        use std::sync::Arc;

        let slot = Arc::new(FrameSlot::new());
        let producer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for seq in 1..=500 {
                    slot.publish(frame(seq));
                }
            })
        };

        let mut last_seen = 0u64;
        while last_seen < 500 {
            if let Some(f) = slot.try_take() {
                assert!(f.sequence > last_seen);
                last_seen = f.sequence;
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
