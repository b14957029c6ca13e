//! The playback queue: a strict FIFO of pending clips plus a `last_played` slot.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::model::ClipData;

/// Thread-safe FIFO queue of clips awaiting playback.
///
/// `last_played` is written only by the playback engine, only after a clip
/// successfully enters the `Playing` state. `clear()` never touches it.
pub struct ClipQueue {
    inner: Mutex<Inner>,
}

struct Inner {
    pending: VecDeque<ClipData>,
    last_played: Option<ClipData>,
}

impl Default for ClipQueue {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: VecDeque::new(),
                last_played: None,
            }),
        }
    }
}

impl ClipQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, clip: ClipData) {
        self.inner.lock().pending.push_back(clip);
    }

    pub fn dequeue(&self) -> Option<ClipData> {
        self.inner.lock().pending.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records the clip that just entered `Playing`.
    pub fn set_last_played(&self, clip: ClipData) {
        self.inner.lock().last_played = Some(clip);
    }

    #[must_use]
    pub fn last_played(&self) -> Option<ClipData> {
        self.inner.lock().last_played.clone()
    }

    /// Drops every pending clip; `last_played` is untouched.
    pub fn clear(&self) {
        self.inner.lock().pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn clip(id: &str) -> ClipData {
        ClipData {
            id: id.into(),
            url: format!("https://clips.twitch.tv/{id}"),
            title: "t".into(),
            creator_id: "1".into(),
            creator_login: "c".into(),
            creator_display: "C".into(),
            broadcaster_id: "2".into(),
            broadcaster_login: "b".into(),
            broadcaster_display: "B".into(),
            game_name: "g".into(),
            duration_seconds: 5,
            created_at: Utc::now(),
            view_count: 0,
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let q = ClipQueue::new();
        q.enqueue(clip("a"));
        q.enqueue(clip("b"));
        assert_eq!(q.dequeue().unwrap().id, "a");
        assert_eq!(q.dequeue().unwrap().id, "b");
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn clear_does_not_touch_last_played() {
        let q = ClipQueue::new();
        q.set_last_played(clip("a"));
        q.enqueue(clip("b"));
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.last_played().unwrap().id, "a");
    }
}
