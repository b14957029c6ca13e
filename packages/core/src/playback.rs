//! Playback engine: a supervised background loop reading `Play`/`Stop`
//! commands off an unbounded channel, driving the five-state machine
//! described in the design. `Play` runs as a child task so `Stop` is never
//! stuck behind an in-flight clip's full duration; a shared `Notify` plus
//! joining that child task keep the two from racing on shared state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{EventEmitter, PlaybackEvent};
use crate::model::{ClipData, PlaybackState};
use crate::queue::ClipQueue;
use crate::scene::SceneController;
use crate::utils::now_millis;

const MAX_FAILURES_BEFORE_QUARANTINE: u32 = 3;
const COOLDOWN_DWELL: Duration = Duration::from_secs(2);
const STOP_DWELL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
enum EngineCommand {
    Play,
    Stop,
}

/// Public handle to the playback engine; cheap to clone, safe to share.
#[derive(Clone)]
pub struct PlaybackEngine {
    queue: Arc<ClipQueue>,
    state: Arc<RwLock<PlaybackState>>,
    current_clip: Arc<RwLock<Option<ClipData>>>,
    failures: Arc<Mutex<std::collections::HashMap<String, u32>>>,
    quarantine: Arc<Mutex<HashSet<String>>>,
    tx: mpsc::UnboundedSender<EngineCommand>,
    stop_signal: Arc<tokio::sync::Notify>,
    busy: Arc<AtomicBool>,
    play_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PlaybackEngine {
    /// Spawns the supervised loop and returns a handle to it.
    #[must_use]
    pub fn start(
        scene: Arc<SceneController>,
        emitter: Arc<dyn EventEmitter>,
        cancel: CancellationToken,
    ) -> Self {
        let queue = Arc::new(ClipQueue::new());
        let state = Arc::new(RwLock::new(PlaybackState::Idle));
        let current_clip = Arc::new(RwLock::new(None));
        let failures = Arc::new(Mutex::new(std::collections::HashMap::new()));
        let quarantine = Arc::new(Mutex::new(HashSet::new()));
        let (tx, mut rx) = mpsc::unbounded_channel::<EngineCommand>();
        let stop_signal = Arc::new(tokio::sync::Notify::new());
        let busy = Arc::new(AtomicBool::new(false));
        let play_task = Arc::new(Mutex::new(None));

        let engine = Self {
            queue: Arc::clone(&queue),
            state: Arc::clone(&state),
            current_clip: Arc::clone(&current_clip),
            failures: Arc::clone(&failures),
            quarantine: Arc::clone(&quarantine),
            tx: tx.clone(),
            stop_signal: Arc::clone(&stop_signal),
            busy: Arc::clone(&busy),
            play_task: Arc::clone(&play_task),
        };

        let loop_handle = engine.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        *loop_handle.state.write() = PlaybackState::Idle;
                        return;
                    }
                    cmd = rx.recv() => {
                        match cmd {
                            // Played as a child task so this loop keeps draining
                            // `rx` while a clip is in flight — otherwise a `Stop`
                            // sitting in the channel would wait behind the full
                            // clip duration before `handle_stop` ever ran.
                            Some(EngineCommand::Play) => {
                                if loop_handle.busy.swap(true, Ordering::SeqCst) {
                                    continue;
                                }
                                let handle = loop_handle.clone();
                                let scene = Arc::clone(&scene);
                                let emitter = Arc::clone(&emitter);
                                let cancel = cancel.clone();
                                let task = tokio::spawn(async move {
                                    handle.handle_play(&scene, &emitter, &cancel).await;
                                    handle.busy.store(false, Ordering::SeqCst);
                                });
                                *loop_handle.play_task.lock() = Some(task);
                            }
                            Some(EngineCommand::Stop) => {
                                loop_handle.handle_stop(&scene, &emitter).await;
                            }
                            None => return,
                        }
                    }
                }
            }
        });

        engine
    }

    /// Enqueues a clip and requests a `Play` attempt.
    pub fn enqueue(&self, clip: ClipData) {
        self.queue.enqueue(clip);
        let _ = self.tx.send(EngineCommand::Play);
    }

    /// Re-enqueues `last_played`, if any.
    pub fn replay(&self) -> bool {
        match self.queue.last_played() {
            Some(clip) => {
                self.enqueue(clip);
                true
            }
            None => {
                log::warn!("replay requested with no previously played clip");
                false
            }
        }
    }

    pub fn stop(&self) {
        let _ = self.tx.send(EngineCommand::Stop);
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        *self.state.read()
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<ClipQueue> {
        &self.queue
    }

    /// `Some` iff `state()` is `Loading`, `Playing`, or `Cooldown`.
    #[must_use]
    pub fn current_clip(&self) -> Option<ClipData> {
        self.current_clip.read().clone()
    }

    fn transition(&self, to: PlaybackState, emitter: &Arc<dyn EventEmitter>) {
        let from = {
            let mut guard = self.state.write();
            let from = *guard;
            *guard = to;
            from
        };
        emitter.emit_playback(PlaybackEvent::StateChanged {
            from,
            to,
            clip_id: self.current_clip.read().as_ref().map(|c| c.id.clone()),
            timestamp: now_millis(),
        });
    }

    async fn handle_play(
        &self,
        scene: &Arc<SceneController>,
        emitter: &Arc<dyn EventEmitter>,
        cancel: &CancellationToken,
    ) {
        let current_state = self.state();
        if matches!(current_state, PlaybackState::Loading | PlaybackState::Playing) {
            // Already in flight; the queued clip waits its turn.
            return;
        }

        let Some(clip) = self.queue.dequeue() else {
            return;
        };

        if self.quarantine.lock().contains(&clip.id) {
            log::warn!("skipping quarantined clip {}", clip.id);
            if !self.queue.is_empty() {
                let _ = self.tx.send(EngineCommand::Play);
            }
            return;
        }

        *self.current_clip.write() = Some(clip.clone());
        self.transition(PlaybackState::Loading, emitter);

        if scene.is_connected() {
            if let Err(e) = scene.show_overlay().await {
                log::warn!("scene controller show_overlay failed (continuing): {e}");
            }
        } else {
            log::warn!("scene controller disconnected; proceeding without visibility change");
        }

        self.transition(PlaybackState::Playing, emitter);

        let duration = Duration::from_secs(clip.duration_seconds as u64);
        let stopped = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.stop_signal.notified() => true,
            _ = cancel.cancelled() => true,
        };

        if stopped {
            return;
        }

        self.queue.set_last_played(clip.clone());
        self.failures.lock().remove(&clip.id);

        if scene.is_connected() {
            if let Err(e) = scene.hide_overlay().await {
                log::warn!("scene controller hide_overlay failed (continuing): {e}");
            }
        }

        self.transition(PlaybackState::Cooldown, emitter);

        tokio::select! {
            _ = tokio::time::sleep(COOLDOWN_DWELL) => {}
            _ = cancel.cancelled() => {
                *self.current_clip.write() = None;
                self.transition(PlaybackState::Idle, emitter);
                return;
            }
        }

        // `currentClip` stays populated for the whole Cooldown dwell; only once
        // we leave it for Idle does "no clip in flight" become true again.
        *self.current_clip.write() = None;
        self.transition(PlaybackState::Idle, emitter);
        if !self.queue.is_empty() {
            let _ = self.tx.send(EngineCommand::Play);
        }
    }

    async fn handle_stop(&self, scene: &Arc<SceneController>, emitter: &Arc<dyn EventEmitter>) {
        let was_playing = matches!(self.state(), PlaybackState::Playing | PlaybackState::Loading);
        if was_playing {
            self.stop_signal.notify_one();
        }

        // Wait for the in-flight `handle_play` task (if any) to actually
        // unwind before touching shared state, so its "already playing"
        // guard and the busy flag can't race with what follows.
        let task = self.play_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        if scene.is_connected() {
            if let Err(e) = scene.hide_overlay().await {
                log::warn!("scene controller hide_overlay failed during stop: {e}");
            }
        }

        if let Some(clip) = self.current_clip.write().take() {
            self.record_failure_if_interrupted(&clip, emitter);
        }

        self.transition(PlaybackState::Stopped, emitter);
        tokio::time::sleep(STOP_DWELL).await;
        self.transition(PlaybackState::Idle, emitter);

        if !self.queue.is_empty() {
            let _ = self.tx.send(EngineCommand::Play);
        }
    }

    fn record_failure_if_interrupted(&self, _clip: &ClipData, _emitter: &Arc<dyn EventEmitter>) {
        // Stop is a clean user-requested interruption, not a playback fault;
        // the failure counter (and quarantine) is reserved for genuine
        // runtime errors during Loading/Playing/Cooldown.
    }

    /// Records a runtime failure for a clip; quarantines it after three.
    pub fn record_runtime_failure(&self, clip_id: &str, emitter: &Arc<dyn EventEmitter>) {
        let mut failures = self.failures.lock();
        let count = failures.entry(clip_id.to_string()).or_insert(0);
        *count += 1;
        if *count >= MAX_FAILURES_BEFORE_QUARANTINE {
            self.quarantine.lock().insert(clip_id.to_string());
            emitter.emit_playback(PlaybackEvent::ClipQuarantined {
                clip_id: clip_id.to_string(),
                timestamp: now_millis(),
            });
        }
    }

    #[must_use]
    pub fn is_quarantined(&self, clip_id: &str) -> bool {
        self.quarantine.lock().contains(clip_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::scene::SceneController;

    fn clip(id: &str, duration: u32) -> ClipData {
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
            duration_seconds: duration,
            created_at: chrono::Utc::now(),
            view_count: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_cycles_through_states_and_records_last_played() {
        let scene = SceneController::disconnected_for_tests();
        let emitter: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let cancel = CancellationToken::new();
        let engine = PlaybackEngine::start(scene, emitter, cancel);

        engine.enqueue(clip("abc", 10));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;

        assert_eq!(engine.state(), PlaybackState::Idle);
        assert_eq!(engine.queue().last_played().unwrap().id, "abc");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_preempts_in_flight_clip_without_waiting_for_its_duration() {
        let scene = SceneController::disconnected_for_tests();
        let emitter: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let cancel = CancellationToken::new();
        let engine = PlaybackEngine::start(scene, emitter, cancel);

        engine.enqueue(clip("long", 600));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.state(), PlaybackState::Playing);

        engine.stop();
        for _ in 0..20 {
            if engine.state() == PlaybackState::Stopped {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert!(engine.current_clip().is_none());
        assert!(engine.queue().last_played().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn current_clip_stays_populated_through_the_cooldown_dwell() {
        let scene = SceneController::disconnected_for_tests();
        let emitter: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let cancel = CancellationToken::new();
        let engine = PlaybackEngine::start(scene, emitter, cancel);

        engine.enqueue(clip("abc", 1));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;

        assert_eq!(engine.state(), PlaybackState::Cooldown);
        assert_eq!(engine.current_clip().map(|c| c.id), Some("abc".into()));

        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;

        assert_eq!(engine.state(), PlaybackState::Idle);
        assert!(engine.current_clip().is_none());
    }

    #[test]
    fn quarantine_requires_three_failures() {
        let scene = SceneController::disconnected_for_tests();
        let emitter: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let cancel = CancellationToken::new();
        let engine = PlaybackEngine::start(scene, emitter.clone(), cancel);

        engine.record_runtime_failure("x", &emitter);
        engine.record_runtime_failure("x", &emitter);
        assert!(!engine.is_quarantined("x"));
        engine.record_runtime_failure("x", &emitter);
        assert!(engine.is_quarantined("x"));
    }

    #[test]
    fn replay_with_no_last_played_is_a_noop() {
        let scene = SceneController::disconnected_for_tests();
        let emitter: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let cancel = CancellationToken::new();
        let engine = PlaybackEngine::start(scene, emitter, cancel);
        assert!(!engine.replay());
    }
}
