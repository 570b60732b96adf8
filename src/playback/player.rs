//! Per-session playback engine
//!
//! One `Player` exists per session. It owns the session's queue, its
//! playback state and the currently open output stream, and it drives the
//! state machine from two directions: queue operations (enqueue, skip,
//! stop, pause, resume) and asynchronous stream signals (completion,
//! per-track failure, device loss).
//!
//! Auto-advance is the normal operating mode: a completion or per-track
//! failure signal advances the queue and immediately opens the next head.
//! A stream-open failure drops that track and tries the next; the session
//! goes idle only when the queue is exhausted. Device loss is escalated to
//! the registry through the teardown channel.
//!
//! Stream signals are tagged with a generation number claimed at open
//! time, so a signal from a stream that was already skipped or stopped is
//! discarded instead of advancing the queue twice.

use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::gateway::{ChannelId, Gateway, OutputStream, StreamSignal};
use crate::playback::queue::TrackQueue;
use crate::playback::state::PlaybackState;
use crate::resolver::Track;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct PlayerInner {
    queue: TrackQueue,
    state: PlaybackState,
    stream: Option<Box<dyn OutputStream>>,
    /// One in-flight stream open per session; racing starts are dropped
    opening: bool,
    /// Incremented whenever the current stream changes; stale signals are
    /// discarded by comparing against the generation claimed at open time
    generation: u64,
    /// Set on teardown; every operation afterwards is a silent no-op
    closed: bool,
}

/// Playback engine bound to one session's media-output channel
pub struct Player {
    queue_key: Uuid,
    voice_channel: ChannelId,
    gateway: Arc<dyn Gateway>,
    events: EventBus,
    teardown_tx: mpsc::Sender<Uuid>,
    inner: Mutex<PlayerInner>,
}

impl Player {
    pub fn new(
        queue_key: Uuid,
        voice_channel: ChannelId,
        gateway: Arc<dyn Gateway>,
        events: EventBus,
        teardown_tx: mpsc::Sender<Uuid>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue_key,
            voice_channel,
            gateway,
            events,
            teardown_tx,
            inner: Mutex::new(PlayerInner {
                queue: TrackQueue::new(),
                state: PlaybackState::Idle,
                stream: None,
                opening: false,
                generation: 0,
                closed: false,
            }),
        })
    }

    pub fn queue_key(&self) -> Uuid {
        self.queue_key
    }

    /// Append a resolved track and start playback if the session is idle.
    ///
    /// Returns the track's 1-indexed queue position, or `None` when the
    /// session has already been destroyed (stale operations are no-ops).
    pub async fn enqueue(self: &Arc<Self>, track: Track) -> Option<usize> {
        let position = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return None;
            }
            inner.queue.enqueue(track.clone())
        };

        debug!(
            "enqueued \"{}\" at position {} on session {}",
            track.title, position, self.queue_key
        );
        self.events.emit_lossy(SessionEvent::TrackEnqueued {
            queue_key: self.queue_key,
            title: track.title,
            position,
            timestamp: Utc::now(),
        });

        self.try_start().await;
        Some(position)
    }

    /// Open a stream for the queue head if the session is idle.
    ///
    /// Only one open may be in flight per session; concurrent callers
    /// return immediately. Open failures drop the failed head and try the
    /// next track until the queue is exhausted.
    async fn try_start(self: &Arc<Self>) {
        loop {
            let (track, claimed_generation) = {
                let mut inner = self.inner.lock().await;
                if inner.closed || inner.opening || inner.state != PlaybackState::Idle {
                    return;
                }
                let track = match inner.queue.head() {
                    None => return,
                    Some(track) => track.clone(),
                };
                inner.opening = true;
                (track, inner.generation)
            };

            let (signal_tx, signal_rx) = mpsc::channel(4);
            let opened = self
                .gateway
                .open_stream(self.voice_channel, &track.stream_ref, signal_tx)
                .await;

            let mut inner = self.inner.lock().await;
            inner.opening = false;

            if inner.closed {
                // Destroyed while the open was in flight; destroy wins
                drop(inner);
                if let Ok(stream) = opened {
                    let _ = stream.stop().await;
                }
                return;
            }

            // A stop (or skip-driven clear) may have landed while the open
            // was in flight: the generation moved on or the head is no
            // longer the claimed track. Discard the fresh stream and
            // re-evaluate the queue from scratch.
            let claim_intact = inner.generation == claimed_generation
                && inner
                    .queue
                    .head()
                    .map(|head| head.stream_ref == track.stream_ref)
                    .unwrap_or(false);
            if !claim_intact {
                drop(inner);
                if let Ok(stream) = opened {
                    let _ = stream.stop().await;
                }
                continue;
            }

            match opened {
                Ok(stream) => {
                    inner.generation += 1;
                    let generation = inner.generation;
                    inner.stream = Some(stream);
                    inner.state = PlaybackState::Playing;
                    drop(inner);

                    self.spawn_signal_watcher(generation, signal_rx);

                    info!("session {} now playing \"{}\"", self.queue_key, track.title);
                    self.events.emit_lossy(SessionEvent::TrackStarted {
                        queue_key: self.queue_key,
                        title: track.title,
                        timestamp: Utc::now(),
                    });
                    self.events.emit_lossy(SessionEvent::PlaybackStateChanged {
                        queue_key: self.queue_key,
                        state: PlaybackState::Playing,
                        timestamp: Utc::now(),
                    });
                    return;
                }
                Err(e) => {
                    warn!(
                        "stream open failed for \"{}\" on session {}: {}; trying next",
                        track.title, self.queue_key, e
                    );
                    if inner.queue.advance().is_none() {
                        drop(inner);
                        self.emit_exhausted();
                        return;
                    }
                    // Loop to attempt the new head
                }
            }
        }
    }

    fn spawn_signal_watcher(
        self: &Arc<Self>,
        generation: u64,
        mut signal_rx: mpsc::Receiver<StreamSignal>,
    ) {
        let player = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(signal) = signal_rx.recv().await {
                match signal {
                    StreamSignal::Finished => {
                        debug!("track finished on session {}", player.queue_key);
                        player.on_track_end(generation).await;
                    }
                    StreamSignal::Failed(reason) => {
                        warn!(
                            "stream failed on session {}: {}; advancing",
                            player.queue_key, reason
                        );
                        player.on_track_end(generation).await;
                    }
                    StreamSignal::DeviceLost(reason) => {
                        player.on_device_lost(generation, reason).await;
                        break;
                    }
                }
            }
        });
    }

    /// Completion or unrecoverable per-track error: advance and keep playing.
    async fn on_track_end(self: &Arc<Self>, generation: u64) {
        let has_next = {
            let mut inner = self.inner.lock().await;
            if inner.closed || generation != inner.generation {
                return; // stale signal from a skipped or stopped stream
            }
            inner.stream = None;
            inner.generation += 1;
            inner.state = PlaybackState::Idle;
            inner.queue.advance().is_some()
        };

        if has_next {
            self.try_start().await;
        } else {
            self.emit_exhausted();
        }
    }

    /// Output channel gone: force idle and ask the registry for teardown.
    async fn on_device_lost(self: &Arc<Self>, generation: u64, reason: String) {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed || generation != inner.generation {
                return;
            }
            inner.stream = None;
            inner.generation += 1;
            inner.state = PlaybackState::Idle;
        }

        error!(
            "output device lost on session {}: {}; requesting teardown",
            self.queue_key, reason
        );
        let _ = self.teardown_tx.send(self.queue_key).await;
    }

    pub async fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(());
        }
        if inner.state != PlaybackState::Playing {
            return Err(Error::NothingPlaying);
        }
        match inner.stream.as_ref() {
            Some(stream) => stream.pause().await?,
            None => return Err(Error::NothingPlaying),
        }
        inner.state = PlaybackState::Paused;
        drop(inner);

        self.events.emit_lossy(SessionEvent::PlaybackStateChanged {
            queue_key: self.queue_key,
            state: PlaybackState::Paused,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(());
        }
        if inner.state != PlaybackState::Paused {
            return Err(Error::NothingPlaying);
        }
        match inner.stream.as_ref() {
            Some(stream) => stream.resume().await?,
            None => return Err(Error::NothingPlaying),
        }
        inner.state = PlaybackState::Playing;
        drop(inner);

        self.events.emit_lossy(SessionEvent::PlaybackStateChanged {
            queue_key: self.queue_key,
            state: PlaybackState::Playing,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Drop the current head and move on to the next track.
    pub async fn skip(self: &Arc<Self>) -> Result<()> {
        let (old_stream, has_next) = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return Ok(());
            }
            if inner.state == PlaybackState::Idle {
                return Err(Error::NothingPlaying);
            }
            let stream = inner.stream.take();
            inner.generation += 1;
            inner.state = PlaybackState::Idle;
            let has_next = inner.queue.advance().is_some();
            (stream, has_next)
        };

        if let Some(stream) = old_stream {
            if let Err(e) = stream.stop().await {
                debug!("stopping skipped stream failed: {}", e);
            }
        }

        if has_next {
            self.try_start().await;
        } else {
            self.emit_exhausted();
        }
        Ok(())
    }

    /// Stop playback and empty the queue.
    pub async fn stop(&self) -> Result<()> {
        let old_stream = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return Ok(());
            }
            if inner.state == PlaybackState::Idle && inner.queue.is_empty() {
                return Err(Error::NothingPlaying);
            }
            let stream = inner.stream.take();
            inner.generation += 1;
            inner.queue.clear();
            inner.state = PlaybackState::Idle;
            stream
        };

        if let Some(stream) = old_stream {
            if let Err(e) = stream.stop().await {
                debug!("stopping stream failed: {}", e);
            }
        }

        self.events.emit_lossy(SessionEvent::PlaybackStateChanged {
            queue_key: self.queue_key,
            state: PlaybackState::Idle,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Tear the player down for session destruction. Idempotent; all
    /// subsequent operations become silent no-ops.
    pub async fn shutdown(&self) {
        let old_stream = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.generation += 1;
            inner.queue.clear();
            inner.state = PlaybackState::Idle;
            inner.stream.take()
        };

        if let Some(stream) = old_stream {
            let _ = stream.stop().await;
        }
    }

    /// Read-only snapshot for the queue command; `None` once destroyed.
    pub async fn snapshot(&self) -> Option<(PlaybackState, Vec<Track>)> {
        let inner = self.inner.lock().await;
        if inner.closed {
            return None;
        }
        Some((inner.state, inner.queue.peek()))
    }

    pub async fn state(&self) -> PlaybackState {
        self.inner.lock().await.state
    }

    fn emit_exhausted(&self) {
        self.events.emit_lossy(SessionEvent::PlaybackStateChanged {
            queue_key: self.queue_key,
            state: PlaybackState::Idle,
            timestamp: Utc::now(),
        });
        self.events.emit_lossy(SessionEvent::QueueExhausted {
            queue_key: self.queue_key,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::FakeGateway;
    use std::time::Duration;

    const VOICE: ChannelId = 99;

    fn track(name: &str) -> Track {
        Track {
            title: name.to_string(),
            stream_ref: format!("https://cdn.example.com/{}.mp3", name),
            requested_by: 1,
        }
    }

    fn setup() -> (Arc<Player>, FakeGateway, mpsc::Receiver<Uuid>) {
        let gateway = FakeGateway::new();
        let (teardown_tx, teardown_rx) = mpsc::channel(4);
        let player = Player::new(
            Uuid::new_v4(),
            VOICE,
            Arc::new(gateway.clone()),
            EventBus::new(64),
            teardown_tx,
        );
        (player, gateway, teardown_rx)
    }

    /// Poll until `check` passes or a short deadline expires.
    async fn wait_for<F>(mut check: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_enqueue_on_idle_starts_playback() {
        let (player, gateway, _rx) = setup();

        let position = player.enqueue(track("a")).await.unwrap();
        assert_eq!(position, 1);
        assert_eq!(player.state().await, PlaybackState::Playing);
        assert_eq!(gateway.opened_refs().len(), 1);

        // Head stays in the queue while playing
        let (_, tracks) = player.snapshot().await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "a");
    }

    #[tokio::test]
    async fn test_enqueue_while_playing_does_not_reopen() {
        let (player, gateway, _rx) = setup();

        player.enqueue(track("a")).await.unwrap();
        let position = player.enqueue(track("b")).await.unwrap();

        assert_eq!(position, 2);
        assert_eq!(player.state().await, PlaybackState::Playing);
        assert_eq!(gateway.opened_refs().len(), 1);
    }

    #[tokio::test]
    async fn test_racing_start_while_open_in_flight_is_dropped() {
        let (player, gateway, _rx) = setup();
        let gate = gateway.gate_opens();

        let racing = Arc::clone(&player);
        let first = tokio::spawn(async move { racing.enqueue(track("a")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Second enqueue arrives while the first open is still in flight;
        // it must not start a duplicate stream.
        let position = player.enqueue(track("b")).await.unwrap();
        assert_eq!(position, 2);

        gate.add_permits(10);
        first.await.unwrap().unwrap();

        wait_for(|| gateway.opened_refs().len() == 1).await;
        assert_eq!(player.state().await, PlaybackState::Playing);
        let (_, tracks) = player.snapshot().await.unwrap();
        assert_eq!(tracks[0].title, "a");
    }

    #[tokio::test]
    async fn test_stop_during_inflight_open_discards_stream() {
        let (player, gateway, _rx) = setup();
        let gate = gateway.gate_opens();

        let opener = {
            let player = Arc::clone(&player);
            tokio::spawn(async move { player.enqueue(track("a")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Stop lands while the open is still in flight; stop must win.
        player.stop().await.unwrap();

        gate.add_permits(10);
        opener.await.unwrap().unwrap();

        wait_for(|| gateway.stopped_count() == 1).await;
        assert_eq!(player.state().await, PlaybackState::Idle);
        let (_, tracks) = player.snapshot().await.unwrap();
        assert!(tracks.is_empty());
        assert_eq!(gateway.opened_refs().len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_stop_during_inflight_open_starts_fresh() {
        let (player, gateway, _rx) = setup();
        let gate = gateway.gate_opens();

        let opener = {
            let player = Arc::clone(&player);
            tokio::spawn(async move { player.enqueue(track("a")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        player.stop().await.unwrap();
        player.enqueue(track("b")).await.unwrap();

        gate.add_permits(10);
        opener.await.unwrap().unwrap();

        // The stale stream for "a" is stopped and "b" plays instead
        wait_for(|| gateway.opened_refs().len() == 2).await;
        assert_eq!(player.state().await, PlaybackState::Playing);
        let (_, tracks) = player.snapshot().await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "b");
        assert_eq!(gateway.stopped_count(), 1);
    }

    #[tokio::test]
    async fn test_completion_auto_advances() {
        let (player, gateway, _rx) = setup();
        player.enqueue(track("a")).await.unwrap();
        player.enqueue(track("b")).await.unwrap();

        gateway.fire(VOICE, StreamSignal::Finished).await;

        wait_for(|| gateway.opened_refs().len() == 2).await;
        assert_eq!(player.state().await, PlaybackState::Playing);
        let (_, tracks) = player.snapshot().await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "b");
    }

    #[tokio::test]
    async fn test_completion_with_empty_queue_goes_idle() {
        let (player, gateway, _rx) = setup();
        let events = player.events.clone();
        let mut event_rx = events.subscribe();

        player.enqueue(track("a")).await.unwrap();
        gateway.fire(VOICE, StreamSignal::Finished).await;

        loop {
            match event_rx.recv().await.unwrap() {
                SessionEvent::QueueExhausted { .. } => break,
                _ => continue,
            }
        }
        assert_eq!(player.state().await, PlaybackState::Idle);
        let (_, tracks) = player.snapshot().await.unwrap();
        assert!(tracks.is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_drops_track_and_tries_next() {
        let (player, gateway, _rx) = setup();
        gateway.fail_on("https://cdn.example.com/b.mp3");

        player.enqueue(track("a")).await.unwrap();
        player.enqueue(track("b")).await.unwrap();
        player.enqueue(track("c")).await.unwrap();

        gateway.fire(VOICE, StreamSignal::Finished).await;

        // b's open fails, so playback lands on c
        wait_for(|| gateway.opened_refs().len() == 2).await;
        assert_eq!(
            gateway.opened_refs(),
            vec![
                "https://cdn.example.com/a.mp3".to_string(),
                "https://cdn.example.com/c.mp3".to_string()
            ]
        );
        assert_eq!(player.state().await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_all_opens_failing_exhausts_queue_into_idle() {
        let (player, gateway, _rx) = setup();
        gateway.fail_on("https://cdn.example.com/a.mp3");
        gateway.fail_on("https://cdn.example.com/b.mp3");

        player.enqueue(track("a")).await.unwrap();
        player.enqueue(track("b")).await.unwrap();

        assert!(gateway.opened_refs().is_empty());
        assert_eq!(player.state().await, PlaybackState::Idle);
        let (_, tracks) = player.snapshot().await.unwrap();
        assert!(tracks.is_empty());
    }

    #[tokio::test]
    async fn test_stream_failure_mid_track_advances() {
        let (player, gateway, _rx) = setup();
        player.enqueue(track("a")).await.unwrap();
        player.enqueue(track("b")).await.unwrap();

        gateway
            .fire(VOICE, StreamSignal::Failed("decode error".into()))
            .await;

        wait_for(|| gateway.opened_refs().len() == 2).await;
        assert_eq!(player.state().await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (player, gateway, _rx) = setup();
        player.enqueue(track("a")).await.unwrap();

        player.pause().await.unwrap();
        assert_eq!(player.state().await, PlaybackState::Paused);
        assert_eq!(gateway.paused_count(), 1);

        player.resume().await.unwrap();
        assert_eq!(player.state().await, PlaybackState::Playing);
        assert_eq!(gateway.resumed_count(), 1);
    }

    #[tokio::test]
    async fn test_pause_when_idle_is_nothing_playing() {
        let (player, _gateway, _rx) = setup();
        assert!(matches!(player.pause().await, Err(Error::NothingPlaying)));
        assert!(matches!(player.resume().await, Err(Error::NothingPlaying)));
        assert!(matches!(player.skip().await, Err(Error::NothingPlaying)));
        assert!(matches!(player.stop().await, Err(Error::NothingPlaying)));
    }

    #[tokio::test]
    async fn test_skip_moves_to_next_and_stays_playing() {
        let (player, gateway, _rx) = setup();
        player.enqueue(track("a")).await.unwrap();
        player.enqueue(track("b")).await.unwrap();

        player.skip().await.unwrap();

        wait_for(|| gateway.opened_refs().len() == 2).await;
        assert_eq!(player.state().await, PlaybackState::Playing);
        let (_, tracks) = player.snapshot().await.unwrap();
        assert_eq!(tracks[0].title, "b");
        assert_eq!(gateway.stopped_count(), 1);
    }

    #[tokio::test]
    async fn test_skip_last_track_goes_idle() {
        let (player, _gateway, _rx) = setup();
        player.enqueue(track("a")).await.unwrap();

        player.skip().await.unwrap();
        assert_eq!(player.state().await, PlaybackState::Idle);
        assert!(matches!(player.skip().await, Err(Error::NothingPlaying)));
    }

    #[tokio::test]
    async fn test_stop_clears_queue_and_goes_idle() {
        let (player, gateway, _rx) = setup();
        player.enqueue(track("a")).await.unwrap();
        player.enqueue(track("b")).await.unwrap();

        player.stop().await.unwrap();

        assert_eq!(player.state().await, PlaybackState::Idle);
        let (_, tracks) = player.snapshot().await.unwrap();
        assert!(tracks.is_empty());
        assert_eq!(gateway.stopped_count(), 1);
    }

    #[tokio::test]
    async fn test_operations_after_shutdown_are_noops() {
        let (player, gateway, _rx) = setup();
        player.enqueue(track("a")).await.unwrap();

        player.shutdown().await;

        assert!(player.enqueue(track("b")).await.is_none());
        assert!(player.skip().await.is_ok());
        assert!(player.pause().await.is_ok());
        assert!(player.resume().await.is_ok());
        assert!(player.stop().await.is_ok());
        assert!(player.snapshot().await.is_none());

        // Only the original stream was ever opened
        assert_eq!(gateway.opened_refs().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (player, gateway, _rx) = setup();
        player.enqueue(track("a")).await.unwrap();

        player.shutdown().await;
        player.shutdown().await;
        assert_eq!(gateway.stopped_count(), 1);
    }

    #[tokio::test]
    async fn test_device_lost_requests_teardown() {
        let (player, gateway, mut teardown_rx) = setup();
        player.enqueue(track("a")).await.unwrap();

        gateway
            .fire(VOICE, StreamSignal::DeviceLost("channel deleted".into()))
            .await;

        let key = tokio::time::timeout(Duration::from_secs(1), teardown_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key, player.queue_key());
    }

    #[tokio::test]
    async fn test_stale_signal_after_skip_is_discarded() {
        let (player, gateway, _rx) = setup();
        player.enqueue(track("a")).await.unwrap();
        player.enqueue(track("b")).await.unwrap();
        player.enqueue(track("c")).await.unwrap();

        // Hold on to the first stream's signal sender before skipping
        let stale_tx = gateway.signal_sender(VOICE);

        player.skip().await.unwrap();
        wait_for(|| gateway.opened_refs().len() == 2).await;

        // A late completion from the skipped stream must not advance again
        stale_tx.send(StreamSignal::Finished).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(gateway.opened_refs().len(), 2);
        let (_, tracks) = player.snapshot().await.unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title, "b");
    }
}
