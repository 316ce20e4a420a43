use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, error, info};
use thiserror::Error;

use crate::webhook::{EventKind, PlaybackEvent, TrackInfo};

/// Error reported by a scrobble sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Service error: {0}")]
    Service(String),
}

/// Outbound boundary toward the scrobbling service.
///
/// One sink exists per configured user. Implementations authenticate
/// lazily on first use; every call may fail with a service or network
/// error, which the dispatcher treats as non-fatal.
pub trait ScrobbleSink: Send + Sync {
    /// Send a transient now-playing notification
    fn update_now_playing(&self, track: &TrackInfo) -> Result<(), SinkError>;

    /// Record a completed play at the given Unix timestamp
    fn scrobble(&self, track: &TrackInfo, timestamp: u64) -> Result<(), SinkError>;

    /// Whether the sink currently holds a valid session
    fn authenticated(&self) -> bool;
}

struct UserEntry {
    scrobble: bool,
    sink: Arc<dyn ScrobbleSink>,
}

/// Routes canonical playback events to the per-user scrobble sinks.
///
/// Holds no per-track or per-session state: each event is handled
/// independently, synchronously, within the request that delivered it.
pub struct Dispatcher {
    users: HashMap<String, UserEntry>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            users: HashMap::new(),
        }
    }

    /// Register the sink for one media server account
    pub fn add_user(&mut self, account: &str, scrobble: bool, sink: Arc<dyn ScrobbleSink>) {
        self.users.insert(
            account.to_string(),
            UserEntry { scrobble, sink },
        );
    }

    /// Account names with their sink authentication state, sorted, for
    /// the status endpoint
    pub fn user_status(&self) -> Vec<(String, bool)> {
        let mut status: Vec<(String, bool)> = self
            .users
            .iter()
            .map(|(name, entry)| (name.clone(), entry.sink.authenticated()))
            .collect();
        status.sort();
        status
    }

    /// Handle one playback event.
    ///
    /// All failures are terminal for this event: they are logged with
    /// context and never retried or propagated to the webhook sender.
    pub fn dispatch(&self, event: &PlaybackEvent) {
        let entry = match self.users.get(&event.account) {
            Some(entry) => entry,
            None => {
                debug!("Ignoring event for unknown user '{}'", event.account);
                return;
            }
        };

        // Movies, episodes and other non-track media are never forwarded
        if event.media_type != "track" {
            debug!(
                "Ignoring {:?} event for non-track media type '{}'",
                event.kind, event.media_type
            );
            return;
        }

        let track = match &event.track {
            Some(track) => track,
            None => {
                debug!("Track event without metadata, nothing to forward");
                return;
            }
        };

        match event.kind {
            EventKind::Play | EventKind::Resume => {
                match entry.sink.update_now_playing(track) {
                    Ok(()) => info!(
                        "Now playing for {}: {} - {} ({} - {})",
                        event.account, track.artist, track.title, track.album_artist, track.album
                    ),
                    Err(e) => error!(
                        "Failed to update now playing for {} ({} - {}): {}",
                        event.account, track.artist, track.title, e
                    ),
                }
            }
            EventKind::Pause => {
                // Last.fm clears now-playing state after a timeout on its own
                debug!("Playback paused for {}", event.account);
            }
            EventKind::Scrobble => {
                if !entry.scrobble {
                    debug!(
                        "Scrobbling disabled for {}, dropping scrobble event",
                        event.account
                    );
                    return;
                }

                let timestamp = unix_timestamp();
                match entry.sink.scrobble(track, timestamp) {
                    Ok(()) => info!(
                        "Scrobbled for {}: {} - {} ({} - {})",
                        event.account, track.artist, track.title, track.album_artist, track.album
                    ),
                    Err(e) => error!(
                        "Failed to scrobble for {} ({} - {}): {}",
                        event.account, track.artist, track.title, e
                    ),
                }
            }
            EventKind::Other => {
                debug!("Ignoring event kind {:?} for {}", event.kind, event.account);
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        NowPlaying(TrackInfo),
        Scrobble(TrackInfo, u64),
    }

    struct RecordingSink {
        calls: Mutex<Vec<Call>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(RecordingSink {
                calls: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(RecordingSink {
                calls: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    impl ScrobbleSink for RecordingSink {
        fn update_now_playing(&self, track: &TrackInfo) -> Result<(), SinkError> {
            self.calls.lock().push(Call::NowPlaying(track.clone()));
            if self.fail {
                return Err(SinkError::Network("unreachable".to_string()));
            }
            Ok(())
        }

        fn scrobble(&self, track: &TrackInfo, timestamp: u64) -> Result<(), SinkError> {
            self.calls.lock().push(Call::Scrobble(track.clone(), timestamp));
            if self.fail {
                return Err(SinkError::Network("unreachable".to_string()));
            }
            Ok(())
        }

        fn authenticated(&self) -> bool {
            true
        }
    }

    fn sample_track() -> TrackInfo {
        TrackInfo {
            title: "Song".to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            album_artist: "Artist".to_string(),
            track_number: Some(3),
            mbid: "1234".to_string(),
        }
    }

    fn track_event(kind: EventKind, account: &str) -> PlaybackEvent {
        PlaybackEvent {
            kind,
            account: account.to_string(),
            media_type: "track".to_string(),
            track: Some(sample_track()),
        }
    }

    fn dispatcher_with(account: &str, scrobble: bool, sink: &Arc<RecordingSink>) -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_user(account, scrobble, Arc::clone(sink) as Arc<dyn ScrobbleSink>);
        dispatcher
    }

    #[test]
    fn test_scrobble_event_calls_sink_with_track_and_timestamp() {
        let sink = RecordingSink::new();
        let dispatcher = dispatcher_with("alice", true, &sink);

        dispatcher.dispatch(&track_event(EventKind::Scrobble, "alice"));

        let calls = sink.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Call::Scrobble(track, timestamp) => {
                assert_eq!(*track, sample_track());
                assert!(*timestamp > 0);
            }
            other => panic!("expected scrobble call, got {:?}", other),
        }
    }

    #[test]
    fn test_play_and_resume_update_now_playing() {
        let sink = RecordingSink::new();
        let dispatcher = dispatcher_with("alice", true, &sink);

        dispatcher.dispatch(&track_event(EventKind::Play, "alice"));
        dispatcher.dispatch(&track_event(EventKind::Resume, "alice"));

        let calls = sink.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls
            .iter()
            .all(|c| matches!(c, Call::NowPlaying(track) if *track == sample_track())));
    }

    #[test]
    fn test_scrobble_disabled_drops_scrobbles_but_allows_now_playing() {
        let sink = RecordingSink::new();
        let dispatcher = dispatcher_with("alice", false, &sink);

        dispatcher.dispatch(&track_event(EventKind::Scrobble, "alice"));
        assert!(sink.calls().is_empty());

        dispatcher.dispatch(&track_event(EventKind::Play, "alice"));
        assert_eq!(sink.calls().len(), 1);
        assert!(matches!(sink.calls()[0], Call::NowPlaying(_)));
    }

    #[test]
    fn test_unknown_user_is_ignored() {
        let sink = RecordingSink::new();
        let dispatcher = dispatcher_with("alice", true, &sink);

        dispatcher.dispatch(&track_event(EventKind::Scrobble, "bob"));

        assert!(sink.calls().is_empty());
    }

    #[test]
    fn test_non_track_media_is_never_forwarded() {
        let sink = RecordingSink::new();
        let dispatcher = dispatcher_with("alice", true, &sink);

        let event = PlaybackEvent {
            kind: EventKind::Scrobble,
            account: "alice".to_string(),
            media_type: "movie".to_string(),
            track: None,
        };
        dispatcher.dispatch(&event);

        assert!(sink.calls().is_empty());
    }

    #[test]
    fn test_pause_and_other_are_no_ops() {
        let sink = RecordingSink::new();
        let dispatcher = dispatcher_with("alice", true, &sink);

        dispatcher.dispatch(&track_event(EventKind::Pause, "alice"));
        dispatcher.dispatch(&track_event(EventKind::Other, "alice"));

        assert!(sink.calls().is_empty());
    }

    #[test]
    fn test_sink_failures_are_swallowed() {
        let sink = RecordingSink::failing();
        let dispatcher = dispatcher_with("alice", true, &sink);

        // Neither failure propagates; each event is attempted exactly once
        dispatcher.dispatch(&track_event(EventKind::Play, "alice"));
        dispatcher.dispatch(&track_event(EventKind::Scrobble, "alice"));

        assert_eq!(sink.calls().len(), 2);
    }

    #[test]
    fn test_user_status_reports_all_accounts_sorted() {
        let sink_a = RecordingSink::new();
        let sink_b = RecordingSink::new();
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_user("zoe", true, Arc::clone(&sink_b) as Arc<dyn ScrobbleSink>);
        dispatcher.add_user("alice", true, Arc::clone(&sink_a) as Arc<dyn ScrobbleSink>);

        let status = dispatcher.user_status();
        assert_eq!(
            status,
            vec![("alice".to_string(), true), ("zoe".to_string(), true)]
        );
    }
}
