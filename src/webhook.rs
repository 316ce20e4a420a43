use log::debug;
use serde_json::{Map, Value};
use thiserror::Error;

// Plex wraps MusicBrainz identifiers as "mbid://<uuid>"
const MBID_SCHEME_LEN: usize = "mbid://".len();

/// Error type for webhook body parsing
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Failed to parse request body: {0}")]
    InvalidBody(String),

    #[error("Invalid payload JSON: {0}")]
    InvalidPayload(String),
}

/// Playback event kinds reported by the media server, normalized
/// from the raw `event` strings of the webhook document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Play,
    Resume,
    Pause,
    Scrobble,
    Other,
}

impl EventKind {
    /// Map a raw event string to its kind. Unknown strings map to
    /// `Other` and are never treated as errors.
    pub fn from_event(event: &str) -> Self {
        match event {
            "media.play" | "playback.started" => EventKind::Play,
            "media.resume" => EventKind::Resume,
            "media.pause" => EventKind::Pause,
            "media.scrobble" => EventKind::Scrobble,
            _ => EventKind::Other,
        }
    }
}

/// Track metadata extracted from a webhook event document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub track_number: Option<u32>,
    /// Bare MusicBrainz recording id, empty if the event carried none
    pub mbid: String,
}

/// Canonical playback event derived from one webhook delivery
#[derive(Debug, Clone)]
pub struct PlaybackEvent {
    pub kind: EventKind,
    /// Media server account that generated the event
    pub account: String,
    pub media_type: String,
    /// Present only when `media_type` is `"track"`
    pub track: Option<TrackInfo>,
}

/// Parse a raw webhook body into a canonical playback event.
///
/// Bodies with a JSON content type are parsed as JSON; everything else is
/// treated as URL-form-encoded key/value pairs (the media server's webhook
/// convention). If the resulting document carries a `payload` key, its
/// value is re-parsed as a nested JSON string to obtain the real event
/// document; otherwise the top-level document is used directly.
///
/// Absent fields become defaults and never fail the parse; only an
/// unparseable body or a malformed `payload` value is an error. This
/// function performs no I/O.
pub fn normalize(raw_body: &str, content_type: Option<&str>) -> Result<PlaybackEvent, WebhookError> {
    let outer = if is_json_content(content_type) {
        serde_json::from_str::<Value>(raw_body)
            .map_err(|e| WebhookError::InvalidBody(e.to_string()))?
    } else {
        Value::Object(parse_form_body(raw_body))
    };

    let doc = match outer.get("payload") {
        Some(payload) => {
            let raw = payload.as_str().ok_or_else(|| {
                WebhookError::InvalidPayload("payload field is not a string".to_string())
            })?;
            serde_json::from_str::<Value>(raw)
                .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?
        }
        None => outer,
    };

    let event = doc.get("event").and_then(Value::as_str).unwrap_or("");
    let kind = EventKind::from_event(event);
    if kind == EventKind::Other {
        debug!("Unrecognized webhook event '{}'", event);
    }

    let account = doc
        .pointer("/Account/title")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let empty_metadata = Value::Object(Map::new());
    let metadata = doc.get("Metadata").unwrap_or(&empty_metadata);
    let media_type = metadata
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    // Metadata extraction only applies to music tracks
    let track = if media_type == "track" {
        Some(track_from_metadata(metadata))
    } else {
        None
    };

    Ok(PlaybackEvent {
        kind,
        account,
        media_type,
        track,
    })
}

fn is_json_content(content_type: Option<&str>) -> bool {
    content_type.map_or(false, |ct| ct.trim_start().starts_with("application/json"))
}

/// Build a `TrackInfo` from the event document's `Metadata` object.
///
/// The track artist is the metadata's original title when present, falling
/// back to the grandparent title (the artist container). The MusicBrainz id
/// is taken from the first `Guid` entry only, with its scheme prefix
/// stripped.
fn track_from_metadata(metadata: &Value) -> TrackInfo {
    let album_artist = text_field(metadata, "grandparentTitle");
    let artist = metadata
        .get("originalTitle")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| album_artist.clone());

    let mbid = metadata
        .pointer("/Guid/0/id")
        .and_then(Value::as_str)
        .map(|id| id.get(MBID_SCHEME_LEN..).unwrap_or("").to_string())
        .unwrap_or_default();

    TrackInfo {
        title: text_field(metadata, "title"),
        artist,
        album: text_field(metadata, "parentTitle"),
        album_artist,
        track_number: metadata
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as u32),
        mbid,
    }
}

fn text_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Parse a URL-form-encoded body into a JSON object of string values
fn parse_form_body(body: &str) -> Map<String, Value> {
    let mut fields = Map::new();

    for pair in body.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        fields.insert(
            decode_form_component(key),
            Value::String(decode_form_component(value)),
        );
    }

    fields
}

fn decode_form_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCROBBLE_EVENT: &str = r#"{
        "event": "media.scrobble",
        "Account": {"title": "alice"},
        "Metadata": {
            "type": "track",
            "title": "Song",
            "grandparentTitle": "Artist",
            "parentTitle": "Album",
            "index": 3,
            "Guid": [{"id": "mbid://1234"}]
        }
    }"#;

    #[test]
    fn test_json_body_with_wrapped_payload() {
        let body = serde_json::json!({ "payload": SCROBBLE_EVENT }).to_string();
        let event = normalize(&body, Some("application/json")).unwrap();

        assert_eq!(event.kind, EventKind::Scrobble);
        assert_eq!(event.account, "alice");
        assert_eq!(event.media_type, "track");

        let track = event.track.unwrap();
        assert_eq!(track.title, "Song");
        assert_eq!(track.artist, "Artist");
        assert_eq!(track.album, "Album");
        assert_eq!(track.album_artist, "Artist");
        assert_eq!(track.track_number, Some(3));
        assert_eq!(track.mbid, "1234");
    }

    #[test]
    fn test_form_body_with_wrapped_payload() {
        let body = format!("payload={}", urlencoding::encode(SCROBBLE_EVENT));
        let event = normalize(&body, Some("application/x-www-form-urlencoded")).unwrap();

        assert_eq!(event.kind, EventKind::Scrobble);
        assert_eq!(event.account, "alice");
        assert_eq!(event.track.unwrap().mbid, "1234");
    }

    #[test]
    fn test_unwrapped_json_document() {
        // Callers may post the event document directly instead of wrapping it
        let event = normalize(SCROBBLE_EVENT, Some("application/json")).unwrap();
        assert_eq!(event.kind, EventKind::Scrobble);
        assert_eq!(event.account, "alice");
    }

    #[test]
    fn test_form_body_decodes_plus_and_percent_escapes() {
        let body = "payload=%7B%22event%22%3A+%22media.play%22%7D";
        let event = normalize(body, None).unwrap();
        assert_eq!(event.kind, EventKind::Play);
    }

    #[test]
    fn test_event_kind_mapping_is_total() {
        assert_eq!(EventKind::from_event("media.play"), EventKind::Play);
        assert_eq!(EventKind::from_event("playback.started"), EventKind::Play);
        assert_eq!(EventKind::from_event("media.resume"), EventKind::Resume);
        assert_eq!(EventKind::from_event("media.pause"), EventKind::Pause);
        assert_eq!(EventKind::from_event("media.scrobble"), EventKind::Scrobble);
        assert_eq!(EventKind::from_event("media.rate"), EventKind::Other);
        assert_eq!(EventKind::from_event(""), EventKind::Other);
    }

    #[test]
    fn test_mbid_prefix_is_stripped() {
        let metadata = serde_json::json!({
            "Guid": [{"id": "mbid://AAAA-BBBB"}, {"id": "mbid://ignored"}]
        });
        assert_eq!(track_from_metadata(&metadata).mbid, "AAAA-BBBB");
    }

    #[test]
    fn test_missing_guid_yields_empty_mbid() {
        let metadata = serde_json::json!({"title": "Song"});
        assert_eq!(track_from_metadata(&metadata).mbid, "");
    }

    #[test]
    fn test_short_guid_yields_empty_mbid() {
        let metadata = serde_json::json!({"Guid": [{"id": "mbid:"}]});
        assert_eq!(track_from_metadata(&metadata).mbid, "");
    }

    #[test]
    fn test_original_title_takes_precedence_for_artist() {
        let metadata = serde_json::json!({
            "originalTitle": "Featured Artist",
            "grandparentTitle": "Album Artist"
        });
        let track = track_from_metadata(&metadata);
        assert_eq!(track.artist, "Featured Artist");
        assert_eq!(track.album_artist, "Album Artist");
    }

    #[test]
    fn test_empty_original_title_falls_back_to_grandparent() {
        let metadata = serde_json::json!({
            "originalTitle": "",
            "grandparentTitle": "Album Artist"
        });
        assert_eq!(track_from_metadata(&metadata).artist, "Album Artist");
    }

    #[test]
    fn test_non_track_media_has_no_track_info() {
        let doc = r#"{
            "event": "media.scrobble",
            "Account": {"title": "alice"},
            "Metadata": {"type": "movie", "title": "Some Film"}
        }"#;
        let event = normalize(doc, Some("application/json")).unwrap();
        assert_eq!(event.media_type, "movie");
        assert!(event.track.is_none());
    }

    #[test]
    fn test_missing_fields_become_defaults() {
        let event = normalize("{}", Some("application/json")).unwrap();
        assert_eq!(event.kind, EventKind::Other);
        assert_eq!(event.account, "");
        assert_eq!(event.media_type, "");
        assert!(event.track.is_none());
    }

    #[test]
    fn test_malformed_nested_payload_is_rejected() {
        let body = "payload=not+json";
        let err = normalize(body, None).unwrap_err();
        assert!(matches!(err, WebhookError::InvalidPayload(_)));
    }

    #[test]
    fn test_non_string_payload_is_rejected() {
        let body = r#"{"payload": {"event": "media.play"}}"#;
        let err = normalize(body, Some("application/json")).unwrap_err();
        assert!(matches!(err, WebhookError::InvalidPayload(_)));
    }

    #[test]
    fn test_unparseable_json_body_is_rejected() {
        let err = normalize("not valid {{{", Some("application/json")).unwrap_err();
        assert!(matches!(err, WebhookError::InvalidBody(_)));
    }
}
