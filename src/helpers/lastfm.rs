use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use log::{debug, error, warn};
use parking_lot::Mutex;
use serde::Deserialize;
use ureq;

use crate::config::ConfigStore;
use crate::dispatch::{ScrobbleSink, SinkError};
use crate::helpers::ratelimit;
use crate::session;
use crate::webhook::TrackInfo;

const LASTFM_API_ROOT: &str = "https://ws.audioscrobbler.com/2.0/";
const LASTFM_AUTH_URL: &str = "http://www.last.fm/api/auth/";

// Last.fm error code for a request token the user has not yet authorized
const ERROR_TOKEN_NOT_AUTHORIZED: i32 = 14;

// Error types for Last.fm API
#[derive(Debug)]
pub enum LastfmError {
    ApiError(String, i32), // message, code
    NetworkError(String),
    ParsingError(String),
    AuthError(String),
    ConfigError(String),
}

impl fmt::Display for LastfmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastfmError::ApiError(msg, code) => write!(f, "Last.fm API error ({}): {}", code, msg),
            LastfmError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            LastfmError::ParsingError(msg) => write!(f, "Parsing error: {}", msg),
            LastfmError::AuthError(msg) => write!(f, "Authentication error: {}", msg),
            LastfmError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for LastfmError {}

impl LastfmError {
    /// True when the service reports that the user has not yet completed
    /// the browser authorization step for the current request token
    pub fn is_authorization_pending(&self) -> bool {
        matches!(self, LastfmError::ApiError(_, ERROR_TOKEN_NOT_AUTHORIZED))
    }
}

// Auth token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

// Last.fm's own error responses, which it may send with a 200 status
#[derive(Debug, Deserialize)]
struct LastfmErrorResponse {
    error: i32,
    message: String,
}

// Session response
#[derive(Debug, Deserialize)]
struct SessionResponse {
    session: Session,
}

#[derive(Debug, Deserialize)]
struct Session {
    name: String,
    key: String,
}

#[derive(Debug, Clone)]
struct LastfmCredentials {
    api_key: String,
    api_secret: String,
    session_key: Option<String>,
    username: Option<String>,
    auth_token: Option<String>,
}

/// Client for one user's Last.fm account.
///
/// Unlike a process-wide singleton, every configured user gets their own
/// client carrying their own session key.
pub struct LastfmClient {
    credentials: LastfmCredentials,
    client: ureq::Agent,
}

impl LastfmClient {
    /// Create a client from API credentials and an optional cached session key
    pub fn new(
        api_key: String,
        api_secret: String,
        session_key: Option<String>,
    ) -> Result<Self, LastfmError> {
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(LastfmError::ConfigError(
                "API key and secret are required".to_string(),
            ));
        }

        // 1 request per second is a safe default for the Last.fm API
        ratelimit::register_service("lastfm", 1000);

        Ok(LastfmClient {
            credentials: LastfmCredentials {
                api_key,
                api_secret,
                session_key,
                username: None,
                auth_token: None,
            },
            client: ureq::agent(),
        })
    }

    /// Check if the client holds a session key
    pub fn is_authenticated(&self) -> bool {
        self.credentials.session_key.is_some()
    }

    pub fn session_key(&self) -> Option<String> {
        self.credentials.session_key.clone()
    }

    /// The Last.fm username, known once a session was obtained through
    /// the authorization handshake
    pub fn username(&self) -> Option<String> {
        self.credentials.username.clone()
    }

    /// Get the authorization URL for the user to approve the application.
    ///
    /// Requests a fresh request token from Last.fm; the token is kept for
    /// the subsequent `get_session` exchange.
    pub fn auth_url(&mut self) -> Result<String, LastfmError> {
        ratelimit::rate_limit("lastfm");

        let params = [("method", "auth.getToken")];

        debug!("Requesting new Last.fm auth token");
        let response_body = self.make_api_request(params.iter().copied(), false)?;

        let token_response: TokenResponse = serde_json::from_str(&response_body)
            .map_err(|e| {
                LastfmError::ParsingError(format!("Failed to parse token response: {}", e))
            })?;

        self.credentials.auth_token = Some(token_response.token.clone());

        Ok(format!(
            "{}?api_key={}&token={}",
            LASTFM_AUTH_URL, self.credentials.api_key, token_response.token
        ))
    }

    /// Get a session key after the user has authorized the application.
    ///
    /// Until the user completes the browser step, Last.fm answers with
    /// error code 14; callers poll on that condition (see `session`).
    pub fn get_session(&mut self) -> Result<(String, String), LastfmError> {
        let token = match &self.credentials.auth_token {
            Some(t) => t.clone(),
            None => {
                return Err(LastfmError::AuthError(
                    "No auth token available; request an authorization URL first".to_string(),
                ));
            }
        };

        ratelimit::rate_limit("lastfm");

        let params = [("method", "auth.getSession"), ("token", token.as_str())];

        debug!("Attempting to get Last.fm session");
        let response_body = self.make_api_request(params.iter().copied(), true)?;

        let session_response: SessionResponse = serde_json::from_str(&response_body)
            .map_err(|e| {
                error!("Failed to parse session response: {}, body: {}", e, response_body);
                LastfmError::ParsingError(format!("Failed to parse session response: {}", e))
            })?;

        self.credentials.session_key = Some(session_response.session.key.clone());
        self.credentials.username = Some(session_response.session.name.clone());

        // The request token is single-use; drop it once exchanged
        self.credentials.auth_token = None;

        Ok((session_response.session.key, session_response.session.name))
    }

    /// Update "now playing" status on Last.fm
    ///
    /// # Arguments
    /// * `artist` - The track artist name
    /// * `track` - The track title
    /// * `album` - Optional album name
    /// * `album_artist` - Optional album artist (if different from track artist)
    /// * `track_number` - Optional track number
    /// * `mbid` - Optional MusicBrainz recording id
    pub fn update_now_playing(
        &self,
        artist: &str,
        track: &str,
        album: Option<&str>,
        album_artist: Option<&str>,
        track_number: Option<u32>,
        mbid: Option<&str>,
    ) -> Result<(), LastfmError> {
        let session_key = self.session_param()?;

        ratelimit::rate_limit("lastfm");

        let mut param_vec = vec![
            ("method", "track.updateNowPlaying".to_string()),
            ("sk", session_key),
            ("artist", artist.to_string()),
            ("track", track.to_string()),
        ];
        push_track_params(&mut param_vec, album, album_artist, track_number, mbid);

        let params: Vec<(&str, &str)> = param_vec.iter().map(|(k, v)| (*k, v.as_str())).collect();

        // This request needs to be signed
        let _response = self.make_api_request(params, true)?;

        debug!("Now playing updated for track: {} - {}", artist, track);
        Ok(())
    }

    /// Submit a track scrobble to Last.fm
    ///
    /// # Arguments
    /// * `artist` - The track artist name
    /// * `track` - The track title
    /// * `album` - Optional album name
    /// * `album_artist` - Optional album artist (if different from track artist)
    /// * `track_number` - Optional track number
    /// * `mbid` - Optional MusicBrainz recording id
    /// * `timestamp` - Unix timestamp when the track was played
    pub fn scrobble(
        &self,
        artist: &str,
        track: &str,
        album: Option<&str>,
        album_artist: Option<&str>,
        track_number: Option<u32>,
        mbid: Option<&str>,
        timestamp: u64,
    ) -> Result<(), LastfmError> {
        let session_key = self.session_param()?;

        ratelimit::rate_limit("lastfm");

        let mut param_vec = vec![
            ("method", "track.scrobble".to_string()),
            ("sk", session_key),
            ("artist", artist.to_string()),
            ("track", track.to_string()),
            ("timestamp", timestamp.to_string()),
        ];
        push_track_params(&mut param_vec, album, album_artist, track_number, mbid);

        let params: Vec<(&str, &str)> = param_vec.iter().map(|(k, v)| (*k, v.as_str())).collect();

        // This request needs to be signed
        let _response = self.make_api_request(params, true)?;

        debug!("Scrobble successful for track: {} - {}", artist, track);
        Ok(())
    }

    fn session_param(&self) -> Result<String, LastfmError> {
        self.credentials
            .session_key
            .clone()
            .ok_or_else(|| LastfmError::AuthError("Not authenticated with Last.fm".to_string()))
    }

    /// Make an API request to Last.fm
    fn make_api_request<'a>(
        &self,
        params: impl IntoIterator<Item = (&'a str, &'a str)>,
        sign: bool,
    ) -> Result<String, LastfmError> {
        let mut param_map: HashMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        // Always add api_key and format, make_api_request is internal
        param_map.insert("api_key".to_string(), self.credentials.api_key.clone());
        param_map.insert("format".to_string(), "json".to_string());

        if sign {
            let signature = sign_params(&param_map, &self.credentials.api_secret);
            param_map.insert("api_sig".to_string(), signature);
        }

        let method_for_log = param_map
            .get("method")
            .cloned()
            .unwrap_or_else(|| "unknown_method".to_string());
        debug!("Last.fm API call: method={}", method_for_log);

        // Use POST for all requests, Last.fm API generally accepts this
        let form_params: Vec<(&str, &str)> =
            param_map.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let response = self.client.post(LASTFM_API_ROOT).send_form(&form_params);

        match response {
            Ok(res) => {
                let body = res.into_string().map_err(|e| {
                    LastfmError::NetworkError(format!("Failed to read response body: {}", e))
                })?;

                // Last.fm reports some failures inside a 200 response;
                // sniff for its error object before assuming success
                if let Ok(error_response) = serde_json::from_str::<LastfmErrorResponse>(&body) {
                    debug!(
                        "Last.fm API returned an error: code={}, message='{}'",
                        error_response.error, error_response.message
                    );
                    return Err(LastfmError::ApiError(
                        error_response.message,
                        error_response.error,
                    ));
                }

                Ok(body)
            }
            Err(ureq::Error::Status(code, response)) => {
                let error_body = response
                    .into_string()
                    .unwrap_or_else(|_| "<empty response body>".to_string());
                if let Ok(error_response) =
                    serde_json::from_str::<LastfmErrorResponse>(&error_body)
                {
                    Err(LastfmError::ApiError(
                        error_response.message,
                        error_response.error,
                    ))
                } else {
                    Err(LastfmError::NetworkError(format!(
                        "HTTP error {} with unparseable body: {}",
                        code, error_body
                    )))
                }
            }
            Err(e) => Err(LastfmError::NetworkError(e.to_string())),
        }
    }
}

fn push_track_params(
    param_vec: &mut Vec<(&str, String)>,
    album: Option<&str>,
    album_artist: Option<&str>,
    track_number: Option<u32>,
    mbid: Option<&str>,
) {
    if let Some(album_name) = album {
        param_vec.push(("album", album_name.to_string()));
    }

    if let Some(album_artist_name) = album_artist {
        param_vec.push(("albumArtist", album_artist_name.to_string()));
    }

    if let Some(track_num) = track_number {
        param_vec.push(("trackNumber", track_num.to_string()));
    }

    if let Some(mbid_value) = mbid.filter(|m| !m.is_empty()) {
        param_vec.push(("mbid", mbid_value.to_string()));
    }
}

/// Build the request signature: md5 over the alphabetically sorted
/// key/value pairs followed by the API secret. The `format` parameter is
/// not part of the signature base string.
fn sign_params(params: &HashMap<String, String>, api_secret: &str) -> String {
    let mut sorted_params: Vec<(&String, &String)> = params.iter().collect();
    sorted_params.sort_by_key(|&(k, _)| k);

    let mut sig_string = String::new();
    for (k, v) in sorted_params {
        if k != "format" {
            sig_string.push_str(k);
            sig_string.push_str(v);
        }
    }
    sig_string.push_str(api_secret);

    format!("{:x}", md5::compute(sig_string.as_bytes()))
}

/// Last.fm-backed scrobble sink for one configured user.
///
/// Triggers the authorization handshake transparently on first use when no
/// session key is cached, and persists the obtained key back to the
/// configuration store so restarts skip the handshake.
pub struct LastfmScrobbler {
    account: String,
    client: Mutex<LastfmClient>,
    store: Arc<ConfigStore>,
}

impl LastfmScrobbler {
    pub fn new(account: String, client: LastfmClient, store: Arc<ConfigStore>) -> Self {
        LastfmScrobbler {
            account,
            client: Mutex::new(client),
            store,
        }
    }

    fn ensure_session(&self, client: &mut LastfmClient) -> Result<(), LastfmError> {
        if client.is_authenticated() {
            return Ok(());
        }

        let (session_key, _username) =
            session::resolve_session(client, &session::ThreadSleep, None)?;

        if let Err(e) = self.store.set_session_key(&self.account, &session_key) {
            warn!(
                "Failed to persist session key for '{}': {}",
                self.account, e
            );
        }

        Ok(())
    }
}

impl ScrobbleSink for LastfmScrobbler {
    fn update_now_playing(&self, track: &TrackInfo) -> Result<(), SinkError> {
        let mut client = self.client.lock();
        self.ensure_session(&mut client).map_err(sink_error)?;

        client
            .update_now_playing(
                &track.artist,
                &track.title,
                Some(track.album.as_str()),
                Some(track.album_artist.as_str()),
                track.track_number,
                Some(track.mbid.as_str()),
            )
            .map_err(sink_error)
    }

    fn scrobble(&self, track: &TrackInfo, timestamp: u64) -> Result<(), SinkError> {
        let mut client = self.client.lock();
        self.ensure_session(&mut client).map_err(sink_error)?;

        client
            .scrobble(
                &track.artist,
                &track.title,
                Some(track.album.as_str()),
                Some(track.album_artist.as_str()),
                track.track_number,
                Some(track.mbid.as_str()),
                timestamp,
            )
            .map_err(sink_error)
    }

    fn authenticated(&self) -> bool {
        self.client.lock().is_authenticated()
    }
}

fn sink_error(e: LastfmError) -> SinkError {
    match e {
        LastfmError::NetworkError(msg) => SinkError::Network(msg),
        LastfmError::AuthError(msg) => SinkError::Auth(msg),
        e => SinkError::Service(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_matches_canonical_string() {
        let mut params = HashMap::new();
        params.insert("method".to_string(), "auth.getSession".to_string());
        params.insert("token".to_string(), "tok".to_string());
        params.insert("api_key".to_string(), "key".to_string());
        params.insert("format".to_string(), "json".to_string());

        // Keys sorted alphabetically, format excluded, secret appended
        let expected = format!(
            "{:x}",
            md5::compute("api_keykeymethodauth.getSessiontokentoksecret")
        );
        assert_eq!(sign_params(&params, "secret"), expected);
    }

    #[test]
    fn test_format_is_not_signed() {
        let mut with_format = HashMap::new();
        with_format.insert("method".to_string(), "track.scrobble".to_string());
        with_format.insert("format".to_string(), "json".to_string());

        let mut without_format = HashMap::new();
        without_format.insert("method".to_string(), "track.scrobble".to_string());

        assert_eq!(
            sign_params(&with_format, "s"),
            sign_params(&without_format, "s")
        );
    }

    #[test]
    fn test_empty_credentials_are_rejected() {
        assert!(matches!(
            LastfmClient::new(String::new(), "secret".to_string(), None),
            Err(LastfmError::ConfigError(_))
        ));
        assert!(matches!(
            LastfmClient::new("key".to_string(), String::new(), None),
            Err(LastfmError::ConfigError(_))
        ));
    }

    #[test]
    fn test_cached_session_key_authenticates() {
        let client = LastfmClient::new(
            "key".to_string(),
            "secret".to_string(),
            Some("sk-cached".to_string()),
        )
        .unwrap();
        assert!(client.is_authenticated());
        assert_eq!(client.session_key(), Some("sk-cached".to_string()));
    }

    #[test]
    fn test_calls_without_session_fail_with_auth_error() {
        let client = LastfmClient::new("key".to_string(), "secret".to_string(), None).unwrap();
        let err = client
            .update_now_playing("Artist", "Song", None, None, None, None)
            .unwrap_err();
        assert!(matches!(err, LastfmError::AuthError(_)));
    }

    #[test]
    fn test_authorization_pending_detection() {
        assert!(LastfmError::ApiError("not authorized".to_string(), 14)
            .is_authorization_pending());
        assert!(!LastfmError::ApiError("rate limited".to_string(), 29)
            .is_authorization_pending());
        assert!(!LastfmError::NetworkError("down".to_string()).is_authorization_pending());
    }

    #[test]
    fn test_empty_mbid_is_omitted_from_params() {
        let mut params: Vec<(&str, String)> = Vec::new();
        push_track_params(&mut params, Some("Album"), Some("Artist"), Some(3), Some(""));
        assert!(params.iter().all(|(k, _)| *k != "mbid"));

        let mut params: Vec<(&str, String)> = Vec::new();
        push_track_params(&mut params, None, None, None, Some("1234"));
        assert_eq!(params, vec![("mbid", "1234".to_string())]);
    }
}
