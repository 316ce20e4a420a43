use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::helpers::lastfm::{LastfmClient, LastfmError};

/// Interval between authorization polls while waiting for the user to
/// approve the application in their browser
pub const AUTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Sleep abstraction so the polling loop can run in tests without delays
pub trait Sleep {
    fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the current thread
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Resolve a Last.fm session for one user.
///
/// Returns immediately when a session key is already cached (no network
/// call). Otherwise an authorization URL is presented to the operator and
/// the service is polled until the user approves the application. This is
/// interactive and intended to run at startup or on a user's first event.
pub fn resolve_session(
    client: &mut LastfmClient,
    sleeper: &dyn Sleep,
    max_attempts: Option<u32>,
) -> Result<(String, String), LastfmError> {
    if let Some(session_key) = client.session_key() {
        debug!("Using cached Last.fm session key");
        return Ok((session_key, client.username().unwrap_or_default()));
    }

    let url = client.auth_url()?;
    info!(
        "Please open this URL in your browser and authorize the application: {}",
        url
    );

    poll_for_session(|| client.get_session(), sleeper, max_attempts)
}

/// Poll for a session until the request succeeds or fails permanently.
///
/// Only an authorization-pending response is retried, on a fixed delay;
/// every other error class propagates to the caller. With
/// `max_attempts: None` the loop retries indefinitely, matching the
/// startup-time provisioning behavior.
pub fn poll_for_session<F>(
    mut request_session: F,
    sleeper: &dyn Sleep,
    max_attempts: Option<u32>,
) -> Result<(String, String), LastfmError>
where
    F: FnMut() -> Result<(String, String), LastfmError>,
{
    let mut attempts = 0u32;
    loop {
        match request_session() {
            Ok(session) => return Ok(session),
            Err(e) if e.is_authorization_pending() => {
                attempts += 1;
                if let Some(max) = max_attempts {
                    if attempts >= max {
                        return Err(e);
                    }
                }
                debug!("Waiting for Last.fm authorization...");
                sleeper.sleep(AUTH_POLL_INTERVAL);
            }
            Err(e) => return Err(e),
        }
    }
}
