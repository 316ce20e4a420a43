use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

const DEFAULT_RATE_LIMIT_MS: u64 = 500;

/// Stores the last access time for a specific service
struct ServiceLimit {
    last_access: Instant,
    /// Minimum delay between requests in milliseconds
    minimum_delay_ms: u64,
}

/// RateLimiter ensures that API calls to external services respect rate limits
struct RateLimiter {
    services: HashMap<String, ServiceLimit>,
}

// Global singleton for the rate limiter
static RATE_LIMITER: Lazy<Mutex<RateLimiter>> = Lazy::new(|| {
    Mutex::new(RateLimiter {
        services: HashMap::new(),
    })
});

impl RateLimiter {
    fn register_service(&mut self, service_name: &str, minimum_delay_ms: u64) {
        self.services.insert(
            service_name.to_string(),
            ServiceLimit {
                last_access: Instant::now() - Duration::from_millis(minimum_delay_ms),
                minimum_delay_ms,
            },
        );
        debug!(
            "Registered rate limit for service '{}': {} ms",
            service_name, minimum_delay_ms
        );
    }

    /// Returns the remaining delay to wait before the next request, and
    /// records the access time.
    fn reserve(&mut self, service_name: &str) -> Duration {
        let now = Instant::now();

        let service_limit = self
            .services
            .entry(service_name.to_string())
            .or_insert_with(|| ServiceLimit {
                last_access: now - Duration::from_millis(DEFAULT_RATE_LIMIT_MS),
                minimum_delay_ms: DEFAULT_RATE_LIMIT_MS,
            });

        let elapsed_ms = now.duration_since(service_limit.last_access).as_millis() as u64;
        let wait = if elapsed_ms < service_limit.minimum_delay_ms {
            Duration::from_millis(service_limit.minimum_delay_ms - elapsed_ms)
        } else {
            Duration::ZERO
        };

        service_limit.last_access = now + wait;
        wait
    }
}

/// Register a rate limit for a specific service
///
/// # Arguments
/// * `service_name` - Name of the service to register
/// * `minimum_delay_ms` - Minimum delay between requests in milliseconds
pub fn register_service(service_name: &str, minimum_delay_ms: u64) {
    RATE_LIMITER.lock().register_service(service_name, minimum_delay_ms);
}

/// Apply rate limiting to a service.
///
/// Blocks the current thread if necessary to respect the configured rate
/// limit. The global lock is released before sleeping so other services
/// are not held up.
pub fn rate_limit(service_name: &str) {
    let wait = RATE_LIMITER.lock().reserve(service_name);
    if !wait.is_zero() {
        debug!(
            "Rate limiting service '{}': sleeping for {} ms",
            service_name,
            wait.as_millis()
        );
        std::thread::sleep(wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_access_does_not_wait() {
        let mut limiter = RateLimiter {
            services: HashMap::new(),
        };
        limiter.register_service("svc", 200);
        assert_eq!(limiter.reserve("svc"), Duration::ZERO);
    }

    #[test]
    fn test_back_to_back_access_waits() {
        let mut limiter = RateLimiter {
            services: HashMap::new(),
        };
        limiter.register_service("svc", 200);
        limiter.reserve("svc");
        assert!(!limiter.reserve("svc").is_zero());
    }

    #[test]
    fn test_unregistered_service_uses_default() {
        let mut limiter = RateLimiter {
            services: HashMap::new(),
        };
        assert_eq!(limiter.reserve("new"), Duration::ZERO);
        assert!(limiter.services.contains_key("new"));
    }
}
