use std::time::Duration;

/// Game server configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Interval between server pings on WebSocket connections. A connection
    /// that stays silent for a whole interval is closed.
    pub heartbeat_interval: Duration,
    /// How long a `GET /poll/{sid}` waits for an event before answering `[]`.
    pub poll_wait: Duration,
    /// Polling sessions that have not polled for this long are disconnected.
    pub poll_session_ttl: Duration,
    /// Capacity of the snapshot broadcast channel.
    pub broadcast_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables. Every variable is
    /// optional; unparsable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            port: parsed_var("PORT").unwrap_or(defaults.port),
            heartbeat_interval: parsed_var("HEARTBEAT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            poll_wait: parsed_var("POLL_WAIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_wait),
            poll_session_ttl: parsed_var("POLL_SESSION_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_session_ttl),
            broadcast_capacity: parsed_var::<usize>("BROADCAST_CAPACITY")
                .filter(|c| *c > 0)
                .unwrap_or(defaults.broadcast_capacity),
        };
        config.clamp_poll_wait()
    }

    /// A long poll must come back well inside the session TTL, or the sweeper
    /// drops sessions whose poll is still in flight.
    fn clamp_poll_wait(mut self) -> Self {
        if self.poll_wait >= self.poll_session_ttl {
            let clamped = self.poll_session_ttl / 2;
            tracing::warn!(
                poll_wait_secs = self.poll_wait.as_secs(),
                poll_session_ttl_secs = self.poll_session_ttl.as_secs(),
                clamped_ms = clamped.as_millis() as u64,
                "POLL_WAIT_SECS must be below POLL_SESSION_TTL_SECS; clamping"
            );
            self.poll_wait = clamped;
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            heartbeat_interval: Duration::from_secs(25),
            poll_wait: Duration::from_secs(20),
            poll_session_ttl: Duration::from_secs(45),
            broadcast_capacity: 1024,
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.port, 3001);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(config.poll_wait, Duration::from_secs(20));
        assert_eq!(config.poll_session_ttl, Duration::from_secs(45));
        assert_eq!(config.broadcast_capacity, 1024);
    }

    #[test]
    fn poll_wait_is_kept_below_the_session_ttl() {
        let config = Config {
            poll_wait: Duration::from_secs(60),
            poll_session_ttl: Duration::from_secs(45),
            ..Config::default()
        }
        .clamp_poll_wait();
        assert!(config.poll_wait < config.poll_session_ttl);
        assert_eq!(config.poll_wait, Duration::from_millis(22_500));

        let config = Config {
            poll_wait: Duration::from_secs(45),
            ..Config::default()
        }
        .clamp_poll_wait();
        assert!(config.poll_wait < config.poll_session_ttl);

        let untouched = Config::default().clamp_poll_wait();
        assert_eq!(untouched.poll_wait, Duration::from_secs(20));
    }

    #[test]
    fn parsed_var_ignores_garbage() {
        std::env::set_var("MASSCLICK_TEST_GARBAGE_PORT", "not-a-port");
        assert_eq!(parsed_var::<u16>("MASSCLICK_TEST_GARBAGE_PORT"), None);
        std::env::set_var("MASSCLICK_TEST_GOOD_PORT", " 4242 ");
        assert_eq!(parsed_var::<u16>("MASSCLICK_TEST_GOOD_PORT"), Some(4242));
        assert_eq!(parsed_var::<u16>("MASSCLICK_TEST_UNSET_PORT"), None);
    }
}
