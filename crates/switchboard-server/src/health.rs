//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"draining"` once shutdown has begun.
    pub status: String,
    /// Seconds since the relay started.
    pub uptime_secs: u64,
    /// Live browser connections.
    pub connections: usize,
    /// Meetings with cached presence.
    pub presence_meetings: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    presence_meetings: usize,
    draining: bool,
) -> HealthResponse {
    HealthResponse {
        status: if draining { "draining" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        presence_meetings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ok_while_running() {
        assert_eq!(health_check(Instant::now(), 0, 0, false).status, "ok");
    }

    #[test]
    fn status_draining_on_shutdown() {
        assert_eq!(health_check(Instant::now(), 0, 0, true).status, "draining");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, 0, 0, false).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), 2, 1, false);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 2);
        assert_eq!(parsed["presence_meetings"], 1);
        assert!(parsed["uptime_secs"].is_number());
    }
}
