use std::collections::HashMap;
use std::time::Instant;

use serde_json::{Value, json};

use crate::ServerState;

const DEGRADED_RSS_BYTES: u64 = 100 * 1024 * 1024;
const DEGRADED_TASK_COUNT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// Degraded still serves traffic; only unhealthy turns into a 503.
    pub fn http_ok(self) -> bool {
        self != HealthStatus::Unhealthy
    }
}

/// Per-dependency health map. Everything here is in-process, so checks
/// are cheap liveness probes rather than network calls.
fn dependency_health(state: &ServerState) -> HashMap<&'static str, bool> {
    HashMap::from([
        ("dictionary", state.dictionary.target_count() > 0),
        ("registry", true),
        ("hub", true),
    ])
}

/// Full diagnostic payload for `GET /health`.
pub async fn full_report(state: &ServerState, started_at: Instant) -> (Value, HealthStatus) {
    let deps = dependency_health(state);
    let rss = rss_bytes().unwrap_or(0);
    let tasks = alive_tasks();

    let status = if deps.values().any(|ok| !ok) {
        HealthStatus::Unhealthy
    } else if rss > DEGRADED_RSS_BYTES || tasks > DEGRADED_TASK_COUNT {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let rooms = state.registry.status_counts().await;
    let total_rooms: usize = rooms.values().sum();

    let body = json!({
        "status": status.as_str(),
        "timestamp": chrono::Utc::now(),
        "uptime_seconds": started_at.elapsed().as_secs(),
        "memory": { "rss_bytes": rss },
        "tasks": { "alive": tasks },
        "rooms": {
            "total": total_rooms,
            "by_status": rooms,
        },
        "sessions": state.hub.session_count(),
        "connections": state.admission.connection_count(),
        "dependencies": deps
            .iter()
            .map(|(name, ok)| (*name, if *ok { "healthy" } else { "unhealthy" }))
            .collect::<HashMap<_, _>>(),
    });
    (body, status)
}

/// `GET /health/liveness`: always alive while the process answers.
pub fn liveness() -> Value {
    json!({ "status": "alive", "timestamp": chrono::Utc::now() })
}

/// `GET /health/readiness`: ready only when every dependency is healthy.
pub fn readiness(state: &ServerState) -> (Value, bool) {
    let deps = dependency_health(state);
    let ready = deps.values().all(|ok| *ok);
    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "dependencies": deps
            .iter()
            .map(|(name, ok)| (*name, if *ok { "healthy" } else { "unhealthy" }))
            .collect::<HashMap<_, _>>(),
    });
    (body, ready)
}

/// Resident set size from /proc, None on platforms without procfs.
fn rss_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

fn alive_tasks() -> usize {
    tokio::runtime::Handle::try_current()
        .map(|handle| handle.metrics().num_alive_tasks())
        .unwrap_or(0)
}
