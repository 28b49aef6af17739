use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use duel_types::DuelError;

use crate::config::Config;

/// Sliding-window rate limiter keyed by an arbitrary string (session id
/// for WS frames, client ip for HTTP requests). Timestamps older than
/// the window are dropped before each admission decision.
pub struct RateWindow {
    limit: u32,
    window: Duration,
    hits: DashMap<String, VecDeque<Instant>>,
}

impl RateWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: DashMap::new(),
        }
    }

    /// Record one hit for `key`; false when the key is over its budget
    /// for the current window.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.hits.entry(key.to_string()).or_default();
        while entry
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            entry.pop_front();
        }
        if entry.len() >= self.limit as usize {
            return false;
        }
        entry.push_back(now);
        true
    }

    pub fn forget(&self, key: &str) {
        self.hits.remove(key);
    }

    /// Drop windows whose entries have all aged out.
    pub fn prune(&self) {
        let now = Instant::now();
        self.hits.retain(|_, entry| {
            entry
                .back()
                .is_some_and(|t| now.duration_since(*t) <= self.window)
        });
    }
}

/// Upgrade-time and per-message policy: origin allow-list, per-IP and
/// global connection caps, message size cap, message rate. Kept outside
/// the session and hub so neither carries policy.
pub struct Admission {
    allowed_origins: Vec<String>,
    allow_any_origin: bool,
    max_per_ip: usize,
    max_global: usize,
    max_message_size: usize,
    message_rate: RateWindow,
    per_ip: DashMap<String, usize>,
    global: AtomicUsize,
}

impl Admission {
    pub fn new(config: &Config) -> Self {
        Self {
            allow_any_origin: config.allows_any_origin(),
            allowed_origins: config.allowed_origins.clone(),
            max_per_ip: config.max_connections_per_ip,
            max_global: config.max_connections,
            max_message_size: config.max_message_size,
            message_rate: RateWindow::new(config.ws_rate_limit, config.ws_rate_window),
            per_ip: DashMap::new(),
            global: AtomicUsize::new(0),
        }
    }

    /// Resolve the client address: X-Forwarded-For first hop, else
    /// X-Real-IP, else the remote address without its port.
    pub fn resolve_client_ip(
        forwarded_for: Option<&str>,
        real_ip: Option<&str>,
        remote: Option<SocketAddr>,
    ) -> String {
        if let Some(header) = forwarded_for
            && let Some(first) = header.split(',').next()
            && !first.trim().is_empty()
        {
            return first.trim().to_string();
        }
        if let Some(header) = real_ip
            && !header.trim().is_empty()
        {
            return header.trim().to_string();
        }
        remote
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Upgrade-time checks; on success the connection is counted against
    /// the per-IP and global budgets.
    pub fn validate_connection(
        &self,
        origin: Option<&str>,
        ip: &str,
        session_id: &str,
    ) -> Result<(), DuelError> {
        // Empty Origin is allowed: non-browser clients send none
        if let Some(origin) = origin {
            let origin = origin.trim().to_lowercase();
            if !origin.is_empty()
                && !self.allow_any_origin
                && !self.allowed_origins.contains(&origin)
            {
                warn!(%origin, session = session_id, "rejected origin");
                return Err(DuelError::InvalidOrigin);
            }
        }

        let mut count = self.per_ip.entry(ip.to_string()).or_insert(0);
        if *count >= self.max_per_ip {
            warn!(%ip, "per-ip connection cap reached");
            return Err(DuelError::TooManyConnections);
        }

        if self.global.load(Ordering::Relaxed) >= self.max_global {
            warn!("global connection cap reached");
            return Err(DuelError::ServerOverloaded);
        }

        *count += 1;
        self.global.fetch_add(1, Ordering::Relaxed);
        debug!(session = session_id, %ip, "connection admitted");
        Ok(())
    }

    /// Per-message checks: size cap first, then the sliding window.
    pub fn check_message_rate(&self, session_id: &str, size: usize) -> Result<(), DuelError> {
        if size > self.max_message_size {
            return Err(DuelError::MessageTooLarge);
        }
        if !self.message_rate.check(session_id) {
            return Err(DuelError::RateLimitExceeded);
        }
        Ok(())
    }

    /// Called on every disconnect: releases the per-IP and global slots
    /// and discards the session's window.
    pub fn on_connection_closed(&self, session_id: &str, ip: &str) {
        if let Some(mut count) = self.per_ip.get_mut(ip) {
            *count = count.saturating_sub(1);
        }
        self.per_ip.remove_if(ip, |_, count| *count == 0);
        // Saturating: accounting must survive a double close
        let _ = self
            .global
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
        self.message_rate.forget(session_id);
    }

    pub fn connection_count(&self) -> usize {
        self.global.load(Ordering::Relaxed)
    }

    /// Background sweep pruning aged-out window state; one task for the
    /// whole server.
    pub fn start_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let admission = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                admission.message_rate.prune();
                admission.per_ip.retain(|_, count| *count > 0);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admission_with(config: Config) -> Admission {
        Admission::new(&config)
    }

    fn open_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_resolve_client_ip_precedence() {
        let remote: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        assert_eq!(
            Admission::resolve_client_ip(Some("1.2.3.4, 5.6.7.8"), Some("9.9.9.9"), Some(remote)),
            "1.2.3.4"
        );
        assert_eq!(
            Admission::resolve_client_ip(None, Some("9.9.9.9"), Some(remote)),
            "9.9.9.9"
        );
        assert_eq!(
            Admission::resolve_client_ip(None, None, Some(remote)),
            "10.0.0.1"
        );
        assert_eq!(Admission::resolve_client_ip(None, None, None), "unknown");
    }

    #[test]
    fn test_origin_allow_list() {
        let mut config = open_config();
        config.allowed_origins = vec!["https://duel.example".to_string()];
        let admission = admission_with(config);

        // Empty origin (non-browser client) is admitted
        assert!(admission.validate_connection(None, "1.1.1.1", "s1").is_ok());
        assert!(
            admission
                .validate_connection(Some("https://duel.example"), "1.1.1.2", "s2")
                .is_ok()
        );
        // Case-insensitive match
        assert!(
            admission
                .validate_connection(Some("HTTPS://DUEL.EXAMPLE"), "1.1.1.3", "s3")
                .is_ok()
        );
        assert_eq!(
            admission
                .validate_connection(Some("https://evil.example"), "1.1.1.4", "s4")
                .err(),
            Some(DuelError::InvalidOrigin)
        );
    }

    #[test]
    fn test_per_ip_cap() {
        let mut config = open_config();
        config.max_connections_per_ip = 2;
        let admission = admission_with(config);

        assert!(admission.validate_connection(None, "1.1.1.1", "s1").is_ok());
        assert!(admission.validate_connection(None, "1.1.1.1", "s2").is_ok());
        assert_eq!(
            admission.validate_connection(None, "1.1.1.1", "s3").err(),
            Some(DuelError::TooManyConnections)
        );
        // A different address is unaffected
        assert!(admission.validate_connection(None, "2.2.2.2", "s4").is_ok());

        // Closing releases the slot
        admission.on_connection_closed("s1", "1.1.1.1");
        assert!(admission.validate_connection(None, "1.1.1.1", "s5").is_ok());
    }

    #[test]
    fn test_global_cap() {
        let mut config = open_config();
        config.max_connections = 2;
        let admission = admission_with(config);

        assert!(admission.validate_connection(None, "1.1.1.1", "s1").is_ok());
        assert!(admission.validate_connection(None, "2.2.2.2", "s2").is_ok());
        assert_eq!(
            admission.validate_connection(None, "3.3.3.3", "s3").err(),
            Some(DuelError::ServerOverloaded)
        );
        assert_eq!(admission.connection_count(), 2);
    }

    #[test]
    fn test_message_size_cap() {
        let admission = admission_with(open_config());
        assert!(admission.check_message_rate("s1", 512).is_ok());
        assert_eq!(
            admission.check_message_rate("s1", 513).err(),
            Some(DuelError::MessageTooLarge)
        );
    }

    #[test]
    fn test_rate_window_allows_five_then_rejects() {
        let admission = admission_with(open_config());
        for _ in 0..5 {
            assert!(admission.check_message_rate("s1", 10).is_ok());
        }
        assert_eq!(
            admission.check_message_rate("s1", 10).err(),
            Some(DuelError::RateLimitExceeded)
        );
        // Other sessions keep their own budgets
        assert!(admission.check_message_rate("s2", 10).is_ok());
    }

    #[test]
    fn test_rate_window_slides() {
        let window = RateWindow::new(2, Duration::from_millis(30));
        assert!(window.check("k"));
        assert!(window.check("k"));
        assert!(!window.check("k"));
        std::thread::sleep(Duration::from_millis(40));
        // Old timestamps are dropped before the next decision
        assert!(window.check("k"));
    }

    #[test]
    fn test_close_discards_window_state() {
        let admission = admission_with(open_config());
        for _ in 0..5 {
            admission.check_message_rate("s1", 10).unwrap();
        }
        admission.on_connection_closed("s1", "1.1.1.1");
        assert!(admission.check_message_rate("s1", 10).is_ok());
    }

    #[test]
    fn test_double_close_is_safe() {
        let admission = admission_with(open_config());
        admission.validate_connection(None, "1.1.1.1", "s1").unwrap();
        admission.on_connection_closed("s1", "1.1.1.1");
        admission.on_connection_closed("s1", "1.1.1.1");
        assert_eq!(admission.connection_count(), 0);
    }

    #[test]
    fn test_prune_drops_stale_windows() {
        let window = RateWindow::new(5, Duration::from_millis(10));
        window.check("gone");
        std::thread::sleep(Duration::from_millis(20));
        window.prune();
        assert!(window.hits.get("gone").is_none());
    }
}
