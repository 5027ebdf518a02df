//! Anonymous Session Guard: fixed-window generation limit for visitors who are not signed in.
//!
//! The primary key is a signed, httpOnly cookie token. When the cookie is missing the
//! guard falls back to an IP + user-agent fingerprint so clearing cookies does not reset
//! the quota. Repeatedly hitting the limit inside a window blocks the session for an hour.

pub mod store;

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::anonymous_session::AnonymousSessionRow;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "anon_session";
pub const COOKIE_MAX_AGE_DAYS: i64 = 30;
const MAX_USER_AGENT_LEN: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct GuardPolicy {
    pub max_generations: i32,
    pub window: Duration,
    pub max_denied_attempts: i32,
    pub block_duration: Duration,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            max_generations: 2,
            window: Duration::hours(24),
            max_denied_attempts: 5,
            block_duration: Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GuardOutcome {
    pub allowed: bool,
    /// Generations still available in the current window.
    pub remaining: u32,
    pub blocked_until: Option<DateTime<Utc>>,
}

/// Counters written back after a check. The generation count is only ever
/// reset here, never copied, so slots claimed by `reserve_generation` survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdate {
    pub reset_generations: bool,
    pub attempt_count: i32,
    pub window_started_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

/// Mutable counter state of one anonymous session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionWindow {
    pub generation_count: i32,
    pub attempt_count: i32,
    pub window_started_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl SessionWindow {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            generation_count: 0,
            attempt_count: 0,
            window_started_at: now,
            blocked_until: None,
        }
    }

    pub fn from_row(row: &AnonymousSessionRow) -> Self {
        Self {
            generation_count: row.generation_count,
            attempt_count: row.attempt_count,
            window_started_at: row.window_started_at,
            blocked_until: row.blocked_until,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, policy: &GuardPolicy) -> bool {
        now - self.window_started_at >= policy.window
    }

    /// Decides whether a generation may start, updating counters for denied attempts.
    pub fn check(&mut self, now: DateTime<Utc>, policy: &GuardPolicy) -> GuardOutcome {
        if let Some(until) = self.blocked_until {
            if until > now {
                return GuardOutcome {
                    allowed: false,
                    remaining: 0,
                    blocked_until: Some(until),
                };
            }
            self.blocked_until = None;
            self.attempt_count = 0;
        }

        if self.is_expired(now, policy) {
            *self = Self::fresh(now);
        }

        if self.generation_count < policy.max_generations {
            return GuardOutcome {
                allowed: true,
                remaining: (policy.max_generations - self.generation_count) as u32,
                blocked_until: None,
            };
        }

        self.attempt_count += 1;
        if self.attempt_count >= policy.max_denied_attempts {
            self.blocked_until = Some(now + policy.block_duration);
        }
        GuardOutcome {
            allowed: false,
            remaining: 0,
            blocked_until: self.blocked_until,
        }
    }

    /// What has to be persisted after `check` moved this window on from `read`.
    pub fn update_since(&self, read: &SessionWindow) -> WindowUpdate {
        WindowUpdate {
            reset_generations: self.window_started_at != read.window_started_at,
            attempt_count: self.attempt_count,
            window_started_at: self.window_started_at,
            blocked_until: self.blocked_until,
        }
    }

    /// Remaining quota without counting an attempt.
    pub fn peek(&self, now: DateTime<Utc>, policy: &GuardPolicy) -> GuardOutcome {
        if let Some(until) = self.blocked_until.filter(|until| *until > now) {
            return GuardOutcome {
                allowed: false,
                remaining: 0,
                blocked_until: Some(until),
            };
        }
        let used = if self.is_expired(now, policy) {
            0
        } else {
            self.generation_count
        };
        let remaining = (policy.max_generations - used).max(0) as u32;
        GuardOutcome {
            allowed: remaining > 0,
            remaining,
            blocked_until: None,
        }
    }
}

/// Network identity of the caller, used as the secondary signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| header("x-real-ip"))
            .unwrap_or("unknown")
            .to_string();

        let user_agent: String = header("user-agent")
            .unwrap_or("unknown")
            .chars()
            .take(MAX_USER_AGENT_LEN)
            .collect();

        Self { ip, user_agent }
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.ip.as_bytes());
        hasher.update(b"|");
        hasher.update(self.user_agent.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn mac_for(token: &str, secret: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(token.as_bytes());
    mac
}

/// Produces the cookie value `<token>.<hex signature>`.
pub fn sign_token(token: &str, secret: &str) -> String {
    let signature = mac_for(token, secret).finalize().into_bytes();
    format!("{token}.{}", hex::encode(signature))
}

/// Returns the token carried by a cookie value if its signature verifies.
pub fn verify_cookie_value(value: &str, secret: &str) -> Option<String> {
    let (token, signature) = value.rsplit_once('.')?;
    if token.is_empty() {
        return None;
    }
    let provided = hex::decode(signature).ok()?;
    mac_for(token, secret)
        .verify_slice(&provided)
        .ok()
        .map(|_| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_two_generations_then_denied() {
        let policy = GuardPolicy::default();
        let mut window = SessionWindow::fresh(t0());

        let first = window.check(t0(), &policy);
        assert!(first.allowed);
        assert_eq!(first.remaining, 2);
        window.generation_count += 1;

        let second = window.check(t0(), &policy);
        assert!(second.allowed);
        assert_eq!(second.remaining, 1);
        window.generation_count += 1;

        let third = window.check(t0(), &policy);
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert_eq!(window.attempt_count, 1);
    }

    #[test]
    fn test_repeated_denials_block_for_an_hour() {
        let policy = GuardPolicy::default();
        let mut window = SessionWindow::fresh(t0());
        window.generation_count = policy.max_generations;

        for _ in 0..policy.max_denied_attempts - 1 {
            assert!(window.check(t0(), &policy).blocked_until.is_none());
        }
        let blocked = window.check(t0(), &policy);
        assert_eq!(blocked.blocked_until, Some(t0() + Duration::hours(1)));

        // still blocked half an hour later
        let later = window.check(t0() + Duration::minutes(30), &policy);
        assert!(!later.allowed);
        assert_eq!(later.blocked_until, Some(t0() + Duration::hours(1)));
    }

    #[test]
    fn test_block_expiry_does_not_restore_quota_inside_window() {
        let policy = GuardPolicy::default();
        let mut window = SessionWindow::fresh(t0());
        window.generation_count = policy.max_generations;
        window.attempt_count = policy.max_denied_attempts;
        window.blocked_until = Some(t0() + Duration::hours(1));

        let outcome = window.check(t0() + Duration::hours(2), &policy);
        assert!(!outcome.allowed);
        assert!(outcome.blocked_until.is_none());
        assert_eq!(window.attempt_count, 1);
    }

    #[test]
    fn test_window_expiry_resets_counters() {
        let policy = GuardPolicy::default();
        let mut window = SessionWindow::fresh(t0());
        window.generation_count = 2;
        window.attempt_count = 3;

        let later = t0() + Duration::hours(24);
        let outcome = window.check(later, &policy);
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining, 2);
        assert_eq!(window, SessionWindow::fresh(later));
    }

    #[test]
    fn test_update_never_rewrites_generation_count_inside_window() {
        let policy = GuardPolicy::default();
        // Read before a parallel request reserved its slot.
        let read = SessionWindow::fresh(t0());
        let mut window = read.clone();
        window.generation_count = policy.max_generations;

        let outcome = window.check(t0() + Duration::minutes(5), &policy);
        assert!(!outcome.allowed);
        let update = window.update_since(&read);
        assert!(!update.reset_generations);
        assert_eq!(update.attempt_count, 1);
        assert_eq!(update.window_started_at, t0());

        let mut allowed = read.clone();
        allowed.check(t0() + Duration::minutes(5), &policy);
        assert!(!allowed.update_since(&read).reset_generations);
    }

    #[test]
    fn test_update_resets_generations_when_window_rolls_over() {
        let policy = GuardPolicy::default();
        let mut read = SessionWindow::fresh(t0());
        read.generation_count = 2;
        read.attempt_count = 4;
        let mut window = read.clone();

        let later = t0() + Duration::hours(25);
        window.check(later, &policy);
        let update = window.update_since(&read);
        assert!(update.reset_generations);
        assert_eq!(update.attempt_count, 0);
        assert_eq!(update.window_started_at, later);
        assert!(update.blocked_until.is_none());
    }

    #[test]
    fn test_peek_does_not_count_attempts() {
        let policy = GuardPolicy::default();
        let mut window = SessionWindow::fresh(t0());
        window.generation_count = 2;
        let before = window.clone();

        let outcome = window.peek(t0(), &policy);
        assert!(!outcome.allowed);
        assert_eq!(outcome.remaining, 0);
        assert_eq!(window, before);

        let after_window = window.peek(t0() + Duration::days(2), &policy);
        assert_eq!(after_window.remaining, 2);
    }

    #[test]
    fn test_signed_cookie_round_trip_and_tamper() {
        let value = sign_token("tok-123", "secret");
        assert_eq!(verify_cookie_value(&value, "secret").as_deref(), Some("tok-123"));
        assert!(verify_cookie_value(&value, "other-secret").is_none());

        let tampered = value.replacen("tok-123", "tok-124", 1);
        assert!(verify_cookie_value(&tampered, "secret").is_none());
        assert!(verify_cookie_value("tok-123", "secret").is_none());
        assert!(verify_cookie_value("tok-123.zz", "secret").is_none());
    }

    #[test]
    fn test_client_info_prefers_first_forwarded_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        headers.insert("user-agent", HeaderValue::from_static("Mozilla/5.0"));
        let info = ClientInfo::from_headers(&headers);
        assert_eq!(info.ip, "203.0.113.9");
        assert_eq!(info.user_agent, "Mozilla/5.0");

        let empty = ClientInfo::from_headers(&HeaderMap::new());
        assert_eq!(empty.ip, "unknown");
        assert_eq!(empty.user_agent, "unknown");
    }

    #[test]
    fn test_fingerprint_depends_on_ip_and_agent() {
        let a = ClientInfo {
            ip: "1.1.1.1".to_string(),
            user_agent: "ua".to_string(),
        };
        let b = ClientInfo {
            ip: "1.1.1.2".to_string(),
            user_agent: "ua".to_string(),
        };
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
