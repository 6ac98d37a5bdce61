//! Per-client request throttling.
//!
//! Each client gets a one-minute window of `rate` requests. Once it is spent
//! a second, 90-second window of `2 * rate` requests absorbs bursts; a
//! request is denied only when both are exhausted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use super::errors::{ApiError, RateLimitInfo};
use super::{client_id, AppState};

const WINDOW: Duration = Duration::from_secs(60);
const BURST_WINDOW: Duration = Duration::from_secs(90);

/// Prune idle clients once the table grows past this.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Allow,
    Deny(RateLimitInfo),
}

/// Decides whether a client may make another request.
pub trait AdmissionControl: Send + Sync {
    fn consume(&self, client_id: &str) -> Admission;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: Instant,
    count: u32,
}

impl Window {
    fn new(now: Instant) -> Self {
        Window {
            start: now,
            count: 0,
        }
    }

    /// Count one request. `Err` carries the time until the window resets.
    fn consume(&mut self, now: Instant, length: Duration, points: u32) -> Result<u32, Duration> {
        if now >= self.start + length {
            *self = Window::new(now);
        }
        self.count = self.count.saturating_add(1);
        if self.count <= points {
            Ok(points - self.count)
        } else {
            Err(self.start + length - now)
        }
    }

    fn expired(&self, now: Instant, length: Duration) -> bool {
        now >= self.start + length
    }
}

/// In-process fixed-window limiter with a burst allowance.
#[derive(Debug)]
pub struct BurstyWindowLimiter {
    rate_per_minute: u32,
    clients: Mutex<HashMap<String, (Window, Window)>>,
}

impl BurstyWindowLimiter {
    pub fn new(rate_per_minute: u32) -> Self {
        BurstyWindowLimiter {
            rate_per_minute,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn consume_at(&self, client_id: &str, now: Instant) -> Admission {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if clients.len() > PRUNE_THRESHOLD {
            clients.retain(|_, (w, b)| !(w.expired(now, WINDOW) && b.expired(now, BURST_WINDOW)));
        }

        let (window, burst) = clients
            .entry(client_id.to_string())
            .or_insert_with(|| (Window::new(now), Window::new(now)));

        let retry = match window.consume(now, WINDOW, self.rate_per_minute) {
            Ok(_) => return Admission::Allow,
            Err(retry) => retry,
        };

        match burst.consume(now, BURST_WINDOW, self.rate_per_minute.saturating_mul(2)) {
            Ok(_) => Admission::Allow,
            Err(_) => {
                let retry_after_ms = retry.as_millis() as u64;
                Admission::Deny(RateLimitInfo {
                    retry_after_ms,
                    limit: self.rate_per_minute,
                    remaining: 0,
                    reset_at: Utc::now() + chrono::Duration::milliseconds(retry_after_ms as i64),
                })
            }
        }
    }
}

impl AdmissionControl for BurstyWindowLimiter {
    fn consume(&self, client_id: &str) -> Admission {
        self.consume_at(client_id, Instant::now())
    }
}

/// Limiter plus the clients it never applies to.
pub struct Throttle {
    pub limiter: Arc<dyn AdmissionControl>,
    unlimited: Vec<String>,
}

impl Throttle {
    pub fn new(limiter: Arc<dyn AdmissionControl>, unlimited: &[String]) -> Self {
        let mut unlimited = unlimited.to_vec();
        unlimited.push("127.0.0.1".to_string());
        unlimited.push("::1".to_string());
        Throttle { limiter, unlimited }
    }

    pub fn check(&self, client: &str) -> Result<(), ApiError> {
        if client.is_empty() || self.unlimited.iter().any(|ip| ip == client) {
            return Ok(());
        }
        match self.limiter.consume(client) {
            Admission::Allow => Ok(()),
            Admission::Deny(info) => {
                log::debug!("throttled {} for {} ms", client, info.retry_after_ms);
                Err(ApiError::RateLimited(info))
            }
        }
    }
}

/// Middleware rejecting over-limit clients with 429.
pub async fn throttle(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if let Some(throttle) = &state.throttle {
        let client = client_id(&req);
        if let Err(err) = throttle.check(&client) {
            return err.into_response();
        }
    }
    next.run(req).await
}
