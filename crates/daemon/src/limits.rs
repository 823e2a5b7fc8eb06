// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection admission control: per-source-address ceiling and a
//! token-bucket connection rate limit, both checked before the WebSocket
//! upgrade completes.

use pa_core::ServerError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared limiter; hand out one [`ConnPermit`] per accepted connection.
#[derive(Debug)]
pub(crate) struct ConnLimiter {
    max_per_ip: usize,
    rate: f64,
    burst: f64,
    per_ip: Mutex<HashMap<IpAddr, usize>>,
    bucket: Mutex<TokenBucket>,
}

/// Live-connection token; releases its per-address slot on drop.
#[derive(Debug)]
pub(crate) struct ConnPermit {
    ip: IpAddr,
    limiter: Arc<ConnLimiter>,
}

impl ConnLimiter {
    pub fn new(max_per_ip: usize, rate: f64, burst: u32) -> Arc<Self> {
        Arc::new(Self {
            max_per_ip,
            rate,
            burst: f64::from(burst),
            per_ip: Mutex::new(HashMap::new()),
            bucket: Mutex::new(TokenBucket { tokens: f64::from(burst), last_refill: Instant::now() }),
        })
    }

    pub fn try_acquire(self: &Arc<Self>, ip: IpAddr) -> Result<ConnPermit, ServerError> {
        self.try_acquire_at(ip, Instant::now())
    }

    fn try_acquire_at(self: &Arc<Self>, ip: IpAddr, now: Instant) -> Result<ConnPermit, ServerError> {
        {
            let mut per_ip = self.per_ip.lock();
            let count = per_ip.entry(ip).or_insert(0);
            if *count >= self.max_per_ip {
                return Err(ServerError::ResourceLimit(format!(
                    "too many connections from {ip}"
                )));
            }
            *count += 1;
        }

        let admitted = {
            let mut bucket = self.bucket.lock();
            let elapsed = now.saturating_duration_since(bucket.last_refill);
            bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
            bucket.last_refill = now;
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                true
            } else {
                false
            }
        };

        if !admitted {
            self.release(ip);
            return Err(ServerError::ResourceLimit("connection rate exceeded".to_string()));
        }

        Ok(ConnPermit { ip, limiter: Arc::clone(self) })
    }

    #[allow(dead_code)]
    pub fn connections_from(&self, ip: IpAddr) -> usize {
        self.per_ip.lock().get(&ip).copied().unwrap_or(0)
    }

    fn release(&self, ip: IpAddr) {
        let mut per_ip = self.per_ip.lock();
        if let Some(count) = per_ip.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                per_ip.remove(&ip);
            }
        }
    }
}

impl Drop for ConnPermit {
    fn drop(&mut self) {
        self.limiter.release(self.ip);
    }
}

#[cfg(test)]
#[path = "limits_tests.rs"]
mod tests;
