//! Rotating egress pool with 403 quarantine (C2, §4.2).
//!
//! A single mutex-guarded round-robin cursor is sufficient at expected QPS
//! (§9, "Proxy pool under concurrency") — this mirrors the donor crate's
//! `DashMap`-per-domain bookkeeping in its circuit breaker, but keyed by
//! egress identity instead of domain, with a simpler two-strike quarantine
//! rule instead of a half-open state machine.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;

use crate::error::{CrawlError, ErrorEvent, ErrorSource};

/// The network identity used for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Egress {
    Proxy(String),
    Direct,
}

impl fmt::Display for Egress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proxy(url) => write!(f, "{url}"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// Outcome of a single request made through an egress, reported back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Http403,
    TransportError,
    Timeout,
}

struct EgressState {
    egress: Egress,
    consecutive_403: u32,
    recent_errors: u32,
    quarantined: bool,
}

struct Inner {
    egresses: Vec<EgressState>,
    cursor: usize,
    bad_egress_log: Option<PathBuf>,
}

/// Shared, concurrency-safe rotation of proxies (plus optional direct egress).
pub struct ProxyPool {
    inner: Mutex<Inner>,
}

impl ProxyPool {
    pub fn new(proxies: &[String], allow_direct: bool, bad_egress_log: Option<PathBuf>) -> Self {
        let mut egresses: Vec<EgressState> = proxies
            .iter()
            .map(|p| EgressState {
                egress: Egress::Proxy(p.clone()),
                consecutive_403: 0,
                recent_errors: 0,
                quarantined: false,
            })
            .collect();
        if allow_direct {
            egresses.push(EgressState {
                egress: Egress::Direct,
                consecutive_403: 0,
                recent_errors: 0,
                quarantined: false,
            });
        }
        Self {
            inner: Mutex::new(Inner {
                egresses,
                cursor: 0,
                bad_egress_log,
            }),
        }
    }

    /// Returns the next non-quarantined egress in round-robin order.
    pub fn acquire(&self) -> Result<Egress, CrawlError> {
        let mut inner = self.inner.lock().expect("proxy pool mutex poisoned");
        let len = inner.egresses.len();
        if len == 0 {
            return Err(CrawlError::ProxyPoolExhausted);
        }

        for step in 0..len {
            let idx = (inner.cursor + step) % len;
            if !inner.egresses[idx].quarantined {
                inner.cursor = (idx + 1) % len;
                return Ok(inner.egresses[idx].egress.clone());
            }
        }

        let snapshot = self.snapshot_locked(&inner);
        ErrorEvent::new("proxy_pool_exhausted", ErrorSource::Proxy, "refresh_pool")
            .with_detail("pool_snapshot", snapshot)
            .log_error();
        Err(CrawlError::ProxyPoolExhausted)
    }

    /// Records the outcome of a request made through `egress`, quarantining it
    /// after two consecutive 403s (§4.2, §8 invariant).
    pub fn report(&self, egress: &Egress, outcome: Outcome) {
        let mut inner = self.inner.lock().expect("proxy pool mutex poisoned");
        let Some(state) = inner.egresses.iter_mut().find(|e| &e.egress == egress) else {
            return;
        };

        match outcome {
            Outcome::Http403 => {
                state.consecutive_403 += 1;
                state.recent_errors += 1;
            }
            Outcome::TransportError | Outcome::Timeout => {
                state.consecutive_403 = 0;
                state.recent_errors += 1;
            }
            Outcome::Ok => {
                state.consecutive_403 = 0;
            }
        }

        if state.consecutive_403 >= 2 && !state.quarantined {
            state.quarantined = true;
            let egress_id = state.egress.to_string();
            let log_path = inner.bad_egress_log.clone();
            drop(inner);
            if let Some(path) = log_path {
                Self::append_bad_egress_log(&path, &egress_id);
            }
            ErrorEvent::new("egress_quarantined", ErrorSource::Proxy, "rotate_proxy")
                .with_proxy(egress_id)
                .log_warn();
        }
    }

    /// Iterates the identifiers of currently quarantined egresses.
    pub fn quarantined(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("proxy pool mutex poisoned");
        inner
            .egresses
            .iter()
            .filter(|e| e.quarantined)
            .map(|e| e.egress.to_string())
            .collect()
    }

    fn snapshot_locked(&self, inner: &Inner) -> String {
        let alive = inner.egresses.iter().filter(|e| !e.quarantined).count();
        let quarantined = inner.egresses.iter().filter(|e| e.quarantined).count();
        format!("alive={alive} quarantined={quarantined}")
    }

    fn append_bad_egress_log(path: &PathBuf, egress_id: &str) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let line = format!("{}\t{}\tHTTP 403\n", Utc::now().to_rfc3339(), egress_id);
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()).and_then(|()| file.flush()) {
                    tracing::warn!(error = %e, path = %path.display(), "failed to append bad-egress log");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to open bad-egress log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarantines_after_two_consecutive_403s_and_logs_once() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("bad_proxies.log");
        let pool = ProxyPool::new(
            &["http://p1:8080".to_string(), "http://p2:8080".to_string()],
            false,
            Some(log_path.clone()),
        );

        let p1 = Egress::Proxy("http://p1:8080".to_string());
        pool.report(&p1, Outcome::Http403);
        pool.report(&p1, Outcome::Http403);
        pool.report(&p1, Outcome::Http403); // should not log twice

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("http://p1:8080"));

        for _ in 0..4 {
            let acquired = pool.acquire().unwrap();
            assert_eq!(acquired, Egress::Proxy("http://p2:8080".to_string()));
        }
    }

    #[test]
    fn exhaustion_returns_proxy_pool_exhausted() {
        let pool = ProxyPool::new(&["http://p1:8080".to_string()], false, None);
        let p1 = Egress::Proxy("http://p1:8080".to_string());
        pool.report(&p1, Outcome::Http403);
        pool.report(&p1, Outcome::Http403);
        assert!(matches!(pool.acquire(), Err(CrawlError::ProxyPoolExhausted)));
    }

    #[test]
    fn resets_consecutive_403_on_non_403_outcome() {
        let pool = ProxyPool::new(&["http://p1:8080".to_string()], false, None);
        let p1 = Egress::Proxy("http://p1:8080".to_string());
        pool.report(&p1, Outcome::Http403);
        pool.report(&p1, Outcome::Ok);
        pool.report(&p1, Outcome::Http403);
        // Only one consecutive 403 since the reset; should still be usable.
        assert!(pool.acquire().is_ok());
    }
}
