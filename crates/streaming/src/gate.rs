//! Redundant-fetch suppression for periodically refreshed remote sources.
//!
//! A gate remembers the cache key and issue time of the last fetch it let
//! through. A new fetch is suppressed only when the key is unchanged and the
//! refresh interval has not elapsed; any parameter change produces a new key
//! and goes through immediately.
//!
//! On top of that, the gate tracks the one fetch it expects a response for:
//! - while that fetch is outstanding, the same key is not issued again;
//! - only the response to the most recently issued ticket is accepted, so an
//!   older response that lands late cannot overwrite newer data.

use foundation::EpochMs;
use serde::Serialize;

use crate::request::FetchTicket;

pub const KEY_DELIMITER: char = '|';
const LIST_DELIMITER: char = ',';

/// An outstanding fetch older than this is considered lost.
pub const DEFAULT_INFLIGHT_TIMEOUT_MS: i64 = 60_000;

/// Deterministic encoding of every parameter that affects a query's result.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FetchKey(String);

impl FetchKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FetchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct FetchKeyBuilder {
    parts: Vec<String>,
}

impl FetchKeyBuilder {
    pub fn new(scope: impl std::fmt::Display) -> Self {
        Self {
            parts: vec![scope.to_string()],
        }
    }

    pub fn part(mut self, value: impl std::fmt::Display) -> Self {
        self.parts.push(value.to_string());
        self
    }

    /// Appends an ordered list as one part.
    pub fn list(mut self, items: &[String]) -> Self {
        let joined = items
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(&LIST_DELIMITER.to_string());
        self.parts.push(joined);
        self
    }

    pub fn build(self) -> FetchKey {
        FetchKey(self.parts.join(&KEY_DELIMITER.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FetchGateEntry {
    cache_key: FetchKey,
    last_fetch_at_ms: EpochMs,
}

/// Outcome of asking the gate for a fetch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Admission {
    Issued(FetchTicket),
    /// Same key, refresh interval not yet elapsed.
    Fresh,
    /// Same key already outstanding.
    InFlight,
}

#[derive(Debug, Clone)]
struct InFlight {
    ticket: FetchTicket,
    key: FetchKey,
    started_at_ms: EpochMs,
}

#[derive(Debug, Clone)]
pub struct FetchGate {
    refresh_interval_ms: i64,
    inflight_timeout_ms: i64,
    last: Option<FetchGateEntry>,
    in_flight: Option<InFlight>,
    latest: Option<FetchTicket>,
    next_ticket: u64,
}

impl FetchGate {
    pub fn new(refresh_interval_ms: i64) -> Self {
        Self {
            refresh_interval_ms: refresh_interval_ms.max(0),
            inflight_timeout_ms: DEFAULT_INFLIGHT_TIMEOUT_MS,
            last: None,
            in_flight: None,
            latest: None,
            next_ticket: 1,
        }
    }

    #[cfg(test)]
    pub fn with_inflight_timeout(mut self, timeout_ms: i64) -> Self {
        self.inflight_timeout_ms = timeout_ms.max(0);
        self
    }

    pub fn set_refresh_interval(&mut self, refresh_interval_ms: i64) {
        self.refresh_interval_ms = refresh_interval_ms.max(0);
    }

    #[cfg(test)]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True unless `key` was recorded less than one refresh interval ago.
    pub fn should_fetch(&self, key: &FetchKey, now_ms: EpochMs) -> bool {
        match &self.last {
            Some(entry) if entry.cache_key == *key => {
                now_ms.saturating_sub(entry.last_fetch_at_ms) >= self.refresh_interval_ms
            }
            _ => true,
        }
    }

    pub fn record(&mut self, key: FetchKey, now_ms: EpochMs) {
        self.last = Some(FetchGateEntry {
            cache_key: key,
            last_fetch_at_ms: now_ms,
        });
    }

    /// Admits a fetch for `key`, recording it and handing out a ticket, or
    /// reports why it was suppressed.
    pub fn begin(&mut self, key: FetchKey, now_ms: EpochMs) -> Admission {
        if let Some(flight) = &self.in_flight {
            let lost = now_ms.saturating_sub(flight.started_at_ms) >= self.inflight_timeout_ms;
            if flight.key == key && !lost {
                return Admission::InFlight;
            }
            if lost {
                tracing::debug!(ticket = %flight.ticket, "outstanding fetch timed out");
            }
        }

        if !self.should_fetch(&key, now_ms) {
            return Admission::Fresh;
        }

        let ticket = FetchTicket(self.next_ticket);
        self.next_ticket += 1;
        self.record(key.clone(), now_ms);
        self.in_flight = Some(InFlight {
            ticket,
            key,
            started_at_ms: now_ms,
        });
        self.latest = Some(ticket);
        Admission::Issued(ticket)
    }

    /// Settles a successful response. Returns `false` if the response is stale
    /// (a newer fetch was issued since, or the gate was reset) and must be dropped.
    pub fn complete(&mut self, ticket: FetchTicket) -> bool {
        self.settle(ticket);
        self.latest == Some(ticket)
    }

    /// Settles a failed fetch. The recorded key/time stay, so the retry happens
    /// on the next refresh interval.
    pub fn fail(&mut self, ticket: FetchTicket) {
        self.settle(ticket);
    }

    /// Forgets everything. Tickets issued before the reset are never accepted.
    pub fn reset(&mut self) {
        self.last = None;
        self.in_flight = None;
        self.latest = None;
    }

    fn settle(&mut self, ticket: FetchTicket) {
        if self.in_flight.as_ref().is_some_and(|f| f.ticket == ticket) {
            self.in_flight = None;
        }
    }
}
