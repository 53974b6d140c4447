//! Timestamp handling shared by agent and server.
//!
//! Wire timestamps are RFC 3339 UTC strings; epoch-millisecond integers are
//! also accepted on decode for older agents. `MonotonicClock` guarantees
//! strictly increasing timestamps within one agent process run.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Serde module for `DateTime<Utc>` fields: encodes RFC 3339, decodes
/// either RFC 3339 strings or epoch milliseconds.
pub mod ts {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&dt.to_rfc3339())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    pub fn deserialize<'de, D>(d: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(d)? {
            Raw::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(serde::de::Error::custom),
            Raw::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| serde::de::Error::custom("epoch millis out of range")),
        }
    }
}

/// Issues UTC timestamps that never repeat or go backwards within the
/// process, even when the system clock steps or two events land in the
/// same millisecond.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_ms: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last_ms: AtomicI64::new(0),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let mut candidate = Utc::now().timestamp_millis();
        loop {
            let last = self.last_ms.load(Ordering::Acquire);
            if candidate <= last {
                candidate = last + 1;
            }
            if self
                .last_ms
                .compare_exchange(last, candidate, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
        Utc.timestamp_millis_opt(candidate)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "ts")]
        at: DateTime<Utc>,
    }

    #[test]
    fn test_rfc3339_round_trip() {
        let w = Wrapper {
            at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("2026-03-14T09:26:53"));
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.at, w.at);
    }

    #[test]
    fn test_epoch_millis_accepted() {
        let w: Wrapper = serde_json::from_str(r#"{"at": 1767225600000}"#).unwrap();
        assert_eq!(w.at.timestamp_millis(), 1_767_225_600_000);
    }

    #[test]
    fn test_monotonic_clock_never_repeats() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }
}
