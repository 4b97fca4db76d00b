use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// The window opened by one successful connection.
///
/// Created by the supervisor right after subscribing and never mutated. A
/// reconnect replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEpoch {
    sequence: u64,
    started_at: DateTime<Utc>,
    startup_cutoff: DateTime<Utc>,
}

impl ConnectionEpoch {
    /// Opens epoch number `sequence` at `started_at`, treating anything older
    /// than `started_at - grace` as backlog.
    pub fn begin(sequence: u64, started_at: DateTime<Utc>, grace: Duration) -> Self {
        let startup_cutoff = TimeDelta::from_std(grace)
            .ok()
            .and_then(|grace| started_at.checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Self {
            sequence,
            started_at,
            startup_cutoff,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// `t0`: the instant the connection was established.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn startup_cutoff(&self) -> DateTime<Utc> {
        self.startup_cutoff
    }

    /// True when `timestamp` is strictly before the cutoff.
    pub fn is_backlog(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp < self.startup_cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_is_grace_before_start() {
        let t0 = DateTime::parse_from_rfc3339("2024-05-26T13:00:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let epoch = ConnectionEpoch::begin(1, t0, Duration::from_secs(30));

        let cutoff = DateTime::parse_from_rfc3339("2024-05-26T13:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(epoch.startup_cutoff(), cutoff);
        assert!(!epoch.is_backlog(cutoff));
        assert!(epoch.is_backlog(cutoff - TimeDelta::milliseconds(1)));
        assert!(!epoch.is_backlog(t0));
    }

    #[test]
    fn oversized_grace_saturates() {
        let epoch = ConnectionEpoch::begin(1, Utc::now(), Duration::MAX);
        assert_eq!(epoch.startup_cutoff(), DateTime::<Utc>::MIN_UTC);
    }
}
