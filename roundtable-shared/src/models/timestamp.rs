use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// UTC instant used by every persisted and buffered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub fn as_millis(self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Time elapsed between `self` and `later`; negative when `later` precedes `self`.
    #[must_use]
    pub fn elapsed_until(self, later: Self) -> TimeDelta {
        later.0 - self.0
    }

    #[must_use]
    pub fn checked_add(self, delta: TimeDelta) -> Option<Self> {
        self.0.checked_add_signed(delta).map(Self)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_serialization() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 8, 14, 30, 0).unwrap();
        let serialized = serde_json::to_string(&Timestamp(dt)).unwrap();

        assert_eq!(serialized, "\"2025-03-08T14:30:00Z\"");
    }

    #[test]
    fn test_timestamp_deserialization() {
        let deserialized: Timestamp = serde_json::from_str("\"2025-03-08T14:30:00Z\"").unwrap();

        let expected_dt = Utc.with_ymd_and_hms(2025, 3, 8, 14, 30, 0).unwrap();
        assert_eq!(deserialized.0, expected_dt);
    }

    #[test]
    fn elapsed_until_is_signed() {
        let earlier = Timestamp(Utc.with_ymd_and_hms(2025, 3, 8, 14, 30, 0).unwrap());
        let later = earlier.checked_add(TimeDelta::seconds(65)).unwrap();

        assert_eq!(earlier.elapsed_until(later), TimeDelta::seconds(65));
        assert_eq!(later.elapsed_until(earlier), TimeDelta::seconds(-65));
        assert_eq!(later.as_millis() - earlier.as_millis(), 65_000);
    }
}
