//! Serde adapters for durations in configuration files
//!
//! Backoff and breaker timings are written as integer milliseconds, which is
//! how operators usually express them in JSON/TOML.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// `Duration` as a `u64` number of milliseconds
///
/// ```rust
/// use std::time::Duration;
///
/// use serde::{Deserialize, Serialize};
/// use steadfast_pipeline::duration_millis;
///
/// #[derive(Serialize, Deserialize)]
/// struct Backoff {
///     #[serde(with = "duration_millis")]
///     min: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::*;

    type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

    /// Durations beyond `u64::MAX` milliseconds saturate
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Timings {
        #[serde(with = "duration_millis")]
        min_backoff: Duration,
        #[serde(with = "duration_millis")]
        max_backoff: Duration,
    }

    #[test]
    fn test_serializes_as_millis() {
        let timings = Timings {
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        };
        let json = serde_json::to_string(&timings).expect("serialize");
        assert_eq!(json, r#"{"min_backoff":100,"max_backoff":5000}"#);
    }

    #[test]
    fn test_sub_millisecond_precision_is_dropped() {
        let timings =
            Timings { min_backoff: Duration::from_micros(1_500), max_backoff: Duration::MAX };
        let json = serde_json::to_string(&timings).expect("serialize");
        let back: Timings = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.min_backoff, Duration::from_millis(1));
        assert_eq!(back.max_backoff, Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_rejects_non_numeric() {
        let result: Result<Timings, _> =
            serde_json::from_str(r#"{"min_backoff":"100ms","max_backoff":1}"#);
        assert!(result.is_err());
    }
}
