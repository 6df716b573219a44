//! Serde helpers for configuration values

/// `Duration` as a number of seconds.
///
/// Whole durations are written as integers (`heartbeat_interval = 1800`),
/// anything with a fractional part as a float (`heartbeat_interval = 0.25`).
/// Both forms are accepted on read; negative and non-finite values are not.
pub mod duration_secs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Whole(u64),
        Fractional(f64),
    }

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Seconds::deserialize(deserializer)? {
            Seconds::Whole(secs) => Ok(Duration::from_secs(secs)),
            Seconds::Fractional(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|e| D::Error::custom(format!("invalid duration {}: {}", secs, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "duration_secs")]
        probe: Duration,
    }

    #[test]
    fn test_whole_seconds_are_integers() {
        let text = toml::to_string(&Timeouts {
            probe: Duration::from_secs(30),
        })
        .unwrap();
        assert_eq!(text.trim(), "probe = 30");

        let parsed: Timeouts = toml::from_str("probe = 60").unwrap();
        assert_eq!(parsed.probe, Duration::from_secs(60));
    }

    #[test]
    fn test_fractional_seconds_are_kept() {
        let text = toml::to_string(&Timeouts {
            probe: Duration::from_millis(1500),
        })
        .unwrap();
        assert_eq!(text.trim(), "probe = 1.5");

        let parsed: Timeouts = toml::from_str("probe = 0.25").unwrap();
        assert_eq!(parsed.probe, Duration::from_millis(250));
    }

    #[test]
    fn test_negative_is_rejected() {
        assert!(toml::from_str::<Timeouts>("probe = -1").is_err());
        assert!(toml::from_str::<Timeouts>("probe = -0.5").is_err());
    }
}
