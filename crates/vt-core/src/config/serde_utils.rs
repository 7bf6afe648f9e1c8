//! Serde helpers for the config file

/// `Duration` written as seconds: `timeout = 30` or `timeout = 2.5`.
///
/// Whole durations serialize as integers, anything else as a float.
/// Negative values are rejected.
pub mod duration_secs {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Unexpected, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(SecondsVisitor)
    }

    struct SecondsVisitor;

    impl<'de> Visitor<'de> for SecondsVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative number of seconds")
        }

        fn visit_u64<E: de::Error>(self, secs: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(secs))
        }

        // TOML integers arrive signed
        fn visit_i64<E: de::Error>(self, secs: i64) -> Result<Duration, E> {
            u64::try_from(secs)
                .map(Duration::from_secs)
                .map_err(|_| E::invalid_value(Unexpected::Signed(secs), &self))
        }

        fn visit_f64<E: de::Error>(self, secs: f64) -> Result<Duration, E> {
            Duration::try_from_secs_f64(secs)
                .map_err(|_| E::invalid_value(Unexpected::Float(secs), &self))
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
        timeout: Duration,
    }

    fn parse(toml_text: &str) -> Result<Duration, toml::de::Error> {
        toml::from_str::<Timeouts>(toml_text).map(|t| t.timeout)
    }

    #[test]
    fn test_whole_seconds() {
        assert_eq!(parse("timeout = 90").unwrap(), Duration::from_secs(90));
        let json = serde_json::to_string(&Timeouts {
            timeout: Duration::from_secs(30),
        })
        .unwrap();
        assert_eq!(json, r#"{"timeout":30}"#);
    }

    #[test]
    fn test_fractional_seconds() {
        assert_eq!(parse("timeout = 2.5").unwrap(), Duration::from_millis(2500));
        let json = serde_json::to_string(&Timeouts {
            timeout: Duration::from_millis(1500),
        })
        .unwrap();
        assert_eq!(json, r#"{"timeout":1.5}"#);
    }

    #[test]
    fn test_negative_and_non_numeric_are_rejected() {
        assert!(parse("timeout = -1").is_err());
        assert!(parse("timeout = -0.5").is_err());
        assert!(parse("timeout = \"30s\"").is_err());
    }
}
