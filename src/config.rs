use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Behaviour shared by every query runner a driver creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Schema assumed for paths without one; omitted from SQL when it is `public`
    pub default_schema: Option<String>,
    /// Issue a best-effort `ROLLBACK` when a runner is released mid-transaction
    pub rollback_on_release: bool,
    /// Time the client gets to finish in-flight work on shutdown
    #[serde(with = "duration_secs")]
    pub shutdown_drain_timeout: Duration,
    /// Statements slower than this are logged as warnings
    #[serde(with = "option_duration_millis")]
    pub max_query_execution_time: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_schema: None,
            rollback_on_release: false,
            shutdown_drain_timeout: Duration::from_secs(10),
            max_query_execution_time: None,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn with_rollback_on_release(mut self, enabled: bool) -> Self {
        self.rollback_on_release = enabled;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod option_duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|millis| millis.map(Duration::from_millis))
    }
}
