use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use std::time::Duration;

/// A duration given on the command line, in the environment or in the config file.
///
/// Defaults to seconds if no unit specified, otherwise uses humantime parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationArg(pub Duration);

impl DurationArg {
    pub const fn from_secs(secs: u64) -> Self {
        DurationArg(Duration::from_secs(secs))
    }
}

impl FromStr for DurationArg {
    type Err = humantime::DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(secs) = s.trim().parse::<u64>() {
            return Ok(DurationArg(Duration::from_secs(secs)));
        }
        humantime::parse_duration(s.trim()).map(DurationArg)
    }
}

impl std::fmt::Display for DurationArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

impl From<DurationArg> for Duration {
    fn from(val: DurationArg) -> Self {
        val.0
    }
}

impl<'de> Deserialize<'de> for DurationArg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Secs(u64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Secs(secs) => Ok(DurationArg::from_secs(secs)),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
