//! Migration Job settings

use serde::{Deserialize, Serialize};

/// Image bundling rsync and an ssh client
pub const DEFAULT_RSYNC_IMAGE: &str = "docker.io/instrumentisto/rsync-ssh:alpine";

/// Seconds a finished Job is kept before the TTL controller removes it
pub const DEFAULT_JOB_TTL_SECONDS: i32 = 600;

/// Pod retries allowed per Job; migrations run exactly once
pub const DEFAULT_BACKOFF_LIMIT: i32 = 0;

/// Settings applied to every migration Job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobConfig {
    /// Container image running the transfer
    pub image: String,
    /// `ttlSecondsAfterFinished` on the Job
    pub ttl_seconds_after_finished: i32,
    /// `backoffLimit` on the Job
    pub backoff_limit: i32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_RSYNC_IMAGE.to_string(),
            ttl_seconds_after_finished: DEFAULT_JOB_TTL_SECONDS,
            backoff_limit: DEFAULT_BACKOFF_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_fire_once_with_ten_minute_retention() {
        let config = JobConfig::default();
        assert_eq!(config.image, DEFAULT_RSYNC_IMAGE);
        assert_eq!(config.ttl_seconds_after_finished, 600);
        assert_eq!(config.backoff_limit, 0);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: JobConfig =
            serde_json::from_str(r#"{"image": "registry.local/rsync:3.3"}"#).unwrap();
        assert_eq!(config.image, "registry.local/rsync:3.3");
        assert_eq!(config.ttl_seconds_after_finished, DEFAULT_JOB_TTL_SECONDS);
        assert_eq!(config.backoff_limit, DEFAULT_BACKOFF_LIMIT);
    }

    #[test]
    fn fields_are_camel_case() {
        let json = serde_json::to_value(JobConfig::default()).unwrap();
        assert_eq!(json["ttlSecondsAfterFinished"], 600);
        assert_eq!(json["backoffLimit"], 0);
    }
}
