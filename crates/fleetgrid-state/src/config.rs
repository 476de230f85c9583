//! Environment-sourced settings.
//!
//! Parsed once at startup into an immutable `Settings` value that is
//! passed by reference into every component constructor. There is no
//! ambient global configuration state.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;

use crate::error::{ScalingError, ScalingResult};

/// Which demand source drives the pool. Chosen at startup, mutually
/// exclusive, never switched at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingMode {
    /// Docker Swarm services waiting for placement.
    Dynamic,
    /// Queued/processing Dask tasks.
    Computational,
}

/// Immutable service configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Control loop tick period.
    pub poll_interval: Duration,
    pub mode: ScalingMode,
    /// Effective idle grace period, already clamped per
    /// [`termination_grace_period`].
    pub time_before_termination: Duration,
    /// Images pre-pulled by the machine startup script. Every entry has
    /// passed the image-name grammar.
    pub pre_pull_images: Vec<String>,
    /// Instance-type catalog filter, in preference order.
    pub allowed_instance_types: Vec<String>,
    /// Hard cap on the machine pool size.
    pub max_instances: u32,
    /// Warm reserve of drained machines kept around for fast starts.
    pub machines_buffer: u32,
    /// How long a machine may boot before it counts as broken.
    pub max_start_time: Duration,
    pub ami_id: String,
    pub key_name: String,
    pub security_group_ids: Vec<String>,
    pub subnet_id: String,
    pub iam_instance_profile: String,
    /// Extra tags stamped on every launched machine.
    pub custom_tags: HashMap<String, String>,
    /// Default CPU claim for Dask tasks that do not declare one.
    pub dask_default_max_cpu: f64,
    /// Default RAM claim for Dask tasks that do not declare one.
    pub dask_default_max_ram: u64,
}

impl Settings {
    /// Load settings from the process environment. Fatal on any
    /// invalid entry.
    pub fn from_env() -> ScalingResult<Self> {
        Self::from_env_map(&std::env::vars().collect())
    }

    /// Load settings from an explicit key/value map.
    pub fn from_env_map(env: &HashMap<String, String>) -> ScalingResult<Self> {
        let get = |key: &str| env.get(key).map(String::as_str);

        let mode = match get("AUTOSCALING_MODE").unwrap_or("dynamic") {
            "dynamic" => ScalingMode::Dynamic,
            "computational" => ScalingMode::Computational,
            other => {
                return Err(ScalingError::InvalidSetting {
                    name: "AUTOSCALING_MODE".to_string(),
                    reason: format!("expected \"dynamic\" or \"computational\", got {other:?}"),
                })
            }
        };

        let poll_interval = parse_duration_setting(
            "AUTOSCALING_POLL_INTERVAL",
            get("AUTOSCALING_POLL_INTERVAL").unwrap_or("10"),
        )?;
        if poll_interval.is_zero() {
            return Err(ScalingError::InvalidSetting {
                name: "AUTOSCALING_POLL_INTERVAL".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let time_before_termination = termination_grace_period(parse_signed_duration(
            "EC2_INSTANCES_TIME_BEFORE_TERMINATION",
            get("EC2_INSTANCES_TIME_BEFORE_TERMINATION").unwrap_or("0:03:00"),
        )?);

        let pre_pull_images = split_list(get("EC2_INSTANCES_PRE_PULL_IMAGES").unwrap_or(""));
        let image_grammar = image_name_grammar();
        for image in &pre_pull_images {
            if !image_grammar.is_match(image) {
                return Err(ScalingError::InvalidImageName(image.clone()));
            }
        }

        let allowed_instance_types =
            split_list(get("EC2_INSTANCES_ALLOWED_TYPES").unwrap_or(""));
        if allowed_instance_types.is_empty() {
            return Err(ScalingError::Configuration(
                "EC2_INSTANCES_ALLOWED_TYPES cannot be empty, the pool cannot be sized"
                    .to_string(),
            ));
        }

        let custom_tags = match get("EC2_INSTANCES_CUSTOM_TAGS") {
            None | Some("") => HashMap::new(),
            Some(raw) => {
                serde_json::from_str(raw).map_err(|e| ScalingError::InvalidSetting {
                    name: "EC2_INSTANCES_CUSTOM_TAGS".to_string(),
                    reason: format!("not a JSON string map: {e}"),
                })?
            }
        };

        Ok(Self {
            poll_interval,
            mode,
            time_before_termination,
            pre_pull_images,
            allowed_instance_types,
            max_instances: parse_number(
                "EC2_INSTANCES_MAX_INSTANCES",
                get("EC2_INSTANCES_MAX_INSTANCES").unwrap_or("10"),
            )?,
            machines_buffer: parse_number(
                "EC2_INSTANCES_MACHINES_BUFFER",
                get("EC2_INSTANCES_MACHINES_BUFFER").unwrap_or("0"),
            )?,
            max_start_time: parse_duration_setting(
                "EC2_INSTANCES_MAX_START_TIME",
                get("EC2_INSTANCES_MAX_START_TIME").unwrap_or("0:03:00"),
            )?,
            ami_id: get("EC2_INSTANCES_AMI_ID").unwrap_or("").to_string(),
            key_name: get("EC2_INSTANCES_KEY_NAME").unwrap_or("").to_string(),
            security_group_ids: split_list(
                get("EC2_INSTANCES_SECURITY_GROUP_IDS").unwrap_or(""),
            ),
            subnet_id: get("EC2_INSTANCES_SUBNET_ID").unwrap_or("").to_string(),
            iam_instance_profile: get("EC2_INSTANCES_IAM_INSTANCE_PROFILE")
                .unwrap_or("")
                .to_string(),
            custom_tags,
            dask_default_max_cpu: parse_number(
                "DASK_DEFAULT_MAX_CPU",
                get("DASK_DEFAULT_MAX_CPU").unwrap_or("4"),
            )?,
            dask_default_max_ram: parse_number(
                "DASK_DEFAULT_MAX_RAM",
                get("DASK_DEFAULT_MAX_RAM").unwrap_or("2147483648"),
            )?,
        })
    }
}

/// Clamp a configured idle duration to the effective grace period:
/// truncated to whole minutes and capped one minute under the billing
/// hour. Negative inputs clamp to zero (immediate eligibility).
pub fn termination_grace_period(configured: SignedDuration) -> Duration {
    const MAX_MINUTES: i64 = 59;
    let minutes = (configured.as_secs() / 60).clamp(0, MAX_MINUTES);
    Duration::from_secs(minutes as u64 * 60)
}

/// A duration that may be negative, as produced by the `H:MM:SS`
/// parser. Only the grace-period clamp consumes negative values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedDuration(i64);

impl SignedDuration {
    pub fn as_secs(&self) -> i64 {
        self.0
    }
}

/// Parse a non-negative duration setting: plain seconds (`"30"`) or
/// `H:MM:SS` (`"0:03:00"`).
pub fn parse_duration_setting(name: &str, value: &str) -> ScalingResult<Duration> {
    let signed = parse_signed_duration(name, value)?;
    u64::try_from(signed.as_secs())
        .map(Duration::from_secs)
        .map_err(|_| ScalingError::InvalidSetting {
            name: name.to_string(),
            reason: format!("duration {value:?} must not be negative"),
        })
}

/// Parse a possibly-negative duration: plain seconds or `H:MM:SS`,
/// with an optional leading `-`.
pub fn parse_signed_duration(name: &str, value: &str) -> ScalingResult<SignedDuration> {
    let invalid = |reason: &str| ScalingError::InvalidSetting {
        name: name.to_string(),
        reason: format!("{reason}: {value:?}"),
    };

    let trimmed = value.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let parts: Vec<&str> = body.split(':').collect();
    let total_secs: i64 = match parts.as_slice() {
        [secs] => secs
            .parse::<i64>()
            .map_err(|_| invalid("expected seconds or H:MM:SS"))?,
        [hours, minutes, seconds] => {
            let h: i64 = hours.parse().map_err(|_| invalid("bad hours field"))?;
            let m: i64 = minutes.parse().map_err(|_| invalid("bad minutes field"))?;
            let s: i64 = seconds.parse().map_err(|_| invalid("bad seconds field"))?;
            if !(0..60).contains(&m) || !(0..60).contains(&s) {
                return Err(invalid("minutes and seconds must be in 0..60"));
            }
            h * 3600 + m * 60 + s
        }
        _ => return Err(invalid("expected seconds or H:MM:SS")),
    };

    Ok(SignedDuration(if negative { -total_secs } else { total_secs }))
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> ScalingResult<T> {
    value.trim().parse().map_err(|_| ScalingError::InvalidSetting {
        name: name.to_string(),
        reason: format!("not a number: {value:?}"),
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `repo[:tag]` with optional registry prefix, per the docker image
/// reference grammar (path components of lowercase alphanumerics with
/// single `.`/`_`/`-` separators).
fn image_name_grammar() -> Regex {
    Regex::new(
        r"^(?:[a-z0-9]+(?:(?:\.|_{1,2}|-+)[a-z0-9]+)*(?::[0-9]+)?/)?[a-z0-9]+(?:(?:\.|_{1,2}|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:\.|_{1,2}|-+)[a-z0-9]+)*)*(?::[A-Za-z0-9_][A-Za-z0-9._-]{0,127})?$",
    )
    .unwrap_or_else(|_| unreachable!("image grammar is a fixed literal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env() -> HashMap<String, String> {
        [
            ("EC2_INSTANCES_ALLOWED_TYPES", "t2.micro,m5.large"),
            ("EC2_INSTANCES_AMI_ID", "ami-0123456789abcdef0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn defaults_load_from_minimal_env() {
        let settings = Settings::from_env_map(&base_env()).unwrap();
        assert_eq!(settings.mode, ScalingMode::Dynamic);
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.max_instances, 10);
        assert_eq!(
            settings.allowed_instance_types,
            vec!["t2.micro", "m5.large"]
        );
    }

    #[test]
    fn empty_catalog_is_fatal() {
        let mut env = base_env();
        env.remove("EC2_INSTANCES_ALLOWED_TYPES");
        let err = Settings::from_env_map(&env).unwrap_err();
        assert!(matches!(err, ScalingError::Configuration(_)));
    }

    #[test]
    fn grace_period_parses_one_hour_five_minutes_to_59() {
        let d = parse_signed_duration("T", "1:05:00").unwrap();
        assert_eq!(termination_grace_period(d), Duration::from_secs(59 * 60));
    }

    #[test]
    fn grace_period_parses_negative_to_zero() {
        let d = parse_signed_duration("T", "-1:05:00").unwrap();
        assert_eq!(termination_grace_period(d), Duration::ZERO);
    }

    #[test]
    fn grace_period_keeps_sub_hour_values() {
        let d = parse_signed_duration("T", "0:30:00").unwrap();
        assert_eq!(termination_grace_period(d), Duration::from_secs(30 * 60));
        let d = parse_signed_duration("T", "0:02:30").unwrap();
        // truncated to whole minutes
        assert_eq!(termination_grace_period(d), Duration::from_secs(2 * 60));
    }

    #[test]
    fn durations_accept_plain_seconds() {
        assert_eq!(
            parse_duration_setting("T", "90").unwrap(),
            Duration::from_secs(90)
        );
        assert_eq!(
            parse_duration_setting("T", "0:01:30").unwrap(),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn negative_plain_duration_is_rejected_outside_grace() {
        assert!(parse_duration_setting("T", "-30").is_err());
    }

    #[test]
    fn malformed_durations_are_invalid_settings() {
        assert!(matches!(
            parse_duration_setting("T", "1:99:00"),
            Err(ScalingError::InvalidSetting { .. })
        ));
        assert!(parse_duration_setting("T", "1:05").is_err());
        assert!(parse_duration_setting("T", "soon").is_err());
    }

    #[test]
    fn valid_pre_pull_images_pass() {
        let mut env = base_env();
        env.insert(
            "EC2_INSTANCES_PRE_PULL_IMAGES".to_string(),
            "nginx, registry.example.com:5000/team/app:v1.2.3, library/redis:7".to_string(),
        );
        let settings = Settings::from_env_map(&env).unwrap();
        assert_eq!(settings.pre_pull_images.len(), 3);
    }

    #[test]
    fn invalid_pre_pull_image_fails_startup() {
        for bad in ["UPPER/case", "has space:tag", "trailing/:tag", "a//b"] {
            let mut env = base_env();
            env.insert("EC2_INSTANCES_PRE_PULL_IMAGES".to_string(), bad.to_string());
            let err = Settings::from_env_map(&env).unwrap_err();
            assert!(
                matches!(err, ScalingError::InvalidImageName(_)),
                "expected InvalidImageName for {bad:?}, got {err}"
            );
        }
    }

    #[test]
    fn custom_tags_parse_from_json() {
        let mut env = base_env();
        env.insert(
            "EC2_INSTANCES_CUSTOM_TAGS".to_string(),
            r#"{"team": "platform", "env": "prod"}"#.to_string(),
        );
        let settings = Settings::from_env_map(&env).unwrap();
        assert_eq!(settings.custom_tags["team"], "platform");
        assert_eq!(settings.custom_tags["env"], "prod");
    }

    #[test]
    fn bad_mode_is_rejected() {
        let mut env = base_env();
        env.insert("AUTOSCALING_MODE".to_string(), "hybrid".to_string());
        assert!(matches!(
            Settings::from_env_map(&env),
            Err(ScalingError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn computational_mode_selects() {
        let mut env = base_env();
        env.insert("AUTOSCALING_MODE".to_string(), "computational".to_string());
        let settings = Settings::from_env_map(&env).unwrap();
        assert_eq!(settings.mode, ScalingMode::Computational);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut env = base_env();
        env.insert("AUTOSCALING_POLL_INTERVAL".to_string(), "0".to_string());
        assert!(Settings::from_env_map(&env).is_err());
    }
}
