//! When the daemon sweeps: a fixed interval or a cron expression.
//!
//! Cron expressions take five fields (minute precision) or six with a
//! leading seconds field. The `@hourly` style descriptors and
//! `@every <duration>` are accepted as well.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone};

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub enum SweepSchedule {
    /// Sweep at startup and then every period.
    Every(Duration),
    /// Sweep whenever the expression next matches.
    Cron {
        expression: String,
        schedule: Box<cron::Schedule>,
    },
}

impl SweepSchedule {
    pub fn every(period: Duration) -> Result<Self, ConfigError> {
        if period.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(Self::Every(period))
    }

    pub fn parse(expression: &str) -> Result<Self, ConfigError> {
        let expression = expression.trim();
        if let Some(period) = expression.strip_prefix("@every") {
            let period = humantime::parse_duration(period.trim()).map_err(|err| {
                ConfigError::InvalidSchedule {
                    expression: expression.to_string(),
                    reason: err.to_string(),
                }
            })?;
            return Self::every(period);
        }

        let normalized = match expression {
            "@midnight" => "@daily".to_string(),
            "@annually" => "@yearly".to_string(),
            expr if expr.split_whitespace().count() == 5 => format!("0 {expr}"),
            expr => expr.to_string(),
        };
        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|err| ConfigError::InvalidSchedule {
                expression: expression.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self::Cron {
            expression: expression.to_string(),
            schedule: Box::new(schedule),
        })
    }

    /// Whether a sweep runs as soon as the scheduler starts.
    pub fn runs_at_start(&self) -> bool {
        matches!(self, Self::Every(_))
    }

    /// First fire time strictly after `after`, or `None` when the
    /// expression never matches again.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Self::Every(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                after.clone().checked_add_signed(period)
            }
            Self::Cron { schedule, .. } => schedule.after(after).next(),
        }
    }
}

impl fmt::Display for SweepSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(period) => write!(f, "@every {}", humantime::format_duration(*period)),
            Self::Cron { expression, .. } => f.write_str(expression),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rstest::rstest;

    use super::*;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[rstest]
    #[case("*/15 * * * *", "2024-05-01T10:07:30Z", "2024-05-01T10:15:00Z")]
    #[case("30 */5 * * * *", "2024-05-01T10:07:30Z", "2024-05-01T10:10:30Z")]
    #[case("@hourly", "2024-05-01T10:07:30Z", "2024-05-01T11:00:00Z")]
    #[case("@midnight", "2024-05-01T10:07:30Z", "2024-05-02T00:00:00Z")]
    #[case("@every 1h30m", "2024-05-01T10:00:00Z", "2024-05-01T11:30:00Z")]
    fn next_fire_time(#[case] expression: &str, #[case] now: &str, #[case] next: &str) {
        let schedule = SweepSchedule::parse(expression).unwrap();
        assert_eq!(schedule.next_after(&at(now)), Some(at(next)));
    }

    #[test]
    fn cron_waits_for_first_match_but_interval_does_not() {
        assert!(!SweepSchedule::parse("0 4 * * *").unwrap().runs_at_start());
        assert!(SweepSchedule::parse("@every 10m").unwrap().runs_at_start());
    }

    #[rstest]
    #[case("* * *")]
    #[case("61 * * * *")]
    #[case("@every soon")]
    #[case("@fortnightly")]
    fn invalid_expressions_are_rejected(#[case] expression: &str) {
        match SweepSchedule::parse(expression) {
            Err(ConfigError::InvalidSchedule { expression: got, .. }) => {
                assert_eq!(got, expression)
            }
            other => panic!("{expression}: unexpected {other:?}"),
        }
    }

    #[test]
    fn zero_every_is_rejected() {
        assert!(matches!(
            SweepSchedule::parse("@every 0s"),
            Err(ConfigError::ZeroInterval)
        ));
    }

    #[test]
    fn displays_its_source() {
        assert_eq!(SweepSchedule::parse(" 0 4 * * * ").unwrap().to_string(), "0 4 * * *");
        assert_eq!(
            SweepSchedule::every(Duration::from_secs(300)).unwrap().to_string(),
            "@every 5m"
        );
    }
}
