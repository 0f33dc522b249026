//! Schedule triggers for scheduled mode
//!
//! Only three cron shapes are understood:
//!
//! | expression      | meaning                          |
//! |-----------------|----------------------------------|
//! | `M */N * * *`   | every N hours from start         |
//! | `M H * * *`     | every day at H:M local time      |
//! | `M * * * *`     | every hour at minute M           |
//!
//! Anything else is rejected as a configuration error.

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Timelike};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Parsed schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// Every `hours` hours, counted from the previous run (or start)
    EveryHours { hours: u32 },
    /// Once a day at the given local time
    Daily { hour: u32, minute: u32 },
    /// Once an hour at the given minute
    Hourly { minute: u32 },
}

impl ScheduleSpec {
    /// Next run strictly after `now`
    ///
    /// `last_run` is the previous run, used by interval schedules; `None`
    /// means the scheduler has just started.
    pub fn next_run(&self, now: DateTime<Local>, last_run: Option<DateTime<Local>>) -> DateTime<Local> {
        match *self {
            Self::EveryHours { hours } => {
                let step = Duration::hours(i64::from(hours));
                let mut next = last_run.unwrap_or(now) + step;
                while next <= now {
                    next += step;
                }
                next
            }
            Self::Daily { hour, minute } => {
                let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
                let mut day = now.date_naive();
                loop {
                    // Skips local times that do not exist (DST gaps)
                    if let Some(candidate) = Local.from_local_datetime(&day.and_time(time)).earliest() {
                        if candidate > now {
                            return candidate;
                        }
                    }
                    day = day.succ_opt().unwrap_or(day);
                }
            }
            Self::Hourly { minute } => {
                let base = now
                    .with_minute(minute)
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(now);
                if base > now {
                    base
                } else {
                    base + Duration::hours(1)
                }
            }
        }
    }

    /// Time to wait from `now` until the next run
    pub fn duration_until_next(&self, now: DateTime<Local>, last_run: Option<DateTime<Local>>) -> std::time::Duration {
        self.next_run(now, last_run)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or_default()
    }
}

impl FromStr for ScheduleSpec {
    type Err = Error;

    fn from_str(expression: &str) -> Result<Self> {
        let invalid = |why: &str| Error::config(format!("unsupported cron expression `{expression}`: {why}"));

        let parts: Vec<&str> = expression.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = parts.as_slice() else {
            return Err(invalid("expected 5 fields"));
        };
        if [day, month, weekday].iter().any(|f| **f != "*") {
            return Err(invalid("day, month and weekday must be `*`"));
        }

        let number = |field: &str, max: u32| -> Option<u32> {
            if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            field.parse().ok().filter(|n| *n <= max)
        };

        if let Some(interval) = hour.strip_prefix("*/") {
            return match number(interval, 24) {
                Some(hours) if hours > 0 => Ok(Self::EveryHours { hours }),
                _ => Err(invalid("hour interval must be 1-24")),
            };
        }

        match (number(*minute, 59), *hour) {
            (Some(minute), "*") => Ok(Self::Hourly { minute }),
            (Some(minute), hour) => match number(hour, 23) {
                Some(hour) => Ok(Self::Daily { hour, minute }),
                None => Err(invalid("hour must be 0-23, `*` or `*/N`")),
            },
            (None, _) => Err(invalid("minute must be 0-59")),
        }
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EveryHours { hours } => write!(f, "every {hours} hour(s)"),
            Self::Daily { hour, minute } => write!(f, "daily at {hour:02}:{minute:02}"),
            Self::Hourly { minute } => write!(f, "hourly at :{minute:02}"),
        }
    }
}
