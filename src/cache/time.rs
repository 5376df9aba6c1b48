//! Cache-time policies.
//!
//! A [`CachePolicy`] is evaluated against "now" to produce a [`CacheTime`]: the
//! absolute server-side expiration plus the max-age values advertised to clients.
//! Evaluation is pure; all validation happens when the policy is constructed.

use serde::Deserialize;
use thiserror::Error;
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// Expiration data computed for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTime {
    /// Instant at which the stored entry stops being served.
    pub absolute_expiration: OffsetDateTime,
    /// `max-age` for clients. Negative when an absolute policy lies in the past.
    pub client_max_age: Duration,
    /// `s-maxage` for shared caches.
    pub shared_max_age: Option<Duration>,
}

impl CacheTime {
    /// True when an entry created at `now` would already be stale.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.absolute_expiration <= now
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid cache policy component: {0}")]
    Component(#[from] time::error::ComponentRange),
    #[error("day {day} is out of range for a monthly policy (expected 1..=31)")]
    DayOfMonth { day: u8 },
}

/// Declarative rule deciding how long a response may be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawPolicy")]
pub enum CachePolicy {
    FixedDuration {
        server_seconds: u32,
        client_seconds: u32,
        shared_seconds: Option<u32>,
    },
    AbsoluteDateTime {
        expires_at: OffsetDateTime,
    },
    RecurringDaily {
        at: Time,
    },
    RecurringMonthly {
        day: u8,
        at: Time,
    },
    RecurringYearly {
        month: Month,
        day: u8,
        at: Time,
    },
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::fixed(0, 0)
    }
}

impl CachePolicy {
    /// Fixed server/client lifetimes. Negative values clamp to zero.
    pub fn fixed(server_seconds: i64, client_seconds: i64) -> Self {
        Self::FixedDuration {
            server_seconds: clamp_seconds(server_seconds),
            client_seconds: clamp_seconds(client_seconds),
            shared_seconds: None,
        }
    }

    /// Fixed lifetimes with an explicit `s-maxage`.
    pub fn fixed_shared(server_seconds: i64, client_seconds: i64, shared_seconds: i64) -> Self {
        Self::FixedDuration {
            server_seconds: clamp_seconds(server_seconds),
            client_seconds: clamp_seconds(client_seconds),
            shared_seconds: Some(clamp_seconds(shared_seconds)),
        }
    }

    /// Expire at one specific UTC instant.
    pub fn absolute(
        year: i32,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<Self, PolicyError> {
        let date = Date::from_calendar_date(year, Month::try_from(month)?, day)?;
        let at = Time::from_hms(hour, minute, second)?;
        Ok(Self::AbsoluteDateTime {
            expires_at: PrimitiveDateTime::new(date, at).assume_utc(),
        })
    }

    /// Expire every day at the given time.
    pub fn daily(hour: u8, minute: u8, second: u8) -> Result<Self, PolicyError> {
        Ok(Self::RecurringDaily {
            at: Time::from_hms(hour, minute, second)?,
        })
    }

    /// Expire every month on the given day. Days past the end of a short month
    /// fall on that month's last day.
    pub fn monthly(day: u8, hour: u8, minute: u8, second: u8) -> Result<Self, PolicyError> {
        if !(1..=31).contains(&day) {
            return Err(PolicyError::DayOfMonth { day });
        }
        Ok(Self::RecurringMonthly {
            day,
            at: Time::from_hms(hour, minute, second)?,
        })
    }

    /// Expire every year on the given month and day.
    pub fn yearly(
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<Self, PolicyError> {
        let month = Month::try_from(month)?;
        // 2000 is a leap year, so 29 February is accepted here.
        Date::from_calendar_date(2000, month, day)?;
        Ok(Self::RecurringYearly {
            month,
            day,
            at: Time::from_hms(hour, minute, second)?,
        })
    }

    pub fn evaluate(&self, now: OffsetDateTime) -> CacheTime {
        match *self {
            Self::FixedDuration {
                server_seconds,
                client_seconds,
                shared_seconds,
            } => CacheTime {
                absolute_expiration: now + Duration::seconds(i64::from(server_seconds)),
                client_max_age: Duration::seconds(i64::from(client_seconds)),
                shared_max_age: shared_seconds.map(|seconds| Duration::seconds(i64::from(seconds))),
            },
            Self::AbsoluteDateTime { expires_at } => until(expires_at, now),
            Self::RecurringDaily { at } => {
                let candidate = now.replace_time(at);
                if candidate <= now {
                    until(candidate + Duration::DAY, now)
                } else {
                    until(candidate, now)
                }
            }
            Self::RecurringMonthly { day, at } => {
                let offset = now.offset();
                let candidate = occurrence(now.year(), now.month(), day, at, offset);
                match candidate {
                    Some(candidate) if candidate > now => until(candidate, now),
                    _ => {
                        let (year, month) = match now.month() {
                            Month::December => (now.year() + 1, Month::January),
                            month => (now.year(), month.next()),
                        };
                        until(
                            occurrence(year, month, day, at, offset).unwrap_or(now),
                            now,
                        )
                    }
                }
            }
            Self::RecurringYearly { month, day, at } => {
                let offset = now.offset();
                match occurrence(now.year(), month, day, at, offset) {
                    Some(candidate) if candidate > now => until(candidate, now),
                    _ => until(
                        occurrence(now.year() + 1, month, day, at, offset).unwrap_or(now),
                        now,
                    ),
                }
            }
        }
    }
}

fn clamp_seconds(seconds: i64) -> u32 {
    u32::try_from(seconds.max(0)).unwrap_or(u32::MAX)
}

fn until(expiration: OffsetDateTime, now: OffsetDateTime) -> CacheTime {
    CacheTime {
        absolute_expiration: expiration,
        client_max_age: expiration - now,
        shared_max_age: None,
    }
}

fn days_in_month(year: i32, month: Month) -> u8 {
    match month {
        Month::February if time::util::is_leap_year(year) => 29,
        Month::February => 28,
        Month::April | Month::June | Month::September | Month::November => 30,
        _ => 31,
    }
}

fn occurrence(
    year: i32,
    month: Month,
    day: u8,
    at: Time,
    offset: UtcOffset,
) -> Option<OffsetDateTime> {
    let day = day.min(days_in_month(year, month));
    let date = Date::from_calendar_date(year, month, day).ok()?;
    Some(PrimitiveDateTime::new(date, at).assume_offset(offset))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawPolicy {
    FixedDuration {
        #[serde(default)]
        server_seconds: i64,
        #[serde(default)]
        client_seconds: i64,
        #[serde(default)]
        shared_seconds: Option<i64>,
    },
    AbsoluteDateTime {
        year: i32,
        month: u8,
        day: u8,
        #[serde(default)]
        hour: u8,
        #[serde(default)]
        minute: u8,
        #[serde(default)]
        second: u8,
    },
    RecurringDaily {
        #[serde(default)]
        hour: u8,
        #[serde(default)]
        minute: u8,
        #[serde(default)]
        second: u8,
    },
    RecurringMonthly {
        day: u8,
        #[serde(default)]
        hour: u8,
        #[serde(default)]
        minute: u8,
        #[serde(default)]
        second: u8,
    },
    RecurringYearly {
        month: u8,
        day: u8,
        #[serde(default)]
        hour: u8,
        #[serde(default)]
        minute: u8,
        #[serde(default)]
        second: u8,
    },
}

impl TryFrom<RawPolicy> for CachePolicy {
    type Error = PolicyError;

    fn try_from(raw: RawPolicy) -> Result<Self, Self::Error> {
        match raw {
            RawPolicy::FixedDuration {
                server_seconds,
                client_seconds,
                shared_seconds,
            } => Ok(match shared_seconds {
                Some(shared) => Self::fixed_shared(server_seconds, client_seconds, shared),
                None => Self::fixed(server_seconds, client_seconds),
            }),
            RawPolicy::AbsoluteDateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
            } => Self::absolute(year, month, day, hour, minute, second),
            RawPolicy::RecurringDaily {
                hour,
                minute,
                second,
            } => Self::daily(hour, minute, second),
            RawPolicy::RecurringMonthly {
                day,
                hour,
                minute,
                second,
            } => Self::monthly(day, hour, minute, second),
            RawPolicy::RecurringYearly {
                month,
                day,
                hour,
                minute,
                second,
            } => Self::yearly(month, day, hour, minute, second),
        }
    }
}
