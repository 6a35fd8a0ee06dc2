//! Business calendar: how much of a time span counts toward an SLA.
//!
//! The daily business window is interpreted in the UTC offset of the span's
//! start instant. Days are walked one at a time; each counted day contributes
//! the overlap of its window with the span.

use blueprint_core::SlaDefinition;
use time::macros::time;
use time::{Date, Duration, OffsetDateTime, Time, UtcOffset, Weekday};

use crate::error::CalendarError;

pub const DEFAULT_BUSINESS_START: Time = time!(09:00);
pub const DEFAULT_BUSINESS_END: Time = time!(17:00);

/// Which parts of the clock count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountingRules {
    pub business_hours_only: bool,
    pub exclude_weekends: bool,
}

impl CountingRules {
    pub const WALL_CLOCK: CountingRules = CountingRules {
        business_hours_only: false,
        exclude_weekends: false,
    };

    fn is_wall_clock(&self) -> bool {
        !self.business_hours_only && !self.exclude_weekends
    }
}

impl From<&SlaDefinition> for CountingRules {
    fn from(sla: &SlaDefinition) -> Self {
        CountingRules {
            business_hours_only: sla.business_hours_only,
            exclude_weekends: sla.exclude_weekends,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessCalendar {
    business_start: Time,
    business_end: Time,
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        BusinessCalendar {
            business_start: DEFAULT_BUSINESS_START,
            business_end: DEFAULT_BUSINESS_END,
        }
    }
}

impl BusinessCalendar {
    /// A calendar with the daily window `start..end`. The window must not be empty.
    pub fn new(business_start: Time, business_end: Time) -> Result<Self, CalendarError> {
        if business_end <= business_start {
            return Err(CalendarError::EmptyWindow {
                start: business_start,
                end: business_end,
            });
        }
        Ok(BusinessCalendar {
            business_start,
            business_end,
        })
    }

    pub fn business_start(&self) -> Time {
        self.business_start
    }

    pub fn business_end(&self) -> Time {
        self.business_end
    }

    /// Parse an `HH:MM` time of day.
    pub fn parse_time_of_day(value: &str) -> Result<Time, CalendarError> {
        let invalid = || CalendarError::InvalidTimeOfDay {
            value: value.to_string(),
        };
        let (h, m) = value.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u8 = h.parse().map_err(|_| invalid())?;
        let minute: u8 = m.parse().map_err(|_| invalid())?;
        Time::from_hms(hour, minute, 0).map_err(|_| invalid())
    }

    fn counts_day(&self, date: Date, rules: CountingRules) -> bool {
        !(rules.exclude_weekends && matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday))
    }

    /// The counted interval of one day.
    fn window(
        &self,
        date: Date,
        offset: UtcOffset,
        rules: CountingRules,
    ) -> Result<(OffsetDateTime, OffsetDateTime), CalendarError> {
        if rules.business_hours_only {
            Ok((
                date.with_time(self.business_start).assume_offset(offset),
                date.with_time(self.business_end).assume_offset(offset),
            ))
        } else {
            let next = date.next_day().ok_or(CalendarError::OutOfRange)?;
            Ok((
                date.midnight().assume_offset(offset),
                next.midnight().assume_offset(offset),
            ))
        }
    }

    /// Counted time between `start` and `end`. Never negative;
    /// `end < start` is an error.
    pub fn elapsed(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        rules: CountingRules,
    ) -> Result<Duration, CalendarError> {
        if end < start {
            return Err(CalendarError::EndBeforeStart { start, end });
        }
        if rules.is_wall_clock() {
            return Ok(end - start);
        }

        let offset = start.offset();
        let end = end.to_offset(offset);
        let last = end.date();
        let mut date = start.date();
        let mut total = Duration::ZERO;
        loop {
            if self.counts_day(date, rules) {
                let (open, close) = self.window(date, offset, rules)?;
                let from = open.max(start);
                let to = close.min(end);
                if to > from {
                    total += to - from;
                }
            }
            if date >= last {
                break;
            }
            date = date.next_day().ok_or(CalendarError::OutOfRange)?;
        }
        Ok(total)
    }

    /// The instant at which `duration` of counted time has passed since
    /// `start`. The inverse of [`elapsed`](Self::elapsed).
    pub fn deadline(
        &self,
        start: OffsetDateTime,
        duration: Duration,
        rules: CountingRules,
    ) -> Result<OffsetDateTime, CalendarError> {
        if duration.is_negative() {
            return Err(CalendarError::NegativeDuration(duration));
        }
        if rules.is_wall_clock() {
            return start.checked_add(duration).ok_or(CalendarError::OutOfRange);
        }
        if duration.is_zero() {
            return Ok(start);
        }

        let offset = start.offset();
        let mut remaining = duration;
        let mut date = start.date();
        loop {
            if self.counts_day(date, rules) {
                let (open, close) = self.window(date, offset, rules)?;
                let from = open.max(start);
                if close > from {
                    let available = close - from;
                    if remaining <= available {
                        return Ok(from + remaining);
                    }
                    remaining -= available;
                }
            }
            date = date.next_day().ok_or(CalendarError::OutOfRange)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const BUSINESS: CountingRules = CountingRules {
        business_hours_only: true,
        exclude_weekends: false,
    };
    const WEEKDAYS: CountingRules = CountingRules {
        business_hours_only: false,
        exclude_weekends: true,
    };
    const BOTH: CountingRules = CountingRules {
        business_hours_only: true,
        exclude_weekends: true,
    };

    fn cal() -> BusinessCalendar {
        BusinessCalendar::default()
    }

    #[test]
    fn wall_clock_is_plain_subtraction() {
        let d = cal()
            .elapsed(
                datetime!(2025-01-03 12:00 UTC),
                datetime!(2025-01-06 12:00 UTC),
                CountingRules::WALL_CLOCK,
            )
            .unwrap();
        assert_eq!(d, Duration::hours(72));
    }

    #[test]
    fn zero_length_span() {
        let t = datetime!(2025-01-04 13:37 UTC);
        for rules in [CountingRules::WALL_CLOCK, BUSINESS, WEEKDAYS, BOTH] {
            assert_eq!(cal().elapsed(t, t, rules).unwrap(), Duration::ZERO);
        }
    }

    #[test]
    fn weekend_is_skipped() {
        // Friday noon to Monday noon.
        let d = cal()
            .elapsed(
                datetime!(2025-01-03 12:00 UTC),
                datetime!(2025-01-06 12:00 UTC),
                WEEKDAYS,
            )
            .unwrap();
        assert_eq!(d, Duration::hours(24));
    }

    #[test]
    fn partial_days_clipped_to_window() {
        let d = cal()
            .elapsed(
                datetime!(2025-01-06 08:00 UTC),
                datetime!(2025-01-06 18:00 UTC),
                BUSINESS,
            )
            .unwrap();
        assert_eq!(d, Duration::hours(8));

        let d = cal()
            .elapsed(
                datetime!(2025-01-06 16:00 UTC),
                datetime!(2025-01-07 10:00 UTC),
                BUSINESS,
            )
            .unwrap();
        assert_eq!(d, Duration::hours(2));
    }

    #[test]
    fn business_hours_over_a_weekend() {
        let d = cal()
            .elapsed(
                datetime!(2025-01-03 16:00 UTC),
                datetime!(2025-01-06 10:00 UTC),
                BOTH,
            )
            .unwrap();
        assert_eq!(d, Duration::hours(2));
    }

    #[test]
    fn end_before_start_rejected() {
        let err = cal()
            .elapsed(
                datetime!(2025-01-06 10:00 UTC),
                datetime!(2025-01-06 09:00 UTC),
                CountingRules::WALL_CLOCK,
            )
            .unwrap_err();
        assert!(matches!(err, CalendarError::EndBeforeStart { .. }));
    }

    #[test]
    fn deadline_rolls_over_the_weekend() {
        let due = cal()
            .deadline(datetime!(2025-01-03 15:00 UTC), Duration::hours(4), BOTH)
            .unwrap();
        assert_eq!(due, datetime!(2025-01-06 11:00 UTC));
    }

    #[test]
    fn deadline_outside_window_starts_at_next_open() {
        let due = cal()
            .deadline(datetime!(2025-01-06 20:00 UTC), Duration::hours(1), BUSINESS)
            .unwrap();
        assert_eq!(due, datetime!(2025-01-07 10:00 UTC));
    }

    #[test]
    fn deadline_is_inverse_of_elapsed() {
        let starts = [
            datetime!(2025-01-03 15:30 UTC),
            datetime!(2025-01-04 02:00 UTC),
            datetime!(2025-01-06 09:00 UTC),
        ];
        for start in starts {
            for rules in [CountingRules::WALL_CLOCK, BUSINESS, WEEKDAYS, BOTH] {
                for hours in [1, 8, 24, 40] {
                    let d = Duration::hours(hours);
                    let due = cal().deadline(start, d, rules).unwrap();
                    assert_eq!(cal().elapsed(start, due, rules).unwrap(), d);
                }
            }
        }
    }

    #[test]
    fn custom_window_and_offsets() {
        let cal = BusinessCalendar::new(time!(08:00), time!(12:00)).unwrap();
        let d = cal
            .elapsed(
                datetime!(2025-01-06 07:00 +02:00),
                datetime!(2025-01-06 13:00 +02:00),
                BUSINESS,
            )
            .unwrap();
        assert_eq!(d, Duration::hours(4));
    }

    #[test]
    fn empty_window_rejected() {
        assert!(matches!(
            BusinessCalendar::new(time!(17:00), time!(09:00)),
            Err(CalendarError::EmptyWindow { .. })
        ));
    }

    #[test]
    fn parses_time_of_day() {
        assert_eq!(
            BusinessCalendar::parse_time_of_day("9:30").unwrap(),
            time!(09:30)
        );
        assert!(BusinessCalendar::parse_time_of_day("25:00").is_err());
        assert!(BusinessCalendar::parse_time_of_day("nine").is_err());
    }
}
