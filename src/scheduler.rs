//! Cron-driven full resync schedule.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone)]
pub struct FullSyncSchedule {
    schedule: Schedule,
    timezone: Tz,
}

impl FullSyncSchedule {
    /// Accepts classic 5-field expressions (a zero seconds field is added)
    /// as well as 6/7-field ones.
    pub fn parse(expression: &str, timezone: &str) -> IngestResult<Self> {
        let fields = expression.split_whitespace().count();
        let normalized = if fields == 5 {
            format!("0 {}", expression.trim())
        } else {
            expression.trim().to_string()
        };

        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| IngestError::config("cron", format!("`{expression}`: {e}")))?;
        let timezone = timezone
            .parse::<Tz>()
            .map_err(|_| IngestError::config("timezone", format!("unknown timezone `{timezone}`")))?;

        Ok(Self { schedule, timezone })
    }

    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&now.with_timezone(&self.timezone))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Time left until the next run; `None` if the schedule never fires again.
    pub fn duration_until_next(&self, now: DateTime<Utc>) -> Option<Duration> {
        let next = self.next_after(now)?;
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_field_expression() {
        let schedule = FullSyncSchedule::parse("30 2 * * *", "UTC").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(now),
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 2, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_timezone_is_applied() {
        let schedule = FullSyncSchedule::parse("0 0 9 * * *", "Asia/Seoul").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 30, 0).unwrap();
        // 09:00 KST is 00:00 UTC, so the next run is tomorrow
        assert_eq!(
            schedule.next_after(now),
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap())
        );
        assert_eq!(
            schedule.duration_until_next(now),
            Some(Duration::from_secs(23 * 3600 + 1800))
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(FullSyncSchedule::parse("every tuesday", "UTC").is_err());
        assert!(FullSyncSchedule::parse("0 2 * * *", "Nowhere/Land").is_err());
    }
}
