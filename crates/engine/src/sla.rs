//! SLA clocks: opening, closing and measuring instances.

use std::sync::Arc;

use blueprint_core::{SlaDefinition, StateId};
use blueprint_storage::{RecordKey, SlaInstanceRecord, SlaStatus};
use rust_decimal::Decimal;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::calendar::{BusinessCalendar, CountingRules};
use crate::clock::Clock;
use crate::error::CalendarError;

/// Elapsed share at which an open instance counts as approaching its deadline.
pub const APPROACHING_THRESHOLD: Decimal = Decimal::from_parts(8, 0, 0, false, 1);

/// Point-in-time view of a record's active SLA.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaStatusView {
    pub instance_id: Uuid,
    pub sla_name: String,
    pub state_id: StateId,
    #[serde(with = "time::serde::rfc3339")]
    pub entered_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub deadline: OffsetDateTime,
    /// Percent of the counted duration used, two decimal places.
    pub percent_elapsed: Decimal,
    pub status: SlaStatus,
    /// Counted time left before the deadline, zero once breached.
    #[serde(serialize_with = "serialize_seconds")]
    pub remaining: Duration,
    pub is_breached: bool,
    pub is_approaching: bool,
}

fn serialize_seconds<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(d.whole_seconds())
}

#[derive(Clone)]
pub struct SlaTracker {
    calendar: BusinessCalendar,
    clock: Arc<dyn Clock>,
}

impl SlaTracker {
    pub fn new(calendar: BusinessCalendar, clock: Arc<dyn Clock>) -> Self {
        SlaTracker { calendar, clock }
    }

    pub fn calendar(&self) -> &BusinessCalendar {
        &self.calendar
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// A fresh active instance for a record entering `state_id` at `started_at`.
    pub fn open(
        &self,
        key: RecordKey,
        state_id: StateId,
        sla: &SlaDefinition,
        started_at: OffsetDateTime,
    ) -> Result<SlaInstanceRecord, CalendarError> {
        let due_at = self.deadline(sla, started_at)?;
        Ok(SlaInstanceRecord {
            id: Uuid::new_v4(),
            sla_id: sla.id,
            blueprint_id: key.blueprint_id,
            record_id: key.record_id,
            state_id,
            started_at,
            due_at,
            breached_at: None,
            closed_at: None,
            status: SlaStatus::Active,
        })
    }

    pub fn deadline(
        &self,
        sla: &SlaDefinition,
        started_at: OffsetDateTime,
    ) -> Result<OffsetDateTime, CalendarError> {
        self.calendar.deadline(
            started_at,
            Duration::seconds(sla.duration_secs()),
            CountingRules::from(sla),
        )
    }

    /// Final status for an instance closed by a transition at `at`.
    pub fn close_status(&self, instance: &SlaInstanceRecord, at: OffsetDateTime) -> SlaStatus {
        if instance.breached_at.is_some() || at >= instance.due_at {
            SlaStatus::Breached
        } else {
            SlaStatus::Met
        }
    }

    /// Counted time the instance has run as of `at`, stopping at `closed_at`.
    pub fn elapsed(
        &self,
        instance: &SlaInstanceRecord,
        sla: &SlaDefinition,
        at: OffsetDateTime,
    ) -> Result<Duration, CalendarError> {
        let end = instance.closed_at.map_or(at, |closed| closed.min(at));
        if end <= instance.started_at {
            return Ok(Duration::ZERO);
        }
        self.calendar
            .elapsed(instance.started_at, end, CountingRules::from(sla))
    }

    /// Elapsed fraction of the SLA duration; 1 means the deadline is reached.
    pub fn progress(
        &self,
        instance: &SlaInstanceRecord,
        sla: &SlaDefinition,
        at: OffsetDateTime,
    ) -> Result<Decimal, CalendarError> {
        let elapsed = self.elapsed(instance, sla, at)?;
        let total = sla.duration_secs();
        if total <= 0 {
            return Ok(Decimal::ONE);
        }
        Ok(Decimal::from(elapsed.whole_seconds()) / Decimal::from(total))
    }

    pub fn percent_elapsed(
        &self,
        instance: &SlaInstanceRecord,
        sla: &SlaDefinition,
        at: OffsetDateTime,
    ) -> Result<Decimal, CalendarError> {
        Ok(as_percent(self.progress(instance, sla, at)?))
    }

    pub fn is_breached(
        &self,
        instance: &SlaInstanceRecord,
        sla: &SlaDefinition,
        at: OffsetDateTime,
    ) -> Result<bool, CalendarError> {
        Ok(self.progress(instance, sla, at)? >= Decimal::ONE)
    }

    pub fn status_view(
        &self,
        instance: &SlaInstanceRecord,
        sla: &SlaDefinition,
        entered_at: OffsetDateTime,
        at: OffsetDateTime,
    ) -> Result<SlaStatusView, CalendarError> {
        let elapsed = self.elapsed(instance, sla, at)?;
        let progress = self.progress(instance, sla, at)?;
        let is_breached = progress >= Decimal::ONE;
        let remaining = Duration::seconds(sla.duration_secs()) - elapsed;
        Ok(SlaStatusView {
            instance_id: instance.id,
            sla_name: sla.name.clone(),
            state_id: instance.state_id,
            entered_at,
            deadline: instance.due_at,
            percent_elapsed: as_percent(progress),
            status: instance.status,
            remaining: if remaining.is_negative() {
                Duration::ZERO
            } else {
                remaining
            },
            is_breached,
            is_approaching: !is_breached && progress >= APPROACHING_THRESHOLD,
        })
    }
}

pub fn as_percent(progress: Decimal) -> Decimal {
    (progress * Decimal::ONE_HUNDRED).round_dp(2)
}
