use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    timezone: Option<Tz>,
}

impl SystemClock {
    pub fn new(timezone: Option<Tz>) -> Self {
        Self { timezone }
    }
}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        match self.timezone {
            Some(tz) => Utc::now().with_timezone(&tz).date_naive(),
            None => Local::now().date_naive(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub used: u32,
    pub limit: u32,
    pub day: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The daily limit of {limit} analyses has been reached. Please try again tomorrow.")]
pub struct QuotaExceeded {
    pub limit: u32,
}

pub trait QuotaCounter: Send + Sync {
    /// Fails once today's successful analyses have reached the ceiling.
    fn check(&self) -> Result<QuotaSnapshot, QuotaExceeded>;

    fn record_success(&self) -> QuotaSnapshot;
}

#[derive(Debug)]
struct QuotaState {
    count: u32,
    day: NaiveDate,
}

pub struct DailyQuota {
    limit: u32,
    clock: Arc<dyn Clock>,
    state: Mutex<QuotaState>,
}

impl DailyQuota {
    pub fn new(limit: u32, clock: Arc<dyn Clock>) -> Self {
        let day = clock.today();
        Self {
            limit,
            clock,
            state: Mutex::new(QuotaState { count: 0, day }),
        }
    }

    fn roll_over(&self, state: &mut QuotaState) {
        let today = self.clock.today();
        if state.day != today {
            tracing::info!(
                target: "quota",
                previous_day = %state.day,
                served = state.count,
                "daily analysis counter reset"
            );
            state.count = 0;
            state.day = today;
        }
    }

    fn snapshot(&self, state: &QuotaState) -> QuotaSnapshot {
        QuotaSnapshot {
            used: state.count,
            limit: self.limit,
            day: state.day,
        }
    }
}

impl QuotaCounter for DailyQuota {
    fn check(&self) -> Result<QuotaSnapshot, QuotaExceeded> {
        let mut state = self.state.lock();
        self.roll_over(&mut state);
        if state.count >= self.limit {
            return Err(QuotaExceeded { limit: self.limit });
        }
        Ok(self.snapshot(&state))
    }

    fn record_success(&self) -> QuotaSnapshot {
        let mut state = self.state.lock();
        self.roll_over(&mut state);
        state.count = state.count.saturating_add(1);
        self.snapshot(&state)
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::ManualClock, *};

    fn quota(limit: u32) -> (Arc<ManualClock>, DailyQuota) {
        let clock = Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        ));
        (clock.clone(), DailyQuota::new(limit, clock))
    }

    #[test]
    fn rejects_the_call_after_the_ceiling() {
        let (_, quota) = quota(3);
        for _ in 0..3 {
            quota.check().unwrap();
            quota.record_success();
        }
        assert_eq!(quota.check(), Err(QuotaExceeded { limit: 3 }));
    }

    #[test]
    fn checks_without_success_do_not_consume_quota() {
        let (_, quota) = quota(2);
        for _ in 0..10 {
            quota.check().unwrap();
        }
        assert_eq!(quota.check().unwrap().used, 0);
    }

    #[test]
    fn new_day_resets_the_counter_once() {
        let (clock, quota) = quota(1);
        quota.record_success();
        assert!(quota.check().is_err());

        clock.advance_day();
        let snapshot = quota.check().unwrap();
        assert_eq!(snapshot.used, 0);
        assert_eq!(snapshot.day, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());

        quota.record_success();
        assert!(quota.check().is_err());
    }
}
