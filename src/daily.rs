use chrono::NaiveDate;

use crate::cache::CacheStore;
use crate::models::DailyLog;

/// Detects the local-date boundary and writes the closing day's stats as a
/// [`DailyLog`] entry. Checked on a timer and whenever the app regains focus;
/// repeated checks on the same day are no-ops.
#[derive(Debug, Default)]
pub struct DailyRollover {
    last_known: Option<NaiveDate>,
}

impl DailyRollover {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records where "today" currently stands without writing anything. The
    /// first check after startup must not log a day that was never observed.
    pub fn initialize(&mut self, today: NaiveDate) {
        self.last_known = Some(today);
    }

    /// Returns true when the date advanced and a log entry was written.
    pub fn check_and_reset(
        &mut self,
        cache: &CacheStore,
        collection_id: &str,
        today: NaiveDate,
    ) -> bool {
        let Some(previous) = self.last_known else {
            self.last_known = Some(today);
            return false;
        };
        if today <= previous {
            return false;
        }
        self.last_known = Some(today);

        let (total, done) = cache.stats_for_date(collection_id, previous);
        if total == 0 {
            log::debug!("rollover from {previous}: nothing to log");
            return false;
        }
        let entry = DailyLog::new(previous, total, done);
        log::info!(
            "daily rollover: {previous} closed at {:.0}% ({done}/{total})",
            entry.achievement_rate
        );
        cache.save_daily_log(entry);
        true
    }
}
