use chrono::{DateTime, Utc};

/// Fetch state of one calendar year in a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearState {
    NotFetched,
    /// The provider answered with an array holding no records.
    FetchedEmpty,
    /// `watermark` is the highest day-of-offset imported by the last import.
    FetchedWithData { watermark: u32 },
}

impl YearState {
    pub fn is_fetched(&self) -> bool {
        !matches!(self, YearState::NotFetched)
    }

    pub fn watermark(&self) -> u32 {
        match self {
            YearState::FetchedWithData { watermark } => *watermark,
            _ => 0,
        }
    }
}

/// A recorded year state and when it was imported.
#[derive(Debug, Clone)]
pub(crate) struct YearMark {
    pub state: YearState,
    pub fetched_at: DateTime<Utc>,
}

impl YearMark {
    pub fn new(state: YearState) -> Self {
        Self {
            state,
            fetched_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_minutes()
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age_minutes: i64) -> bool {
        self.age_minutes(now) >= max_age_minutes
    }
}
