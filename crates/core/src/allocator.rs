use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use crate::domain::document::DocumentId;
use crate::errors::WorkflowError;
use crate::store::DocumentCountQuery;

/// Clock seam so day-rollover behavior is testable without wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: std::sync::Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Debug)]
struct AllocatorCache {
    date: NaiveDate,
    /// Highest sequence already handed out per department code, today.
    counters: HashMap<String, u32>,
}

/// Produces unique human-readable document ids, `{CODE}-{yyyyMMdd}-{seq:03}`,
/// scoped to a department and a calendar day.
///
/// One mutex guards both the counters and the cached date: increment-and-read
/// is atomic, and a lazy day rollover discards the whole cache under the same
/// lock, so two concurrent callers can never each rebuild against a different
/// "today". Counters are seeded per department from the durable document
/// count, which makes the allocator safe across process restarts.
pub struct DocumentIdAllocator {
    clock: Arc<dyn Clock>,
    counts: Arc<dyn DocumentCountQuery>,
    cache: Mutex<AllocatorCache>,
}

impl DocumentIdAllocator {
    pub fn new(clock: Arc<dyn Clock>, counts: Arc<dyn DocumentCountQuery>) -> Self {
        let today = clock.today();
        Self {
            clock,
            counts,
            cache: Mutex::new(AllocatorCache { date: today, counters: HashMap::new() }),
        }
    }

    pub async fn allocate(&self, department_code: &str) -> Result<DocumentId, WorkflowError> {
        let code = department_code.trim();
        if code.is_empty() {
            return Err(WorkflowError::ValidationFailed(
                "department code is required to allocate a document id".to_owned(),
            ));
        }

        let mut cache = self.cache.lock().await;
        let today = self.clock.today();
        if cache.date != today {
            cache.counters.clear();
            cache.date = today;
        }

        let used = match cache.counters.get(code) {
            Some(used) => *used,
            None => self.counts.count_created_on(code, today).await?,
        };
        let next = used + 1;
        cache.counters.insert(code.to_owned(), next);

        Ok(DocumentId(format!("{}-{}-{:03}", code, today.format("%Y%m%d"), next)))
    }
}
