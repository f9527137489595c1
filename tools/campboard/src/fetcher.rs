use crate::config::AppConfig;
use crate::rate_limit::RateLimiter;
use crate::records::normalize_rows;
use crate::runtime::{Clock, SheetSource};
use crate::sheets::{SheetRequest, SourceError};
use crate::snapshot::{Snapshot, SnapshotStore};
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchNotice {
    RateLimited,
    QuotaExceeded { served_cached: bool },
    Failed(String),
}

impl FetchNotice {
    pub fn message(&self) -> String {
        match self {
            Self::RateLimited => "Rate limit reached. Using cached data...".to_string(),
            Self::QuotaExceeded { served_cached: true } => {
                "Google Sheets API quota exceeded. Showing cached data...".to_string()
            }
            Self::QuotaExceeded {
                served_cached: false,
            } => "Google Sheets API quota exceeded. Please wait a moment...".to_string(),
            Self::Failed(reason) => format!("Error loading data: {reason}"),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RateLimited => "fetch_rate_limited",
            Self::QuotaExceeded { .. } => "fetch_quota_exceeded",
            Self::Failed(_) => "fetch_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub snapshot: Arc<Snapshot>,
    pub notice: Option<FetchNotice>,
}

impl FetchOutcome {
    fn fresh(snapshot: Arc<Snapshot>) -> Self {
        Self {
            snapshot,
            notice: None,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedOutcome {
    force_token: u64,
    produced_at: SystemTime,
    outcome: FetchOutcome,
}

/// Fetches the item table, guarded by a rate limiter and backed by the
/// last-good snapshot. Every failure is folded into the returned outcome.
pub struct DataFetcher {
    source: Arc<dyn SheetSource>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    store: Arc<SnapshotStore>,
    cached: Option<CachedOutcome>,
}

impl DataFetcher {
    pub fn new(
        source: Arc<dyn SheetSource>,
        clock: Arc<dyn Clock>,
        limiter: RateLimiter,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            source,
            clock,
            limiter,
            store,
            cached: None,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn fetch(&mut self, force_token: u64, cfg: &AppConfig) -> FetchOutcome {
        let now = self.clock.now();
        if let Some(outcome) = self.cached_outcome(force_token, now, cfg) {
            return outcome;
        }

        let outcome = self.fetch_uncached(now, cfg);
        self.cached = Some(CachedOutcome {
            force_token,
            produced_at: now,
            outcome: outcome.clone(),
        });
        outcome
    }

    fn cached_outcome(&self, force_token: u64, now: SystemTime, cfg: &AppConfig) -> Option<FetchOutcome> {
        let cached = self.cached.as_ref()?;
        if cached.force_token != force_token {
            return None;
        }
        let age = now.duration_since(cached.produced_at).unwrap_or_default();
        (age < cfg.source.cache_ttl()).then(|| cached.outcome.clone())
    }

    fn fetch_uncached(&mut self, now: SystemTime, cfg: &AppConfig) -> FetchOutcome {
        self.limiter
            .reconfigure(cfg.rate_limit.max_calls, cfg.rate_limit.window());
        if !self.limiter.can_make_call_at(now) {
            return FetchOutcome {
                snapshot: self.store.last_good_or_empty(),
                notice: Some(FetchNotice::RateLimited),
            };
        }

        let Some(sheet_id) = cfg
            .source
            .sheet_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            return failed("missing spreadsheet id (set source.sheet_id or GOOGLE_SHEET_ID)");
        };

        let request = SheetRequest {
            sheet_id: sheet_id.to_string(),
            sheet_name: cfg.source.sheet_name.clone(),
            credentials: cfg.credentials.clone(),
            timeout: cfg.source.request_timeout(),
        };
        match self.source.fetch_records(&request) {
            Ok(rows) if rows.is_empty() => FetchOutcome::fresh(Arc::new(Snapshot::empty())),
            Ok(rows) => {
                let snapshot = Arc::new(Snapshot::new(normalize_rows(&rows), now));
                self.store.publish(snapshot.clone());
                FetchOutcome::fresh(snapshot)
            }
            Err(err) => self.recover(err),
        }
    }

    fn recover(&self, err: SourceError) -> FetchOutcome {
        if err.is_quota() {
            let cached = self.store.last_good();
            return FetchOutcome {
                notice: Some(FetchNotice::QuotaExceeded {
                    served_cached: cached.is_some(),
                }),
                snapshot: cached.unwrap_or_else(|| Arc::new(Snapshot::empty())),
            };
        }
        failed(&err.message)
    }
}

fn failed(reason: &str) -> FetchOutcome {
    FetchOutcome {
        snapshot: Arc::new(Snapshot::empty()),
        notice: Some(FetchNotice::Failed(reason.to_string())),
    }
}
