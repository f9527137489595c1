use crate::config::{AppConfig, ConfigSource};
use crate::dashboard::{build_view, DashboardView};
use crate::errors::CampboardError;
use crate::fetcher::{DataFetcher, FetchNotice};
use crate::hotkeys::{action_for_key, HotkeyAction};
use crate::logging::{structured_fallback_line, JsonlLogger, LogEvent};
use crate::rate_limit::RateLimiter;
use crate::runtime::ProductionRuntime;
use crate::snapshot::SnapshotStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Forced tokens live in the upper half of the token space, above any Unix second.
const FORCED_TOKEN_BASE: u64 = 1 << 63;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    pub max_ticks: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub quit_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub force_token: u64,
    pub item_count: usize,
    pub notice: Option<FetchNotice>,
}

/// Runs fetch -> layout -> classify -> draw once per tick.
///
/// Ticks never overlap: the next one starts only after the previous one has
/// drawn, and deadlines that passed while a tick was running are skipped.
pub struct RefreshLoop<'a> {
    runtime: &'a ProductionRuntime,
    config_source: ConfigSource,
    config: AppConfig,
    fetcher: DataFetcher,
    forced_refreshes: u64,
}

impl<'a> RefreshLoop<'a> {
    pub fn new(runtime: &'a ProductionRuntime, config_source: ConfigSource, config: AppConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit.max_calls, config.rate_limit.window());
        let fetcher = DataFetcher::new(
            runtime.sheet_source.clone(),
            runtime.clock.clone(),
            limiter,
            Arc::new(SnapshotStore::new()),
        );
        Self {
            runtime,
            config_source,
            config,
            fetcher,
            forced_refreshes: 0,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        self.fetcher.store()
    }

    pub fn run(&mut self, options: RefreshOptions) -> Result<RefreshSummary, CampboardError> {
        let mut summary = RefreshSummary::default();
        let mut forced = false;
        self.log(
            "info",
            "dashboard_started",
            json!({
                "title": self.config.dashboard.title,
                "interval_seconds": self.config.refresh.interval_seconds,
                "max_ticks": options.max_ticks,
            }),
        );

        loop {
            let started = self.runtime.clock.now();
            self.tick(forced)?;
            summary.ticks += 1;
            if options.max_ticks.is_some_and(|max| summary.ticks >= max) {
                break;
            }

            let interval = self.config.refresh.interval();
            let elapsed = self
                .runtime
                .clock
                .now()
                .duration_since(started)
                .unwrap_or_default();
            let skipped = missed_deadlines(elapsed, interval);
            if skipped > 0 {
                summary.skipped_ticks += skipped;
                self.log(
                    "warn",
                    "ticks_skipped",
                    json!({"skipped": skipped, "tick_ms": elapsed.as_millis() as u64}),
                );
            }
            let periods = u32::try_from(skipped + 1).unwrap_or(u32::MAX);
            let deadline = started + interval.saturating_mul(periods);

            match self.wait_until(deadline)? {
                Some(HotkeyAction::Quit) => {
                    summary.quit_requested = true;
                    break;
                }
                Some(HotkeyAction::RefreshNow) => forced = true,
                None => forced = false,
            }
        }

        self.log(
            "info",
            "dashboard_stopped",
            json!({
                "ticks": summary.ticks,
                "skipped_ticks": summary.skipped_ticks,
                "quit_requested": summary.quit_requested,
            }),
        );
        Ok(summary)
    }

    /// One full pass. `forced` guarantees a force token never used before.
    pub fn tick(&mut self, forced: bool) -> Result<TickReport, CampboardError> {
        self.reload_config();
        let now = self.runtime.clock.now();
        let force_token = self.next_token(now, forced);

        let outcome = self.fetcher.fetch(force_token, &self.config);
        let view = build_view(&self.config.dashboard.title, &outcome, now);
        self.present(&view)?;

        if let Some(notice) = &outcome.notice {
            let level = match notice {
                FetchNotice::Failed(_) => "error",
                _ => "warn",
            };
            self.log(level, notice.event_type(), json!({"message": notice.message()}));
        }
        self.log(
            "info",
            "tick_completed",
            json!({
                "force_token": force_token,
                "forced": forced,
                "items": outcome.snapshot.len(),
                "notice": outcome.notice.as_ref().map(FetchNotice::message),
                "rate_limit_remaining": self.fetcher.limiter().remaining_at(now),
            }),
        );

        Ok(TickReport {
            force_token,
            item_count: outcome.snapshot.len(),
            notice: outcome.notice,
        })
    }

    fn reload_config(&mut self) {
        match self.config_source.load(self.runtime.file_system.as_ref()) {
            Ok(config) => self.config = config,
            Err(err) => self.log(
                "warn",
                "config_reload_failed",
                json!({"error": err.to_string()}),
            ),
        }
    }

    fn next_token(&mut self, now: SystemTime, forced: bool) -> u64 {
        if forced {
            self.forced_refreshes += 1;
            return FORCED_TOKEN_BASE | self.forced_refreshes;
        }
        unix_secs(now)
    }

    fn present(&self, view: &DashboardView) -> Result<(), CampboardError> {
        let terminal = self.runtime.terminal.as_ref();
        if terminal.is_interactive() {
            return terminal.draw(view);
        }

        terminal.write_line(&format!(
            "{} LIVE {} items={}",
            view.title,
            view.clock,
            view.card_count()
        ))?;
        if let Some(notice) = &view.notice {
            terminal.write_line(&format!("notice: {notice}"))?;
        }
        if view.is_empty() {
            return terminal.write_line(&format!("Loading {} Data...", view.title));
        }
        for card in view.cards() {
            terminal.write_line(&structured_fallback_line(
                &card.name,
                card.stage.label(),
                &format!("{} of {} ({:.1}%)", card.count, card.target, card.percent),
            ))?;
        }
        Ok(())
    }

    fn wait_until(&self, deadline: SystemTime) -> Result<Option<HotkeyAction>, CampboardError> {
        let clock = self.runtime.clock.as_ref();
        let terminal = self.runtime.terminal.as_ref();
        if terminal.is_interactive() {
            loop {
                let remaining = deadline.duration_since(clock.now()).unwrap_or_default();
                if remaining.is_zero() {
                    return Ok(None);
                }
                let Some(key) = terminal.poll_key(remaining)? else {
                    break;
                };
                if let Some(action) = action_for_key(key) {
                    return Ok(Some(action));
                }
            }
        }
        clock.sleep_until(deadline)?;
        Ok(None)
    }

    fn log(&self, level: &str, event_type: &str, payload: Value) {
        let Some(path) = &self.config.logging.path else {
            return;
        };
        let mut logger = JsonlLogger::new(path);
        logger.max_payload_bytes = self.config.logging.max_payload_bytes;
        logger.budget_bytes = self.config.logging.budget_bytes;
        // A full disk must not stop the dashboard.
        let _ = logger.append(&LogEvent {
            ts_unix_secs: unix_secs(self.runtime.clock.now()),
            level,
            event_type,
            payload,
        });
    }
}

/// Number of tick deadlines that fell inside a tick that took `elapsed`.
pub fn missed_deadlines(elapsed: Duration, interval: Duration) -> u64 {
    if interval.is_zero() {
        return 0;
    }
    (elapsed.as_nanos() / interval.as_nanos()) as u64
}

fn unix_secs(at: SystemTime) -> u64 {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
