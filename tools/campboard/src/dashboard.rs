use crate::fetcher::FetchOutcome;
use crate::layout::{distribute, group_rows};
use crate::progress::{classify, ColorTag, Stage};
use crate::snapshot::Snapshot;
use chrono::{DateTime, Local};
use std::time::SystemTime;

/// One progress card as handed to the rendering surface.
#[derive(Debug, Clone, PartialEq)]
pub struct CardView {
    pub name: String,
    pub count: u64,
    pub target: u64,
    pub percent: f64,
    pub color: ColorTag,
    pub stage: Stage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub title: String,
    pub clock: String,
    pub rows: Vec<Vec<CardView>>,
    pub notice: Option<String>,
}

impl DashboardView {
    pub fn card_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cards(&self) -> impl Iterator<Item = &CardView> {
        self.rows.iter().flatten()
    }
}

pub fn card_views(snapshot: &Snapshot) -> Vec<CardView> {
    snapshot
        .items
        .iter()
        .map(|item| {
            let percent = item.percent();
            let (color, stage) = classify(percent);
            CardView {
                name: item.name.clone(),
                count: item.count,
                target: item.target,
                percent,
                color,
                stage,
            }
        })
        .collect()
}

pub fn build_view(title: &str, outcome: &FetchOutcome, now: SystemTime) -> DashboardView {
    let cards = card_views(&outcome.snapshot);
    let rows = group_rows(&cards, &distribute(cards.len()))
        .into_iter()
        .map(<[CardView]>::to_vec)
        .collect();
    DashboardView {
        title: title.to_string(),
        clock: clock_label(now),
        rows,
        notice: outcome.notice.as_ref().map(|notice| notice.message()),
    }
}

pub fn clock_label(now: SystemTime) -> String {
    DateTime::<Local>::from(now).format("%H:%M:%S").to_string()
}

/// `1234567` -> `1,234,567`.
pub fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
