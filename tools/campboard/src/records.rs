use crate::sheets::SheetRow;
use serde::Serialize;
use serde_json::Value;

pub const COLUMN_CODE: &str = "Code";
pub const COLUMN_ITEM: &str = "Item";
pub const COLUMN_COUNT: &str = "Count";
pub const COLUMN_TARGET: &str = "Target";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRecord {
    pub code: String,
    pub name: String,
    pub count: u64,
    pub target: u64,
}

impl ItemRecord {
    /// Completion in percent, clamped to `0.0..=100.0`.
    pub fn percent(&self) -> f64 {
        let target = self.target.max(1) as f64;
        (self.count as f64 / target * 100.0).clamp(0.0, 100.0)
    }
}

/// Validates raw rows into records, preserving source order.
pub fn normalize_rows(rows: &[SheetRow]) -> Vec<ItemRecord> {
    rows.iter().filter_map(normalize_row).collect()
}

pub fn normalize_row(row: &SheetRow) -> Option<ItemRecord> {
    let name = cell_text(row.get(COLUMN_ITEM)).trim().to_string();
    if name.is_empty() {
        return None;
    }
    Some(ItemRecord {
        code: cell_text(row.get(COLUMN_CODE)).trim().to_string(),
        name,
        count: coerce_count(row.get(COLUMN_COUNT)),
        target: coerce_target(row.get(COLUMN_TARGET)),
    })
}

/// Non-numeric or negative counts become 0.
pub fn coerce_count(cell: Option<&Value>) -> u64 {
    match parse_number(cell) {
        Some(value) if value > 0.0 => value.trunc() as u64,
        _ => 0,
    }
}

/// Non-numeric targets and targets below 1 become 1.
pub fn coerce_target(cell: Option<&Value>) -> u64 {
    match parse_number(cell) {
        Some(value) if value >= 1.0 => value.trunc() as u64,
        _ => 1,
    }
}

fn parse_number(cell: Option<&Value>) -> Option<f64> {
    let value = match cell? {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn cell_text(cell: Option<&Value>) -> String {
    match cell {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
