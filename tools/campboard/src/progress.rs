use ratatui::style::Color;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorTag {
    pub hex: &'static str,
    rgb: (u8, u8, u8),
}

impl ColorTag {
    const fn new(hex: &'static str, r: u8, g: u8, b: u8) -> Self {
        Self { hex, rgb: (r, g, b) }
    }

    pub fn to_color(self) -> Color {
        let (r, g, b) = self.rgb;
        Color::Rgb(r, g, b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NotStarted,
    GettingStarted,
    GoodProgress,
    NearlyDone,
    Completed,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "Not Started",
            Self::GettingStarted => "Getting Started",
            Self::GoodProgress => "Good Progress",
            Self::NearlyDone => "Nearly Done",
            Self::Completed => "Completed",
        }
    }

    pub fn color(self) -> ColorTag {
        match self {
            Self::Completed => ColorTag::new("#296815", 0x29, 0x68, 0x15),
            Self::NearlyDone => ColorTag::new("#4B8C30", 0x4B, 0x8C, 0x30),
            Self::GoodProgress => ColorTag::new("#6EAA4D", 0x6E, 0xAA, 0x4D),
            Self::GettingStarted => ColorTag::new("#A4CC8B", 0xA4, 0xCC, 0x8B),
            Self::NotStarted => ColorTag::new("#93AD8B", 0x93, 0xAD, 0x8B),
        }
    }
}

pub fn stage_for(percent: f64) -> Stage {
    if percent >= 100.0 {
        Stage::Completed
    } else if percent >= 80.0 {
        Stage::NearlyDone
    } else if percent >= 50.0 {
        Stage::GoodProgress
    } else if percent >= 25.0 {
        Stage::GettingStarted
    } else {
        Stage::NotStarted
    }
}

pub fn classify(percent: f64) -> (ColorTag, Stage) {
    let stage = stage_for(percent);
    (stage.color(), stage)
}

#[cfg(test)]
mod tests {
    use super::{classify, stage_for, Stage};

    #[test]
    fn band_boundaries_are_exact() {
        let cases = [
            (100.0, "Completed"),
            (99.99, "Nearly Done"),
            (80.0, "Nearly Done"),
            (79.99, "Good Progress"),
            (50.0, "Good Progress"),
            (49.99, "Getting Started"),
            (25.0, "Getting Started"),
            (24.99, "Not Started"),
            (0.0, "Not Started"),
        ];
        for (percent, label) in cases {
            assert_eq!(classify(percent).1.label(), label, "percent {percent}");
        }
    }

    #[test]
    fn stage_never_rises_as_percent_falls() {
        let mut previous = Stage::Completed;
        for step in (0..=10_000).rev() {
            let stage = stage_for(step as f64 / 100.0);
            assert!(stage <= previous, "{step}");
            previous = stage;
        }
    }

    #[test]
    fn each_band_has_its_own_color() {
        let (completed, _) = classify(100.0);
        let (nearly, _) = classify(85.0);
        assert_eq!(completed.hex, "#296815");
        assert_ne!(completed, nearly);
    }
}
