/// Display logic: percentage, severity tier, badge text/colour, age string
/// and the summary readout shown by the popup.
use chrono::{DateTime, Utc};
use serde::Serialize;

const WARNING_THRESHOLD: f64 = 70.0;
const DANGER_THRESHOLD: f64 = 90.0;
const PROGRESS_BAR_WIDTH: usize = 20;

/// Severity classification of a usage percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Normal,
    Warning,
    Danger,
}

impl Tier {
    /// Tier for a percentage; lower bounds are inclusive.
    pub fn for_percentage(percentage: f64) -> Self {
        if percentage >= DANGER_THRESHOLD {
            Tier::Danger
        } else if percentage >= WARNING_THRESHOLD {
            Tier::Warning
        } else {
            Tier::Normal
        }
    }

    /// Badge background colour.
    pub fn color(self) -> &'static str {
        match self {
            Tier::Normal => "#10b981",
            Tier::Warning => "#f59e0b",
            Tier::Danger => "#ef4444",
        }
    }
}

/// Values derived from a record for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Derived {
    /// `None` when the limit is missing or zero.
    pub percentage: Option<f64>,
    pub tier: Tier,
}

/// Derive percentage and tier from raw counts.
pub fn derive(used: u64, limit: Option<u64>) -> Derived {
    match limit {
        Some(limit) if limit > 0 => {
            let percentage = 100.0 * used as f64 / limit as f64;
            Derived {
                percentage: Some(percentage),
                tier: Tier::for_percentage(percentage),
            }
        }
        _ => Derived {
            percentage: None,
            tier: Tier::Normal,
        },
    }
}

/// Rounded percentage with a `%` suffix; empty when undefined.
pub fn badge_text(percentage: Option<f64>) -> String {
    match percentage {
        Some(p) if p.is_finite() => format!("{}%", p.round() as i64),
        _ => String::new(),
    }
}

/// Human-relative age of `last_updated` as seen at `now`.
pub fn relative_age(last_updated: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - last_updated).num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes} minute{} ago", plural(minutes))
    } else {
        let hours = minutes / 60;
        format!("{hours} hour{} ago", plural(hours))
    }
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Everything the summary view renders for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub used: String,
    pub limit: String,
    pub percentage: String,
    pub tier: Tier,
    pub color: &'static str,
    pub badge: String,
    pub progress_bar: String,
    pub last_updated: String,
}

impl Summary {
    pub fn new(used: u64, limit: u64, last_updated: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let derived = derive(used, Some(limit));
        let shown = derived.percentage.unwrap_or(0.0);
        Self {
            used: readout(used),
            limit: readout(limit),
            // Blank when undefined.
            percentage: derived
                .percentage
                .map(|p| format!("{p:.1}%"))
                .unwrap_or_default(),
            tier: derived.tier,
            color: derived.tier.color(),
            badge: badge_text(derived.percentage),
            progress_bar: progress_bar(shown, PROGRESS_BAR_WIDTH),
            last_updated: format!("Last updated: {}", relative_age(last_updated, now)),
        }
    }

    /// Multi-line text rendering.
    pub fn render(&self) -> String {
        format!(
            "Messages used:  {}\nMessages limit: {}\nUsage:          {} {}\n{}",
            self.used, self.limit, self.percentage, self.progress_bar, self.last_updated
        )
    }
}

/// `--` stands in for zero, matching an unset field.
fn readout(n: u64) -> String {
    if n == 0 {
        "--".to_string()
    } else {
        n.to_string()
    }
}

/// Text progress bar, full at 100% and beyond.
pub fn progress_bar(percentage: f64, width: usize) -> String {
    let ratio = (percentage / 100.0).clamp(0.0, 1.0);
    let filled = (ratio * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
