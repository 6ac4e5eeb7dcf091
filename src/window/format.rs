//! Time-axis label formatting hints for a widget's duration and size.

use serde::{Deserialize, Serialize};

use crate::window::calendar::{duration_in_days, AggregationUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartSize {
    Tiny,
    Small,
    Medium,
    Large,
    Big,
    Full,
}

impl ChartSize {
    /// Number of axis ticks a chart of this size aims for.
    pub fn target_points(self) -> usize {
        match self {
            ChartSize::Tiny => 6,
            ChartSize::Small => 8,
            ChartSize::Medium => 10,
            ChartSize::Large => 12,
            ChartSize::Big => 16,
            ChartSize::Full => 20,
        }
    }
}

/// Luxon-style label pattern plus the tick interval (label every Nth point).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeFormatting {
    pub format: &'static str,
    pub interval: usize,
}

pub fn time_formatting(duration: AggregationUnit, points: usize, size: ChartSize) -> TimeFormatting {
    let days = duration_in_days(duration);
    let interval = (points / size.target_points()).max(1);

    let format = if days <= 1.0 {
        "HH:mm"
    } else if days <= 7.0 {
        if points > 48 {
            "ccc HH:mm"
        } else {
            "ccc dd HH:mm"
        }
    } else if days <= 180.0 {
        "dd LLL"
    } else {
        "LLL yyyy"
    };

    TimeFormatting { format, interval }
}
