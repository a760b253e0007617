/*!
# Warmup schedule.

The warmup budget is split into three stages, following Stan:

```text
+---------+---+------+------------+------------------------+------+
|  fast   | s | slow |   slow     |        slow            | fast |
+---------+---+------+------------+------------------------+------+
```

1. An initial fast window in which only the step size is adapted, giving the chain
   time to reach the typical set.
2. A series of slow windows, each twice as wide as the previous one, in which the
   mass matrix is estimated as well. Covariance estimates need many more draws than
   the step size to settle, hence "slow".
3. A final fast window in which the step size is tuned to the final metric.

The initialization step of the warmup counts as the first step of the initial fast
window, so a budget of `n` steps yields `n - 1` schedule entries. Entry `i` describes
the transition that produces warmup step `i + 1`.
*/

use crate::error::{Result, WarmupError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Below this budget the mass matrix is not adapted at all.
pub const MIN_ADAPTATION_STEPS: usize = 20;

/// Which estimators a window updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowLabel {
    /// Step size only.
    Fast,
    /// Step size and mass matrix.
    Slow,
}

/// One scheduled warmup transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub window: WindowLabel,
    /// True on the last step of a slow window.
    pub is_window_end: bool,
}

impl ScheduleEntry {
    fn fast() -> Self {
        Self {
            window: WindowLabel::Fast,
            is_window_end: false,
        }
    }

    fn slow(is_window_end: bool) -> Self {
        Self {
            window: WindowLabel::Slow,
            is_window_end,
        }
    }
}

/// Widths of the adaptation windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub initial_fast_width: usize,
    pub final_fast_width: usize,
    pub first_slow_width: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            initial_fast_width: 75,
            final_fast_width: 50,
            first_slow_width: 25,
        }
    }
}

impl WindowConfig {
    /// Every window must be at least one step wide.
    pub fn validate(&self) -> Result<()> {
        if self.initial_fast_width == 0 || self.first_slow_width == 0 || self.final_fast_width == 0
        {
            return Err(WarmupError::InvalidWindows {
                initial_fast: self.initial_fast_width,
                first_slow: self.first_slow_width,
                final_fast: self.final_fast_width,
            });
        }
        Ok(())
    }

    /// Shrinks the windows proportionally when they do not fit in `total_steps`.
    fn fitted_to(self, total_steps: usize) -> Self {
        if self.initial_fast_width + self.first_slow_width + self.final_fast_width <= total_steps {
            return self;
        }
        let initial_fast_width = (0.15 * total_steps as f64) as usize;
        let final_fast_width = (0.1 * total_steps as f64) as usize;
        Self {
            initial_fast_width,
            final_fast_width,
            first_slow_width: total_steps - initial_fast_width - final_fast_width,
        }
    }
}

/// Builds the schedule for a warmup of `total_steps` steps.
///
/// Budgets below [`MIN_ADAPTATION_STEPS`] only adapt the step size. Otherwise the
/// slow windows double in width until doubling would leave less than one further
/// window of the current width before the final fast window, in which case the
/// current window is stretched to end exactly where the final fast window starts.
pub fn build_schedule(total_steps: usize, config: &WindowConfig) -> Result<Vec<ScheduleEntry>> {
    if total_steps == 0 {
        return Err(WarmupError::EmptyBudget);
    }
    config.validate()?;

    let mut schedule = Vec::with_capacity(total_steps - 1);

    if total_steps < MIN_ADAPTATION_STEPS {
        schedule.extend(std::iter::repeat(ScheduleEntry::fast()).take(total_steps - 1));
        return Ok(schedule);
    }

    let WindowConfig {
        initial_fast_width,
        final_fast_width,
        first_slow_width,
    } = config.fitted_to(total_steps);

    schedule.extend(std::iter::repeat(ScheduleEntry::fast()).take(initial_fast_width - 1));

    let final_start = total_steps - final_fast_width;
    let mut next_start = initial_fast_width;
    let mut next_width = first_slow_width;
    while next_start < final_start {
        let start = next_start;
        let mut width = next_width;
        if 3 * width <= final_start - start {
            next_width = 2 * width;
        } else {
            width = final_start - start;
        }
        next_start = start + width;
        schedule.extend(std::iter::repeat(ScheduleEntry::slow(false)).take(width - 1));
        schedule.push(ScheduleEntry::slow(true));
    }

    schedule.extend(std::iter::repeat(ScheduleEntry::fast()).take(total_steps - final_start));

    debug!(
        total_steps,
        initial_fast_width,
        first_slow_width,
        final_fast_width,
        entries = schedule.len(),
        "built warmup schedule"
    );
    Ok(schedule)
}

/// A contiguous run of schedule entries, in warmup-step coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub label: WindowLabel,
    /// First warmup step of the window (step 0 is the initialization).
    pub start: usize,
    pub width: usize,
}

impl Window {
    pub fn end(&self) -> usize {
        self.start + self.width
    }
}

/// Groups a schedule into its windows.
///
/// The initialization step is counted in the first window. Slow windows are split
/// at their window-end entries, so consecutive slow windows stay distinct.
pub fn windows(schedule: &[ScheduleEntry]) -> Vec<Window> {
    let mut out: Vec<Window> = Vec::new();
    let mut closed = false;
    for (i, entry) in schedule.iter().enumerate() {
        let step = i + 1;
        match out.last_mut() {
            Some(current) if current.label == entry.window && !closed => current.width += 1,
            _ => out.push(Window {
                label: entry.window,
                start: step,
                width: 1,
            }),
        }
        closed = entry.is_window_end;
    }
    match out.first_mut() {
        Some(first) if first.label == WindowLabel::Fast => {
            first.start = 0;
            first.width += 1;
        }
        _ => out.insert(
            0,
            Window {
                label: WindowLabel::Fast,
                start: 0,
                width: 1,
            },
        ),
    }
    out
}

/// Warmup steps at which a slow window ends (exclusive upper bounds).
pub fn slow_window_ends(schedule: &[ScheduleEntry]) -> Vec<usize> {
    schedule
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.is_window_end)
        .map(|(i, _)| i + 2)
        .collect()
}
