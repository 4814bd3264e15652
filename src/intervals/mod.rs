use anyhow::bail;
use itertools::Itertools;

use crate::likelihood::LikelihoodError;
use crate::Result;

/// Absolute tolerance used when comparing event times with interval breakpoints.
pub const TIME_TOLERANCE: f64 = 1e-10;

/// Piece of a propagation window that lies inside a single rate interval.
///
/// Times are measured as elapsed time since the horizon, so `young > old`.
/// If `crosses_breakpoint` is set, the piece ends on the breakpoint closing interval
/// `interval - 1`, and scheduled sampling at that breakpoint has to be applied before
/// continuing towards the horizon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub interval: usize,
    pub young: f64,
    pub old: f64,
    pub crosses_breakpoint: bool,
}

/// Global partition of [0, horizon] into intervals of constant rates.
///
/// The partition is stored as the end times of the intervals, the last of which is the
/// horizon itself. Interval `i` covers (end(i - 1), end(i)], interval 0 starts at 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Intervals {
    end_times: Vec<f64>,
}

impl Intervals {
    /// Collects the breakpoints of all schedules into one partition of [0, horizon].
    /// Breakpoints at or before 0 are dropped, duplicates (within [`TIME_TOLERANCE`]) merged.
    /// Bails if a breakpoint lies beyond the horizon.
    pub fn new(breakpoints: impl IntoIterator<Item = f64>, horizon: f64) -> Result<Self> {
        if !horizon.is_finite() || horizon < 0.0 {
            bail!(LikelihoodError::InvalidParameters(format!(
                "Horizon must be a non-negative finite time, got {horizon}."
            )));
        }
        let mut end_times = Vec::new();
        for time in breakpoints
            .into_iter()
            .filter(|&t| t > TIME_TOLERANCE)
            .sorted_by(f64::total_cmp)
        {
            if !time.is_finite() || time > horizon + TIME_TOLERANCE {
                bail!(LikelihoodError::InvalidParameters(format!(
                    "Rate change at time {time} lies beyond the horizon {horizon}."
                )));
            }
            let time = time.min(horizon);
            if end_times
                .last()
                .is_none_or(|&last: &f64| time - last > TIME_TOLERANCE)
            {
                end_times.push(time);
            }
        }
        match end_times.last() {
            Some(&last) if horizon - last <= TIME_TOLERANCE => {
                if let Some(last) = end_times.last_mut() {
                    *last = horizon;
                }
            }
            _ => end_times.push(horizon),
        }
        Ok(Intervals { end_times })
    }

    pub fn len(&self) -> usize {
        self.end_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.end_times.is_empty()
    }

    pub fn horizon(&self) -> f64 {
        self.end_times[self.end_times.len() - 1]
    }

    pub fn end_times(&self) -> &[f64] {
        &self.end_times
    }

    pub fn end(&self, interval: usize) -> f64 {
        self.end_times[interval]
    }

    pub fn start(&self, interval: usize) -> f64 {
        if interval == 0 {
            0.0
        } else {
            self.end_times[interval - 1]
        }
    }

    /// Index of the interval containing `time`: the first interval whose end is not before
    /// `time`. A time sitting exactly on a breakpoint belongs to the interval it closes.
    /// Times past the horizon map to the last interval.
    pub fn index_of(&self, time: f64) -> usize {
        self.end_times
            .partition_point(|&end| end < time)
            .min(self.end_times.len() - 1)
    }

    /// Splits the window [from, to] into per-interval segments, ordered from `to` (young)
    /// towards `from` (old). Breakpoints within [`TIME_TOLERANCE`] of either end of the window
    /// are not crossed.
    pub fn segments(&self, from: f64, to: f64) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut interval = self.index_of(to);
        if interval > 0 && (to - self.end_times[interval - 1]).abs() < TIME_TOLERANCE {
            interval -= 1;
        }
        let mut young = to;
        while interval > 0 && self.end_times[interval - 1] > from + TIME_TOLERANCE {
            let old = self.end_times[interval - 1];
            segments.push(Segment {
                interval,
                young,
                old,
                crosses_breakpoint: true,
            });
            young = old;
            interval -= 1;
        }
        segments.push(Segment {
            interval,
            young,
            old: from,
            crosses_breakpoint: false,
        });
        segments
    }
}
