//! Per-entry statistics accumulator.
//!
//! [`Counters::fold`] folds one [`StatementSample`] into an entry. It is the
//! only writer of an entry's counters and always runs under that entry's own
//! lock, so a fold is atomic with respect to concurrent readers.
//!
//! Mean and variance use Welford's online recurrence. For the n-th sample `x`
//! with prior mean `m` and sum of squared deviations `S`:
//!
//! ```text
//! delta = x - m
//! m'    = m + delta / n
//! S'    = S + delta * (x - m')
//! ```

use serde::Serialize;
use stat_monitor_core::{Config, MAX_RESPONSE_BUCKET};

use crate::bounded::{
    APPLICATION_NAME_LEN, BoundedString, CommandTags, ERROR_MESSAGE_LEN, RelationIds, SQLCODE_LEN,
    clamp_command_tags, clamp_relations,
};
use crate::key::Phase;
use crate::sample::{BlockUsage, CpuUsage, StatementSample};

/// Usage weight added by each recorded sample.
pub const USAGE_EXEC: f64 = 1.0;
/// Usage weight a new entry starts with.
pub const USAGE_INIT_WEIGHT: f64 = 10.0;

/// Call count and rows for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Calls {
    pub calls: u64,
    pub rows: u64,
}

/// Running timing statistics for one phase, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CallTime {
    pub total: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sum_var: f64,
}

impl CallTime {
    /// Fold sample `x`, where `n` is the call count *including* `x`.
    pub fn fold(&mut self, n: u64, x: f64) {
        self.total += x;
        if n <= 1 {
            self.min = x;
            self.max = x;
            self.mean = x;
            self.sum_var = 0.0;
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = n as f64;
        let delta = x - self.mean;
        self.mean += delta / n;
        self.sum_var += delta * (x - self.mean);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    /// Population standard deviation over `calls` samples.
    #[must_use]
    pub fn stddev(&self, calls: u64) -> f64 {
        if calls <= 1 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = calls as f64;
        (self.sum_var / n).max(0.0).sqrt()
    }
}

/// Block activity summed across samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Blocks {
    pub shared_blks_hit: u64,
    pub shared_blks_read: u64,
    pub shared_blks_dirtied: u64,
    pub shared_blks_written: u64,
    pub local_blks_hit: u64,
    pub local_blks_read: u64,
    pub local_blks_dirtied: u64,
    pub local_blks_written: u64,
    pub temp_blks_read: u64,
    pub temp_blks_written: u64,
    pub blk_read_time_ms: f64,
    pub blk_write_time_ms: f64,
}

impl Blocks {
    fn add(&mut self, b: &BlockUsage) {
        self.shared_blks_hit = self.shared_blks_hit.saturating_add(b.shared_blks_hit);
        self.shared_blks_read = self.shared_blks_read.saturating_add(b.shared_blks_read);
        self.shared_blks_dirtied = self.shared_blks_dirtied.saturating_add(b.shared_blks_dirtied);
        self.shared_blks_written = self.shared_blks_written.saturating_add(b.shared_blks_written);
        self.local_blks_hit = self.local_blks_hit.saturating_add(b.local_blks_hit);
        self.local_blks_read = self.local_blks_read.saturating_add(b.local_blks_read);
        self.local_blks_dirtied = self.local_blks_dirtied.saturating_add(b.local_blks_dirtied);
        self.local_blks_written = self.local_blks_written.saturating_add(b.local_blks_written);
        self.temp_blks_read = self.temp_blks_read.saturating_add(b.temp_blks_read);
        self.temp_blks_written = self.temp_blks_written.saturating_add(b.temp_blks_written);
        self.blk_read_time_ms += b.blk_read_time_ms;
        self.blk_write_time_ms += b.blk_write_time_ms;
    }
}

/// CPU time summed across samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SysInfo {
    pub user_time_ms: f64,
    pub system_time_ms: f64,
}

impl SysInfo {
    fn add(&mut self, cpu: &CpuUsage) {
        self.user_time_ms += cpu.user_ms;
        self.system_time_ms += cpu.system_ms;
    }
}

/// Most recent error seen for the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub elevel: u8,
    pub sqlcode: BoundedString<SQLCODE_LEN>,
    pub message: BoundedString<ERROR_MESSAGE_LEN>,
}

/// Most recent descriptive metadata seen for the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryInfo {
    pub application_name: BoundedString<APPLICATION_NAME_LEN>,
    pub relations: RelationIds,
    pub command_tags: CommandTags,
}

/// Lower bound and step of the response-time histogram, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBounds {
    pub lower_bound_ms: f64,
    pub step_ms: f64,
}

impl HistogramBounds {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_config(config: &Config) -> Self {
        Self {
            lower_bound_ms: config.respose_time_lower_bound_ms as f64,
            step_ms: config.respose_time_step_ms as f64,
        }
    }

    /// Histogram slot for a duration of `x` ms.
    ///
    /// Anything below `lower_bound + step` lands in slot 0; anything at or
    /// above `lower_bound + 9 * step` lands in the last slot.
    #[must_use]
    pub fn classify(&self, x: f64) -> usize {
        if x.is_nan() || self.step_ms.is_nan() || self.step_ms <= 0.0 {
            return 0;
        }
        let raw = ((x - self.lower_bound_ms) / self.step_ms).floor();
        if raw.is_nan() || raw <= 0.0 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let idx = raw as usize;
        idx.min(MAX_RESPONSE_BUCKET - 1)
    }

    /// `(from_ms, to_ms)` covered by each slot; the last range is open-ended.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ranges(&self) -> Vec<(f64, f64)> {
        (0..MAX_RESPONSE_BUCKET)
            .map(|i| {
                let from = if i == 0 {
                    0.0
                } else {
                    self.step_ms.mul_add(i as f64, self.lower_bound_ms)
                };
                let to = if i == MAX_RESPONSE_BUCKET - 1 {
                    f64::INFINITY
                } else {
                    self.step_ms.mul_add((i + 1) as f64, self.lower_bound_ms)
                };
                (from, to)
            })
            .collect()
    }
}

/// Execution-time distribution for one entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResponseHistogram {
    pub counts: [u64; MAX_RESPONSE_BUCKET],
}

impl ResponseHistogram {
    pub fn record(&mut self, bounds: &HistogramBounds, x: f64) {
        let idx = bounds.classify(x);
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Everything aggregated for one fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Counters {
    pub calls: [Calls; Phase::COUNT],
    /// Eviction weight. Grows per sample, decays per eviction pass.
    pub usage: f64,
    pub time: [CallTime; Phase::COUNT],
    pub blocks: Blocks,
    pub sysinfo: SysInfo,
    pub error: ErrorInfo,
    pub info: QueryInfo,
    pub resp_calls: ResponseHistogram,
}

impl Counters {
    /// Counters for a freshly created entry.
    #[must_use]
    pub fn fresh() -> Self {
        Self {
            usage: USAGE_INIT_WEIGHT,
            ..Self::default()
        }
    }

    /// Fold one sample into the running aggregates.
    ///
    /// Planning samples update only the planning call/timing slots. Block,
    /// CPU, error and metadata fields accumulate from either phase. Only
    /// execution samples are tallied in the response histogram.
    pub fn fold(&mut self, sample: &StatementSample, bounds: &HistogramBounds) {
        let p = sample.phase.index();
        let calls = &mut self.calls[p];
        calls.calls = calls.calls.saturating_add(1);
        calls.rows = calls.rows.saturating_add(sample.rows);
        self.time[p].fold(calls.calls, sample.duration_ms);
        self.usage += USAGE_EXEC;

        if sample.phase == Phase::Exec {
            self.resp_calls.record(bounds, sample.duration_ms);
        }
        self.blocks.add(&sample.blocks);
        self.sysinfo.add(&sample.cpu);

        if let Some(err) = &sample.error {
            self.error.elevel = err.elevel;
            self.error.sqlcode.set(&err.sqlcode);
            self.error.message.set(&err.message);
        }
        if let Some(meta) = &sample.metadata {
            self.info.application_name.set(&meta.application_name);
            self.info.relations = clamp_relations(&meta.relations);
            self.info.command_tags = clamp_command_tags(&meta.command_tags);
        }
    }

    /// An entry with no execution yet.
    #[must_use]
    pub const fn is_sticky(&self) -> bool {
        self.calls[Phase::Exec as usize].calls == 0
    }

    pub fn decay_usage(&mut self, factor: f64) {
        self.usage *= factor;
    }

    #[must_use]
    pub const fn phase(&self, phase: Phase) -> (&Calls, &CallTime) {
        (&self.calls[phase.index()], &self.time[phase.index()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::SampleKey;
    use crate::sample::{ErrorReport, QueryMetadata};

    fn bounds() -> HistogramBounds {
        HistogramBounds {
            lower_bound_ms: 1.0,
            step_ms: 1.0,
        }
    }

    fn exec(x: f64) -> StatementSample {
        StatementSample::new(SampleKey::new(1, 1, 1, 0), Phase::Exec, x)
    }

    #[test]
    fn welford_matches_known_values() {
        let mut c = Counters::fresh();
        for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            c.fold(&exec(x), &bounds());
        }
        let (calls, time) = c.phase(Phase::Exec);
        assert_eq!(calls.calls, 8);
        assert!((time.mean - 5.0).abs() < 1e-12);
        assert!((time.stddev(calls.calls) - 2.0).abs() < 1e-12);
        assert!((time.total - 40.0).abs() < 1e-12);
        assert!((time.min - 2.0).abs() < f64::EPSILON);
        assert!((time.max - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn single_sample_has_zero_stddev() {
        let mut c = Counters::fresh();
        c.fold(&exec(3.5), &bounds());
        let (calls, time) = c.phase(Phase::Exec);
        assert!((time.min - 3.5).abs() < f64::EPSILON);
        assert!((time.max - 3.5).abs() < f64::EPSILON);
        assert!(time.stddev(calls.calls).abs() < f64::EPSILON);
    }

    #[test]
    fn plan_and_exec_are_kept_apart() {
        let mut c = Counters::fresh();
        let plan = StatementSample::new(SampleKey::new(1, 1, 1, 0), Phase::Plan, 0.5);
        c.fold(&plan, &bounds());
        c.fold(&exec(10.0), &bounds());
        assert_eq!(c.calls[Phase::Plan.index()].calls, 1);
        assert_eq!(c.calls[Phase::Exec.index()].calls, 1);
        assert!((c.time[Phase::Plan.index()].total - 0.5).abs() < f64::EPSILON);
        assert_eq!(c.resp_calls.total(), 1);
    }

    #[test]
    fn usage_starts_high_and_grows_per_sample() {
        let mut c = Counters::fresh();
        assert!(c.is_sticky());
        assert!((c.usage - USAGE_INIT_WEIGHT).abs() < f64::EPSILON);
        c.fold(&exec(1.0), &bounds());
        assert!(!c.is_sticky());
        assert!((c.usage - (USAGE_INIT_WEIGHT + USAGE_EXEC)).abs() < f64::EPSILON);
        c.decay_usage(0.5);
        assert!((c.usage - (USAGE_INIT_WEIGHT + USAGE_EXEC) * 0.5).abs() < 1e-12);
    }

    #[test]
    fn histogram_classification_clamps_both_ends() {
        let b = bounds();
        assert_eq!(b.classify(-5.0), 0);
        assert_eq!(b.classify(0.0), 0);
        assert_eq!(b.classify(1.5), 0);
        assert_eq!(b.classify(2.0), 1);
        assert_eq!(b.classify(9.99), 8);
        assert_eq!(b.classify(10.0), 9);
        assert_eq!(b.classify(1e9), 9);
        assert_eq!(b.classify(f64::NAN), 0);
    }

    #[test]
    fn histogram_ranges_cover_every_slot() {
        let b = HistogramBounds {
            lower_bound_ms: 5.0,
            step_ms: 2.0,
        };
        let ranges = b.ranges();
        assert_eq!(ranges.len(), MAX_RESPONSE_BUCKET);
        assert!((ranges[0].0).abs() < f64::EPSILON);
        assert!((ranges[0].1 - 7.0).abs() < f64::EPSILON);
        assert!((ranges[1].0 - 7.0).abs() < f64::EPSILON);
        assert!(ranges[MAX_RESPONSE_BUCKET - 1].1.is_infinite());
        for (i, (from, to)) in ranges.iter().enumerate().skip(1) {
            assert_eq!(b.classify(*from), i);
            assert!(from < to);
        }
    }

    #[test]
    fn error_and_metadata_are_last_write_wins_and_truncated() {
        let mut c = Counters::fresh();
        let long_msg = "x".repeat(500);
        let s = exec(1.0)
            .with_error(ErrorReport {
                elevel: 21,
                sqlcode: "42P01-extra".into(),
                message: long_msg,
            })
            .with_metadata(QueryMetadata {
                application_name: "psql".into(),
                relations: (0..30).collect(),
                command_tags: vec!["SELECT".into()],
            });
        c.fold(&s, &bounds());
        assert_eq!(c.error.elevel, 21);
        assert_eq!(c.error.sqlcode.as_str(), "42P01");
        assert_eq!(c.error.message.len(), ERROR_MESSAGE_LEN);
        assert_eq!(c.info.relations.len(), 10);
        assert_eq!(c.info.application_name.as_str(), "psql");

        let s2 = exec(1.0).with_metadata(QueryMetadata {
            application_name: "app2".into(),
            ..QueryMetadata::default()
        });
        c.fold(&s2, &bounds());
        assert_eq!(c.info.application_name.as_str(), "app2");
        assert!(c.info.relations.is_empty());
        // Error info persists when a later sample carries none.
        assert_eq!(c.error.elevel, 21);
    }

    #[test]
    fn blocks_and_cpu_accumulate() {
        let mut c = Counters::fresh();
        let blocks = BlockUsage {
            shared_blks_hit: 3,
            temp_blks_written: 2,
            blk_read_time_ms: 0.25,
            ..BlockUsage::default()
        };
        for _ in 0..4 {
            c.fold(&exec(1.0).with_blocks(blocks).with_cpu(1.0, 0.5), &bounds());
        }
        assert_eq!(c.blocks.shared_blks_hit, 12);
        assert_eq!(c.blocks.temp_blks_written, 8);
        assert!((c.blocks.blk_read_time_ms - 1.0).abs() < 1e-12);
        assert!((c.sysinfo.user_time_ms - 4.0).abs() < 1e-12);
        assert!((c.sysinfo.system_time_ms - 2.0).abs() < 1e-12);
    }
}
