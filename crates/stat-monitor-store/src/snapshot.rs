//! Point-in-time copies of the store for readers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use stat_monitor_core::{MonitorError, MonitorResult};

use crate::counters::{Blocks, Counters, ErrorInfo, HistogramBounds, QueryInfo, SysInfo};
use crate::key::{FingerprintKey, Phase};

/// Call and timing statistics of one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PhaseStats {
    pub calls: u64,
    pub rows: u64,
    pub total_time_ms: f64,
    pub min_time_ms: f64,
    pub max_time_ms: f64,
    pub mean_time_ms: f64,
    pub stddev_time_ms: f64,
}

impl PhaseStats {
    fn from_counters(counters: &Counters, phase: Phase) -> Self {
        let (calls, time) = counters.phase(phase);
        Self {
            calls: calls.calls,
            rows: calls.rows,
            total_time_ms: time.total,
            min_time_ms: time.min,
            max_time_ms: time.max,
            mean_time_ms: time.mean,
            stddev_time_ms: time.stddev(calls.calls),
        }
    }
}

/// One entry as seen by a reader.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryView {
    pub bucket_id: usize,
    pub bucket_start_time: Option<DateTime<Utc>>,
    pub query_id: u64,
    pub user_id: u32,
    pub database_id: u32,
    pub client_address: u32,
    pub client_ip: String,
    /// Stored text, or a placeholder when it was never stored or overflowed.
    pub query: String,
    pub text_available: bool,
    pub plan: PhaseStats,
    pub exec: PhaseStats,
    pub usage: f64,
    pub blocks: Blocks,
    pub sysinfo: SysInfo,
    pub error: ErrorInfo,
    pub info: QueryInfo,
    pub resp_calls: [u64; stat_monitor_core::MAX_RESPONSE_BUCKET],
}

impl EntryView {
    pub(crate) fn build(
        key: &FingerprintKey,
        counters: &Counters,
        bucket_start_time: Option<DateTime<Utc>>,
        text: Option<String>,
        placeholder: &str,
    ) -> Self {
        let text_available = text.is_some();
        Self {
            bucket_id: key.bucket_id,
            bucket_start_time,
            query_id: key.query_id,
            user_id: key.user_id,
            database_id: key.database_id,
            client_address: key.client_address,
            client_ip: key.client_ip().to_string(),
            query: text.unwrap_or_else(|| placeholder.to_string()),
            text_available,
            plan: PhaseStats::from_counters(counters, Phase::Plan),
            exec: PhaseStats::from_counters(counters, Phase::Exec),
            usage: counters.usage,
            blocks: counters.blocks,
            sysinfo: counters.sysinfo,
            error: counters.error.clone(),
            info: counters.info.clone(),
            resp_calls: counters.resp_calls.counts,
        }
    }

    /// Key this view was taken from.
    #[must_use]
    pub fn key(&self) -> FingerprintKey {
        FingerprintKey {
            bucket_id: self.bucket_id,
            query_id: self.query_id,
            user_id: self.user_id,
            database_id: self.database_id,
            client_address: self.client_address,
        }
    }

    /// Total calls across both phases.
    #[must_use]
    pub const fn total_calls(&self) -> u64 {
        self.plan.calls + self.exec.calls
    }
}

/// Store-wide state captured alongside the entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotHeader {
    pub taken_at: DateTime<Utc>,
    pub current_bucket: usize,
    pub bucket_start_times: Vec<Option<DateTime<Utc>>>,
    pub cur_median_usage: f64,
    pub response_time_ranges: Vec<(f64, f64)>,
}

impl SnapshotHeader {
    pub(crate) fn new(
        taken_at: DateTime<Utc>,
        current_bucket: usize,
        bucket_start_times: Vec<Option<DateTime<Utc>>>,
        cur_median_usage: f64,
        bounds: &HistogramBounds,
    ) -> Self {
        Self {
            taken_at,
            current_bucket,
            bucket_start_times,
            cur_median_usage,
            response_time_ranges: bounds.ranges(),
        }
    }
}

/// Copied-out entries, iterated without holding any store lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub header: SnapshotHeader,
    pub entries: Vec<EntryView>,
}

impl Snapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EntryView> {
        self.entries.iter()
    }

    /// Views belonging to `bucket`.
    pub fn in_bucket(&self, bucket: usize) -> impl Iterator<Item = &EntryView> {
        self.entries.iter().filter(move |e| e.bucket_id == bucket)
    }

    /// The view for `key`, if captured.
    #[must_use]
    pub fn find(&self, key: &FingerprintKey) -> Option<&EntryView> {
        self.entries.iter().find(|e| e.key() == *key)
    }

    pub fn to_json(&self) -> MonitorResult<String> {
        serde_json::to_string(self).map_err(MonitorError::from)
    }
}

impl IntoIterator for Snapshot {
    type Item = EntryView;
    type IntoIter = std::vec::IntoIter<EntryView>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a EntryView;
    type IntoIter = std::slice::Iter<'a, EntryView>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::SampleKey;
    use crate::sample::StatementSample;

    fn bounds() -> HistogramBounds {
        HistogramBounds {
            lower_bound_ms: 1.0,
            step_ms: 1.0,
        }
    }

    fn view(q: u64, bucket: usize, text: Option<String>) -> EntryView {
        let key = SampleKey::new(q, 10, 20, u32::from(std::net::Ipv4Addr::new(10, 0, 0, 1)))
            .in_bucket(bucket);
        let mut counters = Counters::fresh();
        counters.fold(
            &StatementSample::new(key.sample_key(), Phase::Exec, 4.0).with_rows(2),
            &bounds(),
        );
        EntryView::build(&key, &counters, None, text, "<missing>")
    }

    fn snapshot(entries: Vec<EntryView>) -> Snapshot {
        Snapshot {
            header: SnapshotHeader::new(Utc::now(), 0, vec![None; 2], 10.0, &bounds()),
            entries,
        }
    }

    #[test]
    fn view_carries_key_and_stats() {
        let v = view(7, 1, Some("select 1".into()));
        assert_eq!(v.key(), SampleKey::new(7, 10, 20, 0x0a00_0001).in_bucket(1));
        assert_eq!(v.client_ip, "10.0.0.1");
        assert_eq!(v.exec.calls, 1);
        assert_eq!(v.exec.rows, 2);
        assert_eq!(v.total_calls(), 1);
        assert!(v.text_available);
        assert_eq!(v.resp_calls.iter().sum::<u64>(), 1);
    }

    #[test]
    fn missing_text_uses_placeholder() {
        let v = view(7, 0, None);
        assert_eq!(v.query, "<missing>");
        assert!(!v.text_available);
    }

    #[test]
    fn iteration_and_filters() {
        let snap = snapshot(vec![view(1, 0, None), view(2, 1, None), view(3, 1, None)]);
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.in_bucket(1).count(), 2);
        assert!(snap.find(&snap.entries[0].key()).is_some());
        let ids: Vec<u64> = (&snap).into_iter().map(|v| v.query_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(snap.into_iter().count(), 3);
    }

    #[test]
    fn serializes_to_json() {
        let snap = snapshot(vec![view(1, 0, Some("select 1".into()))]);
        let json = snap.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["entries"][0]["query"], "select 1");
        assert_eq!(value["entries"][0]["exec"]["calls"], 1);
        assert_eq!(value["header"]["response_time_ranges"].as_array().unwrap().len(), 10);
    }
}
