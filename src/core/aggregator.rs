use chrono::{DateTime, Days, FixedOffset, Local, NaiveDate, TimeZone};
use serde::Serialize;

use super::models::{Finding, Severity, Task};
use super::session::Scope;

/// Number of calendar days in the trend window, reference day included.
pub const TREND_DAYS: u64 = 7;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeverityHistogram {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

impl SeverityHistogram {
    fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::High => self.high += 1,
            Severity::Critical => self.critical += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
            Severity::Critical => self.critical,
        }
    }

    pub fn total(&self) -> usize {
        self.low + self.medium + self.high + self.critical
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub scope: Scope,
    pub reference_date: NaiveDate,
    pub task_count: usize,
    pub result_count: usize,
    pub severity_histogram: SeverityHistogram,
    /// Findings whose severity matched none of the four buckets.
    pub unbucketed: usize,
    pub trend: Vec<TrendPoint>,
}

struct TrendWindow {
    points: Vec<TrendPoint>,
    reference: NaiveDate,
}

impl TrendWindow {
    fn ending_at(reference: NaiveDate) -> Self {
        let points = (0..TREND_DAYS)
            .rev()
            .map(|back| TrendPoint {
                date: reference - Days::new(back),
                count: 0,
            })
            .collect();
        Self { points, reference }
    }

    fn count<Tz: TimeZone>(&mut self, timestamp: Option<&DateTime<FixedOffset>>, tz: &Tz) {
        let Some(timestamp) = timestamp else { return };
        let date = timestamp.with_timezone(tz).date_naive();
        let back = (self.reference - date).num_days();
        if (0..TREND_DAYS as i64).contains(&back) {
            let slot = self.points.len() - 1 - back as usize;
            self.points[slot].count += 1;
        }
    }
}

/// Build a dashboard snapshot from already-retrieved data.
///
/// The trend counts different things per scope: over an `All` dataset each
/// finding is placed by its own timestamp, over an `Own` dataset each task is
/// placed by its creation date. Calendar dates are taken in `tz`.
pub fn aggregate<Tz: TimeZone>(
    scope: Scope,
    tasks: &[Task],
    findings: &[Finding],
    reference_date: NaiveDate,
    tz: &Tz,
) -> DashboardSnapshot {
    let mut histogram = SeverityHistogram::default();
    let mut unbucketed = 0;
    for finding in findings {
        match finding.severity_bucket() {
            Some(severity) => histogram.bump(severity),
            None => unbucketed += 1,
        }
    }

    let mut window = TrendWindow::ending_at(reference_date);
    match scope {
        Scope::All => findings
            .iter()
            .for_each(|finding| window.count(finding.timestamp.as_ref(), tz)),
        Scope::Own => tasks
            .iter()
            .for_each(|task| window.count(task.created_at.as_ref(), tz)),
    }

    DashboardSnapshot {
        scope,
        reference_date,
        task_count: tasks.len(),
        result_count: findings.len(),
        severity_histogram: histogram,
        unbucketed,
        trend: window.points,
    }
}

/// Snapshot for today in the local time zone.
pub fn aggregate_now(scope: Scope, tasks: &[Task], findings: &[Finding]) -> DashboardSnapshot {
    aggregate(scope, tasks, findings, Local::now().date_naive(), &Local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::TaskStatus;
    use crate::core::normalize::parse_timestamp;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn finding(id: u64, severity: &str, timestamp: Option<&str>) -> Finding {
        Finding {
            id,
            task_id: 1,
            vulnerability: format!("vuln-{}", id),
            severity: severity.to_string(),
            target: "https://example.com".to_string(),
            timestamp: timestamp.and_then(parse_timestamp),
            detail: String::new(),
        }
    }

    fn task(id: u64, created_at: Option<&str>) -> Task {
        Task {
            id,
            target: format!("host-{}", id),
            template: "cves/".to_string(),
            status: TaskStatus::Done,
            user_id: Some(1),
            created_at: created_at.and_then(parse_timestamp),
        }
    }

    fn counts(snapshot: &DashboardSnapshot) -> Vec<usize> {
        snapshot.trend.iter().map(|p| p.count).collect()
    }

    #[test]
    fn test_histogram_normalizes_severity() {
        let findings = vec![
            finding(1, "Low", None),
            finding(2, " HIGH", None),
            finding(3, "high", None),
        ];

        let snapshot = aggregate(Scope::All, &[], &findings, date(2024, 1, 10), &Utc);
        assert_eq!(
            snapshot.severity_histogram,
            SeverityHistogram { low: 1, medium: 0, high: 2, critical: 0 }
        );
        assert_eq!(snapshot.result_count, 3);
        assert_eq!(snapshot.unbucketed, 0);
    }

    #[test]
    fn test_unknown_severity_counts_only_in_total() {
        let findings = vec![finding(1, "info", None), finding(2, "", None), finding(3, "critical", None)];

        let snapshot = aggregate(Scope::All, &[], &findings, date(2024, 1, 10), &Utc);
        assert_eq!(snapshot.result_count, 3);
        assert_eq!(snapshot.severity_histogram.total(), 1);
        assert_eq!(snapshot.unbucketed, 2);
    }

    #[test]
    fn test_trend_axis() {
        let snapshot = aggregate(Scope::Own, &[], &[], date(2024, 3, 2), &Utc);
        let dates: Vec<NaiveDate> = snapshot.trend.iter().map(|p| p.date).collect();
        assert_eq!(
            dates,
            vec![
                date(2024, 2, 25),
                date(2024, 2, 26),
                date(2024, 2, 27),
                date(2024, 2, 28),
                date(2024, 2, 29),
                date(2024, 3, 1),
                date(2024, 3, 2),
            ]
        );
        assert_eq!(counts(&snapshot), vec![0; 7]);
    }

    #[test]
    fn test_old_finding_excluded_from_trend_only() {
        let findings = vec![
            finding(1, "medium", Some("2024-01-03T09:00:00Z")),
            finding(2, "low", Some("2024-01-04T09:00:00Z")),
            finding(3, "low", Some("2024-01-10T23:00:00Z")),
        ];

        let snapshot = aggregate(Scope::All, &[], &findings, date(2024, 1, 10), &Utc);
        assert_eq!(snapshot.result_count, 3);
        assert_eq!(snapshot.severity_histogram.medium, 1);
        assert_eq!(counts(&snapshot), vec![1, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_future_and_undated_excluded() {
        let findings = vec![
            finding(1, "low", Some("2024-01-11T00:00:01Z")),
            finding(2, "low", None),
        ];

        let snapshot = aggregate(Scope::All, &[], &findings, date(2024, 1, 10), &Utc);
        assert_eq!(counts(&snapshot).iter().sum::<usize>(), 0);
        assert_eq!(snapshot.severity_histogram.low, 2);
    }

    #[test]
    fn test_own_scope_counts_task_creation() {
        let tasks = vec![
            task(1, Some("2024-01-10T08:00:00+00:00")),
            task(2, Some("2024-01-09T08:00:00+00:00")),
            task(3, Some("2023-12-01T08:00:00+00:00")),
        ];
        // Finding timestamps are ignored in this scope.
        let findings = vec![finding(1, "high", Some("2024-01-05T00:00:00Z"))];

        let snapshot = aggregate(Scope::Own, &tasks, &findings, date(2024, 1, 10), &Utc);
        assert_eq!(snapshot.task_count, 3);
        assert_eq!(snapshot.result_count, 1);
        assert_eq!(counts(&snapshot), vec![0, 0, 0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_all_scope_ignores_task_creation() {
        let tasks = vec![task(1, Some("2024-01-10T08:00:00+00:00"))];

        let snapshot = aggregate(Scope::All, &tasks, &[], date(2024, 1, 10), &Utc);
        assert_eq!(counts(&snapshot), vec![0; 7]);
    }

    #[test]
    fn test_calendar_date_uses_time_zone() {
        // 2024-01-09 20:00 UTC is already 2024-01-10 in UTC+8.
        let findings = vec![finding(1, "low", Some("2024-01-09T20:00:00Z"))];
        let east = FixedOffset::east_opt(8 * 3600).unwrap();

        let in_utc = aggregate(Scope::All, &[], &findings, date(2024, 1, 10), &Utc);
        let in_east = aggregate(Scope::All, &[], &findings, date(2024, 1, 10), &east);
        assert_eq!(counts(&in_utc), vec![0, 0, 0, 0, 0, 1, 0]);
        assert_eq!(counts(&in_east), vec![0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_deterministic() {
        let findings = vec![finding(1, "low", Some("2024-01-09T20:00:00Z")), finding(2, "x", None)];
        let tasks = vec![task(1, Some("2024-01-08"))];
        let a = aggregate(Scope::All, &tasks, &findings, date(2024, 1, 10), &Utc);
        let b = aggregate(Scope::All, &tasks, &findings, date(2024, 1, 10), &Utc);
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn prop_histogram_bounded_and_trend_shape(
            severities in prop::collection::vec(
                prop::sample::select(vec!["low", "Medium", " HIGH ", "critical", "info", "", "unknown"]),
                0..40,
            ),
            offsets in prop::collection::vec(0i64..20, 0..40),
            day in 1u32..28,
        ) {
            let reference = date(2024, 2, day);
            let findings: Vec<Finding> = severities
                .iter()
                .enumerate()
                .map(|(i, severity)| {
                    let when = offsets.get(i).map(|back| {
                        (reference - chrono::Duration::days(*back)).format("%Y-%m-%d").to_string()
                    });
                    finding(i as u64, severity, when.as_deref())
                })
                .collect();

            let snapshot = aggregate(Scope::All, &[], &findings, reference, &Utc);
            let all_known = findings.iter().all(|f| f.severity_bucket().is_some());

            prop_assert!(snapshot.severity_histogram.total() <= snapshot.result_count);
            prop_assert_eq!(snapshot.severity_histogram.total() == snapshot.result_count, all_known);
            prop_assert_eq!(snapshot.trend.len(), 7);
            prop_assert_eq!(snapshot.trend[6].date, reference);
            for pair in snapshot.trend.windows(2) {
                prop_assert_eq!(pair[1].date - pair[0].date, chrono::Duration::days(1));
            }
            prop_assert!(snapshot.trend.iter().map(|p| p.count).sum::<usize>() <= snapshot.result_count);
        }
    }
}
