//! Burndown aggregation over recorded snapshots.
//!
//! Snapshots are grouped by calendar day in the configured timezone. Within a
//! day the latest snapshot of each sprint represents it. A day that lacks a
//! snapshot for one of the sprints borrows one: from the nearest earlier day
//! that has it, or only when no earlier day does, from the nearest later day.
//! After filling, every day carries exactly one snapshot per sprint.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use super::workflow::Workflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuePoints {
    pub issue_id: i64,
    pub points: i64,
    pub state: i64,
}

#[derive(Debug, Clone)]
pub struct SnapshotSample {
    pub snapshot_id: i64,
    pub sprint_id: i64,
    pub taken_at: DateTime<Utc>,
    pub issues: Vec<IssuePoints>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitmentFilter {
    All,
    /// Only issues committed to for their sprint.
    CommittedOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BurndownDay {
    pub date: NaiveDate,
    /// `dd/mm`
    pub label: String,
    pub completed: i64,
    pub remaining: i64,
    pub total: i64,
    /// Sprint id to the snapshot id representing it on this day.
    pub sprint_snapshots: BTreeMap<i64, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Burndown {
    pub days: Vec<BurndownDay>,
    /// Completed share of the most recent day, in percent. Absent when that
    /// day has no points at all.
    pub completion: Option<i64>,
}

type DayGroup<'a> = BTreeMap<i64, &'a SnapshotSample>;

/// Latest snapshot per sprint for each local calendar day, oldest day first.
fn group_by_day<'a>(samples: &'a [SnapshotSample], tz: Tz) -> Vec<(NaiveDate, DayGroup<'a>)> {
    let mut ordered: Vec<&SnapshotSample> = samples.iter().collect();
    ordered.sort_by_key(|s| (s.taken_at, s.snapshot_id));

    let mut days: BTreeMap<NaiveDate, DayGroup<'a>> = BTreeMap::new();
    for sample in ordered {
        let date = sample.taken_at.with_timezone(&tz).date_naive();
        days.entry(date).or_default().insert(sample.sprint_id, sample);
    }
    days.into_iter().collect()
}

/// Give every day a snapshot for every sprint seen in any day.
fn fill_gaps<'a>(groups: &[(NaiveDate, DayGroup<'a>)]) -> Vec<(NaiveDate, DayGroup<'a>)> {
    let expected: BTreeSet<i64> = groups
        .iter()
        .flat_map(|(_, group)| group.keys().copied())
        .collect();

    groups
        .iter()
        .enumerate()
        .map(|(index, (date, group))| {
            let mut filled = group.clone();
            for sprint_id in &expected {
                if filled.contains_key(sprint_id) {
                    continue;
                }
                let earlier = groups[..index]
                    .iter()
                    .rev()
                    .find_map(|(_, g)| g.get(sprint_id));
                let borrowed = earlier.or_else(|| {
                    groups[index + 1..]
                        .iter()
                        .find_map(|(_, g)| g.get(sprint_id))
                });
                if let Some(sample) = borrowed {
                    filled.insert(*sprint_id, *sample);
                }
            }
            (*date, filled)
        })
        .collect()
}

pub fn completion_percent(completed: i64, total: i64) -> Option<i64> {
    (total > 0).then(|| completed * 100 / total)
}

pub fn aggregate(
    samples: &[SnapshotSample],
    commitments: &HashMap<i64, HashSet<i64>>,
    filter: CommitmentFilter,
    workflow: &Workflow,
    tz: Tz,
) -> Burndown {
    let groups = fill_gaps(&group_by_day(samples, tz));

    let days: Vec<BurndownDay> = groups
        .into_iter()
        .map(|(date, group)| {
            let mut day = BurndownDay {
                date,
                label: date.format("%d/%m").to_string(),
                completed: 0,
                remaining: 0,
                total: 0,
                sprint_snapshots: BTreeMap::new(),
            };

            for (sprint_id, sample) in group {
                day.sprint_snapshots.insert(sprint_id, sample.snapshot_id);
                let committed = commitments.get(&sprint_id);

                for issue in &sample.issues {
                    if filter == CommitmentFilter::CommittedOnly
                        && !committed.is_some_and(|ids| ids.contains(&issue.issue_id))
                    {
                        continue;
                    }
                    if workflow.is_complete(issue.state) {
                        day.completed += issue.points;
                    } else if workflow.is_incomplete(issue.state) {
                        day.remaining += issue.points;
                    }
                    day.total += issue.points;
                }
            }
            day
        })
        .collect();

    let completion = days
        .last()
        .and_then(|day| completion_percent(day.completed, day.total));

    Burndown { days, completion }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::super::workflow::{DEFAULT_POINT_PATTERN, default_complete_states, default_states};
    use super::*;

    const BUILDING: i64 = 1;
    const CLOSED: i64 = 4;

    fn workflow() -> Workflow {
        Workflow::new(default_states(), default_complete_states(), DEFAULT_POINT_PATTERN).unwrap()
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    fn sample(snapshot_id: i64, sprint_id: i64, taken_at: DateTime<Utc>, issues: &[(i64, i64, i64)]) -> SnapshotSample {
        SnapshotSample {
            snapshot_id,
            sprint_id,
            taken_at,
            issues: issues
                .iter()
                .map(|&(issue_id, points, state)| IssuePoints {
                    issue_id,
                    points,
                    state,
                })
                .collect(),
        }
    }

    fn run(samples: &[SnapshotSample]) -> Burndown {
        aggregate(samples, &HashMap::new(), CommitmentFilter::All, &workflow(), chrono_tz::UTC)
    }

    #[test]
    fn latest_snapshot_of_the_day_represents_the_sprint() {
        let samples = vec![
            sample(1, 10, at(3, 9), &[(1, 5, BUILDING)]),
            sample(2, 10, at(3, 17), &[(1, 5, CLOSED)]),
        ];
        let burndown = run(&samples);

        assert_eq!(burndown.days.len(), 1);
        let day = &burndown.days[0];
        assert_eq!(day.sprint_snapshots, BTreeMap::from([(10, 2)]));
        assert_eq!((day.completed, day.remaining, day.total), (5, 0, 5));
        assert_eq!(day.label, "03/03");
        assert_eq!(burndown.completion, Some(100));
    }

    #[test]
    fn every_day_has_one_point_per_sprint_after_filling() {
        let samples = vec![
            sample(1, 10, at(1, 9), &[(1, 3, BUILDING)]),
            sample(2, 20, at(2, 9), &[(2, 2, BUILDING)]),
            sample(3, 30, at(4, 9), &[(3, 1, BUILDING)]),
        ];
        let burndown = run(&samples);

        assert_eq!(burndown.days.len(), 3);
        for day in &burndown.days {
            assert_eq!(day.sprint_snapshots.len(), 3, "day {}", day.label);
            assert_eq!(day.total, 6);
        }
    }

    #[test]
    fn earlier_day_is_preferred_even_when_a_later_one_is_closer() {
        // Sprint 20 has snapshots on day 1 and day 6; day 5 sits one day from
        // day 6 but borrows from day 1.
        let samples = vec![
            sample(1, 10, at(1, 9), &[(1, 1, BUILDING)]),
            sample(2, 20, at(1, 9), &[(2, 2, BUILDING)]),
            sample(3, 10, at(5, 9), &[(1, 1, BUILDING)]),
            sample(4, 20, at(6, 9), &[(2, 8, BUILDING)]),
            sample(5, 10, at(6, 9), &[(1, 1, BUILDING)]),
        ];
        let burndown = run(&samples);

        let day5 = burndown
            .days
            .iter()
            .find(|d| d.date == NaiveDate::from_ymd_opt(2025, 3, 5).unwrap())
            .unwrap();
        assert_eq!(day5.sprint_snapshots[&20], 2);
        assert_eq!(day5.total, 3);
    }

    #[test]
    fn later_day_is_used_only_without_an_earlier_one() {
        let samples = vec![
            sample(1, 10, at(1, 9), &[(1, 1, BUILDING)]),
            sample(2, 10, at(2, 9), &[(1, 1, BUILDING)]),
            sample(3, 20, at(3, 9), &[(2, 4, BUILDING)]),
            sample(4, 20, at(4, 9), &[(2, 9, BUILDING)]),
        ];
        let burndown = run(&samples);

        assert_eq!(burndown.days[0].sprint_snapshots[&20], 3);
        assert_eq!(burndown.days[1].sprint_snapshots[&20], 3);
        // Day 4 borrows sprint 10 from day 2, the nearest earlier day.
        assert_eq!(burndown.days[3].sprint_snapshots[&10], 2);
    }

    #[test]
    fn committed_only_counts_committed_issues() {
        let samples = vec![sample(
            1,
            10,
            at(3, 9),
            &[(1, 3, CLOSED), (2, 5, BUILDING), (3, 8, BUILDING)],
        )];
        let commitments = HashMap::from([(10, HashSet::from([1, 2]))]);

        let burndown = aggregate(
            &samples,
            &commitments,
            CommitmentFilter::CommittedOnly,
            &workflow(),
            chrono_tz::UTC,
        );

        let day = &burndown.days[0];
        assert_eq!((day.completed, day.remaining, day.total), (3, 5, 8));
        assert_eq!(burndown.completion, Some(37));
    }

    #[test]
    fn zero_total_has_no_completion() {
        let samples = vec![sample(1, 10, at(3, 9), &[(1, 0, BUILDING)])];
        let burndown = run(&samples);
        assert_eq!(burndown.days[0].total, 0);
        assert_eq!(burndown.completion, None);

        let committed = aggregate(
            &samples,
            &HashMap::new(),
            CommitmentFilter::CommittedOnly,
            &workflow(),
            chrono_tz::UTC,
        );
        assert_eq!(committed.completion, None);
    }

    #[test]
    fn days_follow_the_configured_timezone() {
        // 05:00 UTC on the 3rd is still the 2nd in Vancouver.
        let samples = vec![
            sample(1, 10, at(3, 5), &[(1, 1, BUILDING)]),
            sample(2, 10, at(3, 20), &[(1, 1, CLOSED)]),
        ];
        let burndown = aggregate(
            &samples,
            &HashMap::new(),
            CommitmentFilter::All,
            &workflow(),
            chrono_tz::America::Vancouver,
        );

        let labels: Vec<&str> = burndown.days.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["02/03", "03/03"]);
    }

    #[test]
    fn no_samples_means_no_days() {
        let burndown = run(&[]);
        assert!(burndown.days.is_empty());
        assert_eq!(burndown.completion, None);
    }
}
