use serde::{Deserialize, Serialize};

use crate::protocol::{Student, StudentStatus};

/// CPU-heavy work the manager can push off the hot path. Payloads are owned
/// snapshots; the worker never sees a live reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum OffloadTask {
    FilterStudents {
        students: Vec<Student>,
        filters: StudentFilters,
    },
    ComputeStatistics {
        students: Vec<Student>,
    },
    SortStudents {
        students: Vec<Student>,
        key: SortKey,
        descending: bool,
    },
}

impl OffloadTask {
    pub fn kind(&self) -> &'static str {
        match self {
            OffloadTask::FilterStudents { .. } => "filter_students",
            OffloadTask::ComputeStatistics { .. } => "compute_statistics",
            OffloadTask::SortStudents { .. } => "sort_students",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TaskOutput {
    Students(Vec<Student>),
    Statistics(RosterStatistics),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StudentFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StudentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default)]
    pub urgent_only: bool,
    /// Case-insensitive substring match against the display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    Progress,
    Recency,
    Urgency,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RosterStatistics {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub offline: usize,
    pub urgent: usize,
    pub average_progress: f64,
}

/// Single entry point shared by the worker and the inline fallback, so both
/// paths produce identical output for identical input.
pub fn run(task: OffloadTask) -> anyhow::Result<TaskOutput> {
    match task {
        OffloadTask::FilterStudents { students, filters } => {
            Ok(TaskOutput::Students(filter_students(students, &filters)))
        }
        OffloadTask::ComputeStatistics { students } => {
            Ok(TaskOutput::Statistics(compute_statistics(&students)))
        }
        OffloadTask::SortStudents {
            students,
            key,
            descending,
        } => Ok(TaskOutput::Students(sort_students(students, key, descending))),
    }
}

pub fn filter_students(students: Vec<Student>, filters: &StudentFilters) -> Vec<Student> {
    let query = filters.query.as_ref().map(|q| q.to_lowercase());
    students
        .into_iter()
        .filter(|student| {
            if let Some(status) = filters.status {
                if student.status != status {
                    return false;
                }
            }
            if let Some(team) = &filters.team {
                if &student.team != team {
                    return false;
                }
            }
            if filters.urgent_only && !student.is_urgent {
                return false;
            }
            if let Some(query) = &query {
                if !student.name.to_lowercase().contains(query) {
                    return false;
                }
            }
            true
        })
        .collect()
}

pub fn compute_statistics(students: &[Student]) -> RosterStatistics {
    let mut stats = RosterStatistics {
        total: students.len(),
        ..Default::default()
    };
    for student in students {
        match student.status {
            StudentStatus::Active => stats.active += 1,
            StudentStatus::Idle => stats.idle += 1,
            StudentStatus::Offline => stats.offline += 1,
        }
        if student.is_urgent {
            stats.urgent += 1;
        }
    }
    if stats.total > 0 {
        stats.average_progress =
            students.iter().map(|s| s.progress).sum::<f64>() / stats.total as f64;
    }
    stats
}

pub fn sort_students(mut students: Vec<Student>, key: SortKey, descending: bool) -> Vec<Student> {
    // Stable sort with an id fallback keeps output deterministic across runs.
    students.sort_by(|a, b| {
        let ordering = match key {
            SortKey::Name => a.name.cmp(&b.name),
            SortKey::Progress => a.progress.total_cmp(&b.progress),
            SortKey::Recency => a.last_activity.cmp(&b.last_activity),
            SortKey::Urgency => a.is_urgent.cmp(&b.is_urgent),
        };
        let ordering = if descending { ordering.reverse() } else { ordering };
        ordering.then_with(|| a.id.cmp(&b.id))
    });
    students
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn student(id: &str, name: &str, status: StudentStatus, progress: f64, urgent: bool) -> Student {
        Student {
            id: id.to_string(),
            name: name.to_string(),
            team: "TeamA".to_string(),
            status,
            progress,
            last_activity: Utc::now(),
            is_urgent: urgent,
            confirmed: true,
        }
    }

    fn roster() -> Vec<Student> {
        vec![
            student("s1", "Ada Lovelace", StudentStatus::Active, 80.0, false),
            student("s2", "Grace Hopper", StudentStatus::Idle, 40.0, true),
            student("s3", "Alan Turing", StudentStatus::Offline, 60.0, false),
        ]
    }

    #[test]
    fn filters_compose() {
        let filters = StudentFilters {
            status: Some(StudentStatus::Idle),
            urgent_only: true,
            ..Default::default()
        };
        let out = filter_students(roster(), &filters);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "s2");
    }

    #[test]
    fn name_query_is_case_insensitive() {
        let filters = StudentFilters {
            query: Some("grace".to_string()),
            ..Default::default()
        };
        let out = filter_students(roster(), &filters);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "Grace Hopper");
    }

    #[test]
    fn statistics_count_by_status() {
        let stats = compute_statistics(&roster());
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.offline, 1);
        assert_eq!(stats.urgent, 1);
        assert!((stats.average_progress - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sort_by_progress_descending() {
        let out = sort_students(roster(), SortKey::Progress, true);
        let progress: Vec<f64> = out.iter().map(|s| s.progress).collect();
        assert_eq!(progress, vec![80.0, 60.0, 40.0]);
    }

    #[test]
    fn empty_roster_statistics_are_zeroed() {
        let stats = compute_statistics(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.average_progress, 0.0);
    }
}
