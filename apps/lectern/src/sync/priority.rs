use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{Student, StudentStatus};

/// Derived per-team priority. Recomputed from the current collection on every
/// ranking pass; never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamPriority {
    pub team: String,
    pub member_count: usize,
    pub active_count: usize,
    pub urgent_count: usize,
    pub average_progress: f64,
    pub recency_bonus: u32,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankingStats {
    pub total_students: usize,
    pub active_teams: usize,
    pub teams_needing_help: usize,
}

/// Output of one ranking pass: every team in naming order, the prioritized
/// ordering, and the size-bounded display subset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RankedView {
    pub teams: Vec<TeamPriority>,
    pub prioritized: Vec<TeamPriority>,
    pub display_teams: Vec<TeamPriority>,
    pub stats: RankingStats,
}

/// Group, score, and sort the collection. Pure: same students and clock in,
/// same view out.
pub fn rank_teams(students: &[Student], now: DateTime<Utc>, display_limit: usize) -> RankedView {
    // BTreeMap keeps the unranked list in stable naming order.
    let mut groups: BTreeMap<&str, Vec<&Student>> = BTreeMap::new();
    for student in students {
        groups.entry(student.team.as_str()).or_default().push(student);
    }

    let teams: Vec<TeamPriority> = groups
        .iter()
        .map(|(team, members)| score_team(team, members, now))
        .collect();

    let mut prioritized = teams.clone();
    // Descending score; equal scores fall back to naming order so the display
    // does not flicker between recomputations.
    prioritized.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.team.cmp(&b.team)));

    let display_teams: Vec<TeamPriority> =
        prioritized.iter().take(display_limit).cloned().collect();

    let stats = RankingStats {
        total_students: students.len(),
        active_teams: teams.iter().filter(|t| t.active_count > 0).count(),
        teams_needing_help: teams.iter().filter(|t| t.urgent_count > 0).count(),
    };

    RankedView {
        teams,
        prioritized,
        display_teams,
        stats,
    }
}

fn score_team(team: &str, members: &[&Student], now: DateTime<Utc>) -> TeamPriority {
    let member_count = members.len();
    let active_count = members
        .iter()
        .filter(|s| s.status == StudentStatus::Active)
        .count();
    let urgent_count = members.iter().filter(|s| s.is_urgent).count();
    let average_progress = if member_count > 0 {
        members.iter().map(|s| s.progress).sum::<f64>() / member_count as f64
    } else {
        0.0
    };
    let last_activity = members.iter().map(|s| s.last_activity).max();
    let recency_bonus = last_activity.map(|t| recency_bonus(t, now)).unwrap_or(0);

    let mut score = 0.0;
    if urgent_count > 0 {
        // Urgency dominates every other term.
        score += 1000.0 + 100.0 * urgent_count as f64;
    }
    score += 10.0 * active_count as f64;
    score += 2.0 * (100.0 - average_progress);
    score += 5.0 * member_count as f64;
    score += recency_bonus as f64;

    TeamPriority {
        team: team.to_string(),
        member_count,
        active_count,
        urgent_count,
        average_progress,
        recency_bonus,
        score,
    }
}

/// 50 for "just now", 20 for "minutes ago", nothing beyond that.
fn recency_bonus(last_activity: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let elapsed = now.signed_duration_since(last_activity).num_seconds();
    if elapsed < 60 {
        50
    } else if elapsed < 300 {
        20
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn student(id: &str, team: &str, progress: f64, urgent: bool, now: DateTime<Utc>) -> Student {
        Student {
            id: id.to_string(),
            name: id.to_string(),
            team: team.to_string(),
            status: StudentStatus::Active,
            progress,
            last_activity: now - Duration::seconds(600),
            is_urgent: urgent,
            confirmed: true,
        }
    }

    #[test]
    fn identical_scores_sort_by_team_name() {
        let now = Utc::now();
        let students = vec![
            student("a1", "Zebra", 50.0, false, now),
            student("b1", "Apple", 50.0, false, now),
        ];
        let view = rank_teams(&students, now, 8);
        assert_eq!(view.prioritized[0].team, "Apple");
        assert_eq!(view.prioritized[1].team, "Zebra");
        assert_eq!(view.prioritized[0].score, view.prioritized[1].score);
    }

    #[test]
    fn any_urgent_member_outranks_every_calm_team() {
        let now = Utc::now();
        // Calm team with every non-urgency term maxed out.
        let mut students: Vec<Student> = (0..10)
            .map(|i| student(&format!("b{i}"), "BigTeam", 0.0, false, now))
            .collect();
        students.push(student("a1", "SmallTeam", 100.0, true, now));

        let view = rank_teams(&students, now, 8);
        assert_eq!(view.prioritized[0].team, "SmallTeam");
        assert_eq!(view.prioritized[0].urgent_count, 1);
    }

    #[test]
    fn lower_progress_ranks_higher() {
        let now = Utc::now();
        let students = vec![
            student("a1", "Ahead", 90.0, false, now),
            student("b1", "Behind", 10.0, false, now),
        ];
        let view = rank_teams(&students, now, 8);
        assert_eq!(view.prioritized[0].team, "Behind");
    }

    #[test]
    fn recency_bonus_tiers() {
        let now = Utc::now();
        assert_eq!(recency_bonus(now - Duration::seconds(5), now), 50);
        assert_eq!(recency_bonus(now - Duration::seconds(120), now), 20);
        assert_eq!(recency_bonus(now - Duration::seconds(600), now), 0);
    }

    #[test]
    fn display_is_bounded_but_full_list_remains() {
        let now = Utc::now();
        let students: Vec<Student> = (0..12)
            .map(|i| student(&format!("s{i}"), &format!("Team{i:02}"), 50.0, false, now))
            .collect();
        let view = rank_teams(&students, now, 8);
        assert_eq!(view.display_teams.len(), 8);
        assert_eq!(view.prioritized.len(), 12);
        assert_eq!(view.teams.len(), 12);
    }

    #[test]
    fn stats_aggregate_the_collection() {
        let now = Utc::now();
        let mut idle = student("i1", "IdleTeam", 50.0, false, now);
        idle.status = StudentStatus::Idle;
        let students = vec![
            student("a1", "TeamA", 50.0, true, now),
            student("a2", "TeamA", 60.0, false, now),
            idle,
        ];
        let view = rank_teams(&students, now, 8);
        assert_eq!(view.stats.total_students, 3);
        assert_eq!(view.stats.active_teams, 1);
        assert_eq!(view.stats.teams_needing_help, 1);
    }

    #[test]
    fn larger_team_wins_absent_other_differentiators() {
        let now = Utc::now();
        let students = vec![
            student("a1", "TeamA", 50.0, false, now),
            student("a2", "TeamA", 50.0, false, now),
            student("b1", "TeamB", 50.0, false, now),
            student("b2", "TeamB", 50.0, false, now),
            student("b3", "TeamB", 50.0, false, now),
        ];
        let view = rank_teams(&students, now, 8);
        assert_eq!(view.prioritized[0].team, "TeamB");
    }
}
