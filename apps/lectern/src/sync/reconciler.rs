use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::protocol::{
    CellExecution, EventMessage, HelpRequest, HelpResolved, ProgressUpdate, Student, StudentPatch,
    StudentStatus, event_type,
};

/// What handling one push event implies for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Entity collection changed; a re-rank is due.
    Applied,
    /// Urgency flipped. The backend economizes help payloads, so the caller
    /// should schedule an uncounted full refresh shortly to pick up whatever
    /// fields the partial message omitted.
    AppliedNeedsUrgencyRefresh,
    /// Nothing changed (unknown type, malformed payload, tombstoned id).
    Ignored,
}

struct RosterState {
    students: HashMap<String, Student>,
    /// Ids removed by the most recent snapshot. Deltas for these are dropped
    /// until a later snapshot re-introduces the id; a full snapshot always
    /// supersedes older push events.
    tombstones: HashSet<String>,
}

/// Canonical entity collection. Full snapshots replace it wholesale and are
/// the only removal path; partial updates patch fields in place, inserting
/// unknown ids as unconfirmed so a delta racing ahead of the next refresh is
/// never lost.
pub struct RosterReconciler {
    state: Mutex<RosterState>,
}

impl Default for RosterReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl RosterReconciler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RosterState {
                students: HashMap::new(),
                tombstones: HashSet::new(),
            }),
        }
    }

    pub fn apply_full_snapshot(&self, snapshot: Vec<Student>) {
        let mut state = self.state.lock();
        let mut next: HashMap<String, Student> = HashMap::with_capacity(snapshot.len());
        for mut student in snapshot {
            student.confirmed = true;
            next.insert(student.id.clone(), student);
        }
        state.tombstones = state
            .students
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        tracing::debug!(
            students = next.len(),
            removed = state.tombstones.len(),
            "applied full snapshot"
        );
        state.students = next;
    }

    /// Merge `patch` into the entity, or insert an unconfirmed placeholder if
    /// the id is unknown. Returns false only when the id was removed by the
    /// latest snapshot.
    pub fn apply_partial_update(&self, id: &str, patch: StudentPatch) -> bool {
        let mut state = self.state.lock();
        if state.tombstones.contains(id) {
            tracing::debug!(student = %id, "dropping delta for snapshot-removed entity");
            return false;
        }
        let student = state
            .students
            .entry(id.to_string())
            .or_insert_with(|| Student::unconfirmed(id));
        merge_patch(student, patch);
        true
    }

    /// Route one push event into the collection.
    pub fn handle_event(&self, message: &EventMessage) -> ReconcileOutcome {
        match message.kind.as_str() {
            event_type::PROGRESS_UPDATE => {
                let Some(update) = parse::<ProgressUpdate>(message) else {
                    return ReconcileOutcome::Ignored;
                };
                let patch = StudentPatch {
                    progress: Some(update.progress),
                    status: update.status,
                    last_activity: Some(update.last_activity.unwrap_or(message.timestamp)),
                    ..Default::default()
                };
                self.applied(&update.student_id, patch)
            }
            event_type::CELL_EXECUTION => {
                let Some(execution) = parse::<CellExecution>(message) else {
                    return ReconcileOutcome::Ignored;
                };
                let patch = StudentPatch {
                    status: Some(StudentStatus::Active),
                    last_activity: Some(execution.executed_at),
                    ..Default::default()
                };
                self.applied(&execution.student_id, patch)
            }
            event_type::HELP_REQUEST => {
                let Some(request) = parse::<HelpRequest>(message) else {
                    return ReconcileOutcome::Ignored;
                };
                let patch = StudentPatch {
                    is_urgent: Some(true),
                    last_activity: Some(request.requested_at),
                    ..Default::default()
                };
                match self.apply_partial_update(&request.student_id, patch) {
                    true => ReconcileOutcome::AppliedNeedsUrgencyRefresh,
                    false => ReconcileOutcome::Ignored,
                }
            }
            event_type::HELP_RESOLVED => {
                let Some(resolved) = parse::<HelpResolved>(message) else {
                    return ReconcileOutcome::Ignored;
                };
                let patch = StudentPatch {
                    is_urgent: Some(false),
                    last_activity: Some(resolved.resolved_at),
                    ..Default::default()
                };
                match self.apply_partial_update(&resolved.student_id, patch) {
                    true => ReconcileOutcome::AppliedNeedsUrgencyRefresh,
                    false => ReconcileOutcome::Ignored,
                }
            }
            _ => ReconcileOutcome::Ignored,
        }
    }

    fn applied(&self, id: &str, patch: StudentPatch) -> ReconcileOutcome {
        match self.apply_partial_update(id, patch) {
            true => ReconcileOutcome::Applied,
            false => ReconcileOutcome::Ignored,
        }
    }

    /// Owned read snapshot; callers never see a live reference.
    pub fn students(&self) -> Vec<Student> {
        self.state.lock().students.values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Student> {
        self.state.lock().students.get(id).cloned()
    }

    pub fn urgent_count(&self) -> usize {
        self.state
            .lock()
            .students
            .values()
            .filter(|s| s.is_urgent)
            .count()
    }

    pub fn len(&self) -> usize {
        self.state.lock().students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn merge_patch(student: &mut Student, patch: StudentPatch) {
    if let Some(name) = patch.name {
        student.name = name;
    }
    if let Some(team) = patch.team {
        student.team = team;
    }
    if let Some(status) = patch.status {
        student.status = status;
    }
    if let Some(progress) = patch.progress {
        student.progress = progress;
    }
    if let Some(last_activity) = patch.last_activity {
        student.last_activity = last_activity;
    }
    if let Some(is_urgent) = patch.is_urgent {
        student.is_urgent = is_urgent;
    }
}

fn parse<T: serde::de::DeserializeOwned>(message: &EventMessage) -> Option<T> {
    match serde_json::from_value(message.data.clone()) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(event = %message.kind, error = %err, "dropping malformed event payload");
            None
        }
    }
}
