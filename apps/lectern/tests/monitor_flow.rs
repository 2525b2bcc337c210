use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;

use lectern_sync_core::protocol::{EventMessage, Student, StudentStatus, event_type};
use lectern_sync_core::sync::SnapshotFetcher;
use lectern_sync_core::transport::MockTransport;
use lectern_sync_core::{ConnectionState, MonitorConfig, MonitorSync};

struct SharedFetcher {
    roster: Arc<Mutex<Vec<Student>>>,
}

#[async_trait]
impl SnapshotFetcher for SharedFetcher {
    async fn fetch(&self) -> anyhow::Result<Vec<Student>> {
        Ok(self.roster.lock().clone())
    }
}

fn student(id: &str, team: &str) -> Student {
    Student {
        id: id.to_string(),
        name: id.to_string(),
        team: team.to_string(),
        status: StudentStatus::Active,
        progress: 50.0,
        last_activity: Utc::now(),
        is_urgent: false,
        confirmed: true,
    }
}

fn classroom() -> Vec<Student> {
    vec![
        student("a1", "TeamA"),
        student("a2", "TeamA"),
        student("b1", "TeamB"),
        student("b2", "TeamB"),
        student("b3", "TeamB"),
    ]
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn help_request_reorders_the_display() {
    let (transport, mut control) = MockTransport::pair();
    let roster = Arc::new(Mutex::new(classroom()));
    let sync = MonitorSync::new(
        Arc::new(transport),
        Arc::new(SharedFetcher {
            roster: roster.clone(),
        }),
        MonitorConfig::default(),
    );
    sync.start().unwrap();

    let link = control.next_link().await.expect("connected");
    let view = sync.view();
    wait_until(|| view.borrow().stats.total_students == 5).await;

    // No urgency anywhere: TeamB's size term puts it first.
    {
        let view = view.borrow();
        assert_eq!(view.display_teams.len(), 2);
        assert_eq!(view.display_teams[0].team, "TeamB");
        assert_eq!(view.display_teams[1].team, "TeamA");
        assert_eq!(view.stats.teams_needing_help, 0);
    }

    // A TeamA member raises a hand. The backend flips the flag in its own
    // store before pushing the delta, so the backstop refresh agrees.
    roster.lock().iter_mut().find(|s| s.id == "a1").unwrap().is_urgent = true;
    link.push_message(&EventMessage::new(
        event_type::HELP_REQUEST,
        json!({ "student_id": "a1", "requested_at": Utc::now() }),
    ));

    wait_until(|| view.borrow().stats.teams_needing_help == 1).await;
    {
        let view = view.borrow();
        assert_eq!(view.display_teams[0].team, "TeamA");
        assert!(view.display_teams[0].urgent_count >= 1);
    }

    // Urgency tightened the cadence as well.
    assert_eq!(
        sync.cadence_stats().current_interval,
        Duration::from_secs(2)
    );

    // Resolving the request relaxes everything again.
    roster.lock().iter_mut().find(|s| s.id == "a1").unwrap().is_urgent = false;
    link.push_message(&EventMessage::new(
        event_type::HELP_RESOLVED,
        json!({ "student_id": "a1", "resolved_at": Utc::now() }),
    ));
    wait_until(|| view.borrow().stats.teams_needing_help == 0).await;
    wait_until(|| view.borrow().display_teams[0].team == "TeamB").await;

    sync.shutdown();
    assert_eq!(sync.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn delta_ahead_of_snapshot_is_kept_unconfirmed() {
    let (transport, mut control) = MockTransport::pair();
    let roster = Arc::new(Mutex::new(Vec::new()));
    let sync = MonitorSync::new(
        Arc::new(transport),
        Arc::new(SharedFetcher {
            roster: roster.clone(),
        }),
        MonitorConfig::default(),
    );
    sync.start().unwrap();

    let link = control.next_link().await.expect("connected");
    let view = sync.view();

    // A progress delta for a student the snapshot has never mentioned.
    link.push_message(&EventMessage::new(
        event_type::PROGRESS_UPDATE,
        json!({ "student_id": "ghost", "progress": 30.0 }),
    ));
    wait_until(|| view.borrow().stats.total_students == 1).await;

    // The next snapshot includes it; a manual refresh confirms the entity.
    roster.lock().push(student("ghost", "TeamG"));
    sync.manual_refresh();
    wait_until(|| {
        let view = view.borrow();
        view.stats.total_students == 1 && view.teams.iter().any(|t| t.team == "TeamG")
    })
    .await;

    sync.shutdown();
}

#[tokio::test]
async fn outbound_actions_reach_the_wire() {
    let (transport, mut control) = MockTransport::pair();
    let sync = MonitorSync::new(
        Arc::new(transport),
        Arc::new(SharedFetcher {
            roster: Arc::new(Mutex::new(Vec::new())),
        }),
        MonitorConfig::default(),
    );
    sync.start().unwrap();

    let mut link = control.next_link().await.expect("connected");
    wait_until(|| sync.connection_state() == ConnectionState::Connected).await;

    assert!(sync.respond_to_help("a1", true));
    let frame = link.next_outbound().await.expect("frame");
    assert!(frame.contains(r#""type":"help_response""#));
    assert!(frame.contains(r#""student_id":"a1""#));

    sync.shutdown();
    assert!(!sync.send_instructor_status("available"));
}
