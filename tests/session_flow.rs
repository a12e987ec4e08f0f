use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};

use teamtrack_lib::audio::{AudioCueConfig, AudioManager, ClockElement};
use teamtrack_lib::events::{AppEvent, RecordingSink, ToastLevel};
use teamtrack_lib::export::{create_share_link, export_csv, resolve_link};
use teamtrack_lib::gateway::Gateway;
use teamtrack_lib::models::{MatchType, ParkStatus, SessionFormData};
use teamtrack_lib::persistence::{SessionPersistence, SAVE_FAILED_WARNING};
use teamtrack_lib::session::{SessionCoordinator, SessionDeps};
use teamtrack_lib::storage::{keys, FileStorage, KeyValueStore, MemoryStorage};
use teamtrack_lib::timer::{MatchPhase, SessionTimerState};

fn phase_changes(sink: &RecordingSink) -> Vec<(MatchPhase, MatchPhase)> {
    sink.events()
        .into_iter()
        .filter_map(|event| match event {
            AppEvent::PhaseChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn full_game_runs_through_every_phase_with_audio() {
    let store = Arc::new(MemoryStorage::new());
    let session_store = Arc::new(MemoryStorage::new());
    let sink = Arc::new(RecordingSink::new());
    let cues = AudioCueConfig::default();
    let manager = AudioManager::new(
        Box::new(ClockElement::new(Some(cues.track_length_secs))),
        session_store.clone(),
    );

    let mut deps = SessionDeps::new(store.clone(), sink.clone());
    deps.audio = Some(manager.clone());
    let session = SessionCoordinator::mount(deps).await;
    session.start_timer().await.unwrap();

    // 3 s lead-in plus 30 s of autonomous.
    tokio::time::sleep(Duration::from_millis(33_500)).await;
    let pickup = session.timer_state().await;
    assert_eq!(pickup.phase, MatchPhase::ControllerPickup);
    assert_eq!(pickup.timer, 120);
    assert!(!pickup.running);
    assert!(pickup.show_teleop_transition);

    tokio::time::sleep(Duration::from_secs(8)).await;
    let teleop = session.timer_state().await;
    assert_eq!(teleop.phase, MatchPhase::Teleop);
    assert_eq!(teleop.timer, 120);
    assert!(teleop.running);
    assert!(teleop.has_transitioned_to_teleop);
    assert!(teleop.session_elapsed >= 41);

    assert_eq!(
        phase_changes(&sink),
        vec![
            (MatchPhase::Auton, MatchPhase::ControllerPickup),
            (MatchPhase::ControllerPickup, MatchPhase::Teleop),
        ]
    );

    let (playing, position) =
        manager.with_element(|element| (!element.is_paused(), element.current_time()));
    assert!(playing);
    assert!((position - cues.teleop_base).abs() <= 2.0, "position {position}");
    assert!(session_store.get(keys::AUDIO_STATE).unwrap().is_some());

    session.shutdown().await;
    assert!(session.persistence().has_active_session());
}

#[tokio::test]
async fn restart_picks_up_where_the_file_left_off() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.json");
    let sink = Arc::new(RecordingSink::new());

    let mut form = SessionFormData::new("Qualifier warm-up", MatchType::Teleop);
    form.draft.teleop.classified = 3;
    form.draft.park = ParkStatus::Full;
    form.record_match(Utc::now()).unwrap();

    let mut timer = SessionTimerState::for_match_type(MatchType::Teleop);
    timer.start(Utc::now());
    timer.timer = 100;
    timer.session_elapsed = 20;

    let saved_at = Utc::now() - ChronoDuration::seconds(7);
    {
        let persistence = SessionPersistence::new(Arc::new(FileStorage::open(&path)), sink.clone());
        assert!(persistence.save(&form, &timer, saved_at));
    }

    let persistence = SessionPersistence::new(Arc::new(FileStorage::open(&path)), sink.clone());
    assert!(persistence.has_active_session());
    assert_eq!(persistence.load(), Some(form));

    let restored = persistence.load_timer_state(Utc::now()).unwrap();
    assert!(restored.running);
    assert!((92..=93).contains(&restored.timer), "timer {}", restored.timer);
    assert!((27..=28).contains(&restored.session_elapsed));
    assert!(sink.toasts().is_empty());
}

#[tokio::test]
async fn full_storage_keeps_the_previous_save_and_warns_once() {
    let store = Arc::new(MemoryStorage::with_quota(4_096));
    let sink = Arc::new(RecordingSink::new());
    let persistence = SessionPersistence::new(store.clone(), sink.clone());
    let timer = SessionTimerState::default();

    let small = SessionFormData::new("Small", MatchType::FullGame);
    assert!(persistence.save(&small, &timer, Utc::now()));

    let mut huge = small.clone();
    huge.notes = "x".repeat(8_192);
    assert!(!persistence.save(&huge, &timer, Utc::now()));
    assert!(!persistence.save(&huge, &timer, Utc::now()));

    assert_eq!(persistence.load(), Some(small));
    assert_eq!(
        sink.toasts(),
        vec![(ToastLevel::Warning, SAVE_FAILED_WARNING.to_string())]
    );
}

#[tokio::test]
async fn recorded_session_exports_and_shares() {
    let gateway = Gateway::in_memory().unwrap();
    let mut form = SessionFormData::new("=HYPERLINK(\"x\")", MatchType::FullGame);
    form.draft.auton.leave = true;
    form.draft.auton.classified = 2;
    form.record_match(Utc::now()).unwrap();

    let csv = export_csv(&form);
    let rows: Vec<&str> = csv.split("\r\n").filter(|row| !row.is_empty()).collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[1].starts_with("\"'=HYPERLINK(\"\"x\"\")\""));

    let base = "https://teamtrack.app";
    let short = create_share_link(&gateway, Some("alice"), base, &form)
        .await
        .unwrap();
    assert!(short.starts_with("https://teamtrack.app/s/"));
    let embedded = create_share_link(&gateway, None, base, &form).await.unwrap();
    assert!(embedded.contains("data="));

    for link in [short, embedded] {
        let opened = resolve_link(&gateway, &link).await.unwrap();
        assert_eq!(opened.matches.len(), 1);
        assert_eq!(opened.matches[0].auton_points(), 9);
    }
}
