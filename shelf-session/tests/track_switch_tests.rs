//! Track switch coordinator integration tests
//!
//! Loads a playlist with the real loader, then applies an initial position the
//! way the session service does.

mod helpers;

use helpers::{book, fast_settings, EngineRecorder, RecordingEngine, ScriptedSourceFactory};
use shelf_common::events::EventBus;
use shelf_session::duration_cache::DurationCache;
use shelf_session::engine::EngineHandle;
use shelf_session::model::{PlaylistMetadata, PlaylistSession};
use shelf_session::playback::{AbandonReason, PlaylistLoader, SwitchOutcome, TrackSwitchCoordinator};
use shelf_session::session::{SessionContext, SessionView};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    loader: PlaylistLoader,
    engine: EngineHandle,
    recorder: EngineRecorder,
    session: Arc<SessionContext>,
}

fn fixture(factory: ScriptedSourceFactory) -> Fixture {
    let (engine, recorder) = RecordingEngine::spawn();
    let session = Arc::new(SessionContext::new());
    let loader = PlaylistLoader::new(
        engine.clone(),
        Arc::new(factory),
        Arc::clone(&session),
        Arc::new(DurationCache::new()),
        Arc::new(EventBus::new(64)),
        fast_settings(),
    );
    Fixture {
        loader,
        engine,
        recorder,
        session,
    }
}

impl Fixture {
    async fn load_and_apply(&self, len: usize, target: usize, position_ms: u64) -> SwitchOutcome {
        let playlist = PlaylistSession::new(
            "book".to_string(),
            Arc::from(book(len)),
            PlaylistMetadata::default(),
            Some(target),
            Some(position_ms),
        );
        self.loader.load_playlist(playlist).await.unwrap();

        let coordinator = TrackSwitchCoordinator::new(
            self.engine.clone(),
            Arc::clone(&self.session),
            self.loader.subscribe_progress(),
            fast_settings(),
        );
        coordinator.apply_initial_position(target, position_ms, len).await
    }
}

/// **Given:** a 10-track playlist with saved position track 5 at 30000 ms
/// **When:** the playlist loads and the position is applied
/// **Then:** the engine is on track 5 at or past 30000 ms
#[tokio::test]
async fn test_resume_mid_playlist() {
    let f = fixture(ScriptedSourceFactory::new());

    let outcome = f.load_and_apply(10, 5, 30_000).await;
    assert_eq!(
        outcome,
        SwitchOutcome::Applied {
            slot: 5,
            position_ms: 30_000
        }
    );

    let status = f.engine.status().await.unwrap();
    assert_eq!(status.current_index, Some(5));
    assert!(status.current_offset_ms >= 30_000);
    assert!(!f.session.switch_in_progress());
}

/// **Given:** the engine publishes no index-transition events
/// **When:** the position is applied
/// **Then:** the polling fallback still lands on the target
#[tokio::test]
async fn test_polling_fallback_without_events() {
    let f = fixture(ScriptedSourceFactory::new());
    f.recorder.suppress_transitions(true);

    let outcome = f.load_and_apply(6, 4, 12_000).await;
    assert_eq!(
        outcome,
        SwitchOutcome::Applied {
            slot: 4,
            position_ms: 12_000
        }
    );
    assert_eq!(f.engine.current_index().await.unwrap(), Some(4));
}

/// **Given:** track 2 is missing
/// **When:** the saved position points at track 5
/// **Then:** the switch targets engine slot 4, where track 5 actually lives
#[tokio::test]
async fn test_target_mapped_past_skipped_track() {
    let f = fixture(ScriptedSourceFactory::new().fail(2));

    let outcome = f.load_and_apply(8, 5, 1_000).await;
    assert_eq!(
        outcome,
        SwitchOutcome::Applied {
            slot: 4,
            position_ms: 1_000
        }
    );
    let status = f.engine.status().await.unwrap();
    assert_eq!(status.content_id.as_deref(), Some(helpers::track_id(5).as_str()));
}

/// **Given:** the saved track itself is missing
/// **When:** the position is applied
/// **Then:** the switch is abandoned and the engine stays on track 0
#[tokio::test]
async fn test_skipped_target_is_abandoned() {
    let f = fixture(ScriptedSourceFactory::new().fail(3));

    let outcome = f.load_and_apply(5, 3, 5_000).await;
    assert_eq!(outcome, SwitchOutcome::Abandoned(AbandonReason::TargetSkipped));
    assert_eq!(f.engine.current_index().await.unwrap(), Some(0));
    assert_eq!(f.engine.status().await.unwrap().current_offset_ms, 0);
}

/// **Given:** a track takes longer to build than the stability timeout
/// **When:** the position is applied
/// **Then:** no seek happens before the count is confirmed
#[tokio::test]
async fn test_no_seek_before_count_confirmed() {
    let f = fixture(ScriptedSourceFactory::new().delay(1, Duration::from_millis(400)));

    let playlist = PlaylistSession::new(
        "book".to_string(),
        Arc::from(book(4)),
        PlaylistMetadata::default(),
        Some(3),
        Some(9_000),
    );
    f.loader.load_playlist(playlist).await.unwrap();

    let settings = shelf_session::config::RuntimeSettings {
        stability_timeout_ms: 100,
        ..fast_settings()
    };
    let coordinator = TrackSwitchCoordinator::new(
        f.engine.clone(),
        Arc::clone(&f.session),
        f.loader.subscribe_progress(),
        settings,
    );
    let outcome = coordinator.apply_initial_position(3, 9_000, 4).await;
    assert_eq!(outcome, SwitchOutcome::Abandoned(AbandonReason::StabilityTimeout));
    assert_eq!(f.engine.current_index().await.unwrap(), Some(0));
}

/// **Given:** the target is track 0 with an offset
/// **When:** the position is applied
/// **Then:** the engine seeks in place without a track switch
#[tokio::test]
async fn test_offset_only_on_first_track() {
    let f = fixture(ScriptedSourceFactory::new());

    let outcome = f.load_and_apply(3, 0, 42_000).await;
    assert_eq!(
        outcome,
        SwitchOutcome::Applied {
            slot: 0,
            position_ms: 42_000
        }
    );
    let status = f.engine.status().await.unwrap();
    assert_eq!(status.current_index, Some(0));
    assert!(status.current_offset_ms >= 42_000);
}

/// **Given:** a newer playlist replaces the one being positioned
/// **When:** the old coordinator is still waiting for its load
/// **Then:** it gives up as superseded
#[tokio::test]
async fn test_superseded_load_is_abandoned() {
    let f = fixture(ScriptedSourceFactory::new().delay(1, Duration::from_millis(200)));

    let playlist = PlaylistSession::new(
        "book".to_string(),
        Arc::from(book(3)),
        PlaylistMetadata::default(),
        Some(2),
        Some(1_000),
    );
    f.loader.load_playlist(playlist).await.unwrap();
    let coordinator = TrackSwitchCoordinator::new(
        f.engine.clone(),
        Arc::clone(&f.session),
        f.loader.subscribe_progress(),
        fast_settings(),
    );
    let pending = tokio::spawn(async move { coordinator.apply_initial_position(2, 1_000, 3).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let replacement = PlaylistSession::new(
        "other".to_string(),
        Arc::from(book(2)),
        PlaylistMetadata::default(),
        None,
        None,
    );
    f.loader.load_playlist(replacement).await.unwrap();

    let outcome = pending.await.unwrap();
    assert_eq!(outcome, SwitchOutcome::Abandoned(AbandonReason::Superseded));
}
