//! Playlist loader integration tests
//!
//! Drives [`PlaylistLoader`] against a recording virtual engine with scripted
//! source build delays and failures.

mod helpers;

use helpers::{
    book, fast_settings, track_id, wait_for_load_complete, EngineRecorder, RecordingEngine,
    ScriptedSourceFactory,
};
use shelf_common::events::{EventBus, ShelfEvent};
use shelf_session::config::RuntimeSettings;
use shelf_session::duration_cache::DurationCache;
use shelf_session::error::LoadError;
use shelf_session::model::{LoadingState, PlaylistMetadata, PlaylistSession, TrackRef};
use shelf_session::playback::{LoadOutcome, LoadProgress, PlaylistLoader};
use shelf_session::session::{SessionContext, SessionView};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    loader: PlaylistLoader,
    engine: shelf_session::engine::EngineHandle,
    recorder: EngineRecorder,
    session: Arc<SessionContext>,
    durations: Arc<DurationCache>,
    events: Arc<EventBus>,
}

fn fixture(factory: ScriptedSourceFactory) -> Fixture {
    fixture_with_settings(factory, fast_settings())
}

fn fixture_with_settings(factory: ScriptedSourceFactory, settings: RuntimeSettings) -> Fixture {
    let (engine, recorder) = RecordingEngine::spawn();
    let session = Arc::new(SessionContext::new());
    let durations = Arc::new(DurationCache::new());
    let events = Arc::new(EventBus::new(256));
    let loader = PlaylistLoader::new(
        engine.clone(),
        Arc::new(factory),
        Arc::clone(&session),
        Arc::clone(&durations),
        Arc::clone(&events),
        settings,
    );
    Fixture {
        loader,
        engine,
        recorder,
        session,
        durations,
        events,
    }
}

/// Deterministic spread of build delays, 0..=90 ms
fn scattered_delays(seed: u64, len: usize) -> ScriptedSourceFactory {
    let mut state = seed;
    let mut factory = ScriptedSourceFactory::new();
    for i in 0..len {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let delay_ms = (state >> 33) % 91;
        factory = factory.delay(i, Duration::from_millis(delay_ms));
    }
    factory
}

fn playlist(tracks: Vec<TrackRef>, target: Option<usize>) -> PlaylistSession {
    PlaylistSession::new(
        "book".to_string(),
        Arc::from(tracks),
        PlaylistMetadata::default(),
        target,
        None,
    )
}

/// Uris in engine order, derived from the recorded insert calls
fn engine_order(inserts: &[(usize, String)]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for (slot, uri) in inserts {
        order.insert(*slot, uri.clone());
    }
    order
}

/// **Given:** later tracks build faster than earlier ones
/// **When:** a 10-track playlist is loaded with a target in the middle
/// **Then:** engine order equals host order and every insert lands at its final slot
#[tokio::test]
async fn test_engine_order_matches_host_order() {
    let mut factory = ScriptedSourceFactory::new();
    for i in 1..10 {
        factory = factory.delay(i, Duration::from_millis(((10 - i) * 15) as u64));
    }
    let f = fixture(factory);
    let mut rx = f.events.subscribe();

    let outcome = f.loader.load_playlist(playlist(book(10), Some(5))).await.unwrap();
    assert!(matches!(outcome, LoadOutcome::Started { .. }));

    assert_eq!(wait_for_load_complete(&mut rx).await, Some((10, 10)));

    let inserts = f.recorder.inserts();
    let expected: Vec<String> = (0..10).map(track_id).collect();
    assert_eq!(engine_order(&inserts), expected);
    // Ordered insertion means every insert appends
    for (n, (slot, _)) in inserts.iter().enumerate() {
        assert_eq!(*slot, n, "insert {} landed at slot {}", n, slot);
    }
    assert_eq!(f.engine.track_count().await.unwrap(), 10);
    assert_eq!(f.session.loading_state(), LoadingState::Loaded);
    assert_eq!(f.session.confirmed_count(), 10);
}

/// **Given:** track 3 of 5 cannot be built
/// **When:** the playlist is loaded
/// **Then:** four tracks are loaded in order, the engine is never left with a gap,
/// and the confirmed count is requested minus skipped
#[tokio::test]
async fn test_missing_track_is_skipped() {
    let f = fixture(ScriptedSourceFactory::new().fail(3));
    let mut rx = f.events.subscribe();
    let mut progress = f.loader.subscribe_progress();

    f.loader.load_playlist(playlist(book(5), None)).await.unwrap();
    assert_eq!(wait_for_load_complete(&mut rx).await, Some((4, 5)));

    let expected: Vec<String> = [0, 1, 2, 4].into_iter().map(track_id).collect();
    assert_eq!(engine_order(&f.recorder.inserts()), expected);

    let loaded = progress.borrow_and_update().clone();
    match loaded {
        LoadProgress::Loaded {
            confirmed_count,
            requested,
            skipped,
            ..
        } => {
            assert_eq!(confirmed_count, 4);
            assert_eq!(requested, 5);
            assert_eq!(skipped, vec![3]);
        }
        other => panic!("unexpected progress {:?}", other),
    }

    // Track 4 lives at slot 3
    assert_eq!(f.session.slot_for_requested_index(4), Some(3));
    assert_eq!(f.session.requested_index_for_slot(3), Some(4));
    assert_eq!(f.session.slot_for_requested_index(3), None);
}

/// **Given:** a playlist is still loading
/// **When:** the same playlist is submitted again
/// **Then:** the second call is a no-op and no track is inserted twice
#[tokio::test]
async fn test_duplicate_load_is_idempotent() {
    let f = fixture(ScriptedSourceFactory::new().delay(1, Duration::from_millis(200)));
    let mut rx = f.events.subscribe();

    let first = f.loader.load_playlist(playlist(book(4), None)).await.unwrap();
    let second = f.loader.load_playlist(playlist(book(4), None)).await.unwrap();
    assert_eq!(
        second,
        LoadOutcome::AlreadyLoading {
            generation: first.generation()
        }
    );

    assert_eq!(wait_for_load_complete(&mut rx).await, Some((4, 4)));
    assert_eq!(f.recorder.inserts().len(), 4);
    assert_eq!(f.engine.track_count().await.unwrap(), 4);
}

/// **Given:** a playlist is still loading
/// **When:** a different playlist is submitted
/// **Then:** the old generation stops inserting and only the new playlist remains
#[tokio::test]
async fn test_new_playlist_supersedes_previous() {
    let mut slow = ScriptedSourceFactory::new();
    for i in 1..6 {
        slow = slow.delay(i, Duration::from_millis(100));
    }
    let f = fixture(slow);
    let mut rx = f.events.subscribe();

    f.loader.load_playlist(playlist(book(6), None)).await.unwrap();

    let other: Vec<TrackRef> = (0..3)
        .map(|i| TrackRef::new(format!("/other/{:02}.mp3", i)))
        .collect();
    let replacement = PlaylistSession::new(
        "other".to_string(),
        Arc::from(other),
        PlaylistMetadata::default(),
        None,
        None,
    );
    f.loader.load_playlist(replacement).await.unwrap();

    let complete = helpers::wait_for_event(&mut rx, Duration::from_secs(5), |e| {
        matches!(e, ShelfEvent::LoadComplete { group_id, .. } if group_id == "other")
    })
    .await;
    assert!(complete.is_some());

    // Let any stale task run out its delay
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(f.engine.track_count().await.unwrap(), 3);
    let status = f.engine.status().await.unwrap();
    assert_eq!(status.content_id.as_deref(), Some("/other/00.mp3"));
    assert_eq!(f.session.group_id().as_deref(), Some("other"));
}

/// **Given:** the first track cannot be built
/// **When:** the playlist is loaded
/// **Then:** a load error is returned and emitted, and the engine holds nothing
#[tokio::test]
async fn test_first_track_failure_is_reported() {
    let f = fixture(ScriptedSourceFactory::new().fail(0));
    let mut rx = f.events.subscribe();

    let result = f.loader.load_playlist(playlist(book(3), None)).await;
    assert!(matches!(result, Err(LoadError::FirstTrack { .. })));

    let event = helpers::wait_for_event(&mut rx, Duration::from_secs(1), |e| {
        matches!(e, ShelfEvent::LoadError { .. })
    })
    .await;
    assert!(event.is_some());
    assert_eq!(f.engine.track_count().await.unwrap(), 0);
    assert!(!f.engine.status().await.unwrap().is_playing);
    assert_eq!(f.session.loading_state(), LoadingState::NotLoading);
}

#[tokio::test]
async fn test_empty_playlist_is_rejected() {
    let f = fixture(ScriptedSourceFactory::new());
    let result = f.loader.load_playlist(playlist(Vec::new(), None)).await;
    assert_eq!(result, Err(LoadError::EmptyPlaylist));
}

/// **Given:** a single-track playlist
/// **When:** it is loaded
/// **Then:** the first track is prepared paused and the count confirms at one
#[tokio::test]
async fn test_single_track_starts_paused() {
    let f = fixture(ScriptedSourceFactory::new());
    let mut rx = f.events.subscribe();

    f.loader.load_playlist(playlist(book(1), None)).await.unwrap();
    let status = f.engine.status().await.unwrap();
    assert_eq!(status.current_index, Some(0));
    assert!(!status.is_playing);

    assert_eq!(wait_for_load_complete(&mut rx).await, Some((1, 1)));
}

/// **Given:** a loaded playlist
/// **When:** the loader is cancelled during a slow load
/// **Then:** the count is never confirmed
#[tokio::test]
async fn test_cancel_stops_background_load() {
    let f = fixture(ScriptedSourceFactory::new().delay(1, Duration::from_millis(150)));
    let mut rx = f.events.subscribe();

    f.loader.load_playlist(playlist(book(3), None)).await.unwrap();
    f.loader.cancel().await;

    let complete = helpers::wait_for_event(&mut rx, Duration::from_millis(500), |e| {
        matches!(e, ShelfEvent::LoadComplete { .. })
    })
    .await;
    assert!(complete.is_none());
    assert_eq!(f.engine.track_count().await.unwrap(), 1);
}

/// **Given:** playlists of several lengths with scattered build delays
/// **When:** each is loaded with no target, the first, second or last track,
/// or a target past the end
/// **Then:** engine order always equals host order and nothing is skipped
#[tokio::test]
async fn test_engine_order_holds_across_lengths_and_targets() {
    for len in [1usize, 2, 3, 7, 12] {
        let targets = [None, Some(0), Some(1), Some(len - 1), Some(len + 3)];
        for (n, target) in targets.into_iter().enumerate() {
            let seed = (len * 31 + n) as u64;
            let f = fixture(scattered_delays(seed, len));
            let mut rx = f.events.subscribe();

            f.loader.load_playlist(playlist(book(len), target)).await.unwrap();
            assert_eq!(
                wait_for_load_complete(&mut rx).await,
                Some((len, len)),
                "len {} target {:?}",
                len,
                target
            );

            let expected: Vec<String> = (0..len).map(track_id).collect();
            assert_eq!(
                engine_order(&f.recorder.inserts()),
                expected,
                "len {} target {:?}",
                len,
                target
            );
            assert_eq!(f.engine.track_count().await.unwrap(), len);
        }
    }
}

/// **Given:** track 1 of 6 takes longer to build than the build timeout
/// **When:** the playlist is loaded
/// **Then:** only track 1 is skipped and every later track still loads in order
#[tokio::test]
async fn test_slow_track_is_skipped_without_losing_successors() {
    let settings = RuntimeSettings {
        loader_build_timeout_ms: 300,
        ..fast_settings()
    };
    let factory = ScriptedSourceFactory::new().delay(1, Duration::from_millis(600));
    let f = fixture_with_settings(factory, settings);
    let mut rx = f.events.subscribe();
    let mut progress = f.loader.subscribe_progress();

    f.loader.load_playlist(playlist(book(6), None)).await.unwrap();
    assert_eq!(wait_for_load_complete(&mut rx).await, Some((5, 6)));

    let expected: Vec<String> = [0, 2, 3, 4, 5].into_iter().map(track_id).collect();
    assert_eq!(engine_order(&f.recorder.inserts()), expected);

    match progress.borrow_and_update().clone() {
        LoadProgress::Loaded { skipped, .. } => assert_eq!(skipped, vec![1]),
        other => panic!("unexpected progress {:?}", other),
    }

    // The late build must not sneak in after the load settled
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(f.engine.track_count().await.unwrap(), 5);
}

/// **Given:** tracks without host durations whose sources measure 10 s
/// **When:** the playlist is loaded
/// **Then:** every track's measured duration is cached
#[tokio::test]
async fn test_measured_durations_are_cached() {
    let f = fixture(ScriptedSourceFactory::new().measured(10_000));
    let mut rx = f.events.subscribe();
    let tracks: Vec<TrackRef> = (0..4).map(|i| TrackRef::new(track_id(i))).collect();

    f.loader.load_playlist(playlist(tracks, Some(2))).await.unwrap();
    assert_eq!(wait_for_load_complete(&mut rx).await, Some((4, 4)));

    assert_eq!(f.durations.len(), 4);
    for i in 0..4 {
        assert_eq!(f.durations.get(&track_id(i)), Some(10_000));
    }
}

/// **Given:** an engine that dies while being cleared
/// **When:** a playlist is loaded
/// **Then:** the load fails, is reported, and the session is not left loading
#[tokio::test]
async fn test_clear_failure_ends_the_load() {
    let f = fixture(ScriptedSourceFactory::new());
    let mut rx = f.events.subscribe();
    let mut progress = f.loader.subscribe_progress();
    f.recorder.fail_on_clear();

    let result = f.loader.load_playlist(playlist(book(3), None)).await;
    assert!(matches!(result, Err(LoadError::Engine(_))));

    assert_eq!(f.session.loading_state(), LoadingState::NotLoading);
    assert!(matches!(
        progress.borrow_and_update().clone(),
        LoadProgress::Failed { .. }
    ));
    let event = helpers::wait_for_event(&mut rx, Duration::from_secs(1), |e| {
        matches!(e, ShelfEvent::LoadError { .. })
    })
    .await;
    assert!(event.is_some());
}
