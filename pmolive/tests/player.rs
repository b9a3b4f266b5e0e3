mod common;

use std::sync::Arc;

use common::{SpawnPlan, ScriptedRunner, failure, player_with, settle, STREAM_URL};
use pmolive::{Error, ExitOutcome, PlayerEvent};
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test]
async fn test_resolution_trims_and_caches_url() {
    let runner = ScriptedRunner::new();
    runner.push_url("https://stream.example/live.m3u8\n");
    let player = player_with(&runner);

    let url = assert_ok!(player.resolve_stream_url(false).await);

    assert_eq!(url, "https://stream.example/live.m3u8");
    assert_eq!(player.cached_stream_url().as_deref(), Some(url.as_str()));
    assert!(!player.is_fetching());

    let command = runner.last_resolver_command().unwrap();
    assert_eq!(command.program, "yt-dlp");
    assert_eq!(
        command.args,
        vec!["-g", "-f", "ba/b", "https://www.youtube.com/@deadmau5/live"]
    );
}

#[tokio::test]
async fn test_cached_url_skips_resolver() {
    let runner = ScriptedRunner::new();
    let player = player_with(&runner);

    assert_ok!(player.resolve_stream_url(false).await);
    assert_ok!(player.resolve_stream_url(false).await);
    assert_eq!(runner.resolver_calls(), 1);

    runner.push_url("https://fresh.example/live\n");
    let url = assert_ok!(player.resolve_stream_url(true).await);
    assert_eq!(url, "https://fresh.example/live");
    assert_eq!(runner.resolver_calls(), 2);
    assert_eq!(player.cached_stream_url().as_deref(), Some("https://fresh.example/live"));
}

#[tokio::test]
async fn test_invalidate_cache_forces_resolution() {
    let runner = ScriptedRunner::new();
    let player = player_with(&runner);

    assert_ok!(player.resolve_stream_url(false).await);
    player.invalidate_cache();
    assert_eq!(player.cached_stream_url(), None);

    assert_ok!(player.resolve_stream_url(false).await);
    assert_eq!(runner.resolver_calls(), 2);
}

#[tokio::test]
async fn test_empty_output_fails_without_caching() {
    let runner = ScriptedRunner::new();
    runner.push_url("\n");
    let player = player_with(&runner);

    let err = assert_err!(player.resolve_stream_url(false).await);

    assert!(matches!(err, Error::ResolutionFailed(ref msg) if msg == "Failed to get stream URL"));
    assert_eq!(player.cached_stream_url(), None);
}

#[tokio::test]
async fn test_resolver_failure_reports_stderr() {
    let runner = ScriptedRunner::new();
    runner.push_output(failure(1, "ERROR: This live event has ended.\n"));
    let player = player_with(&runner);

    let err = assert_err!(player.resolve_stream_url(false).await);

    assert!(
        matches!(err, Error::ResolutionFailed(ref msg) if msg == "ERROR: This live event has ended.")
    );
    assert_eq!(player.cached_stream_url(), None);
}

#[tokio::test]
async fn test_missing_resolver_binary() {
    let runner = ScriptedRunner::new();
    runner.push_resolver_missing();
    let player = player_with(&runner);

    let err = assert_err!(player.resolve_stream_url(false).await);
    assert!(matches!(err, Error::ResolverSpawn(_)));
    assert!(!player.is_fetching());
}

#[tokio::test]
async fn test_cancel_fetch_discards_late_result() {
    let runner = ScriptedRunner::new();
    let gate = runner.push_gated();
    let player = Arc::new(player_with(&runner));

    let pending = {
        let player = Arc::clone(&player);
        tokio::spawn(async move { player.resolve_stream_url(false).await })
    };
    settle().await;
    assert!(player.is_fetching());

    player.cancel_fetch();
    assert!(gate.was_cancelled());
    assert!(!player.is_fetching());

    gate.release("https://late.example/live\n");
    let err = assert_err!(pending.await.unwrap());
    assert!(err.is_cancelled());
    assert_eq!(player.cached_stream_url(), None);
}

#[tokio::test]
async fn test_cancel_fetch_without_fetch_is_noop() {
    let runner = ScriptedRunner::new();
    let player = player_with(&runner);

    player.cancel_fetch();
    player.cancel_fetch();

    assert!(!player.is_fetching());
    assert_ok!(player.resolve_stream_url(false).await);
}

#[tokio::test]
async fn test_forced_refresh_supersedes_in_flight_resolution() {
    let runner = ScriptedRunner::new();
    let gate = runner.push_gated();
    runner.push_url("https://second.example/live\n");
    let player = Arc::new(player_with(&runner));

    let first = {
        let player = Arc::clone(&player);
        tokio::spawn(async move { player.resolve_stream_url(false).await })
    };
    settle().await;

    let url = assert_ok!(player.resolve_stream_url(true).await);
    assert_eq!(url, "https://second.example/live");
    assert!(gate.was_cancelled());

    gate.release("https://first.example/live\n");
    let err = assert_err!(first.await.unwrap());
    assert!(err.is_cancelled());
    assert_eq!(
        player.cached_stream_url().as_deref(),
        Some("https://second.example/live")
    );
}

// ============================================================================
// Player process
// ============================================================================

#[tokio::test]
async fn test_launch_emits_started_and_tracks_process() {
    let runner = ScriptedRunner::new();
    let player = player_with(&runner);
    let mut events = player.subscribe();

    let process = assert_ok!(player.launch_player(STREAM_URL));

    assert!(player.is_playing());
    assert_eq!(player.current_process(), Some(process));
    assert_eq!(
        events.recv().await,
        Some(PlayerEvent::PlaybackStarted { process })
    );

    let spawned = runner.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].program, "mpv");
    assert_eq!(
        spawned[0].args,
        vec!["--no-video", "--no-terminal", "--cache=yes", STREAM_URL]
    );
}

#[tokio::test]
async fn test_launch_failure_leaves_no_process() {
    let runner = ScriptedRunner::new();
    runner.push_spawn(SpawnPlan::Fail);
    let player = player_with(&runner);

    let err = assert_err!(player.launch_player(STREAM_URL));

    assert!(matches!(err, Error::LaunchFailed { ref program, .. } if program == "mpv"));
    assert!(!player.is_playing());
    assert_eq!(player.current_process(), None);
}

#[tokio::test]
async fn test_abnormal_exit_clears_cache() {
    let runner = ScriptedRunner::new();
    let player = player_with(&runner);
    let mut events = player.subscribe();

    let url = assert_ok!(player.resolve_stream_url(false).await);
    let process = assert_ok!(player.launch_player(&url));
    assert_eq!(events.recv().await, Some(PlayerEvent::PlaybackStarted { process }));

    runner.exit_child(0, ExitOutcome::Failed(2));

    assert_eq!(
        events.recv().await,
        Some(PlayerEvent::PlaybackStopped {
            process,
            outcome: ExitOutcome::Failed(2),
            superseded: false,
        })
    );
    assert!(!player.is_playing());
    assert_eq!(player.cached_stream_url(), None);

    // The next resolution goes back to the resolver
    assert_ok!(player.resolve_stream_url(false).await);
    assert_eq!(runner.resolver_calls(), 2);
}

#[tokio::test]
async fn test_clean_exit_keeps_cache() {
    let runner = ScriptedRunner::new();
    let player = player_with(&runner);
    let mut events = player.subscribe();

    let url = assert_ok!(player.resolve_stream_url(false).await);
    let process = assert_ok!(player.launch_player(&url));
    events.recv().await;

    runner.exit_child(0, ExitOutcome::Success);

    assert_eq!(
        events.recv().await,
        Some(PlayerEvent::PlaybackStopped {
            process,
            outcome: ExitOutcome::Success,
            superseded: false,
        })
    );
    assert!(!player.is_playing());
    assert_eq!(player.cached_stream_url(), Some(url));
}

#[tokio::test]
async fn test_stop_player_is_immediate_and_superseded() {
    let runner = ScriptedRunner::new();
    let player = player_with(&runner);
    let mut events = player.subscribe();

    let url = assert_ok!(player.resolve_stream_url(false).await);
    let process = assert_ok!(player.launch_player(&url));
    events.recv().await;

    player.stop_player();
    assert!(!player.is_playing());

    assert_eq!(
        events.recv().await,
        Some(PlayerEvent::PlaybackStopped {
            process,
            outcome: ExitOutcome::Killed,
            superseded: true,
        })
    );
    assert!(runner.was_killed(0));
    // A deliberate stop does not invalidate the stream
    assert_eq!(player.cached_stream_url(), Some(url));

    player.stop_player();
}

#[tokio::test]
async fn test_relaunch_replaces_running_player() {
    let runner = ScriptedRunner::new();
    let player = player_with(&runner);
    let mut events = player.subscribe();

    let first = assert_ok!(player.launch_player(STREAM_URL));
    let second = assert_ok!(player.launch_player(STREAM_URL));
    assert_ne!(first, second);
    assert_eq!(player.current_process(), Some(second));

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(events.recv().await.unwrap());
    }
    assert!(seen.contains(&PlayerEvent::PlaybackStarted { process: first }));
    assert!(seen.contains(&PlayerEvent::PlaybackStarted { process: second }));
    assert!(seen.contains(&PlayerEvent::PlaybackStopped {
        process: first,
        outcome: ExitOutcome::Killed,
        superseded: true,
    }));

    assert!(runner.was_killed(0));
    assert!(!runner.was_killed(1));
    assert!(player.is_playing());
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let runner = ScriptedRunner::new();
    let player = player_with(&runner);
    let mut events = player.subscribe();

    assert_ok!(player.launch_player(STREAM_URL));
    events.recv().await;

    player.destroy();
    player.destroy();

    assert!(!player.is_playing());
    assert!(matches!(
        player.resolve_stream_url(true).await,
        Err(Error::Destroyed)
    ));
    assert!(matches!(player.launch_player(STREAM_URL), Err(Error::Destroyed)));

    // Subscribers see the end of the stream
    assert_eq!(events.recv().await, None);
    settle().await;
    assert!(runner.was_killed(0));
}
