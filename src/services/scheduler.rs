//! Time-driven reconciliation sweeps.
//!
//! Each pass pages through the documents a sweep matches, handling one page
//! at a time so a crash loses at most the page in flight. Per-game failures
//! are logged and skipped; the next pass picks the game up again because it
//! still matches the query.

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{GameRecord, GameStatus},
        storage::StorageError,
    },
    error::ServiceError,
    services::{
        notifier::{Notification, send_best_effort},
        stats, voting,
    },
    state::{SharedState, lifecycle::check_game_transition},
};

/// Reason stamped on games archived for never starting.
pub const REASON_NOT_STARTED: &str = "not_started_within_24h";
/// Reason stamped on games force-completed for never ending.
pub const REASON_NOT_ENDED: &str = "not_ended_within_5h";

/// What one pass did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Pre-start games archived.
    pub archived: usize,
    /// In-progress games force-completed.
    pub completed: usize,
    /// Reminders dispatched.
    pub reminders: usize,
    /// Voting closures triggered by timeout.
    pub votes_closed: usize,
    /// Expired processed-event markers removed.
    pub markers_purged: u64,
}

/// Run sweeps forever at the configured cadence. Ticks missed while a pass
/// runs long are coalesced instead of bursting.
pub async fn run(state: SharedState) {
    let mut interval = tokio::time::interval(state.config.sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if state.is_degraded().await {
            debug!("skipping sweep while degraded");
            continue;
        }
        match sweep_once(&state).await {
            Ok(report) => {
                if report != SweepReport::default() {
                    info!(
                        archived = report.archived,
                        completed = report.completed,
                        reminders = report.reminders,
                        votes_closed = report.votes_closed,
                        markers_purged = report.markers_purged,
                        "sweep pass finished"
                    );
                }
            }
            Err(err) => warn!(error = %err, "sweep pass failed"),
        }
    }
}

/// One full pass over every sweep.
pub async fn sweep_once(state: &SharedState) -> Result<SweepReport, ServiceError> {
    Ok(SweepReport {
        archived: sweep_archive(state).await?,
        completed: sweep_auto_complete(state).await?,
        reminders: sweep_reminders(state).await?,
        votes_closed: sweep_voting_timeout(state).await?,
        markers_purged: sweep_marker_gc(state).await?,
    })
}

/// Archive pre-start games whose scheduled time is long past.
async fn sweep_archive(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.store().await?;
    let page_size = state.config.sweep_page_size;
    let mut archived = 0;

    loop {
        let now = state.clock.now();
        let cutoff = now - state.config.archive_after;
        let page = store.find_games_to_archive(cutoff, page_size).await?;
        let fetched = page.len();
        let mut progressed = 0;

        for mut game in page {
            let game_id = game.id;
            let organizer_id = game.organizer_id;
            let result: Result<(), ServiceError> = async {
                check_game_transition(game.status, GameStatus::ArchivedNotPlayed)?;
                game.status = GameStatus::ArchivedNotPlayed;
                game.auto_close_reason = Some(REASON_NOT_STARTED.to_owned());
                game.updated_at = now;
                store.put_game(game).await?;
                Ok(())
            }
            .await;

            match result {
                Ok(()) => {
                    archived += 1;
                    progressed += 1;
                    info!(%game_id, "archived game that never started");
                    send_best_effort(
                        state.notifier.as_ref(),
                        Notification::to_user(
                            organizer_id,
                            "Game archived",
                            "Your game never started and was archived.",
                        ),
                    )
                    .await;
                }
                Err(err) => warn!(%game_id, error = %err, "failed to archive game; skipping"),
            }
        }

        if fetched < page_size || progressed == 0 {
            return Ok(archived);
        }
    }
}

/// Force-complete in-progress games that ran far past any plausible length.
/// Completion cascades into statistics settlement with a stable event id, so
/// a crash between the two is healed by the next pass.
async fn sweep_auto_complete(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.store().await?;
    let page_size = state.config.sweep_page_size;
    let mut completed = 0;

    loop {
        let now = state.clock.now();
        let cutoff = now - state.config.complete_after;
        let page = store.find_games_to_complete(cutoff, page_size).await?;
        let fetched = page.len();
        let mut progressed = 0;

        for mut game in page {
            let game_id = game.id;
            let organizer_id = game.organizer_id;
            let result: Result<GameRecord, ServiceError> = async {
                check_game_transition(game.status, GameStatus::Completed)?;
                game.status = GameStatus::Completed;
                game.completed_at = Some(now);
                game.auto_close_reason = Some(REASON_NOT_ENDED.to_owned());
                game.updated_at = now;
                let updated = store.put_game(game).await?;
                stats::handle_game_completed(state, &updated, &completion_event_id(&updated))
                    .await?;
                Ok(updated)
            }
            .await;

            match result {
                Ok(_) => {
                    completed += 1;
                    progressed += 1;
                    info!(%game_id, "auto-completed overrunning game");
                    send_best_effort(
                        state.notifier.as_ref(),
                        Notification::to_user(
                            organizer_id,
                            "Game completed",
                            "Your game ran long and was completed automatically.",
                        ),
                    )
                    .await;
                }
                Err(err) => {
                    warn!(%game_id, error = %err, "failed to auto-complete game; skipping")
                }
            }
        }

        if fetched < page_size || progressed == 0 {
            return Ok(completed);
        }
    }
}

/// Remind confirmed players of games starting soon. The `reminder_sent_at`
/// stamp is written before the fan-out and doubles as the idempotency flag.
async fn sweep_reminders(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.store().await?;
    let page_size = state.config.sweep_page_size;
    let mut reminded = 0;

    loop {
        let now = state.clock.now();
        let from = now + state.config.reminder_lead_min;
        let to = now + state.config.reminder_lead_max;
        let page = store.find_games_needing_reminder(from, to, page_size).await?;
        let fetched = page.len();
        let mut progressed = 0;

        for mut game in page {
            let game_id = game.id;
            let recipients = game.confirmed_player_ids.clone();
            game.reminder_sent_at = Some(now);
            game.updated_at = now;

            match store.put_game(game).await {
                Ok(_) => {
                    reminded += 1;
                    progressed += 1;
                    send_best_effort(
                        state.notifier.as_ref(),
                        Notification {
                            recipients,
                            title: "Game starting soon".to_owned(),
                            body: "Your game starts in about an hour.".to_owned(),
                        },
                    )
                    .await;
                }
                Err(StorageError::Conflict { .. }) => {
                    debug!(%game_id, "reminder stamp lost a race; another writer owns it");
                }
                Err(err) => warn!(%game_id, error = %err, "failed to stamp reminder; skipping"),
            }
        }

        if fetched < page_size || progressed == 0 {
            return Ok(reminded);
        }
    }
}

/// Close voting on games completed long enough ago.
async fn sweep_voting_timeout(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.store().await?;
    let page_size = state.config.sweep_page_size;
    let mut closed = 0;

    loop {
        let now = state.clock.now();
        let cutoff = now - state.config.voting_timeout;
        let page = store.find_games_with_expired_voting(cutoff, page_size).await?;
        let fetched = page.len();
        let mut progressed = 0;

        for game in page {
            let game_id = game.id;
            match voting::close_if_open(state, game_id).await {
                Ok(_) => {
                    closed += 1;
                    progressed += 1;
                    info!(%game_id, "voting closed by timeout");
                }
                Err(err) => warn!(%game_id, error = %err, "failed to close voting; skipping"),
            }
        }

        if fetched < page_size || progressed == 0 {
            return Ok(closed);
        }
    }
}

/// Drop processed-event markers past their retention.
async fn sweep_marker_gc(state: &SharedState) -> Result<u64, ServiceError> {
    let store = state.store().await?;
    let purged = store.purge_processed_before(state.clock.now()).await?;
    Ok(purged)
}

fn completion_event_id(game: &GameRecord) -> String {
    format!("gameCompleted:{}", game.id)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::{
        clock::ManualClock,
        config::AppConfig,
        dao::{memory::MemoryStore, models::TeamRecord, store::Store},
        services::notifier::testing::RecordingNotifier,
    };
    use time::macros::datetime;
    use uuid::Uuid;

    const T0: time::OffsetDateTime = datetime!(2024-06-10 12:00 UTC);

    struct Fixture {
        state: SharedState,
        store: MemoryStore,
        clock: Arc<ManualClock>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::starting_at(T0));
        let notifier = Arc::new(RecordingNotifier::default());
        let state = crate::state::AppState::with_store(
            Arc::new(store.clone()),
            AppConfig::default(),
            clock.clone(),
            notifier.clone(),
        )
        .await;
        Fixture {
            state,
            store,
            clock,
            notifier,
        }
    }

    async fn seed_game(store: &MemoryStore, scheduled_at: time::OffsetDateTime) -> GameRecord {
        let game = GameRecord::new(Uuid::new_v4(), None, Uuid::new_v4(), scheduled_at, 2, T0);
        store.insert_game(game.clone()).await.unwrap();
        game
    }

    #[tokio::test]
    async fn stale_pending_games_are_archived_with_a_reason() {
        let fx = fixture().await;
        let stale = seed_game(&fx.store, T0 - Duration::from_secs(25 * 3600)).await;
        let fresh = seed_game(&fx.store, T0 - Duration::from_secs(2 * 3600)).await;

        let report = sweep_once(&fx.state).await.unwrap();
        assert_eq!(report.archived, 1);

        let archived = fx.store.find_game(stale.id).await.unwrap().unwrap();
        assert_eq!(archived.status, GameStatus::ArchivedNotPlayed);
        assert_eq!(archived.auto_close_reason.as_deref(), Some(REASON_NOT_STARTED));

        let untouched = fx.store.find_game(fresh.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, GameStatus::Recruiting);

        // Organizer hears about it.
        let sent = fx.notifier.sent();
        assert!(sent.iter().any(|n| n.recipients == vec![stale.organizer_id]));
    }

    #[tokio::test]
    async fn overrunning_games_complete_and_settle_stats() {
        let fx = fixture().await;
        let player_a = Uuid::new_v4();
        let player_b = Uuid::new_v4();
        let mut game = GameRecord::new(
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            T0 - Duration::from_secs(7 * 3600),
            2,
            T0,
        );
        game.status = GameStatus::InProgress;
        game.started_at = Some(T0 - Duration::from_secs(6 * 3600));
        game.confirmed_player_ids = vec![player_a, player_b];
        game.confirmed_player_count = 2;
        game.teams = vec![
            TeamRecord {
                team_id: Uuid::new_v4(),
                player_ids: vec![player_a],
                score: 2,
            },
            TeamRecord {
                team_id: Uuid::new_v4(),
                player_ids: vec![player_b],
                score: 0,
            },
        ];
        fx.store.insert_game(game.clone()).await.unwrap();

        let report = sweep_once(&fx.state).await.unwrap();
        assert_eq!(report.completed, 1);

        let completed = fx.store.find_game(game.id).await.unwrap().unwrap();
        assert_eq!(completed.status, GameStatus::Completed);
        assert_eq!(completed.auto_close_reason.as_deref(), Some(REASON_NOT_ENDED));

        let stats = fx.store.find_player_stats(player_a).await.unwrap().unwrap();
        assert_eq!(stats.games_played, 1);
        assert_eq!(stats.games_won, 1);

        // A second pass finds nothing and settles nothing twice.
        let report = sweep_once(&fx.state).await.unwrap();
        assert_eq!(report.completed, 0);
        let stats = fx.store.find_player_stats(player_a).await.unwrap().unwrap();
        assert_eq!(stats.games_played, 1);
    }

    #[tokio::test]
    async fn reminders_go_out_once_per_game() {
        let fx = fixture().await;
        let player = Uuid::new_v4();
        let mut soon = GameRecord::new(
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            T0 + Duration::from_secs(90 * 60),
            2,
            T0,
        );
        soon.confirmed_player_ids = vec![player];
        soon.confirmed_player_count = 1;
        fx.store.insert_game(soon.clone()).await.unwrap();
        // Outside the window.
        seed_game(&fx.store, T0 + Duration::from_secs(3 * 3600)).await;

        let report = sweep_once(&fx.state).await.unwrap();
        assert_eq!(report.reminders, 1);

        let stamped = fx.store.find_game(soon.id).await.unwrap().unwrap();
        assert_eq!(stamped.reminder_sent_at, Some(T0));

        // Ten minutes later the game is still inside the window but already
        // stamped.
        fx.clock.advance(Duration::from_secs(600));
        let report = sweep_once(&fx.state).await.unwrap();
        assert_eq!(report.reminders, 0);

        let player_notes = fx
            .notifier
            .sent()
            .into_iter()
            .filter(|n| n.recipients == vec![player])
            .count();
        assert_eq!(player_notes, 1);
    }

    #[tokio::test]
    async fn expired_voting_is_closed_by_the_sweep() {
        let fx = fixture().await;
        let players: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut game = GameRecord::new(
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            T0 - Duration::from_secs(6 * 3600),
            2,
            T0,
        );
        game.status = GameStatus::Completed;
        game.completed_at = Some(T0 - Duration::from_secs(3 * 3600));
        game.voting_enabled = true;
        game.confirmed_player_ids = players.clone();
        game.confirmed_player_count = players.len() as u32;
        game.votes.insert(players[0], players[1]);
        fx.store.insert_game(game.clone()).await.unwrap();

        let report = sweep_once(&fx.state).await.unwrap();
        assert_eq!(report.votes_closed, 1);

        let closed = fx.store.find_game(game.id).await.unwrap().unwrap();
        assert!(closed.voting_closed_at.is_some());
        assert_eq!(closed.voting_winner_id, Some(players[1]));
    }

    #[tokio::test]
    async fn expired_markers_are_purged() {
        let fx = fixture().await;
        let store = fx.state.store().await.unwrap();
        store
            .insert_processed_event(crate::dao::models::ProcessedEventRecord {
                event_id: "old".into(),
                event_type: "gameCompleted".into(),
                subject: "g".into(),
                processed_at: T0 - Duration::from_secs(8 * 24 * 3600),
                expires_at: T0 - Duration::from_secs(24 * 3600),
            })
            .await
            .unwrap();
        store
            .insert_processed_event(crate::dao::models::ProcessedEventRecord {
                event_id: "fresh".into(),
                event_type: "gameCompleted".into(),
                subject: "g".into(),
                processed_at: T0,
                expires_at: T0 + Duration::from_secs(24 * 3600),
            })
            .await
            .unwrap();

        let report = sweep_once(&fx.state).await.unwrap();
        assert_eq!(report.markers_purged, 1);
        assert!(store.find_processed_event("fresh").await.unwrap().is_some());
        assert!(store.find_processed_event("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn degraded_storage_fails_the_pass_cleanly() {
        let fx = fixture().await;
        fx.store.set_unavailable(true);
        let result = sweep_once(&fx.state).await;
        assert!(matches!(result, Err(ServiceError::Unavailable(_))));
    }
}
