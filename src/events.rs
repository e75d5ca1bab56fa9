//! Change-event dispatch.
//!
//! Document writes surface as before/after pairs, delivered at least once
//! with a unique event id. `dispatch` routes each pair to the reconciliation
//! handlers; anything that mutates counters consults the idempotency guard
//! through the handler it delegates to.

use tracing::debug;

use crate::{
    dao::models::{
        GameEventRecord, GameRecord, GameStatus, PlayerStatsRecord, SignupRecord, SignupStatus,
    },
    error::ServiceError,
    services::{signup, stats},
    state::SharedState,
};

/// A document change observed on the store.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Delivery-unique identifier; the idempotency key for side effects.
    pub id: String,
    /// The changed document, as a before/after pair.
    pub change: Change,
}

/// Typed before/after pair. `before: None` is a create, `after: None` a
/// delete.
#[derive(Debug, Clone)]
pub enum Change {
    /// A game document changed.
    Game {
        /// State before the write.
        before: Option<GameRecord>,
        /// State after the write.
        after: Option<GameRecord>,
    },
    /// A signup document changed.
    Signup {
        /// State before the write.
        before: Option<SignupRecord>,
        /// State after the write.
        after: Option<SignupRecord>,
    },
    /// An event-log entry was created or removed.
    GameEvent {
        /// State before the write.
        before: Option<GameEventRecord>,
        /// State after the write.
        after: Option<GameEventRecord>,
    },
    /// A player's statistics document changed.
    PlayerStats {
        /// State before the write.
        before: Option<PlayerStatsRecord>,
        /// State after the write.
        after: Option<PlayerStatsRecord>,
    },
}

/// Route one change event to the handlers it concerns.
pub async fn dispatch(state: &SharedState, event: ChangeEvent) -> Result<(), ServiceError> {
    match event.change {
        Change::Game { before, after } => handle_game_change(state, &event.id, before, after).await,
        Change::Signup { before, after } => handle_signup_change(state, before, after).await,
        Change::GameEvent { before, after } => {
            let Some(entry) = after.as_ref().or(before.as_ref()) else {
                return Ok(());
            };
            stats::rebuild_event_denorm(state, entry.game_id).await
        }
        Change::PlayerStats { after, .. } => {
            let Some(stats) = after.as_ref() else {
                return Ok(());
            };
            stats::reconcile_badges(state, stats).await
        }
    }
}

async fn handle_game_change(
    state: &SharedState,
    event_id: &str,
    before: Option<GameRecord>,
    after: Option<GameRecord>,
) -> Result<(), ServiceError> {
    let Some(after) = after else {
        debug!(event_id, "game deleted; nothing to reconcile");
        return Ok(());
    };

    let was_completed = before
        .as_ref()
        .is_some_and(|b| b.status == GameStatus::Completed);
    if after.status == GameStatus::Completed && !was_completed {
        stats::handle_game_completed(state, &after, event_id).await?;
    }

    let denorm_changed = match &before {
        None => true,
        Some(b) => {
            b.scheduled_at != after.scheduled_at
                || b.status != after.status
                || b.venue_name != after.venue_name
        }
    };
    if denorm_changed {
        signup::sync_signup_denorm(state, &after).await?;
    }

    Ok(())
}

async fn handle_signup_change(
    state: &SharedState,
    before: Option<SignupRecord>,
    after: Option<SignupRecord>,
) -> Result<(), ServiceError> {
    let Some(after) = after else {
        return Ok(());
    };

    let was_confirmed = before
        .as_ref()
        .is_some_and(|b| b.status == SignupStatus::Confirmed);
    let freed_slot = was_confirmed
        && matches!(
            after.status,
            SignupStatus::Cancelled | SignupStatus::Rejected
        );
    let externally_confirmed = !was_confirmed && after.status == SignupStatus::Confirmed;

    if freed_slot || externally_confirmed {
        // Converge the counters, then hand any freed capacity to the
        // waitlist. Both steps re-check against fresh reads, so replays and
        // out-of-order deliveries settle on the same result.
        signup::recompute_game(state, after.game_id).await?;
        if freed_slot {
            signup::promote_next(state, after.game_id).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        clock::ManualClock,
        config::AppConfig,
        dao::{
            memory::MemoryStore,
            models::{GameEventKind, TeamRecord},
            store::Store,
        },
        services::notifier::testing::RecordingNotifier,
    };
    use time::macros::datetime;
    use uuid::Uuid;

    const T0: time::OffsetDateTime = datetime!(2024-06-01 20:00 UTC);

    async fn fixture() -> (SharedState, MemoryStore) {
        let store = MemoryStore::new();
        let state = crate::state::AppState::with_store(
            Arc::new(store.clone()),
            AppConfig::default(),
            Arc::new(ManualClock::starting_at(T0)),
            Arc::new(RecordingNotifier::default()),
        )
        .await;
        (state, store)
    }

    #[tokio::test]
    async fn completion_transition_settles_stats_exactly_once() {
        let (state, store) = fixture().await;
        let player = Uuid::new_v4();

        let mut before = GameRecord::new(
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            datetime!(2024-06-01 18:00 UTC),
            2,
            T0,
        );
        before.status = GameStatus::InProgress;
        before.confirmed_player_ids = vec![player];
        before.confirmed_player_count = 1;
        before.teams = vec![TeamRecord {
            team_id: Uuid::new_v4(),
            player_ids: vec![player],
            score: 1,
        }];
        store.insert_game(before.clone()).await.unwrap();

        let mut after = before.clone();
        after.status = GameStatus::Completed;
        after.completed_at = Some(T0);
        let after = store.put_game(after).await.unwrap();

        let event = ChangeEvent {
            id: "evt-1".into(),
            change: Change::Game {
                before: Some(before.clone()),
                after: Some(after.clone()),
            },
        };
        dispatch(&state, event.clone()).await.unwrap();
        dispatch(&state, event).await.unwrap();

        let stats = store.find_player_stats(player).await.unwrap().unwrap();
        assert_eq!(stats.games_played, 1);
    }

    #[tokio::test]
    async fn game_change_stamps_denorm_onto_signups() {
        let (state, store) = fixture().await;
        let game = GameRecord::new(
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            datetime!(2024-06-02 18:00 UTC),
            2,
            T0,
        );
        store.insert_game(game.clone()).await.unwrap();
        let user = Uuid::new_v4();
        crate::services::signup::join_game(&state, game.id, user)
            .await
            .unwrap();

        let before = store.find_game(game.id).await.unwrap().unwrap();
        let mut after = before.clone();
        after.scheduled_at = datetime!(2024-06-03 18:00 UTC);
        after.venue_name = Some("North pitch".into());
        let after = store.put_game(after).await.unwrap();

        dispatch(
            &state,
            ChangeEvent {
                id: "evt-2".into(),
                change: Change::Game {
                    before: Some(before),
                    after: Some(after),
                },
            },
        )
        .await
        .unwrap();

        let signup = store.find_signup(game.id, user).await.unwrap().unwrap();
        assert_eq!(signup.game_date, Some(datetime!(2024-06-03 18:00 UTC)));
        assert_eq!(signup.venue_name.as_deref(), Some("North pitch"));
    }

    #[tokio::test]
    async fn external_signup_closure_triggers_promotion() {
        let (state, store) = fixture().await;
        let game = GameRecord::new(
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            datetime!(2024-06-02 18:00 UTC),
            1,
            T0,
        );
        store.insert_game(game.clone()).await.unwrap();

        let confirmed: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for user in &confirmed {
            crate::services::signup::join_game(&state, game.id, *user)
                .await
                .unwrap();
        }
        let waiting = Uuid::new_v4();
        crate::services::signup::join_game(&state, game.id, waiting)
            .await
            .unwrap();

        // An external writer flips the signup without going through the
        // service; the change event reconciles the fallout.
        let before = store.find_signup(game.id, confirmed[0]).await.unwrap().unwrap();
        let mut closed = before.clone();
        closed.status = SignupStatus::Cancelled;
        let closed = store.put_signup(closed).await.unwrap();

        dispatch(
            &state,
            ChangeEvent {
                id: "evt-3".into(),
                change: Change::Signup {
                    before: Some(before),
                    after: Some(closed),
                },
            },
        )
        .await
        .unwrap();

        let promoted = store.find_signup(game.id, waiting).await.unwrap().unwrap();
        assert_eq!(promoted.status, SignupStatus::Confirmed);
        let game = store.find_game(game.id).await.unwrap().unwrap();
        assert_eq!(game.confirmed_player_count, 3);
    }

    #[tokio::test]
    async fn stats_change_awards_missing_milestone_badges() {
        let (state, store) = fixture().await;
        let player = Uuid::new_v4();

        // A snapshot whose counters crossed thresholds without the matching
        // badges having landed yet.
        let mut stats = PlayerStatsRecord::empty(player, T0);
        stats.games_played = 10;
        stats.goals = 1;
        store
            .apply_stats_delta(
                player,
                crate::dao::models::StatsDelta {
                    games_played: 10,
                    goals: 1,
                    ..Default::default()
                },
                T0,
            )
            .await
            .unwrap();

        dispatch(
            &state,
            ChangeEvent {
                id: "evt-5".into(),
                change: Change::PlayerStats {
                    before: None,
                    after: Some(stats),
                },
            },
        )
        .await
        .unwrap();

        let stored = store.find_player_stats(player).await.unwrap().unwrap();
        use crate::dao::models::Badge;
        for badge in [Badge::FirstGame, Badge::TenGames, Badge::FirstGoal] {
            assert!(stored.badges.contains(&badge), "missing {badge:?}");
        }
        assert!(!stored.badges.contains(&Badge::FiftyGames));
    }

    #[tokio::test]
    async fn event_log_changes_rebuild_scorer_denorm() {
        let (state, store) = fixture().await;
        let scorer = Uuid::new_v4();
        let mut game = GameRecord::new(
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            datetime!(2024-06-01 18:00 UTC),
            2,
            T0,
        );
        game.status = GameStatus::InProgress;
        store.insert_game(game.clone()).await.unwrap();

        let entry = GameEventRecord {
            id: Uuid::new_v4(),
            game_id: game.id,
            player_id: scorer,
            kind: GameEventKind::Goal,
            recorded_at: T0,
        };
        store.insert_game_event(entry.clone()).await.unwrap();

        dispatch(
            &state,
            ChangeEvent {
                id: "evt-4".into(),
                change: Change::GameEvent {
                    before: None,
                    after: Some(entry),
                },
            },
        )
        .await
        .unwrap();

        let game = store.find_game(game.id).await.unwrap().unwrap();
        assert_eq!(game.goal_scorer_ids, vec![scorer]);
    }
}
