//! Statistics settlement and denormalization when a game completes.
//!
//! Per-player lifetime counters are commutative store increments, so any
//! number of games can settle concurrently. The completion handler itself is
//! guarded by the processed-events registry because change events arrive at
//! least once.

use indexmap::IndexMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            Badge, GameEventKind, GameEventRecord, GameRecord, PlayerStatsRecord, StatsDelta,
            pairing_key,
        },
        storage::StorageError,
    },
    error::ServiceError,
    services::idempotency::IdempotencyGuard,
    state::SharedState,
};

const MAX_TXN_ATTEMPTS: u32 = 8;

/// Settle a completed game exactly once: lifetime counters, badges, hub
/// counters, pairings, and the denormalized summaries on the game document.
pub async fn handle_game_completed(
    state: &SharedState,
    game: &GameRecord,
    event_id: &str,
) -> Result<(), ServiceError> {
    let store = state.store().await?;
    let now = state.clock.now();
    let guard = IdempotencyGuard::new(store.clone(), state.config.processed_event_ttl);

    if guard.already_processed(event_id, now).await? {
        debug!(game_id = %game.id, event_id, "completion already settled; skipping");
        return Ok(());
    }
    // Mark before the first increment. A failure midway through settlement
    // must not leave redelivery free to credit the early players twice; the
    // marker turns redelivery into a no-op instead.
    guard
        .mark_processed(event_id, "gameCompleted", &game.id.to_string(), now)
        .await?;

    let events = store.list_game_events(game.id).await?;
    let tally = tally_events(&events);
    let winning_team = game.winning_team_id();
    let winners: Vec<Uuid> = winning_team
        .and_then(|team_id| game.teams.iter().find(|t| t.team_id == team_id))
        .map(|team| team.player_ids.clone())
        .unwrap_or_default();

    for &player_id in &game.confirmed_player_ids {
        let counts = tally.get(&player_id).copied().unwrap_or_default();
        let delta = StatsDelta {
            games_played: 1,
            games_won: u64::from(winners.contains(&player_id)),
            goals: counts.goals,
            assists: counts.assists,
            saves: counts.saves,
        };
        store.apply_stats_delta(player_id, delta, now).await?;

        let stats = store
            .find_player_stats(player_id)
            .await?
            .unwrap_or_else(|| PlayerStatsRecord::empty(player_id, now));
        let mut earned = milestone_badges(&stats);
        if counts.goals >= 3 {
            earned.push(Badge::HatTrick);
        }
        store.award_badges(player_id, earned, now).await?;
    }

    if let Some(hub_id) = game.hub_id {
        store
            .incr_hub_counters(hub_id, u64::from(game.total_goals()), now)
            .await?;
    }

    for team in &game.teams {
        let won = Some(team.team_id) == winning_team;
        for (i, &a) in team.player_ids.iter().enumerate() {
            for &b in &team.player_ids[i + 1..] {
                store.incr_pairing(&pairing_key(a, b), won).await?;
            }
        }
    }

    write_event_denorm(state, game.id, &events).await?;

    info!(game_id = %game.id, players = game.confirmed_player_ids.len(), "game settled");
    Ok(())
}

/// Rebuild scorer and MVP denormalization from the full event log. Used when
/// log entries are added or removed outside a completion.
pub async fn rebuild_event_denorm(state: &SharedState, game_id: Uuid) -> Result<(), ServiceError> {
    let store = state.store().await?;
    let events = store.list_game_events(game_id).await?;
    write_event_denorm(state, game_id, &events).await
}

#[derive(Debug, Clone, Copy, Default)]
struct EventCounts {
    goals: u64,
    assists: u64,
    saves: u64,
    mvp_votes: u64,
}

/// Per-player counts in first-appearance order.
fn tally_events(events: &[GameEventRecord]) -> IndexMap<Uuid, EventCounts> {
    let mut tally: IndexMap<Uuid, EventCounts> = IndexMap::new();
    for event in events {
        let counts = tally.entry(event.player_id).or_default();
        match event.kind {
            GameEventKind::Goal => counts.goals += 1,
            GameEventKind::Assist => counts.assists += 1,
            GameEventKind::Save => counts.saves += 1,
            GameEventKind::MvpVote => counts.mvp_votes += 1,
        }
    }
    tally
}

/// Re-evaluate milestone badges against a stats snapshot and award any the
/// player has newly earned. Awards are a set union, so replays and races
/// settle on the same badge set.
pub async fn reconcile_badges(
    state: &SharedState,
    stats: &PlayerStatsRecord,
) -> Result<(), ServiceError> {
    let earned: Vec<Badge> = milestone_badges(stats)
        .into_iter()
        .filter(|badge| !stats.badges.contains(badge))
        .collect();
    if earned.is_empty() {
        return Ok(());
    }
    let store = state.store().await?;
    store
        .award_badges(stats.user_id, earned, state.clock.now())
        .await?;
    Ok(())
}

fn milestone_badges(stats: &PlayerStatsRecord) -> Vec<Badge> {
    let mut earned = Vec::new();
    let games = [
        (1, Badge::FirstGame),
        (10, Badge::TenGames),
        (50, Badge::FiftyGames),
        (100, Badge::HundredGames),
    ];
    for (threshold, badge) in games {
        if stats.games_played >= threshold {
            earned.push(badge);
        }
    }
    let goals = [
        (1, Badge::FirstGoal),
        (10, Badge::TenGoals),
        (50, Badge::FiftyGoals),
    ];
    for (threshold, badge) in goals {
        if stats.goals >= threshold {
            earned.push(badge);
        }
    }
    earned
}

async fn write_event_denorm(
    state: &SharedState,
    game_id: Uuid,
    events: &[GameEventRecord],
) -> Result<(), ServiceError> {
    let store = state.store().await?;
    let now = state.clock.now();
    let tally = tally_events(events);

    // Scorers in first-goal order.
    let scorer_ids: Vec<Uuid> = events
        .iter()
        .filter(|e| e.kind == GameEventKind::Goal)
        .map(|e| e.player_id)
        .fold(Vec::new(), |mut seen, id| {
            if !seen.contains(&id) {
                seen.push(id);
            }
            seen
        });

    let mvp_player_id = tally
        .iter()
        .filter(|(_, counts)| counts.mvp_votes > 0)
        .max_by_key(|(_, counts)| counts.mvp_votes)
        .map(|(&id, _)| id);

    let mut scorer_names = Vec::with_capacity(scorer_ids.len());
    for &id in &scorer_ids {
        scorer_names.push(display_name(state, id).await?);
    }
    let mvp_player_name = match mvp_player_id {
        Some(id) => Some(display_name(state, id).await?),
        None => None,
    };

    for _ in 0..MAX_TXN_ATTEMPTS {
        let Some(mut game) = store.find_game(game_id).await? else {
            return Ok(());
        };
        game.goal_scorer_ids = scorer_ids.clone();
        game.goal_scorer_names = scorer_names.clone();
        game.mvp_player_id = mvp_player_id;
        game.mvp_player_name = mvp_player_name.clone();
        game.updated_at = now;

        match store.put_game(game).await {
            Ok(_) => return Ok(()),
            Err(StorageError::Conflict { .. }) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::InvalidState(format!(
        "game `{game_id}` is under heavy contention, retry shortly"
    )))
}

async fn display_name(state: &SharedState, user_id: Uuid) -> Result<String, ServiceError> {
    let store = state.store().await?;
    Ok(store
        .find_user(user_id)
        .await?
        .map(|user| user.name)
        .unwrap_or_else(|| "Unknown player".to_owned()))
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
            models::{GameStatus, HubRecord, TeamRecord, UserRecord},
            store::Store,
        },
        services::notifier::testing::RecordingNotifier,
        state::SharedState,
    };
    use time::macros::datetime;

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

    struct Setup {
        game: GameRecord,
        team_a: Vec<Uuid>,
        team_b: Vec<Uuid>,
    }

    async fn completed_game(store: &MemoryStore, score_a: u32, score_b: u32) -> Setup {
        let team_a: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let team_b: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();

        let mut game = GameRecord::new(
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            Uuid::new_v4(),
            datetime!(2024-06-01 18:00 UTC),
            2,
            T0,
        );
        game.status = GameStatus::Completed;
        game.completed_at = Some(T0);
        game.teams = vec![
            TeamRecord {
                team_id: Uuid::new_v4(),
                player_ids: team_a.clone(),
                score: score_a,
            },
            TeamRecord {
                team_id: Uuid::new_v4(),
                player_ids: team_b.clone(),
                score: score_b,
            },
        ];
        game.confirmed_player_ids = team_a.iter().chain(&team_b).copied().collect();
        game.confirmed_player_count = 4;
        store.insert_game(game.clone()).await.unwrap();
        Setup {
            game,
            team_a,
            team_b,
        }
    }

    fn goal(game_id: Uuid, player_id: Uuid, at: time::OffsetDateTime) -> GameEventRecord {
        GameEventRecord {
            id: Uuid::new_v4(),
            game_id,
            player_id,
            kind: GameEventKind::Goal,
            recorded_at: at,
        }
    }

    #[tokio::test]
    async fn completion_credits_players_and_winners() {
        let (state, store) = fixture().await;
        let setup = completed_game(&store, 3, 1).await;

        store
            .insert_game_event(goal(setup.game.id, setup.team_a[0], T0))
            .await
            .unwrap();

        handle_game_completed(&state, &setup.game, "evt-1").await.unwrap();

        let scorer = store.find_player_stats(setup.team_a[0]).await.unwrap().unwrap();
        assert_eq!(scorer.games_played, 1);
        assert_eq!(scorer.games_won, 1);
        assert_eq!(scorer.goals, 1);
        assert!(scorer.badges.contains(&Badge::FirstGame));
        assert!(scorer.badges.contains(&Badge::FirstGoal));

        let loser = store.find_player_stats(setup.team_b[0]).await.unwrap().unwrap();
        assert_eq!(loser.games_played, 1);
        assert_eq!(loser.games_won, 0);

        let hub = store
            .find_hub(setup.game.hub_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hub.total_games, 1);
        assert_eq!(hub.total_goals, 4);

        let pair = store
            .find_pairing(&pairing_key(setup.team_a[0], setup.team_a[1]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pair.games_together, 1);
        assert_eq!(pair.games_won_together, 1);
    }

    #[tokio::test]
    async fn replayed_completion_event_settles_once() {
        let (state, store) = fixture().await;
        let setup = completed_game(&store, 2, 0).await;

        handle_game_completed(&state, &setup.game, "evt-1").await.unwrap();
        handle_game_completed(&state, &setup.game, "evt-1").await.unwrap();

        let stats = store.find_player_stats(setup.team_a[0]).await.unwrap().unwrap();
        assert_eq!(stats.games_played, 1);
    }

    #[tokio::test]
    async fn redelivery_after_a_partial_settlement_credits_nobody_twice() {
        let (state, store) = fixture().await;
        let setup = completed_game(&store, 2, 0).await;

        // First delivery dies on the second player's counter write, after
        // the first player was already credited.
        store.fail_stats_delta_at(2);
        let result = handle_game_completed(&state, &setup.game, "evt-1").await;
        assert!(matches!(result, Err(ServiceError::Unavailable(_))));

        let first = store.find_player_stats(setup.team_a[0]).await.unwrap().unwrap();
        assert_eq!(first.games_played, 1);

        // Redelivery must not credit the first player a second time.
        handle_game_completed(&state, &setup.game, "evt-1").await.unwrap();

        let first = store.find_player_stats(setup.team_a[0]).await.unwrap().unwrap();
        assert_eq!(first.games_played, 1);
    }

    #[tokio::test]
    async fn drawn_game_has_no_winners() {
        let (state, store) = fixture().await;
        let setup = completed_game(&store, 2, 2).await;

        handle_game_completed(&state, &setup.game, "evt-1").await.unwrap();

        for player in setup.team_a.iter().chain(&setup.team_b) {
            let stats = store.find_player_stats(*player).await.unwrap().unwrap();
            assert_eq!(stats.games_won, 0);
        }
        let pair = store
            .find_pairing(&pairing_key(setup.team_a[0], setup.team_a[1]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pair.games_won_together, 0);
    }

    #[tokio::test]
    async fn three_goals_in_one_game_earn_the_hat_trick() {
        let (state, store) = fixture().await;
        let setup = completed_game(&store, 3, 0).await;
        for _ in 0..3 {
            store
                .insert_game_event(goal(setup.game.id, setup.team_a[0], T0))
                .await
                .unwrap();
        }

        handle_game_completed(&state, &setup.game, "evt-1").await.unwrap();

        let stats = store.find_player_stats(setup.team_a[0]).await.unwrap().unwrap();
        assert!(stats.badges.contains(&Badge::HatTrick));

        let teammate = store.find_player_stats(setup.team_a[1]).await.unwrap().unwrap();
        assert!(!teammate.badges.contains(&Badge::HatTrick));
    }

    #[tokio::test]
    async fn scorers_are_denormalized_in_first_goal_order() {
        let (state, store) = fixture().await;
        let setup = completed_game(&store, 2, 1).await;

        store.seed_user(UserRecord {
            id: setup.team_a[1],
            name: "Ada".into(),
            push_tokens: vec![],
        });
        store.seed_user(UserRecord {
            id: setup.team_b[0],
            name: "Ben".into(),
            push_tokens: vec![],
        });

        store
            .insert_game_event(goal(setup.game.id, setup.team_a[1], T0))
            .await
            .unwrap();
        store
            .insert_game_event(goal(setup.game.id, setup.team_b[0], T0))
            .await
            .unwrap();
        store
            .insert_game_event(goal(setup.game.id, setup.team_a[1], T0))
            .await
            .unwrap();

        handle_game_completed(&state, &setup.game, "evt-1").await.unwrap();

        let game = store.find_game(setup.game.id).await.unwrap().unwrap();
        assert_eq!(game.goal_scorer_ids, vec![setup.team_a[1], setup.team_b[0]]);
        assert_eq!(game.goal_scorer_names, vec!["Ada", "Ben"]);
    }

    #[tokio::test]
    async fn hub_less_games_skip_hub_counters() {
        let (state, store) = fixture().await;
        let mut setup = completed_game(&store, 1, 0).await;
        setup.game.hub_id = None;

        handle_game_completed(&state, &setup.game, "evt-1").await.unwrap();
        // Nothing to assert on hubs beyond not failing; player stats settle.
        let stats = store.find_player_stats(setup.team_a[0]).await.unwrap().unwrap();
        assert_eq!(stats.games_played, 1);
    }

    #[tokio::test]
    async fn unavailable_storage_aborts_settlement() {
        let (state, store) = fixture().await;
        let setup = completed_game(&store, 1, 0).await;
        store.set_unavailable(true);

        let result = handle_game_completed(&state, &setup.game, "evt-1").await;
        assert!(matches!(result, Err(ServiceError::Unavailable(_))));
    }

    #[tokio::test]
    async fn hub_counter_seed_is_respected() {
        let (state, store) = fixture().await;
        let setup = completed_game(&store, 2, 1).await;
        let hub_id = setup.game.hub_id.unwrap();
        store.seed_hub(HubRecord {
            id: hub_id,
            name: "Riverside".into(),
            total_games: 7,
            total_goals: 30,
            last_game_completed_at: None,
        });

        handle_game_completed(&state, &setup.game, "evt-1").await.unwrap();

        let hub = store.find_hub(hub_id).await.unwrap().unwrap();
        assert_eq!(hub.total_games, 8);
        assert_eq!(hub.total_goals, 33);
        assert_eq!(hub.last_game_completed_at, Some(T0));
    }
}
