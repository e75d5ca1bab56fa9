//! Signup membership: join, cancel, reject, and waitlist promotion.
//!
//! The game document's version is the serialization point for capacity. Any
//! write that changes who holds a confirmed slot goes through a compare-and-
//! set on the game, re-reading and retrying on conflict, so racing joins and
//! cancellations can never confirm more players than the game holds.

use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{GameRecord, GameStatus, SignupRecord, SignupStatus},
        storage::StorageError,
    },
    dto::game::CreateGameRequest,
    error::{ConflictKind, ServiceError},
    services::notifier::{Notification, send_best_effort},
    state::{
        SharedState,
        lifecycle::{check_game_transition, check_signup_transition},
    },
};

const MAX_TXN_ATTEMPTS: u32 = 8;

/// Create a new game owned by the organizer. The game opens in recruiting
/// with an empty roster.
pub async fn create_game(
    state: &SharedState,
    organizer_id: Uuid,
    request: CreateGameRequest,
) -> Result<GameRecord, ServiceError> {
    let store = state.store().await?;
    let now = state.clock.now();

    if request.scheduled_at <= now {
        return Err(ServiceError::InvalidInput(
            "scheduled_at must be in the future".to_string(),
        ));
    }

    let mut game = GameRecord::new(
        Uuid::new_v4(),
        request.hub_id,
        organizer_id,
        request.scheduled_at,
        request.team_count,
        now,
    );
    game.max_participants = request.max_participants;
    game.venue_id = request.venue_id;
    game.voting_enabled = request.voting_enabled;
    if let Some(venue_id) = request.venue_id {
        game.venue_name = store.find_venue(venue_id).await?.map(|venue| venue.name);
    }

    store.insert_game(game.clone()).await?;
    info!(game_id = %game.id, %organizer_id, "game created");
    Ok(game)
}

/// Ask to join a game. Confirms the player while capacity remains, otherwise
/// places them at the tail of the waitlist.
pub async fn join_game(
    state: &SharedState,
    game_id: Uuid,
    user_id: Uuid,
) -> Result<SignupRecord, ServiceError> {
    let store = state.store().await?;
    let now = state.clock.now();

    for _ in 0..MAX_TXN_ATTEMPTS {
        let Some(game) = store.find_game(game_id).await? else {
            return Err(ServiceError::NotFound(format!("game `{game_id}` not found")));
        };
        ensure_joinable(&game)?;

        if let Some(existing) = store.find_signup(game_id, user_id).await? {
            return rejoin(state, game, existing).await;
        }

        let confirmed = game.confirmed_player_count < game.capacity();
        let status = if confirmed {
            SignupStatus::Confirmed
        } else {
            SignupStatus::Waitlist
        };

        if confirmed {
            // Reserve the slot on the game document first; a conflicting
            // writer forces a re-read with fresh counts.
            match store.put_game(reserve_slot(&game, user_id, now)).await {
                Ok(_) => {}
                Err(StorageError::Conflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        let signup = SignupRecord {
            game_id,
            user_id,
            status,
            signed_up_at: now,
            game_date: Some(game.scheduled_at),
            game_status: Some(game.status),
            venue_name: game.venue_name.clone(),
            updated_at: now,
            version: 0,
        };

        match store.insert_signup(signup.clone()).await {
            Ok(()) => {
                info!(%game_id, %user_id, status = ?status, "signup created");
                return Ok(signup);
            }
            Err(StorageError::AlreadyExists { .. }) => {
                // Lost a duplicate-join race after reserving; put the
                // counters back in line with the signup set and re-enter.
                recompute_game(state, game_id).await?;
                continue;
            }
            Err(err) => {
                if confirmed {
                    recompute_game(state, game_id).await?;
                }
                return Err(err.into());
            }
        }
    }

    Err(contention(game_id))
}

/// Withdraw the caller's own signup. Frees a slot when it was confirmed.
pub async fn cancel_signup(
    state: &SharedState,
    game_id: Uuid,
    user_id: Uuid,
) -> Result<SignupRecord, ServiceError> {
    close_signup(state, game_id, user_id, SignupStatus::Cancelled).await
}

/// Organizer-only removal of a player. Frees a slot when the signup was
/// confirmed.
pub async fn reject_player(
    state: &SharedState,
    game_id: Uuid,
    organizer_id: Uuid,
    user_id: Uuid,
) -> Result<SignupRecord, ServiceError> {
    let store = state.store().await?;
    let Some(game) = store.find_game(game_id).await? else {
        return Err(ServiceError::NotFound(format!("game `{game_id}` not found")));
    };
    ensure_organizer(&game, organizer_id)?;

    close_signup(state, game_id, user_id, SignupStatus::Rejected).await
}

/// Organizer-only start. Allowed once the scheduled time is within the
/// configured early-start leeway.
pub async fn start_game(
    state: &SharedState,
    game_id: Uuid,
    organizer_id: Uuid,
) -> Result<GameRecord, ServiceError> {
    let store = state.store().await?;
    let now = state.clock.now();

    for _ in 0..MAX_TXN_ATTEMPTS {
        let Some(mut game) = store.find_game(game_id).await? else {
            return Err(ServiceError::NotFound(format!("game `{game_id}` not found")));
        };
        ensure_organizer(&game, organizer_id)?;

        let earliest = game.scheduled_at - state.config.early_start_leeway;
        if now < earliest {
            return Err(ServiceError::InvalidState(format!(
                "game cannot start before {earliest}"
            )));
        }

        check_game_transition(game.status, GameStatus::InProgress)?;
        game.status = GameStatus::InProgress;
        game.started_at = Some(now);
        game.updated_at = now;

        match store.put_game(game).await {
            Ok(updated) => {
                info!(%game_id, "game started");
                return Ok(updated);
            }
            Err(StorageError::Conflict { .. }) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(contention(game_id))
}

/// Promote the longest-waiting waitlisted player into a freed slot.
///
/// Capacity is re-checked against a fresh read on every attempt, so a racing
/// join that claimed the slot first simply means nobody gets promoted.
pub async fn promote_next(
    state: &SharedState,
    game_id: Uuid,
) -> Result<Option<Uuid>, ServiceError> {
    let store = state.store().await?;
    let now = state.clock.now();

    for _ in 0..MAX_TXN_ATTEMPTS {
        // Capacity is judged from the live signup set, not the stored
        // counters: a peer that died between its signup flip and the
        // counter update leaves the counters understated.
        let game = match recompute_game(state, game_id).await {
            Ok(game) => game,
            Err(ServiceError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        if game.status.is_terminal() || game.confirmed_player_count >= game.capacity() {
            return Ok(None);
        }

        let Some(mut head) = store.find_waitlist_head(game_id).await? else {
            return Ok(None);
        };

        check_signup_transition(head.status, SignupStatus::Confirmed)?;

        // Reserve the slot on the game document before touching the
        // signup, the same way a join does. Two promoters racing for one
        // freed slot collide on the game version; the loser re-reads and
        // finds the game full again.
        match store.put_game(reserve_slot(&game, head.user_id, now)).await {
            Ok(_) => {}
            Err(StorageError::Conflict { .. }) => continue,
            Err(err) => return Err(err.into()),
        }

        head.status = SignupStatus::Confirmed;
        head.updated_at = now;

        let promoted = match store.put_signup(head).await {
            Ok(promoted) => promoted,
            Err(StorageError::Conflict { .. }) => {
                // Someone else moved this signup meanwhile; release the
                // reservation and re-enter with fresh counts.
                recompute_game(state, game_id).await?;
                continue;
            }
            Err(err) => {
                recompute_game(state, game_id).await?;
                return Err(err.into());
            }
        };

        info!(%game_id, user_id = %promoted.user_id, "waitlisted player promoted");
        send_best_effort(
            state.notifier.as_ref(),
            Notification::to_user(
                promoted.user_id,
                "You're in!",
                "A spot opened up and you are now confirmed.",
            ),
        )
        .await;

        return Ok(Some(promoted.user_id));
    }

    Err(contention(game_id))
}

/// Rebuild the game's signup-derived counters from the live signup set.
///
/// Full recompute rather than increments: the game version serializes all
/// writers, so the result is exact even after a partial failure elsewhere.
pub async fn recompute_game(
    state: &SharedState,
    game_id: Uuid,
) -> Result<GameRecord, ServiceError> {
    let store = state.store().await?;
    let now = state.clock.now();

    for _ in 0..MAX_TXN_ATTEMPTS {
        let Some(mut game) = store.find_game(game_id).await? else {
            return Err(ServiceError::NotFound(format!("game `{game_id}` not found")));
        };

        let confirmed = store.find_confirmed_signups(game_id).await?;
        game.confirmed_player_ids = confirmed.iter().map(|s| s.user_id).collect();
        game.confirmed_player_count = confirmed.len() as u32;
        game.is_full = game.confirmed_player_count >= game.capacity();

        // Capacity drives the recruiting flip in both directions; other
        // statuses are left alone.
        if game.is_full && game.status == GameStatus::Recruiting {
            game.status = GameStatus::FullyBooked;
        } else if !game.is_full && game.status == GameStatus::FullyBooked {
            game.status = GameStatus::Recruiting;
        }
        game.updated_at = now;

        match store.put_game(game).await {
            Ok(updated) => return Ok(updated),
            Err(StorageError::Conflict { .. }) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(contention(game_id))
}

/// Stamp denormalized game fields onto every signup that is out of date.
/// Conflicts are skipped; the next game change will converge them.
pub async fn sync_signup_denorm(state: &SharedState, game: &GameRecord) -> Result<(), ServiceError> {
    let store = state.store().await?;
    let now = state.clock.now();

    for mut signup in store.list_signups(game.id).await? {
        let up_to_date = signup.game_date == Some(game.scheduled_at)
            && signup.game_status == Some(game.status)
            && signup.venue_name == game.venue_name;
        if up_to_date {
            continue;
        }

        signup.game_date = Some(game.scheduled_at);
        signup.game_status = Some(game.status);
        signup.venue_name = game.venue_name.clone();
        signup.updated_at = now;

        let user_id = signup.user_id;
        match store.put_signup(signup).await {
            Ok(_) => {}
            Err(StorageError::Conflict { .. }) => {
                warn!(game_id = %game.id, %user_id, "signup denorm write lost a race; skipping");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}

async fn close_signup(
    state: &SharedState,
    game_id: Uuid,
    user_id: Uuid,
    to: SignupStatus,
) -> Result<SignupRecord, ServiceError> {
    let store = state.store().await?;
    let now = state.clock.now();

    for _ in 0..MAX_TXN_ATTEMPTS {
        let Some(mut signup) = store.find_signup(game_id, user_id).await? else {
            return Err(ServiceError::NotFound(format!(
                "no signup for user `{user_id}` in game `{game_id}`"
            )));
        };

        check_signup_transition(signup.status, to)?;
        let freed_slot = signup.status == SignupStatus::Confirmed;
        signup.status = to;
        signup.updated_at = now;

        let closed = match store.put_signup(signup).await {
            Ok(closed) => closed,
            Err(StorageError::Conflict { .. }) => continue,
            Err(err) => return Err(err.into()),
        };

        if freed_slot {
            recompute_game(state, game_id).await?;
            // One freed slot, at most one promotion.
            promote_next(state, game_id).await?;
        }

        info!(%game_id, %user_id, status = ?to, "signup closed");
        return Ok(closed);
    }

    Err(contention(game_id))
}

/// A previously cancelled player may come back; their place in the FIFO
/// order restarts from now. Rejected players stay out.
async fn rejoin(
    state: &SharedState,
    game: GameRecord,
    existing: SignupRecord,
) -> Result<SignupRecord, ServiceError> {
    match existing.status {
        SignupStatus::Confirmed | SignupStatus::Waitlist => {
            Err(ServiceError::Conflict(ConflictKind::AlreadySignedUp))
        }
        SignupStatus::Rejected => Err(ServiceError::Unauthorized(
            "removed from this game by the organizer".into(),
        )),
        SignupStatus::Cancelled => revive(state, game.id, existing).await,
    }
}

/// Re-open a cancelled signup. The caller's game snapshot may be stale by
/// now, so capacity is decided from a fresh read each attempt, reserving
/// the slot on the game document like a first-time join does.
async fn revive(
    state: &SharedState,
    game_id: Uuid,
    existing: SignupRecord,
) -> Result<SignupRecord, ServiceError> {
    let store = state.store().await?;
    let now = state.clock.now();

    let mut signup = existing;
    for _ in 0..MAX_TXN_ATTEMPTS {
        let Some(game) = store.find_game(game_id).await? else {
            return Err(ServiceError::NotFound(format!("game `{game_id}` not found")));
        };
        ensure_joinable(&game)?;

        let confirmed = game.confirmed_player_count < game.capacity();
        if confirmed {
            match store.put_game(reserve_slot(&game, signup.user_id, now)).await {
                Ok(_) => {}
                Err(StorageError::Conflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        signup.status = if confirmed {
            SignupStatus::Confirmed
        } else {
            SignupStatus::Waitlist
        };
        signup.signed_up_at = now;
        signup.updated_at = now;

        match store.put_signup(signup).await {
            Ok(revived) => return Ok(revived),
            // Another request raced us on the same signup; surface as a
            // duplicate join after putting the counters back in line.
            Err(StorageError::Conflict { .. }) => {
                if confirmed {
                    recompute_game(state, game_id).await?;
                }
                return Err(ServiceError::Conflict(ConflictKind::AlreadySignedUp));
            }
            Err(err) => {
                if confirmed {
                    recompute_game(state, game_id).await?;
                }
                return Err(err.into());
            }
        }
    }

    Err(contention(game_id))
}

/// Copy of `game` with one confirmed slot handed to `user_id`. Writing the
/// copy back claims the slot; a version conflict means someone else got
/// there first.
fn reserve_slot(game: &GameRecord, user_id: Uuid, now: OffsetDateTime) -> GameRecord {
    let mut reserved = game.clone();
    reserved.confirmed_player_ids.push(user_id);
    reserved.confirmed_player_count += 1;
    reserved.is_full = reserved.confirmed_player_count >= reserved.capacity();
    if reserved.is_full && reserved.status == GameStatus::Recruiting {
        reserved.status = GameStatus::FullyBooked;
    }
    reserved.updated_at = now;
    reserved
}

fn ensure_joinable(game: &GameRecord) -> Result<(), ServiceError> {
    match game.status {
        GameStatus::Scheduled | GameStatus::Recruiting | GameStatus::FullyBooked => Ok(()),
        status => Err(ServiceError::InvalidState(format!(
            "game is not accepting signups while {status:?}"
        ))),
    }
}

pub(crate) fn ensure_organizer(game: &GameRecord, user_id: Uuid) -> Result<(), ServiceError> {
    if game.organizer_id == user_id {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(
            "only the organizer may do this".into(),
        ))
    }
}

fn contention(game_id: Uuid) -> ServiceError {
    ServiceError::InvalidState(format!(
        "game `{game_id}` is under heavy contention, retry shortly"
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::{
        clock::ManualClock,
        config::AppConfig,
        dao::{memory::MemoryStore, models::VenueRecord, store::Store},
        services::notifier::testing::RecordingNotifier,
    };
    use time::macros::datetime;

    const T0: time::OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

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

    async fn seed_game(store: &MemoryStore, team_count: u32) -> GameRecord {
        let game = GameRecord::new(
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            datetime!(2024-06-02 18:00 UTC),
            team_count,
            T0,
        );
        store.insert_game(game.clone()).await.unwrap();
        game
    }

    #[tokio::test]
    async fn joins_confirm_until_capacity_then_waitlist() {
        let fx = fixture().await;
        // team_count 1 → capacity 3
        let game = seed_game(&fx.store, 1).await;

        for i in 0..3 {
            let signup = join_game(&fx.state, game.id, Uuid::new_v4()).await.unwrap();
            assert_eq!(signup.status, SignupStatus::Confirmed, "joiner {i}");
            fx.clock.advance(Duration::from_secs(1));
        }

        let fourth = join_game(&fx.state, game.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(fourth.status, SignupStatus::Waitlist);

        let game = fx.store.find_game(game.id).await.unwrap().unwrap();
        assert_eq!(game.confirmed_player_count, 3);
        assert!(game.is_full);
        assert_eq!(game.status, GameStatus::FullyBooked);
    }

    #[tokio::test]
    async fn duplicate_join_is_a_distinguishable_conflict() {
        let fx = fixture().await;
        let game = seed_game(&fx.store, 2).await;
        let user = Uuid::new_v4();

        join_game(&fx.state, game.id, user).await.unwrap();
        let dup = join_game(&fx.state, game.id, user).await;
        assert!(matches!(
            dup,
            Err(ServiceError::Conflict(ConflictKind::AlreadySignedUp))
        ));
    }

    #[tokio::test]
    async fn cancellation_promotes_earliest_waitlisted_player() {
        let fx = fixture().await;
        let game = seed_game(&fx.store, 1).await;

        let confirmed: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for user in &confirmed {
            join_game(&fx.state, game.id, *user).await.unwrap();
            fx.clock.advance(Duration::from_secs(1));
        }
        let wait_a = Uuid::new_v4();
        let wait_b = Uuid::new_v4();
        join_game(&fx.state, game.id, wait_a).await.unwrap();
        fx.clock.advance(Duration::from_secs(1));
        join_game(&fx.state, game.id, wait_b).await.unwrap();

        cancel_signup(&fx.state, game.id, confirmed[0]).await.unwrap();

        let promoted = fx.store.find_signup(game.id, wait_a).await.unwrap().unwrap();
        assert_eq!(promoted.status, SignupStatus::Confirmed);
        let still_waiting = fx.store.find_signup(game.id, wait_b).await.unwrap().unwrap();
        assert_eq!(still_waiting.status, SignupStatus::Waitlist);

        let game = fx.store.find_game(game.id).await.unwrap().unwrap();
        assert_eq!(game.confirmed_player_count, 3);
        assert!(game.is_full);
    }

    #[tokio::test]
    async fn one_freed_slot_never_promotes_two_players() {
        let fx = fixture().await;
        let game = seed_game(&fx.store, 1).await;

        let confirmed: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for user in &confirmed {
            join_game(&fx.state, game.id, *user).await.unwrap();
            fx.clock.advance(Duration::from_secs(1));
        }
        for _ in 0..2 {
            join_game(&fx.state, game.id, Uuid::new_v4()).await.unwrap();
            fx.clock.advance(Duration::from_secs(1));
        }

        cancel_signup(&fx.state, game.id, confirmed[0]).await.unwrap();

        let game = fx.store.find_game(game.id).await.unwrap().unwrap();
        assert_eq!(game.confirmed_player_count, 3);
        let signups = fx.store.list_signups(game.id).await.unwrap();
        let waitlisted = signups
            .iter()
            .filter(|s| s.status == SignupStatus::Waitlist)
            .count();
        assert_eq!(waitlisted, 1);
    }

    #[tokio::test]
    async fn promotion_capacity_is_rechecked_per_attempt() {
        let fx = fixture().await;
        let game = seed_game(&fx.store, 1).await;

        for _ in 0..3 {
            join_game(&fx.state, game.id, Uuid::new_v4()).await.unwrap();
            fx.clock.advance(Duration::from_secs(1));
        }
        join_game(&fx.state, game.id, Uuid::new_v4()).await.unwrap();

        // Game is full again, so an explicit promotion attempt is a no-op.
        let promoted = promote_next(&fx.state, game.id).await.unwrap();
        assert!(promoted.is_none());
    }

    #[tokio::test]
    async fn promotion_heals_counters_left_by_an_interrupted_peer() {
        let fx = fixture().await;
        let game = seed_game(&fx.store, 1).await;

        let confirmed: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for user in &confirmed {
            join_game(&fx.state, game.id, *user).await.unwrap();
            fx.clock.advance(Duration::from_secs(1));
        }
        let wait_a = Uuid::new_v4();
        let wait_b = Uuid::new_v4();
        join_game(&fx.state, game.id, wait_a).await.unwrap();
        fx.clock.advance(Duration::from_secs(1));
        join_game(&fx.state, game.id, wait_b).await.unwrap();

        // A peer freed confirmed[0]'s slot and flipped wait_a's signup,
        // but died before refreshing the game counters.
        let mut freed = fx
            .store
            .find_signup(game.id, confirmed[0])
            .await
            .unwrap()
            .unwrap();
        freed.status = SignupStatus::Cancelled;
        fx.store.put_signup(freed).await.unwrap();
        recompute_game(&fx.state, game.id).await.unwrap();
        let mut flipped = fx.store.find_signup(game.id, wait_a).await.unwrap().unwrap();
        flipped.status = SignupStatus::Confirmed;
        fx.store.put_signup(flipped).await.unwrap();

        // The freed slot is already spoken for, so this run promotes
        // nobody instead of stacking a second player into it.
        let promoted = promote_next(&fx.state, game.id).await.unwrap();
        assert!(promoted.is_none());

        let game = fx.store.find_game(game.id).await.unwrap().unwrap();
        assert_eq!(game.confirmed_player_count, 3);
        assert!(game.is_full);
        let second = fx.store.find_signup(game.id, wait_b).await.unwrap().unwrap();
        assert_eq!(second.status, SignupStatus::Waitlist);
    }

    #[tokio::test]
    async fn rejoin_from_a_stale_snapshot_cannot_overfill() {
        let fx = fixture().await;
        let game = seed_game(&fx.store, 1).await;
        let returning = Uuid::new_v4();

        join_game(&fx.state, game.id, returning).await.unwrap();
        fx.clock.advance(Duration::from_secs(1));
        cancel_signup(&fx.state, game.id, returning).await.unwrap();

        // Snapshot taken while slots were still free.
        let stale = fx.store.find_game(game.id).await.unwrap().unwrap();

        for _ in 0..3 {
            join_game(&fx.state, game.id, Uuid::new_v4()).await.unwrap();
            fx.clock.advance(Duration::from_secs(1));
        }

        let cancelled = fx
            .store
            .find_signup(game.id, returning)
            .await
            .unwrap()
            .unwrap();
        let revived = rejoin(&fx.state, stale, cancelled).await.unwrap();
        assert_eq!(revived.status, SignupStatus::Waitlist);

        let game = fx.store.find_game(game.id).await.unwrap().unwrap();
        assert_eq!(game.confirmed_player_count, 3);
        assert!(game.is_full);
    }

    #[tokio::test]
    async fn venue_name_is_stamped_onto_games_and_signups() {
        let fx = fixture().await;
        let venue = VenueRecord {
            id: Uuid::new_v4(),
            name: "Riverside Pitch".to_string(),
        };
        fx.store.seed_venue(venue.clone());

        let request = CreateGameRequest {
            scheduled_at: datetime!(2024-06-02 18:00 UTC),
            team_count: 2,
            max_participants: None,
            hub_id: None,
            venue_id: Some(venue.id),
            voting_enabled: false,
        };
        let game = create_game(&fx.state, Uuid::new_v4(), request).await.unwrap();
        assert_eq!(game.venue_name.as_deref(), Some("Riverside Pitch"));

        let signup = join_game(&fx.state, game.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(signup.venue_name.as_deref(), Some("Riverside Pitch"));
    }

    #[tokio::test]
    async fn reject_requires_the_organizer() {
        let fx = fixture().await;
        let game = seed_game(&fx.store, 2).await;
        let player = Uuid::new_v4();
        join_game(&fx.state, game.id, player).await.unwrap();

        let result = reject_player(&fx.state, game.id, Uuid::new_v4(), player).await;
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));

        reject_player(&fx.state, game.id, game.organizer_id, player)
            .await
            .unwrap();
        let signup = fx.store.find_signup(game.id, player).await.unwrap().unwrap();
        assert_eq!(signup.status, SignupStatus::Rejected);
    }

    #[tokio::test]
    async fn rejected_players_cannot_rejoin_but_cancelled_ones_can() {
        let fx = fixture().await;
        let game = seed_game(&fx.store, 2).await;
        let rejected = Uuid::new_v4();
        let cancelled = Uuid::new_v4();

        join_game(&fx.state, game.id, rejected).await.unwrap();
        join_game(&fx.state, game.id, cancelled).await.unwrap();
        reject_player(&fx.state, game.id, game.organizer_id, rejected)
            .await
            .unwrap();
        cancel_signup(&fx.state, game.id, cancelled).await.unwrap();

        assert!(matches!(
            join_game(&fx.state, game.id, rejected).await,
            Err(ServiceError::Unauthorized(_))
        ));
        let revived = join_game(&fx.state, game.id, cancelled).await.unwrap();
        assert_eq!(revived.status, SignupStatus::Confirmed);
    }

    #[tokio::test]
    async fn promotion_survives_a_failing_notifier() {
        let fx = fixture().await;
        let game = seed_game(&fx.store, 1).await;

        let confirmed: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for user in &confirmed {
            join_game(&fx.state, game.id, *user).await.unwrap();
            fx.clock.advance(Duration::from_secs(1));
        }
        let waiting = Uuid::new_v4();
        join_game(&fx.state, game.id, waiting).await.unwrap();

        fx.notifier.set_failing(true);
        cancel_signup(&fx.state, game.id, confirmed[0]).await.unwrap();

        let promoted = fx.store.find_signup(game.id, waiting).await.unwrap().unwrap();
        assert_eq!(promoted.status, SignupStatus::Confirmed);
    }

    #[tokio::test]
    async fn early_start_honors_the_leeway() {
        let fx = fixture().await;
        // Scheduled 2024-06-02 18:00; leeway 30 min → earliest 17:30.
        let game = seed_game(&fx.store, 2).await;

        let too_early = start_game(&fx.state, game.id, game.organizer_id).await;
        assert!(matches!(too_early, Err(ServiceError::InvalidState(_))));

        fx.clock.set(datetime!(2024-06-02 17:31 UTC));
        let started = start_game(&fx.state, game.id, game.organizer_id)
            .await
            .unwrap();
        assert_eq!(started.status, GameStatus::InProgress);
        assert_eq!(started.started_at, Some(datetime!(2024-06-02 17:31 UTC)));
    }

    #[tokio::test]
    async fn join_is_rejected_once_the_game_left_recruitment() {
        let fx = fixture().await;
        let game = seed_game(&fx.store, 2).await;

        fx.clock.set(datetime!(2024-06-02 18:00 UTC));
        start_game(&fx.state, game.id, game.organizer_id)
            .await
            .unwrap();

        let result = join_game(&fx.state, game.id, Uuid::new_v4()).await;
        assert!(matches!(result, Err(ServiceError::InvalidState(_))));
    }
}
