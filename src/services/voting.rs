//! Man-of-the-match voting and its closure state machine.
//!
//! Ballots live on the game document, keyed by voter in the order they were
//! cast. Closure is terminal and stamped exactly once; every closure path
//! checks the stamp on a fresh read before doing anything else, so a second
//! close is always a no-op.

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        models::{GameRecord, GameStatus},
        storage::StorageError,
    },
    error::{ConflictKind, ServiceError},
    services::{
        idempotency::IdempotencyGuard,
        notifier::{Notification, send_best_effort},
        signup::ensure_organizer,
    },
    state::SharedState,
};

const MAX_TXN_ATTEMPTS: u32 = 8;

/// Record one ballot, closing voting when turnout reaches the threshold.
pub async fn cast_vote(
    state: &SharedState,
    game_id: Uuid,
    voter_id: Uuid,
    candidate_id: Uuid,
) -> Result<GameRecord, ServiceError> {
    let store = state.store().await?;
    let now = state.clock.now();

    for _ in 0..MAX_TXN_ATTEMPTS {
        let Some(mut game) = store.find_game(game_id).await? else {
            return Err(ServiceError::NotFound(format!("game `{game_id}` not found")));
        };
        ensure_votable(&game)?;

        if !game.confirmed_player_ids.contains(&voter_id) {
            return Err(ServiceError::Unauthorized(
                "only confirmed participants may vote".into(),
            ));
        }
        if !game.confirmed_player_ids.contains(&candidate_id) {
            return Err(ServiceError::InvalidInput(
                "candidate was not a confirmed participant".into(),
            ));
        }
        if game.votes.contains_key(&voter_id) {
            return Err(ServiceError::Conflict(ConflictKind::AlreadyVoted));
        }

        game.votes.insert(voter_id, candidate_id);
        game.updated_at = now;

        let committed = match store.put_game(game).await {
            Ok(committed) => committed,
            Err(StorageError::Conflict { .. }) => continue,
            Err(err) => return Err(err.into()),
        };

        info!(%game_id, %voter_id, "vote recorded");
        if turnout_reached(&committed, state.config.voting_turnout_threshold) {
            return close_if_open(state, game_id).await;
        }
        return Ok(committed);
    }

    Err(contention(game_id))
}

/// Organizer-requested closure.
pub async fn close_voting(
    state: &SharedState,
    game_id: Uuid,
    requested_by: Uuid,
) -> Result<GameRecord, ServiceError> {
    let store = state.store().await?;
    let Some(game) = store.find_game(game_id).await? else {
        return Err(ServiceError::NotFound(format!("game `{game_id}` not found")));
    };
    ensure_organizer(&game, requested_by)?;
    if game.voting_closed_at.is_some() {
        return Err(ServiceError::Conflict(ConflictKind::VotingClosed));
    }

    close_if_open(state, game_id).await
}

/// Close voting unless it is already closed; called by turnout, the
/// organizer, and the timeout sweep. Returns the (possibly already closed)
/// game.
pub async fn close_if_open(
    state: &SharedState,
    game_id: Uuid,
) -> Result<GameRecord, ServiceError> {
    let store = state.store().await?;
    let now = state.clock.now();

    for _ in 0..MAX_TXN_ATTEMPTS {
        let Some(mut game) = store.find_game(game_id).await? else {
            return Err(ServiceError::NotFound(format!("game `{game_id}` not found")));
        };
        if game.voting_closed_at.is_some() {
            return Ok(game);
        }

        let winner = resolve_winner(state, &game).await?;

        // Award the MVP before stamping closure: once the stamp lands every
        // later call short-circuits above, so the award must already be
        // durable. The marker keeps a stamp retry from incrementing twice.
        if let (Some(winner_id), Some(hub_id)) = (winner, game.hub_id) {
            let guard = IdempotencyGuard::new(store.clone(), state.config.processed_event_ttl);
            let marker = format!("mvpAwarded:{game_id}");
            if !guard.already_processed(&marker, now).await? {
                guard
                    .mark_processed(&marker, "mvpAwarded", &winner_id.to_string(), now)
                    .await?;
                store.incr_member_mvps(hub_id, winner_id).await?;
            }
        }

        game.voting_closed_at = Some(now);
        game.voting_winner_id = winner;
        game.updated_at = now;

        let closed = match store.put_game(game).await {
            Ok(closed) => closed,
            Err(StorageError::Conflict { .. }) => continue,
            Err(err) => return Err(err.into()),
        };

        info!(%game_id, winner = ?winner, "voting closed");
        if let Some(winner_id) = winner {
            send_best_effort(
                state.notifier.as_ref(),
                Notification::to_user(
                    winner_id,
                    "Man of the match",
                    "You were voted man of the match!",
                ),
            )
            .await;
        }
        return Ok(closed);
    }

    Err(contention(game_id))
}

/// Highest vote count wins. Ties fall back to hub-member rating, then to
/// whichever tied candidate was voted for first, which is deterministic
/// because ballots keep their insertion order.
async fn resolve_winner(
    state: &SharedState,
    game: &GameRecord,
) -> Result<Option<Uuid>, ServiceError> {
    let mut tally: indexmap::IndexMap<Uuid, u32> = indexmap::IndexMap::new();
    for candidate in game.votes.values() {
        *tally.entry(*candidate).or_insert(0) += 1;
    }
    let Some(top) = tally.values().copied().max() else {
        return Ok(None);
    };

    let tied: Vec<Uuid> = tally
        .iter()
        .filter(|&(_, &count)| count == top)
        .map(|(&id, _)| id)
        .collect();
    if tied.len() == 1 {
        return Ok(Some(tied[0]));
    }

    let store = state.store().await?;
    let mut best: Option<(Uuid, f64)> = None;
    for &candidate in &tied {
        let rating = match game.hub_id {
            Some(hub_id) => store
                .find_hub_member(hub_id, candidate)
                .await?
                .map(|member| member.rating)
                .unwrap_or(0.0),
            None => 0.0,
        };
        // Strictly-greater keeps the first tied candidate on equal ratings.
        if best.is_none_or(|(_, best_rating)| rating > best_rating) {
            best = Some((candidate, rating));
        }
    }
    Ok(best.map(|(id, _)| id))
}

fn turnout_reached(game: &GameRecord, threshold: f64) -> bool {
    if game.confirmed_player_count == 0 {
        return false;
    }
    game.votes.len() as f64 >= threshold * f64::from(game.confirmed_player_count)
}

fn ensure_votable(game: &GameRecord) -> Result<(), ServiceError> {
    if game.status != GameStatus::Completed {
        return Err(ServiceError::InvalidState(
            "voting opens once the game is completed".into(),
        ));
    }
    if !game.voting_enabled {
        return Err(ServiceError::InvalidState(
            "voting is not enabled for this game".into(),
        ));
    }
    if game.voting_closed_at.is_some() {
        return Err(ServiceError::Conflict(ConflictKind::VotingClosed));
    }
    Ok(())
}

fn contention(game_id: Uuid) -> ServiceError {
    ServiceError::InvalidState(format!(
        "game `{game_id}` is under heavy contention, retry shortly"
    ))
}
