use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::game::{CreateGameRequest, GameSummary, SignupSummary, VoteRequest},
    error::AppError,
    routes::auth::AuthenticatedUser,
    services::{rate_limit, signup, voting},
    state::SharedState,
};

/// Routes handling the game lifecycle: creation, membership, and voting.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games", post(create_game))
        .route("/games/{id}/join", post(join_game))
        .route("/games/{id}/cancel", post(cancel_signup))
        .route("/games/{id}/reject/{user_id}", post(reject_player))
        .route("/games/{id}/start", post(start_game))
        .route("/games/{id}/vote", post(cast_vote))
        .route("/games/{id}/close-voting", post(close_voting))
}

/// Create a fresh game owned by the caller.
pub async fn create_game(
    State(state): State<SharedState>,
    AuthenticatedUser(organizer_id): AuthenticatedUser,
    Valid(Json(payload)): Valid<Json<CreateGameRequest>>,
) -> Result<Json<GameSummary>, AppError> {
    let game = signup::create_game(&state, organizer_id, payload).await?;
    Ok(Json(game.into()))
}

/// Join a game, confirmed or waitlisted depending on capacity.
pub async fn join_game(
    State(state): State<SharedState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SignupSummary>, AppError> {
    rate_limit::enforce(&state, user_id, "joinGame").await?;
    let signup = signup::join_game(&state, id, user_id).await?;
    Ok(Json(signup.into()))
}

/// Withdraw the caller's own signup.
pub async fn cancel_signup(
    State(state): State<SharedState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SignupSummary>, AppError> {
    let signup = signup::cancel_signup(&state, id, user_id).await?;
    Ok(Json(signup.into()))
}

/// Remove a player from the game. Organizer only.
pub async fn reject_player(
    State(state): State<SharedState>,
    AuthenticatedUser(organizer_id): AuthenticatedUser,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<SignupSummary>, AppError> {
    rate_limit::enforce(&state, organizer_id, "rejectPlayer").await?;
    let signup = signup::reject_player(&state, id, organizer_id, user_id).await?;
    Ok(Json(signup.into()))
}

/// Move the game into progress. Organizer only.
pub async fn start_game(
    State(state): State<SharedState>,
    AuthenticatedUser(organizer_id): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<GameSummary>, AppError> {
    rate_limit::enforce(&state, organizer_id, "startGame").await?;
    let game = signup::start_game(&state, id, organizer_id).await?;
    Ok(Json(game.into()))
}

/// Cast the caller's man-of-the-match ballot.
pub async fn cast_vote(
    State(state): State<SharedState>,
    AuthenticatedUser(voter_id): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<VoteRequest>,
) -> Result<Json<GameSummary>, AppError> {
    rate_limit::enforce(&state, voter_id, "castVote").await?;
    let game = voting::cast_vote(&state, id, voter_id, payload.candidate_id).await?;
    Ok(Json(game.into()))
}

/// Close voting ahead of the turnout threshold. Organizer only.
pub async fn close_voting(
    State(state): State<SharedState>,
    AuthenticatedUser(organizer_id): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<GameSummary>, AppError> {
    rate_limit::enforce(&state, organizer_id, "closeVoting").await?;
    let game = voting::close_voting(&state, id, organizer_id).await?;
    Ok(Json(game.into()))
}
