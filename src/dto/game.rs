use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use crate::dao::models::{GameRecord, GameStatus, SignupRecord, SignupStatus};

/// Payload used to create a new game.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateGameRequest {
    /// Kick-off time, RFC 3339.
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    /// Number of teams to field.
    #[validate(range(min = 1, max = 8))]
    pub team_count: u32,
    /// Explicit capacity; omitted means three players per team.
    #[validate(range(min = 2, max = 64))]
    pub max_participants: Option<u32>,
    /// Hosting hub, if any.
    pub hub_id: Option<Uuid>,
    /// Venue reference, if any.
    pub venue_id: Option<Uuid>,
    /// Whether man-of-the-match voting runs after completion.
    #[serde(default)]
    pub voting_enabled: bool,
}

/// Ballot payload for the vote route.
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    /// Player the ballot is for.
    pub candidate_id: Uuid,
}

/// Client-facing view of a game document.
#[derive(Debug, Serialize)]
pub struct GameSummary {
    /// Game identifier.
    pub id: Uuid,
    /// Current lifecycle status.
    pub status: GameStatus,
    /// Kick-off time.
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    /// Confirmed players.
    pub confirmed_player_count: u32,
    /// Effective capacity.
    pub capacity: u32,
    /// Whether the game is at capacity.
    pub is_full: bool,
    /// Whether voting is enabled.
    pub voting_enabled: bool,
    /// When voting closed, if it has.
    #[serde(with = "time::serde::rfc3339::option")]
    pub voting_closed_at: Option<OffsetDateTime>,
    /// Man of the match, once voting closed.
    pub voting_winner_id: Option<Uuid>,
}

impl From<GameRecord> for GameSummary {
    fn from(game: GameRecord) -> Self {
        Self {
            id: game.id,
            status: game.status,
            scheduled_at: game.scheduled_at,
            confirmed_player_count: game.confirmed_player_count,
            capacity: game.capacity(),
            is_full: game.is_full,
            voting_enabled: game.voting_enabled,
            voting_closed_at: game.voting_closed_at,
            voting_winner_id: game.voting_winner_id,
        }
    }
}

/// Client-facing view of a signup document.
#[derive(Debug, Serialize)]
pub struct SignupSummary {
    /// Game the signup belongs to.
    pub game_id: Uuid,
    /// The signed-up player.
    pub user_id: Uuid,
    /// Membership status.
    pub status: SignupStatus,
    /// When the user joined; the FIFO key for waitlist promotion.
    #[serde(with = "time::serde::rfc3339")]
    pub signed_up_at: OffsetDateTime,
}

impl From<SignupRecord> for SignupSummary {
    fn from(signup: SignupRecord) -> Self {
        Self {
            game_id: signup.game_id,
            user_id: signup.user_id,
            status: signup.status,
            signed_up_at: signup.signed_up_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_count_is_bounded() {
        let valid: CreateGameRequest = serde_json::from_str(
            r#"{"scheduled_at": "2024-06-02T18:00:00Z", "team_count": 2}"#,
        )
        .unwrap();
        assert!(valid.validate().is_ok());

        let zero_teams: CreateGameRequest = serde_json::from_str(
            r#"{"scheduled_at": "2024-06-02T18:00:00Z", "team_count": 0}"#,
        )
        .unwrap();
        assert!(zero_teams.validate().is_err());
    }
}
