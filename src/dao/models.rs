use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Default number of players per team used when a game does not spell out its
/// capacity explicitly.
pub const DEFAULT_PLAYERS_PER_TEAM: u32 = 3;

/// Lifecycle status of a game document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameStatus {
    /// Created but not yet open for signups.
    Scheduled,
    /// Open for signups.
    Recruiting,
    /// Capacity reached; further joins land on the waitlist.
    FullyBooked,
    /// Organizer is splitting confirmed players into teams.
    TeamSelection,
    /// Teams locked in, waiting for kick-off.
    TeamsFormed,
    /// Game is being played.
    InProgress,
    /// Game finished; statistics have been or are being settled.
    Completed,
    /// Organizer cancelled the game.
    Cancelled,
    /// The game never started and was archived by the scheduler.
    ArchivedNotPlayed,
}

impl GameStatus {
    /// Statuses that precede kick-off and can still be archived or started.
    pub fn is_pre_start(self) -> bool {
        matches!(
            self,
            GameStatus::Scheduled
                | GameStatus::Recruiting
                | GameStatus::FullyBooked
                | GameStatus::TeamSelection
                | GameStatus::TeamsFormed
        )
    }

    /// Terminal statuses are never re-opened.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GameStatus::Completed | GameStatus::Cancelled | GameStatus::ArchivedNotPlayed
        )
    }
}

/// Membership status of a signup document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignupStatus {
    /// Holds a confirmed slot.
    Confirmed,
    /// Queued for promotion, FIFO by signup time.
    Waitlist,
    /// Withdrew voluntarily.
    Cancelled,
    /// Removed by the organizer.
    Rejected,
}

/// One team within a game, with its final score once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamRecord {
    /// Stable identifier for the team.
    pub team_id: Uuid,
    /// Confirmed players assigned to this team.
    pub player_ids: Vec<Uuid>,
    /// Goals scored by the team.
    pub score: u32,
}

/// Aggregate game document persisted by the storage layer.
///
/// Carries both the source-of-truth scheduling fields and the denormalized
/// summaries (counts, names) rebuilt by the aggregator so read paths avoid
/// joins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameRecord {
    /// Primary key of the game.
    pub id: Uuid,
    /// Hosting hub; `None` for public, hub-less games.
    pub hub_id: Option<Uuid>,
    /// User who created and administers the game.
    pub organizer_id: Uuid,
    /// Scheduled kick-off time.
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    /// When the game actually started, if it did.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// When the game completed, if it did.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Current lifecycle status.
    pub status: GameStatus,
    /// Number of teams the organizer plans to field.
    pub team_count: u32,
    /// Explicit capacity; when absent, derived as `team_count × 3`.
    pub max_participants: Option<u32>,
    /// Teams and their scores, populated during team selection.
    pub teams: Vec<TeamRecord>,
    /// Venue reference used for denormalizing the venue name.
    pub venue_id: Option<Uuid>,

    /// Derived: number of confirmed signups.
    pub confirmed_player_count: u32,
    /// Derived: confirmed player ids ordered by signup time.
    pub confirmed_player_ids: Vec<Uuid>,
    /// Derived: whether confirmed count has reached capacity.
    pub is_full: bool,
    /// Derived: players with at least one goal, in first-goal order.
    pub goal_scorer_ids: Vec<Uuid>,
    /// Derived: display names matching `goal_scorer_ids`.
    pub goal_scorer_names: Vec<String>,
    /// Derived: player with the most MVP votes in the event log.
    pub mvp_player_id: Option<Uuid>,
    /// Derived: display name for `mvp_player_id`.
    pub mvp_player_name: Option<String>,
    /// Derived: venue display name.
    pub venue_name: Option<String>,

    /// Whether man-of-the-match voting is enabled for this game.
    pub voting_enabled: bool,
    /// Voter → candidate ballots, in the order they were cast.
    #[serde(default)]
    pub votes: IndexMap<Uuid, Uuid>,
    /// Set exactly once when voting closes; closing is terminal.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub voting_closed_at: Option<OffsetDateTime>,
    /// Winner resolved when voting closed.
    pub voting_winner_id: Option<Uuid>,

    /// Set by the reminder sweep; acts as its idempotency flag.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub reminder_sent_at: Option<OffsetDateTime>,
    /// Reason recorded when the scheduler closed the game on its own.
    pub auto_close_reason: Option<String>,

    /// Last modification timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Optimistic concurrency version; bumped on every successful write.
    pub version: u64,
}

impl GameRecord {
    /// A bare game in its initial state, before any signups.
    pub fn new(
        id: Uuid,
        hub_id: Option<Uuid>,
        organizer_id: Uuid,
        scheduled_at: OffsetDateTime,
        team_count: u32,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            hub_id,
            organizer_id,
            scheduled_at,
            started_at: None,
            completed_at: None,
            status: GameStatus::Recruiting,
            team_count,
            max_participants: None,
            teams: Vec::new(),
            venue_id: None,
            confirmed_player_count: 0,
            confirmed_player_ids: Vec::new(),
            is_full: false,
            goal_scorer_ids: Vec::new(),
            goal_scorer_names: Vec::new(),
            mvp_player_id: None,
            mvp_player_name: None,
            venue_name: None,
            voting_enabled: false,
            votes: IndexMap::new(),
            voting_closed_at: None,
            voting_winner_id: None,
            reminder_sent_at: None,
            auto_close_reason: None,
            updated_at: now,
            version: 0,
        }
    }

    /// Effective capacity, applying the `team_count × 3` defaulting rule.
    pub fn capacity(&self) -> u32 {
        self.max_participants
            .unwrap_or(self.team_count * DEFAULT_PLAYERS_PER_TEAM)
    }

    /// The winning team id, when one team's score strictly exceeds all
    /// others. Equal top scores mean no winner.
    pub fn winning_team_id(&self) -> Option<Uuid> {
        let best = self.teams.iter().max_by_key(|team| team.score)?;
        let contested = self
            .teams
            .iter()
            .filter(|team| team.team_id != best.team_id)
            .any(|team| team.score >= best.score);
        (!contested).then_some(best.team_id)
    }

    /// Total goals recorded across all teams.
    pub fn total_goals(&self) -> u32 {
        self.teams.iter().map(|team| team.score).sum()
    }
}

/// Signup document: one per (game, user), never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignupRecord {
    /// Game this signup belongs to.
    pub game_id: Uuid,
    /// The signing-up player.
    pub user_id: Uuid,
    /// Current membership status.
    pub status: SignupStatus,
    /// When the user first asked to join; the FIFO key for promotion.
    #[serde(with = "time::serde::rfc3339")]
    pub signed_up_at: OffsetDateTime,
    /// Denormalized copy of the game date for reverse lookups.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub game_date: Option<OffsetDateTime>,
    /// Denormalized copy of the game status.
    pub game_status: Option<GameStatus>,
    /// Denormalized copy of the venue name.
    pub venue_name: Option<String>,
    /// Last modification timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Optimistic concurrency version.
    pub version: u64,
}

/// Kind of an append-only per-game event-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameEventKind {
    /// A goal was scored.
    Goal,
    /// An assist was provided.
    Assist,
    /// A save was made.
    Save,
    /// An in-log MVP vote (distinct from the closing vote map).
    MvpVote,
}

/// Append-only event-log entry scoped to a game; immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameEventRecord {
    /// Primary key of the entry.
    pub id: Uuid,
    /// Game the entry belongs to.
    pub game_id: Uuid,
    /// Player credited with the event.
    pub player_id: Uuid,
    /// What happened.
    pub kind: GameEventKind,
    /// When the entry was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// Milestone badges; once earned they are never revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Badge {
    /// First completed game.
    FirstGame,
    /// Ten completed games.
    TenGames,
    /// Fifty completed games.
    FiftyGames,
    /// One hundred completed games.
    HundredGames,
    /// First goal.
    FirstGoal,
    /// Ten goals.
    TenGoals,
    /// Fifty goals.
    FiftyGoals,
    /// Three or more goals credited in a single game.
    HatTrick,
}

/// Lifetime per-player statistics, mutated only through commutative
/// increments so concurrent game completions never lose updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatsRecord {
    /// Player these statistics belong to.
    pub user_id: Uuid,
    /// Completed games with a confirmed signup.
    pub games_played: u64,
    /// Completed games on the winning team.
    pub games_won: u64,
    /// Lifetime goals.
    pub goals: u64,
    /// Lifetime assists.
    pub assists: u64,
    /// Lifetime saves.
    pub saves: u64,
    /// Earned badges; grows monotonically.
    pub badges: Vec<Badge>,
    /// Last modification timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl PlayerStatsRecord {
    /// Empty statistics for a player seen for the first time.
    pub fn empty(user_id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            user_id,
            games_played: 0,
            games_won: 0,
            goals: 0,
            assists: 0,
            saves: 0,
            badges: Vec::new(),
            updated_at: now,
        }
    }
}

/// Commutative increment applied to a [`PlayerStatsRecord`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsDelta {
    /// Games played increment.
    pub games_played: u64,
    /// Games won increment.
    pub games_won: u64,
    /// Goals increment.
    pub goals: u64,
    /// Assists increment.
    pub assists: u64,
    /// Saves increment.
    pub saves: u64,
}

impl StatsDelta {
    /// Whether the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == StatsDelta::default()
    }
}

/// Sliding-window request history for one (subject, action) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitRecord {
    /// Who is being limited (typically a user id).
    pub subject: String,
    /// The limited action name, e.g. `joinGame`.
    pub action: String,
    /// Unix-millisecond timestamps of recent requests, oldest first.
    pub request_times: Vec<i64>,
    /// Last modification timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Optimistic concurrency version; `0` means not yet persisted.
    pub version: u64,
}

impl RateLimitRecord {
    /// Document identifier for one (subject, action) pair.
    pub fn key(subject: &str, action: &str) -> String {
        format!("{subject}:{action}")
    }
}

/// Write-once marker recording that a change event already produced its
/// side effects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedEventRecord {
    /// Unique identifier of the delivered event.
    pub event_id: String,
    /// What kind of handler processed it, for debugging.
    pub event_type: String,
    /// The document the event concerned (game id, user id, ...).
    pub subject: String,
    /// When the marker was written.
    #[serde(with = "time::serde::rfc3339")]
    pub processed_at: OffsetDateTime,
    /// After this instant the marker may be garbage collected.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Minimal user profile needed for denormalized names and push delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    /// Primary key of the user.
    pub id: Uuid,
    /// Display name copied into denormalized summaries.
    pub name: String,
    /// Registered push-notification tokens.
    pub push_tokens: Vec<String>,
}

/// Venue a game is played at; the source for the denormalized venue name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VenueRecord {
    /// Primary key of the venue.
    pub id: Uuid,
    /// Display name copied onto games and signups.
    pub name: String,
}

/// Community hosting games; carries aggregate counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubRecord {
    /// Primary key of the hub.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Completed games hosted, maintained by increment.
    pub total_games: u64,
    /// Goals across completed games, maintained by increment.
    pub total_goals: u64,
    /// When the most recent game completed.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_game_completed_at: Option<OffsetDateTime>,
}

/// Per-hub membership record; the rating is the voting tie-breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubMemberRecord {
    /// Hub the membership belongs to.
    pub hub_id: Uuid,
    /// The member.
    pub user_id: Uuid,
    /// Organizer-assigned rating.
    pub rating: f64,
    /// Lifetime man-of-the-match wins, maintained by increment.
    pub total_mvps: u64,
}

/// Chemistry tracker for a pair of players, keyed by the sorted pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairingRecord {
    /// Sorted `{smaller_uuid}:{larger_uuid}` key.
    pub key: String,
    /// Completed games where both were on the same team.
    pub games_together: u64,
    /// Of those, games their team won.
    pub games_won_together: u64,
}

/// Build the canonical sorted key for a player pair.
pub fn pairing_key(a: Uuid, b: Uuid) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn game() -> GameRecord {
        GameRecord::new(
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            datetime!(2024-06-01 18:00 UTC),
            2,
            datetime!(2024-05-30 10:00 UTC),
        )
    }

    #[test]
    fn capacity_defaults_to_three_per_team() {
        let mut g = game();
        assert_eq!(g.capacity(), 6);
        g.max_participants = Some(10);
        assert_eq!(g.capacity(), 10);
    }

    #[test]
    fn winner_requires_strictly_greater_score() {
        let mut g = game();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        g.teams = vec![
            TeamRecord {
                team_id: a,
                player_ids: vec![],
                score: 3,
            },
            TeamRecord {
                team_id: b,
                player_ids: vec![],
                score: 3,
            },
        ];
        assert_eq!(g.winning_team_id(), None);

        g.teams[0].score = 4;
        assert_eq!(g.winning_team_id(), Some(a));
    }

    #[test]
    fn pairing_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(pairing_key(a, b), pairing_key(b, a));
    }
}
