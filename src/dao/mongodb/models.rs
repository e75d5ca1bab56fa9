use indexmap::IndexMap;
use mongodb::bson::{Binary, DateTime, Document, doc, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dao::models::{
    Badge, GameEventKind, GameEventRecord, GameRecord, GameStatus, HubMemberRecord, HubRecord,
    PairingRecord, PlayerStatsRecord, ProcessedEventRecord, RateLimitRecord, SignupRecord,
    SignupStatus, TeamRecord, UserRecord, VenueRecord,
};

pub fn to_bson_date(value: OffsetDateTime) -> DateTime {
    DateTime::from_system_time(value.into())
}

fn from_bson_date(value: DateTime) -> OffsetDateTime {
    value.to_system_time().into()
}

fn to_bson_date_opt(value: Option<OffsetDateTime>) -> Option<DateTime> {
    value.map(to_bson_date)
}

fn from_bson_date_opt(value: Option<DateTime>) -> Option<OffsetDateTime> {
    value.map(from_bson_date)
}

/// One ballot; stored as an array so the insertion order survives BSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoVoteEntry {
    voter: Uuid,
    candidate: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    hub_id: Option<Uuid>,
    organizer_id: Uuid,
    scheduled_at: DateTime,
    started_at: Option<DateTime>,
    completed_at: Option<DateTime>,
    status: GameStatus,
    team_count: u32,
    max_participants: Option<u32>,
    teams: Vec<TeamRecord>,
    venue_id: Option<Uuid>,
    confirmed_player_count: u32,
    confirmed_player_ids: Vec<Uuid>,
    is_full: bool,
    goal_scorer_ids: Vec<Uuid>,
    goal_scorer_names: Vec<String>,
    mvp_player_id: Option<Uuid>,
    mvp_player_name: Option<String>,
    venue_name: Option<String>,
    voting_enabled: bool,
    #[serde(default)]
    votes: Vec<MongoVoteEntry>,
    voting_closed_at: Option<DateTime>,
    voting_winner_id: Option<Uuid>,
    reminder_sent_at: Option<DateTime>,
    auto_close_reason: Option<String>,
    updated_at: DateTime,
    version: u64,
}

impl From<GameRecord> for MongoGameDocument {
    fn from(value: GameRecord) -> Self {
        Self {
            id: value.id,
            hub_id: value.hub_id,
            organizer_id: value.organizer_id,
            scheduled_at: to_bson_date(value.scheduled_at),
            started_at: to_bson_date_opt(value.started_at),
            completed_at: to_bson_date_opt(value.completed_at),
            status: value.status,
            team_count: value.team_count,
            max_participants: value.max_participants,
            teams: value.teams,
            venue_id: value.venue_id,
            confirmed_player_count: value.confirmed_player_count,
            confirmed_player_ids: value.confirmed_player_ids,
            is_full: value.is_full,
            goal_scorer_ids: value.goal_scorer_ids,
            goal_scorer_names: value.goal_scorer_names,
            mvp_player_id: value.mvp_player_id,
            mvp_player_name: value.mvp_player_name,
            venue_name: value.venue_name,
            voting_enabled: value.voting_enabled,
            votes: value
                .votes
                .into_iter()
                .map(|(voter, candidate)| MongoVoteEntry { voter, candidate })
                .collect(),
            voting_closed_at: to_bson_date_opt(value.voting_closed_at),
            voting_winner_id: value.voting_winner_id,
            reminder_sent_at: to_bson_date_opt(value.reminder_sent_at),
            auto_close_reason: value.auto_close_reason,
            updated_at: to_bson_date(value.updated_at),
            version: value.version,
        }
    }
}

impl From<MongoGameDocument> for GameRecord {
    fn from(value: MongoGameDocument) -> Self {
        Self {
            id: value.id,
            hub_id: value.hub_id,
            organizer_id: value.organizer_id,
            scheduled_at: from_bson_date(value.scheduled_at),
            started_at: from_bson_date_opt(value.started_at),
            completed_at: from_bson_date_opt(value.completed_at),
            status: value.status,
            team_count: value.team_count,
            max_participants: value.max_participants,
            teams: value.teams,
            venue_id: value.venue_id,
            confirmed_player_count: value.confirmed_player_count,
            confirmed_player_ids: value.confirmed_player_ids,
            is_full: value.is_full,
            goal_scorer_ids: value.goal_scorer_ids,
            goal_scorer_names: value.goal_scorer_names,
            mvp_player_id: value.mvp_player_id,
            mvp_player_name: value.mvp_player_name,
            venue_name: value.venue_name,
            voting_enabled: value.voting_enabled,
            votes: value
                .votes
                .into_iter()
                .map(|entry| (entry.voter, entry.candidate))
                .collect::<IndexMap<_, _>>(),
            voting_closed_at: from_bson_date_opt(value.voting_closed_at),
            voting_winner_id: value.voting_winner_id,
            reminder_sent_at: from_bson_date_opt(value.reminder_sent_at),
            auto_close_reason: value.auto_close_reason,
            updated_at: from_bson_date(value.updated_at),
            version: value.version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSignupDocument {
    #[serde(rename = "_id")]
    id: String,
    game_id: Uuid,
    user_id: Uuid,
    status: SignupStatus,
    signed_up_at: DateTime,
    game_date: Option<DateTime>,
    game_status: Option<GameStatus>,
    venue_name: Option<String>,
    updated_at: DateTime,
    version: u64,
}

/// Document identifier for one (game, user) signup.
pub fn signup_id(game_id: Uuid, user_id: Uuid) -> String {
    format!("{game_id}:{user_id}")
}

impl From<SignupRecord> for MongoSignupDocument {
    fn from(value: SignupRecord) -> Self {
        Self {
            id: signup_id(value.game_id, value.user_id),
            game_id: value.game_id,
            user_id: value.user_id,
            status: value.status,
            signed_up_at: to_bson_date(value.signed_up_at),
            game_date: to_bson_date_opt(value.game_date),
            game_status: value.game_status,
            venue_name: value.venue_name,
            updated_at: to_bson_date(value.updated_at),
            version: value.version,
        }
    }
}

impl From<MongoSignupDocument> for SignupRecord {
    fn from(value: MongoSignupDocument) -> Self {
        Self {
            game_id: value.game_id,
            user_id: value.user_id,
            status: value.status,
            signed_up_at: from_bson_date(value.signed_up_at),
            game_date: from_bson_date_opt(value.game_date),
            game_status: value.game_status,
            venue_name: value.venue_name,
            updated_at: from_bson_date(value.updated_at),
            version: value.version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameEventDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    game_id: Uuid,
    player_id: Uuid,
    kind: GameEventKind,
    recorded_at: DateTime,
}

impl From<GameEventRecord> for MongoGameEventDocument {
    fn from(value: GameEventRecord) -> Self {
        Self {
            id: value.id,
            game_id: value.game_id,
            player_id: value.player_id,
            kind: value.kind,
            recorded_at: to_bson_date(value.recorded_at),
        }
    }
}

impl From<MongoGameEventDocument> for GameEventRecord {
    fn from(value: MongoGameEventDocument) -> Self {
        Self {
            id: value.id,
            game_id: value.game_id,
            player_id: value.player_id,
            kind: value.kind,
            recorded_at: from_bson_date(value.recorded_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerStatsDocument {
    #[serde(rename = "_id")]
    user_id: Uuid,
    #[serde(default)]
    games_played: u64,
    #[serde(default)]
    games_won: u64,
    #[serde(default)]
    goals: u64,
    #[serde(default)]
    assists: u64,
    #[serde(default)]
    saves: u64,
    #[serde(default)]
    badges: Vec<Badge>,
    updated_at: DateTime,
}

impl From<MongoPlayerStatsDocument> for PlayerStatsRecord {
    fn from(value: MongoPlayerStatsDocument) -> Self {
        Self {
            user_id: value.user_id,
            games_played: value.games_played,
            games_won: value.games_won,
            goals: value.goals,
            assists: value.assists,
            saves: value.saves,
            badges: value.badges,
            updated_at: from_bson_date(value.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRateLimitDocument {
    #[serde(rename = "_id")]
    id: String,
    subject: String,
    action: String,
    request_times: Vec<i64>,
    updated_at: DateTime,
    version: u64,
}

impl From<RateLimitRecord> for MongoRateLimitDocument {
    fn from(value: RateLimitRecord) -> Self {
        Self {
            id: RateLimitRecord::key(&value.subject, &value.action),
            subject: value.subject,
            action: value.action,
            request_times: value.request_times,
            updated_at: to_bson_date(value.updated_at),
            version: value.version,
        }
    }
}

impl From<MongoRateLimitDocument> for RateLimitRecord {
    fn from(value: MongoRateLimitDocument) -> Self {
        Self {
            subject: value.subject,
            action: value.action,
            request_times: value.request_times,
            updated_at: from_bson_date(value.updated_at),
            version: value.version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoProcessedEventDocument {
    #[serde(rename = "_id")]
    event_id: String,
    event_type: String,
    subject: String,
    processed_at: DateTime,
    expires_at: DateTime,
}

impl From<ProcessedEventRecord> for MongoProcessedEventDocument {
    fn from(value: ProcessedEventRecord) -> Self {
        Self {
            event_id: value.event_id,
            event_type: value.event_type,
            subject: value.subject,
            processed_at: to_bson_date(value.processed_at),
            expires_at: to_bson_date(value.expires_at),
        }
    }
}

impl From<MongoProcessedEventDocument> for ProcessedEventRecord {
    fn from(value: MongoProcessedEventDocument) -> Self {
        Self {
            event_id: value.event_id,
            event_type: value.event_type,
            subject: value.subject,
            processed_at: from_bson_date(value.processed_at),
            expires_at: from_bson_date(value.expires_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoHubDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    #[serde(default)]
    name: String,
    #[serde(default)]
    total_games: u64,
    #[serde(default)]
    total_goals: u64,
    last_game_completed_at: Option<DateTime>,
}

impl From<MongoHubDocument> for HubRecord {
    fn from(value: MongoHubDocument) -> Self {
        Self {
            id: value.id,
            name: value.name,
            total_games: value.total_games,
            total_goals: value.total_goals,
            last_game_completed_at: from_bson_date_opt(value.last_game_completed_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoUserDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    name: String,
    #[serde(default)]
    push_tokens: Vec<String>,
}

impl From<MongoUserDocument> for UserRecord {
    fn from(value: MongoUserDocument) -> Self {
        Self {
            id: value.id,
            name: value.name,
            push_tokens: value.push_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoVenueDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    name: String,
}

impl From<MongoVenueDocument> for VenueRecord {
    fn from(value: MongoVenueDocument) -> Self {
        Self {
            id: value.id,
            name: value.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoHubMemberDocument {
    hub_id: Uuid,
    user_id: Uuid,
    #[serde(default)]
    rating: f64,
    #[serde(default)]
    total_mvps: u64,
}

impl From<MongoHubMemberDocument> for HubMemberRecord {
    fn from(value: MongoHubMemberDocument) -> Self {
        Self {
            hub_id: value.hub_id,
            user_id: value.user_id,
            rating: value.rating,
            total_mvps: value.total_mvps,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPairingDocument {
    #[serde(rename = "_id")]
    key: String,
    #[serde(default)]
    games_together: u64,
    #[serde(default)]
    games_won_together: u64,
}

impl From<MongoPairingDocument> for PairingRecord {
    fn from(value: MongoPairingDocument) -> Self {
        Self {
            key: value.key,
            games_together: value.games_together,
            games_won_together: value.games_won_together,
        }
    }
}

/// Status strings as serde renders them, for filter documents.
pub mod status_filter {
    /// Pre-start game statuses.
    pub const PRE_START: [&str; 5] = [
        "scheduled",
        "recruiting",
        "fullyBooked",
        "teamSelection",
        "teamsFormed",
    ];
    /// In-progress games.
    pub const IN_PROGRESS: &str = "inProgress";
    /// Completed games.
    pub const COMPLETED: &str = "completed";
    /// Confirmed signups.
    pub const CONFIRMED: &str = "confirmed";
    /// Waitlisted signups.
    pub const WAITLIST: &str = "waitlist";
}

pub fn uuid_as_binary(id: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.into_bytes().to_vec(),
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": uuid_as_binary(id)}
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson;

    #[test]
    fn status_filter_strings_match_serde() {
        let pre = [
            GameStatus::Scheduled,
            GameStatus::Recruiting,
            GameStatus::FullyBooked,
            GameStatus::TeamSelection,
            GameStatus::TeamsFormed,
        ];
        for (status, expected) in pre.into_iter().zip(status_filter::PRE_START) {
            assert_eq!(bson::serialize_to_bson(&status).unwrap(), bson::Bson::from(expected));
        }
        assert_eq!(
            bson::serialize_to_bson(&GameStatus::InProgress).unwrap(),
            bson::Bson::from(status_filter::IN_PROGRESS)
        );
        assert_eq!(
            bson::serialize_to_bson(&SignupStatus::Confirmed).unwrap(),
            bson::Bson::from(status_filter::CONFIRMED)
        );
        assert_eq!(
            bson::serialize_to_bson(&SignupStatus::Waitlist).unwrap(),
            bson::Bson::from(status_filter::WAITLIST)
        );
    }

    #[test]
    fn vote_order_survives_the_wrapper() {
        let mut game = GameRecord::new(
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            time::macros::datetime!(2024-06-01 18:00 UTC),
            2,
            time::macros::datetime!(2024-05-30 10:00 UTC),
        );
        let voters: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let candidate = Uuid::new_v4();
        for voter in &voters {
            game.votes.insert(*voter, candidate);
        }

        let round_tripped: GameRecord = MongoGameDocument::from(game).into();
        let seen: Vec<Uuid> = round_tripped.votes.keys().copied().collect();
        assert_eq!(seen, voters);
    }
}
