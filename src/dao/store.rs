use futures::future::BoxFuture;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dao::models::{
    Badge, GameEventRecord, GameRecord, HubMemberRecord, HubRecord, PairingRecord,
    PlayerStatsRecord, ProcessedEventRecord, RateLimitRecord, SignupRecord, StatsDelta, UserRecord,
    VenueRecord,
};
use crate::dao::storage::StorageResult;

/// Abstraction over the document store backing the engine.
///
/// Mutable documents carry a `version` counter. `put_*` methods only succeed
/// when the stored version matches the one the caller read; the store persists
/// the document with `version + 1` and returns [`StorageError::Conflict`]
/// otherwise, so callers re-read and retry. Counter methods (`incr_*`,
/// `apply_stats_delta`) are commutative upserts and never conflict.
///
/// [`StorageError::Conflict`]: crate::dao::storage::StorageError::Conflict
pub trait Store: Send + Sync {
    // Games

    /// Insert a new game; fails if the id already exists.
    fn insert_game(&self, game: GameRecord) -> BoxFuture<'static, StorageResult<()>>;

    /// Fetch a game by id.
    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameRecord>>>;

    /// Version-checked replace of a game document.
    fn put_game(&self, game: GameRecord) -> BoxFuture<'static, StorageResult<GameRecord>>;

    /// Pre-start games whose scheduled time is older than `cutoff`.
    fn find_games_to_archive(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>>;

    /// In-progress games whose start time is older than `cutoff`.
    fn find_games_to_complete(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>>;

    /// Unreminded games starting within `[from, to)`.
    fn find_games_needing_reminder(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>>;

    /// Completed games with voting still open that completed before `cutoff`.
    fn find_games_with_expired_voting(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>>;

    // Signups

    /// Insert a new signup; fails if the (game, user) pair already exists.
    fn insert_signup(&self, signup: SignupRecord) -> BoxFuture<'static, StorageResult<()>>;

    /// Fetch the signup for one (game, user) pair.
    fn find_signup(
        &self,
        game_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SignupRecord>>>;

    /// Version-checked replace of a signup document.
    fn put_signup(&self, signup: SignupRecord) -> BoxFuture<'static, StorageResult<SignupRecord>>;

    /// All signups of a game, regardless of status.
    fn list_signups(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<SignupRecord>>>;

    /// Confirmed signups of a game ordered by signup time.
    fn find_confirmed_signups(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SignupRecord>>>;

    /// Waitlisted signup with the earliest signup time, if any.
    fn find_waitlist_head(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SignupRecord>>>;

    // Game event log

    /// Append an event-log entry; entries are immutable.
    fn insert_game_event(&self, event: GameEventRecord) -> BoxFuture<'static, StorageResult<()>>;

    /// All event-log entries of a game in recording order.
    fn list_game_events(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameEventRecord>>>;

    // Player statistics

    /// Fetch lifetime statistics for a player.
    fn find_player_stats(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerStatsRecord>>>;

    /// Atomically add `delta` to a player's counters, creating the record if
    /// absent. Commutative, so concurrent completions never lose updates.
    fn apply_stats_delta(
        &self,
        user_id: Uuid,
        delta: StatsDelta,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Add badges to a player's set; existing badges are kept (union only).
    fn award_badges(
        &self,
        user_id: Uuid,
        badges: Vec<Badge>,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<()>>;

    // Rate limiting

    /// Fetch the request history for one (subject, action) pair.
    fn find_rate_limit(
        &self,
        subject: &str,
        action: &str,
    ) -> BoxFuture<'static, StorageResult<Option<RateLimitRecord>>>;

    /// Version-checked upsert of a request history. A record with version 0
    /// is inserted only if absent; otherwise the stored version must match.
    fn put_rate_limit(
        &self,
        record: RateLimitRecord,
    ) -> BoxFuture<'static, StorageResult<RateLimitRecord>>;

    /// Drop the request history for one (subject, action) pair.
    fn delete_rate_limit(
        &self,
        subject: &str,
        action: &str,
    ) -> BoxFuture<'static, StorageResult<()>>;

    // Processed-event markers

    /// Fetch a processed-event marker by event id.
    fn find_processed_event(
        &self,
        event_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<ProcessedEventRecord>>>;

    /// Write-once insert of a marker; a duplicate id is AlreadyExists.
    fn insert_processed_event(
        &self,
        record: ProcessedEventRecord,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Delete markers whose `expires_at` is before `cutoff`; returns the
    /// number removed.
    fn purge_processed_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<u64>>;

    // Reference documents

    /// Fetch a user profile.
    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserRecord>>>;

    /// Fetch a venue.
    fn find_venue(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<VenueRecord>>>;

    /// Fetch a hub.
    fn find_hub(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<HubRecord>>>;

    /// Fetch a hub membership.
    fn find_hub_member(
        &self,
        hub_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<HubMemberRecord>>>;

    /// Atomically bump a member's MVP tally, creating the membership if
    /// absent.
    fn incr_member_mvps(
        &self,
        hub_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Atomically bump a hub's completed-game counters.
    fn incr_hub_counters(
        &self,
        hub_id: Uuid,
        goals: u64,
        completed_at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Fetch a pairing record by its sorted pair key.
    fn find_pairing(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<PairingRecord>>>;

    /// Atomically bump a player pair's games-together counters.
    fn incr_pairing(&self, key: &str, won: bool) -> BoxFuture<'static, StorageResult<()>>;

    // Health

    /// Cheap liveness probe against the backend.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Attempt to re-establish a lost backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
