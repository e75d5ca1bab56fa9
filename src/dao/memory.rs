//! In-memory [`Store`] used by tests and local runs.
//!
//! Mirrors the backend contract exactly: version-checked writes conflict the
//! same way the MongoDB backend does, and an injectable failure switch lets
//! tests exercise the degraded paths.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use dashmap::DashMap;
use futures::future::BoxFuture;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dao::models::{
    Badge, GameEventRecord, GameRecord, GameStatus, HubMemberRecord, HubRecord, PairingRecord,
    PlayerStatsRecord, ProcessedEventRecord, RateLimitRecord, SignupRecord, SignupStatus,
    StatsDelta, UserRecord, VenueRecord,
};
use crate::dao::storage::{StorageError, StorageResult};
use crate::dao::store::Store;

#[derive(Default)]
struct Inner {
    games: DashMap<Uuid, GameRecord>,
    signups: DashMap<(Uuid, Uuid), SignupRecord>,
    events: DashMap<Uuid, Vec<GameEventRecord>>,
    stats: DashMap<Uuid, PlayerStatsRecord>,
    rate_limits: DashMap<String, RateLimitRecord>,
    processed: DashMap<String, ProcessedEventRecord>,
    users: DashMap<Uuid, UserRecord>,
    hubs: DashMap<Uuid, HubRecord>,
    members: DashMap<(Uuid, Uuid), HubMemberRecord>,
    pairings: DashMap<String, PairingRecord>,
    venues: DashMap<Uuid, VenueRecord>,
    unavailable: AtomicBool,
    stats_delta_calls: AtomicU32,
    stats_delta_fail_at: AtomicU32,
}

/// Fully in-process document store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with an Unavailable error.
    /// Used by tests for the fail-open/fail-closed policies.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Directly seed a user profile.
    pub fn seed_user(&self, user: UserRecord) {
        self.inner.users.insert(user.id, user);
    }

    /// Directly seed a hub.
    pub fn seed_hub(&self, hub: HubRecord) {
        self.inner.hubs.insert(hub.id, hub);
    }

    /// Directly seed a hub membership.
    pub fn seed_hub_member(&self, member: HubMemberRecord) {
        self.inner
            .members
            .insert((member.hub_id, member.user_id), member);
    }

    /// Directly seed a venue.
    pub fn seed_venue(&self, venue: VenueRecord) {
        self.inner.venues.insert(venue.id, venue);
    }

    /// Make the `nth` subsequent `apply_stats_delta` call fail (1-based),
    /// once. Used by tests for failures midway through a settlement.
    pub fn fail_stats_delta_at(&self, nth: u32) {
        self.inner.stats_delta_calls.store(0, Ordering::SeqCst);
        self.inner.stats_delta_fail_at.store(nth, Ordering::SeqCst);
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "in-memory store switched off".to_string(),
                io::Error::new(io::ErrorKind::ConnectionRefused, "store unavailable"),
            ));
        }
        Ok(())
    }
}

fn ready<T: Send + 'static>(result: StorageResult<T>) -> BoxFuture<'static, StorageResult<T>> {
    Box::pin(async move { result })
}

impl Store for MemoryStore {
    fn insert_game(&self, game: GameRecord) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.check_available().and_then(|()| {
            match self.inner.games.entry(game.id) {
                dashmap::Entry::Occupied(_) => Err(StorageError::already_exists(game.id)),
                dashmap::Entry::Vacant(slot) => {
                    slot.insert(game);
                    Ok(())
                }
            }
        });
        ready(result)
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameRecord>>> {
        let result = self
            .check_available()
            .map(|()| self.inner.games.get(&id).map(|g| g.clone()));
        ready(result)
    }

    fn put_game(&self, mut game: GameRecord) -> BoxFuture<'static, StorageResult<GameRecord>> {
        let result = self.check_available().and_then(|()| {
            match self.inner.games.entry(game.id) {
                dashmap::Entry::Occupied(mut slot) => {
                    if slot.get().version != game.version {
                        return Err(StorageError::conflict(game.id));
                    }
                    game.version += 1;
                    slot.insert(game.clone());
                    Ok(game)
                }
                dashmap::Entry::Vacant(_) => Err(StorageError::conflict(game.id)),
            }
        });
        ready(result)
    }

    fn find_games_to_archive(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>> {
        let result = self.check_available().map(|()| {
            let mut hits: Vec<GameRecord> = self
                .inner
                .games
                .iter()
                .filter(|g| g.status.is_pre_start() && g.scheduled_at < cutoff)
                .map(|g| g.clone())
                .collect();
            hits.sort_by_key(|g| g.scheduled_at);
            hits.truncate(limit);
            hits
        });
        ready(result)
    }

    fn find_games_to_complete(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>> {
        let result = self.check_available().map(|()| {
            let mut hits: Vec<GameRecord> = self
                .inner
                .games
                .iter()
                .filter(|g| {
                    g.status == GameStatus::InProgress
                        && g.started_at.is_some_and(|started| started < cutoff)
                })
                .map(|g| g.clone())
                .collect();
            hits.sort_by_key(|g| g.started_at);
            hits.truncate(limit);
            hits
        });
        ready(result)
    }

    fn find_games_needing_reminder(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>> {
        let result = self.check_available().map(|()| {
            let mut hits: Vec<GameRecord> = self
                .inner
                .games
                .iter()
                .filter(|g| {
                    g.status.is_pre_start()
                        && g.reminder_sent_at.is_none()
                        && g.scheduled_at >= from
                        && g.scheduled_at < to
                })
                .map(|g| g.clone())
                .collect();
            hits.sort_by_key(|g| g.scheduled_at);
            hits.truncate(limit);
            hits
        });
        ready(result)
    }

    fn find_games_with_expired_voting(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>> {
        let result = self.check_available().map(|()| {
            let mut hits: Vec<GameRecord> = self
                .inner
                .games
                .iter()
                .filter(|g| {
                    g.status == GameStatus::Completed
                        && g.voting_enabled
                        && g.voting_closed_at.is_none()
                        && g.completed_at.is_some_and(|done| done < cutoff)
                })
                .map(|g| g.clone())
                .collect();
            hits.sort_by_key(|g| g.completed_at);
            hits.truncate(limit);
            hits
        });
        ready(result)
    }

    fn insert_signup(&self, signup: SignupRecord) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.check_available().and_then(|()| {
            let key = (signup.game_id, signup.user_id);
            match self.inner.signups.entry(key) {
                dashmap::Entry::Occupied(_) => Err(StorageError::already_exists(format!(
                    "{}:{}",
                    signup.game_id, signup.user_id
                ))),
                dashmap::Entry::Vacant(slot) => {
                    slot.insert(signup);
                    Ok(())
                }
            }
        });
        ready(result)
    }

    fn find_signup(
        &self,
        game_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SignupRecord>>> {
        let result = self
            .check_available()
            .map(|()| self.inner.signups.get(&(game_id, user_id)).map(|s| s.clone()));
        ready(result)
    }

    fn put_signup(
        &self,
        mut signup: SignupRecord,
    ) -> BoxFuture<'static, StorageResult<SignupRecord>> {
        let result = self.check_available().and_then(|()| {
            let key = (signup.game_id, signup.user_id);
            match self.inner.signups.entry(key) {
                dashmap::Entry::Occupied(mut slot) => {
                    if slot.get().version != signup.version {
                        return Err(StorageError::conflict(format!(
                            "{}:{}",
                            signup.game_id, signup.user_id
                        )));
                    }
                    signup.version += 1;
                    slot.insert(signup.clone());
                    Ok(signup)
                }
                dashmap::Entry::Vacant(_) => Err(StorageError::conflict(format!(
                    "{}:{}",
                    signup.game_id, signup.user_id
                ))),
            }
        });
        ready(result)
    }

    fn list_signups(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<SignupRecord>>> {
        let result = self.check_available().map(|()| {
            let mut hits: Vec<SignupRecord> = self
                .inner
                .signups
                .iter()
                .filter(|s| s.game_id == game_id)
                .map(|s| s.clone())
                .collect();
            hits.sort_by_key(|s| s.signed_up_at);
            hits
        });
        ready(result)
    }

    fn find_confirmed_signups(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SignupRecord>>> {
        let result = self.check_available().map(|()| {
            let mut hits: Vec<SignupRecord> = self
                .inner
                .signups
                .iter()
                .filter(|s| s.game_id == game_id && s.status == SignupStatus::Confirmed)
                .map(|s| s.clone())
                .collect();
            hits.sort_by_key(|s| s.signed_up_at);
            hits
        });
        ready(result)
    }

    fn find_waitlist_head(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SignupRecord>>> {
        let result = self.check_available().map(|()| {
            self.inner
                .signups
                .iter()
                .filter(|s| s.game_id == game_id && s.status == SignupStatus::Waitlist)
                .map(|s| s.clone())
                .min_by_key(|s| s.signed_up_at)
        });
        ready(result)
    }

    fn insert_game_event(&self, event: GameEventRecord) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.check_available().map(|()| {
            self.inner
                .events
                .entry(event.game_id)
                .or_default()
                .push(event);
        });
        ready(result)
    }

    fn list_game_events(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameEventRecord>>> {
        let result = self.check_available().map(|()| {
            self.inner
                .events
                .get(&game_id)
                .map(|entries| entries.clone())
                .unwrap_or_default()
        });
        ready(result)
    }

    fn find_player_stats(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerStatsRecord>>> {
        let result = self
            .check_available()
            .map(|()| self.inner.stats.get(&user_id).map(|s| s.clone()));
        ready(result)
    }

    fn apply_stats_delta(
        &self,
        user_id: Uuid,
        delta: StatsDelta,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.check_available().and_then(|()| {
            let call = self.inner.stats_delta_calls.fetch_add(1, Ordering::SeqCst) + 1;
            let fail_at = self.inner.stats_delta_fail_at.load(Ordering::SeqCst);
            if fail_at != 0 && call == fail_at {
                self.inner.stats_delta_fail_at.store(0, Ordering::SeqCst);
                return Err(StorageError::unavailable(
                    "stats write failure injected".to_string(),
                    io::Error::new(io::ErrorKind::BrokenPipe, "injected failure"),
                ));
            }
            if delta.is_empty() {
                return Ok(());
            }
            let mut entry = self
                .inner
                .stats
                .entry(user_id)
                .or_insert_with(|| PlayerStatsRecord::empty(user_id, now));
            entry.games_played += delta.games_played;
            entry.games_won += delta.games_won;
            entry.goals += delta.goals;
            entry.assists += delta.assists;
            entry.saves += delta.saves;
            entry.updated_at = now;
            Ok(())
        });
        ready(result)
    }

    fn award_badges(
        &self,
        user_id: Uuid,
        badges: Vec<Badge>,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.check_available().map(|()| {
            let mut entry = self
                .inner
                .stats
                .entry(user_id)
                .or_insert_with(|| PlayerStatsRecord::empty(user_id, now));
            for badge in badges {
                if !entry.badges.contains(&badge) {
                    entry.badges.push(badge);
                }
            }
            entry.updated_at = now;
        });
        ready(result)
    }

    fn find_rate_limit(
        &self,
        subject: &str,
        action: &str,
    ) -> BoxFuture<'static, StorageResult<Option<RateLimitRecord>>> {
        let key = RateLimitRecord::key(subject, action);
        let result = self
            .check_available()
            .map(|()| self.inner.rate_limits.get(&key).map(|r| r.clone()));
        ready(result)
    }

    fn put_rate_limit(
        &self,
        mut record: RateLimitRecord,
    ) -> BoxFuture<'static, StorageResult<RateLimitRecord>> {
        let key = RateLimitRecord::key(&record.subject, &record.action);
        let result = self.check_available().and_then(|()| {
            match self.inner.rate_limits.entry(key.clone()) {
                dashmap::Entry::Occupied(mut slot) => {
                    if slot.get().version != record.version {
                        return Err(StorageError::conflict(key));
                    }
                    record.version += 1;
                    slot.insert(record.clone());
                    Ok(record)
                }
                dashmap::Entry::Vacant(slot) => {
                    if record.version != 0 {
                        return Err(StorageError::conflict(key));
                    }
                    record.version = 1;
                    slot.insert(record.clone());
                    Ok(record)
                }
            }
        });
        ready(result)
    }

    fn delete_rate_limit(
        &self,
        subject: &str,
        action: &str,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let key = RateLimitRecord::key(subject, action);
        let result = self.check_available().map(|()| {
            self.inner.rate_limits.remove(&key);
        });
        ready(result)
    }

    fn find_processed_event(
        &self,
        event_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<ProcessedEventRecord>>> {
        let result = self
            .check_available()
            .map(|()| self.inner.processed.get(event_id).map(|p| p.clone()));
        ready(result)
    }

    fn insert_processed_event(
        &self,
        record: ProcessedEventRecord,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.check_available().and_then(|()| {
            match self.inner.processed.entry(record.event_id.clone()) {
                dashmap::Entry::Occupied(_) => {
                    Err(StorageError::already_exists(record.event_id.clone()))
                }
                dashmap::Entry::Vacant(slot) => {
                    slot.insert(record);
                    Ok(())
                }
            }
        });
        ready(result)
    }

    fn purge_processed_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let result = self.check_available().map(|()| {
            let before = self.inner.processed.len() as u64;
            self.inner.processed.retain(|_, p| p.expires_at >= cutoff);
            before - self.inner.processed.len() as u64
        });
        ready(result)
    }

    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserRecord>>> {
        let result = self
            .check_available()
            .map(|()| self.inner.users.get(&id).map(|u| u.clone()));
        ready(result)
    }

    fn find_venue(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<VenueRecord>>> {
        let result = self
            .check_available()
            .map(|()| self.inner.venues.get(&id).map(|v| v.clone()));
        ready(result)
    }

    fn find_hub(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<HubRecord>>> {
        let result = self
            .check_available()
            .map(|()| self.inner.hubs.get(&id).map(|h| h.clone()));
        ready(result)
    }

    fn find_hub_member(
        &self,
        hub_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<HubMemberRecord>>> {
        let result = self
            .check_available()
            .map(|()| self.inner.members.get(&(hub_id, user_id)).map(|m| m.clone()));
        ready(result)
    }

    fn incr_member_mvps(
        &self,
        hub_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.check_available().map(|()| {
            let mut entry = self
                .inner
                .members
                .entry((hub_id, user_id))
                .or_insert_with(|| HubMemberRecord {
                    hub_id,
                    user_id,
                    rating: 0.0,
                    total_mvps: 0,
                });
            entry.total_mvps += 1;
        });
        ready(result)
    }

    fn incr_hub_counters(
        &self,
        hub_id: Uuid,
        goals: u64,
        completed_at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.check_available().map(|()| {
            let mut entry = self.inner.hubs.entry(hub_id).or_insert_with(|| HubRecord {
                id: hub_id,
                name: String::new(),
                total_games: 0,
                total_goals: 0,
                last_game_completed_at: None,
            });
            entry.total_games += 1;
            entry.total_goals += goals;
            entry.last_game_completed_at = Some(completed_at);
        });
        ready(result)
    }

    fn find_pairing(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<PairingRecord>>> {
        let result = self
            .check_available()
            .map(|()| self.inner.pairings.get(key).map(|p| p.clone()));
        ready(result)
    }

    fn incr_pairing(&self, key: &str, won: bool) -> BoxFuture<'static, StorageResult<()>> {
        let key = key.to_string();
        let result = self.check_available().map(|()| {
            let mut entry = self
                .inner
                .pairings
                .entry(key.clone())
                .or_insert_with(|| PairingRecord {
                    key,
                    games_together: 0,
                    games_won_together: 0,
                });
            entry.games_together += 1;
            if won {
                entry.games_won_together += 1;
            }
        });
        ready(result)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.check_available())
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(self.check_available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn game(version: u64) -> GameRecord {
        let mut g = GameRecord::new(
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            datetime!(2024-06-01 18:00 UTC),
            2,
            datetime!(2024-05-30 10:00 UTC),
        );
        g.version = version;
        g
    }

    #[tokio::test]
    async fn put_game_bumps_version_and_detects_stale_writes() {
        let store = MemoryStore::new();
        let g = game(0);
        store.insert_game(g.clone()).await.unwrap();

        let committed = store.put_game(g.clone()).await.unwrap();
        assert_eq!(committed.version, 1);

        // A writer still holding version 0 must lose.
        let stale = store.put_game(g).await;
        assert!(matches!(stale, Err(StorageError::Conflict { .. })));
    }

    #[tokio::test]
    async fn rate_limit_insert_requires_version_zero() {
        let store = MemoryStore::new();
        let record = RateLimitRecord {
            subject: "u1".into(),
            action: "joinGame".into(),
            request_times: vec![1],
            updated_at: datetime!(2024-06-01 18:00 UTC),
            version: 3,
        };
        let result = store.put_rate_limit(record).await;
        assert!(matches!(result, Err(StorageError::Conflict { .. })));
    }

    #[tokio::test]
    async fn unavailable_switch_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let result = store.find_game(Uuid::new_v4()).await;
        assert!(matches!(result, Err(StorageError::Unavailable { .. })));
    }
}
