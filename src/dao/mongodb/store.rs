use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{self, Bson, doc},
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoGameDocument, MongoGameEventDocument, MongoHubDocument, MongoHubMemberDocument,
        MongoPairingDocument, MongoPlayerStatsDocument, MongoProcessedEventDocument,
        MongoRateLimitDocument, MongoSignupDocument, MongoUserDocument, MongoVenueDocument,
        doc_id, signup_id, status_filter, to_bson_date, uuid_as_binary,
    },
};
use crate::dao::{
    models::{
        Badge, GameEventRecord, GameRecord, HubMemberRecord, HubRecord, PairingRecord,
        PlayerStatsRecord, ProcessedEventRecord, RateLimitRecord, SignupRecord, StatsDelta,
        UserRecord, VenueRecord,
    },
    storage::{StorageError, StorageResult},
    store::Store,
};

const GAMES: &str = "games";
const SIGNUPS: &str = "signups";
const GAME_EVENTS: &str = "game_events";
const PLAYER_STATS: &str = "player_stats";
const RATE_LIMITS: &str = "rate_limits";
const PROCESSED_EVENTS: &str = "processed_events";
const USERS: &str = "users";
const VENUES: &str = "venues";
const HUBS: &str = "hubs";
const HUB_MEMBERS: &str = "hub_members";
const PAIRINGS: &str = "pairings";

/// MongoDB-backed document store.
#[derive(Clone)]
pub struct MongoStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_err)) if write_err.code == 11000
    )
}

impl MongoStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let specs: [(&'static str, &'static str, bson::Document, bool); 6] = [
            (
                GAMES,
                "game_sweep_scheduled_idx",
                doc! {"status": 1, "scheduled_at": 1},
                false,
            ),
            (
                GAMES,
                "game_sweep_started_idx",
                doc! {"status": 1, "started_at": 1},
                false,
            ),
            (
                SIGNUPS,
                "signup_game_status_idx",
                doc! {"game_id": 1, "status": 1, "signed_up_at": 1},
                false,
            ),
            (
                GAME_EVENTS,
                "event_game_idx",
                doc! {"game_id": 1, "recorded_at": 1},
                false,
            ),
            (
                PROCESSED_EVENTS,
                "processed_expiry_idx",
                doc! {"expires_at": 1},
                false,
            ),
            (
                HUB_MEMBERS,
                "member_hub_user_idx",
                doc! {"hub_id": 1, "user_id": 1},
                true,
            ),
        ];

        for (collection_name, index_name, keys, unique) in specs {
            let collection = database.collection::<bson::Document>(collection_name);
            let index = mongodb::IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(index_name.to_owned()))
                        .unique(unique.then_some(true))
                        .build(),
                )
                .build();

            collection
                .create_index(index)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection: collection_name,
                    index: index_name,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        let guard = self.inner.state.read().await;
        guard.database.collection::<T>(name)
    }

    async fn insert_game(&self, game: GameRecord) -> StorageResult<()> {
        let id = game.id;
        let document = MongoGameDocument::from(game);
        let collection = self.collection::<MongoGameDocument>(GAMES).await;
        collection.insert_one(&document).await.map_err(|source| {
            if is_duplicate_key(&source) {
                StorageError::already_exists(id)
            } else {
                MongoDaoError::Write {
                    collection: GAMES,
                    source,
                }
                .into()
            }
        })?;
        Ok(())
    }

    async fn find_game(&self, id: Uuid) -> StorageResult<Option<GameRecord>> {
        let collection = self.collection::<MongoGameDocument>(GAMES).await;
        let document = collection
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: GAMES,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn put_game(&self, mut game: GameRecord) -> StorageResult<GameRecord> {
        let expected = game.version;
        game.version += 1;
        let id = game.id;
        let document = MongoGameDocument::from(game.clone());
        let collection = self.collection::<MongoGameDocument>(GAMES).await;

        let result = collection
            .replace_one(
                doc! {"_id": uuid_as_binary(id), "version": expected as i64},
                &document,
            )
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: GAMES,
                source,
            })?;

        if result.matched_count == 0 {
            return Err(StorageError::conflict(id));
        }
        Ok(game)
    }

    async fn find_games(
        &self,
        filter: bson::Document,
        sort: bson::Document,
        limit: usize,
    ) -> StorageResult<Vec<GameRecord>> {
        let collection = self.collection::<MongoGameDocument>(GAMES).await;
        let documents: Vec<MongoGameDocument> = collection
            .find(filter)
            .sort(sort)
            .limit(limit as i64)
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: GAMES,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: GAMES,
                source,
            })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn insert_signup(&self, signup: SignupRecord) -> StorageResult<()> {
        let id = signup_id(signup.game_id, signup.user_id);
        let document = MongoSignupDocument::from(signup);
        let collection = self.collection::<MongoSignupDocument>(SIGNUPS).await;
        collection.insert_one(&document).await.map_err(|source| {
            if is_duplicate_key(&source) {
                StorageError::already_exists(id.clone())
            } else {
                MongoDaoError::Write {
                    collection: SIGNUPS,
                    source,
                }
                .into()
            }
        })?;
        Ok(())
    }

    async fn find_signup(&self, game_id: Uuid, user_id: Uuid) -> StorageResult<Option<SignupRecord>> {
        let collection = self.collection::<MongoSignupDocument>(SIGNUPS).await;
        let document = collection
            .find_one(doc! {"_id": signup_id(game_id, user_id)})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: SIGNUPS,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn put_signup(&self, mut signup: SignupRecord) -> StorageResult<SignupRecord> {
        let expected = signup.version;
        signup.version += 1;
        let id = signup_id(signup.game_id, signup.user_id);
        let document = MongoSignupDocument::from(signup.clone());
        let collection = self.collection::<MongoSignupDocument>(SIGNUPS).await;

        let result = collection
            .replace_one(doc! {"_id": &id, "version": expected as i64}, &document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: SIGNUPS,
                source,
            })?;

        if result.matched_count == 0 {
            return Err(StorageError::conflict(id));
        }
        Ok(signup)
    }

    async fn find_signups(
        &self,
        filter: bson::Document,
    ) -> StorageResult<Vec<SignupRecord>> {
        let collection = self.collection::<MongoSignupDocument>(SIGNUPS).await;
        let documents: Vec<MongoSignupDocument> = collection
            .find(filter)
            .sort(doc! {"signed_up_at": 1})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: SIGNUPS,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: SIGNUPS,
                source,
            })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn find_waitlist_head(&self, game_id: Uuid) -> StorageResult<Option<SignupRecord>> {
        let collection = self.collection::<MongoSignupDocument>(SIGNUPS).await;
        let document = collection
            .find_one(doc! {
                "game_id": uuid_as_binary(game_id),
                "status": status_filter::WAITLIST,
            })
            .sort(doc! {"signed_up_at": 1})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: SIGNUPS,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn insert_game_event(&self, event: GameEventRecord) -> StorageResult<()> {
        let document = MongoGameEventDocument::from(event);
        let collection = self.collection::<MongoGameEventDocument>(GAME_EVENTS).await;
        collection
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: GAME_EVENTS,
                source,
            })?;
        Ok(())
    }

    async fn list_game_events(&self, game_id: Uuid) -> StorageResult<Vec<GameEventRecord>> {
        let collection = self.collection::<MongoGameEventDocument>(GAME_EVENTS).await;
        let documents: Vec<MongoGameEventDocument> = collection
            .find(doc! {"game_id": uuid_as_binary(game_id)})
            .sort(doc! {"recorded_at": 1})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: GAME_EVENTS,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: GAME_EVENTS,
                source,
            })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn find_player_stats(&self, user_id: Uuid) -> StorageResult<Option<PlayerStatsRecord>> {
        let collection = self
            .collection::<MongoPlayerStatsDocument>(PLAYER_STATS)
            .await;
        let document = collection
            .find_one(doc_id(user_id))
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: PLAYER_STATS,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn apply_stats_delta(
        &self,
        user_id: Uuid,
        delta: StatsDelta,
        now: OffsetDateTime,
    ) -> StorageResult<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let collection = self.collection::<bson::Document>(PLAYER_STATS).await;
        collection
            .update_one(
                doc_id(user_id),
                doc! {
                    "$inc": {
                        "games_played": delta.games_played as i64,
                        "games_won": delta.games_won as i64,
                        "goals": delta.goals as i64,
                        "assists": delta.assists as i64,
                        "saves": delta.saves as i64,
                    },
                    "$set": {"updated_at": to_bson_date(now)},
                    "$setOnInsert": {"badges": Bson::Array(vec![])},
                },
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: PLAYER_STATS,
                source,
            })?;
        Ok(())
    }

    async fn award_badges(
        &self,
        user_id: Uuid,
        badges: Vec<Badge>,
        now: OffsetDateTime,
    ) -> StorageResult<()> {
        if badges.is_empty() {
            return Ok(());
        }

        let badge_values: Vec<Bson> = badges
            .iter()
            .map(bson::serialize_to_bson)
            .collect::<Result<_, _>>()
            .map_err(|source| MongoDaoError::Serialize {
                collection: PLAYER_STATS,
                source,
            })?;

        let collection = self.collection::<bson::Document>(PLAYER_STATS).await;
        collection
            .update_one(
                doc_id(user_id),
                doc! {
                    "$addToSet": {"badges": {"$each": badge_values}},
                    "$set": {"updated_at": to_bson_date(now)},
                    "$setOnInsert": {
                        "games_played": 0_i64,
                        "games_won": 0_i64,
                        "goals": 0_i64,
                        "assists": 0_i64,
                        "saves": 0_i64,
                    },
                },
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: PLAYER_STATS,
                source,
            })?;
        Ok(())
    }

    async fn find_rate_limit(
        &self,
        subject: &str,
        action: &str,
    ) -> StorageResult<Option<RateLimitRecord>> {
        let collection = self.collection::<MongoRateLimitDocument>(RATE_LIMITS).await;
        let document = collection
            .find_one(doc! {"_id": RateLimitRecord::key(subject, action)})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: RATE_LIMITS,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn put_rate_limit(&self, mut record: RateLimitRecord) -> StorageResult<RateLimitRecord> {
        let key = RateLimitRecord::key(&record.subject, &record.action);
        let expected = record.version;
        record.version += 1;
        let document = MongoRateLimitDocument::from(record.clone());
        let collection = self.collection::<MongoRateLimitDocument>(RATE_LIMITS).await;

        if expected == 0 {
            // Insert-if-absent; a racing creator surfaces as a conflict so
            // the caller re-reads.
            collection.insert_one(&document).await.map_err(|source| {
                if is_duplicate_key(&source) {
                    StorageError::conflict(key.clone())
                } else {
                    MongoDaoError::Write {
                        collection: RATE_LIMITS,
                        source,
                    }
                    .into()
                }
            })?;
            return Ok(record);
        }

        let result = collection
            .replace_one(doc! {"_id": &key, "version": expected as i64}, &document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: RATE_LIMITS,
                source,
            })?;

        if result.matched_count == 0 {
            return Err(StorageError::conflict(key));
        }
        Ok(record)
    }

    async fn delete_rate_limit(&self, subject: &str, action: &str) -> StorageResult<()> {
        let collection = self.collection::<MongoRateLimitDocument>(RATE_LIMITS).await;
        collection
            .delete_one(doc! {"_id": RateLimitRecord::key(subject, action)})
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: RATE_LIMITS,
                source,
            })?;
        Ok(())
    }

    async fn find_processed_event(
        &self,
        event_id: &str,
    ) -> StorageResult<Option<ProcessedEventRecord>> {
        let collection = self
            .collection::<MongoProcessedEventDocument>(PROCESSED_EVENTS)
            .await;
        let document = collection
            .find_one(doc! {"_id": event_id})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: PROCESSED_EVENTS,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn insert_processed_event(&self, record: ProcessedEventRecord) -> StorageResult<()> {
        let id = record.event_id.clone();
        let document = MongoProcessedEventDocument::from(record);
        let collection = self
            .collection::<MongoProcessedEventDocument>(PROCESSED_EVENTS)
            .await;
        collection.insert_one(&document).await.map_err(|source| {
            if is_duplicate_key(&source) {
                StorageError::already_exists(id.clone())
            } else {
                MongoDaoError::Write {
                    collection: PROCESSED_EVENTS,
                    source,
                }
                .into()
            }
        })?;
        Ok(())
    }

    async fn purge_processed_before(&self, cutoff: OffsetDateTime) -> StorageResult<u64> {
        let collection = self
            .collection::<MongoProcessedEventDocument>(PROCESSED_EVENTS)
            .await;
        let result = collection
            .delete_many(doc! {"expires_at": {"$lt": to_bson_date(cutoff)}})
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: PROCESSED_EVENTS,
                source,
            })?;
        Ok(result.deleted_count)
    }

    async fn find_user(&self, id: Uuid) -> StorageResult<Option<UserRecord>> {
        let collection = self.collection::<MongoUserDocument>(USERS).await;
        let document = collection
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: USERS,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn find_venue(&self, id: Uuid) -> StorageResult<Option<VenueRecord>> {
        let collection = self.collection::<MongoVenueDocument>(VENUES).await;
        let document = collection
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: VENUES,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn find_hub(&self, id: Uuid) -> StorageResult<Option<HubRecord>> {
        let collection = self.collection::<MongoHubDocument>(HUBS).await;
        let document = collection
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: HUBS,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn find_hub_member(
        &self,
        hub_id: Uuid,
        user_id: Uuid,
    ) -> StorageResult<Option<HubMemberRecord>> {
        let collection = self.collection::<MongoHubMemberDocument>(HUB_MEMBERS).await;
        let document = collection
            .find_one(doc! {
                "hub_id": uuid_as_binary(hub_id),
                "user_id": uuid_as_binary(user_id),
            })
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: HUB_MEMBERS,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn incr_member_mvps(&self, hub_id: Uuid, user_id: Uuid) -> StorageResult<()> {
        let collection = self.collection::<bson::Document>(HUB_MEMBERS).await;
        collection
            .update_one(
                doc! {
                    "hub_id": uuid_as_binary(hub_id),
                    "user_id": uuid_as_binary(user_id),
                },
                doc! {
                    "$inc": {"total_mvps": 1_i64},
                    "$setOnInsert": {"rating": 0.0},
                },
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: HUB_MEMBERS,
                source,
            })?;
        Ok(())
    }

    async fn incr_hub_counters(
        &self,
        hub_id: Uuid,
        goals: u64,
        completed_at: OffsetDateTime,
    ) -> StorageResult<()> {
        let collection = self.collection::<bson::Document>(HUBS).await;
        collection
            .update_one(
                doc_id(hub_id),
                doc! {
                    "$inc": {"total_games": 1_i64, "total_goals": goals as i64},
                    "$set": {"last_game_completed_at": to_bson_date(completed_at)},
                    "$setOnInsert": {"name": ""},
                },
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: HUBS,
                source,
            })?;
        Ok(())
    }

    async fn find_pairing(&self, key: &str) -> StorageResult<Option<PairingRecord>> {
        let collection = self.collection::<MongoPairingDocument>(PAIRINGS).await;
        let document = collection
            .find_one(doc! {"_id": key})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: PAIRINGS,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn incr_pairing(&self, key: &str, won: bool) -> StorageResult<()> {
        let collection = self.collection::<bson::Document>(PAIRINGS).await;
        collection
            .update_one(
                doc! {"_id": key},
                doc! {
                    "$inc": {
                        "games_together": 1_i64,
                        "games_won_together": if won { 1_i64 } else { 0_i64 },
                    },
                },
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: PAIRINGS,
                source,
            })?;
        Ok(())
    }
}

impl Store for MongoStore {
    fn insert_game(&self, game: GameRecord) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_game(game).await })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.find_game(id).await })
    }

    fn put_game(&self, game: GameRecord) -> BoxFuture<'static, StorageResult<GameRecord>> {
        let store = self.clone();
        Box::pin(async move { store.put_game(game).await })
    }

    fn find_games_to_archive(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_games(
                    doc! {
                        "status": {"$in": status_filter::PRE_START.to_vec()},
                        "scheduled_at": {"$lt": to_bson_date(cutoff)},
                    },
                    doc! {"scheduled_at": 1},
                    limit,
                )
                .await
        })
    }

    fn find_games_to_complete(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_games(
                    doc! {
                        "status": status_filter::IN_PROGRESS,
                        "started_at": {"$lt": to_bson_date(cutoff)},
                    },
                    doc! {"started_at": 1},
                    limit,
                )
                .await
        })
    }

    fn find_games_needing_reminder(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_games(
                    doc! {
                        "status": {"$in": status_filter::PRE_START.to_vec()},
                        "reminder_sent_at": Bson::Null,
                        "scheduled_at": {
                            "$gte": to_bson_date(from),
                            "$lt": to_bson_date(to),
                        },
                    },
                    doc! {"scheduled_at": 1},
                    limit,
                )
                .await
        })
    }

    fn find_games_with_expired_voting(
        &self,
        cutoff: OffsetDateTime,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_games(
                    doc! {
                        "status": status_filter::COMPLETED,
                        "voting_enabled": true,
                        "voting_closed_at": Bson::Null,
                        "completed_at": {"$lt": to_bson_date(cutoff)},
                    },
                    doc! {"completed_at": 1},
                    limit,
                )
                .await
        })
    }

    fn insert_signup(&self, signup: SignupRecord) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_signup(signup).await })
    }

    fn find_signup(
        &self,
        game_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SignupRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.find_signup(game_id, user_id).await })
    }

    fn put_signup(&self, signup: SignupRecord) -> BoxFuture<'static, StorageResult<SignupRecord>> {
        let store = self.clone();
        Box::pin(async move { store.put_signup(signup).await })
    }

    fn list_signups(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<SignupRecord>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_signups(doc! {"game_id": uuid_as_binary(game_id)})
                .await
        })
    }

    fn find_confirmed_signups(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SignupRecord>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_signups(doc! {
                    "game_id": uuid_as_binary(game_id),
                    "status": status_filter::CONFIRMED,
                })
                .await
        })
    }

    fn find_waitlist_head(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SignupRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.find_waitlist_head(game_id).await })
    }

    fn insert_game_event(&self, event: GameEventRecord) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_game_event(event).await })
    }

    fn list_game_events(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameEventRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.list_game_events(game_id).await })
    }

    fn find_player_stats(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerStatsRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.find_player_stats(user_id).await })
    }

    fn apply_stats_delta(
        &self,
        user_id: Uuid,
        delta: StatsDelta,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.apply_stats_delta(user_id, delta, now).await })
    }

    fn award_badges(
        &self,
        user_id: Uuid,
        badges: Vec<Badge>,
        now: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.award_badges(user_id, badges, now).await })
    }

    fn find_rate_limit(
        &self,
        subject: &str,
        action: &str,
    ) -> BoxFuture<'static, StorageResult<Option<RateLimitRecord>>> {
        let store = self.clone();
        let subject = subject.to_owned();
        let action = action.to_owned();
        Box::pin(async move { store.find_rate_limit(&subject, &action).await })
    }

    fn put_rate_limit(
        &self,
        record: RateLimitRecord,
    ) -> BoxFuture<'static, StorageResult<RateLimitRecord>> {
        let store = self.clone();
        Box::pin(async move { store.put_rate_limit(record).await })
    }

    fn delete_rate_limit(
        &self,
        subject: &str,
        action: &str,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let subject = subject.to_owned();
        let action = action.to_owned();
        Box::pin(async move { store.delete_rate_limit(&subject, &action).await })
    }

    fn find_processed_event(
        &self,
        event_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<ProcessedEventRecord>>> {
        let store = self.clone();
        let event_id = event_id.to_owned();
        Box::pin(async move { store.find_processed_event(&event_id).await })
    }

    fn insert_processed_event(
        &self,
        record: ProcessedEventRecord,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_processed_event(record).await })
    }

    fn purge_processed_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.purge_processed_before(cutoff).await })
    }

    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.find_user(id).await })
    }

    fn find_venue(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<VenueRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.find_venue(id).await })
    }

    fn find_hub(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<HubRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.find_hub(id).await })
    }

    fn find_hub_member(
        &self,
        hub_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<HubMemberRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.find_hub_member(hub_id, user_id).await })
    }

    fn incr_member_mvps(
        &self,
        hub_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.incr_member_mvps(hub_id, user_id).await })
    }

    fn incr_hub_counters(
        &self,
        hub_id: Uuid,
        goals: u64,
        completed_at: OffsetDateTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.incr_hub_counters(hub_id, goals, completed_at).await })
    }

    fn find_pairing(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<PairingRecord>>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.find_pairing(&key).await })
    }

    fn incr_pairing(&self, key: &str, won: bool) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.incr_pairing(&key, won).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
