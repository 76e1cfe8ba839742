//! Instrumented member repository
//!
//! Composes the cache service, the performance monitor, and an ordered
//! fetch-strategy chain into the read/write surface the UI layer
//! consumes. Reads go through the cache with single-flight loading;
//! writes invalidate every key that could reference the entity and
//! publish domain events only after the data source has committed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::member::{Member, MemberEvent, MemberFetchStrategy, MemberStore};
use crate::cache::CacheService;
use crate::errors::{DataError, StrategyFailure};
use crate::monitor::{OperationType, PerformanceMonitor};

/// Capacity of the domain-event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Cached, instrumented access to members.
///
/// Every collaborator is passed in explicitly at construction; there is
/// no global monitor or cache instance behind this type.
pub struct MemberRepository {
    store: Arc<dyn MemberStore>,
    strategies: Vec<Arc<dyn MemberFetchStrategy>>,
    cache: CacheService,
    monitor: PerformanceMonitor,
    events: broadcast::Sender<MemberEvent>,
}

impl MemberRepository {
    /// Create a repository.
    ///
    /// # Arguments
    /// * `store` - Write-side and secondary-read data access
    /// * `strategies` - Ordered id-fetch chain, preferred path first
    /// * `cache` - Cache service scoped to this entity's namespace
    /// * `monitor` - Shared performance monitor
    pub fn new(
        store: Arc<dyn MemberStore>,
        strategies: Vec<Arc<dyn MemberFetchStrategy>>,
        cache: CacheService,
        monitor: PerformanceMonitor,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            strategies,
            cache,
            monitor,
            events,
        }
    }

    /// Subscribe to domain events published by this repository
    pub fn subscribe(&self) -> broadcast::Receiver<MemberEvent> {
        self.events.subscribe()
    }

    /// Find a member by id, serving from cache when possible.
    ///
    /// On a miss the strategy chain runs under the monitor; the first
    /// success is cached and returned. If every strategy fails the
    /// aggregated [`DataError::FetchExhausted`] lists each attempt.
    pub async fn find_by_id(&self, id: &str) -> Result<Member, DataError> {
        let monitor = self.monitor.clone();
        let strategies = self.strategies.clone();
        let id = id.to_string();

        self.cache
            .get_or_set(&id_key(&id), move || async move {
                let mut params = HashMap::new();
                params.insert("memberId".to_string(), id.clone());
                monitor
                    .measure(
                        OperationType::DatabaseRead,
                        "member.find_by_id",
                        Some(params),
                        || run_strategies(&strategies, &id),
                    )
                    .await
            })
            .await
    }

    /// Find a member by email, serving from cache when possible
    pub async fn find_by_email(&self, email: &str) -> Result<Member, DataError> {
        let monitor = self.monitor.clone();
        let store = self.store.clone();
        let email = email.to_string();

        self.cache
            .get_or_set(&email_key(&email), move || async move {
                monitor
                    .measure(
                        OperationType::DatabaseRead,
                        "member.find_by_email",
                        None,
                        || store.fetch_by_email(&email),
                    )
                    .await
            })
            .await
    }

    /// List a team's members, serving from cache when possible
    pub async fn find_by_team(&self, team_id: &str) -> Result<Vec<Member>, DataError> {
        let monitor = self.monitor.clone();
        let store = self.store.clone();
        let team_id = team_id.to_string();

        self.cache
            .get_or_set(&team_key(&team_id), move || async move {
                let mut params = HashMap::new();
                params.insert("teamId".to_string(), team_id.clone());
                monitor
                    .measure(
                        OperationType::DatabaseRead,
                        "member.find_by_team",
                        Some(params),
                        || store.fetch_team(&team_id),
                    )
                    .await
            })
            .await
    }

    /// Persist a member, then invalidate every cache key that could
    /// reference it and publish the queued event.
    ///
    /// On failure the cache is left untouched and the error surfaces.
    pub async fn save(&self, member: &Member) -> Result<(), DataError> {
        let mut params = HashMap::new();
        params.insert("memberId".to_string(), member.id.clone());

        self.monitor
            .measure(
                OperationType::DatabaseWrite,
                "member.save",
                Some(params),
                || self.store.save(member),
            )
            .await?;

        self.invalidate(member).await;
        self.publish(MemberEvent::Saved(member.clone()));
        info!(member_id = %member.id, "Member saved");
        Ok(())
    }

    /// Delete a member, then invalidate the same key set as a save
    pub async fn delete(&self, member: &Member) -> Result<(), DataError> {
        let mut params = HashMap::new();
        params.insert("memberId".to_string(), member.id.clone());

        self.monitor
            .measure(
                OperationType::DatabaseWrite,
                "member.delete",
                Some(params),
                || self.store.delete(&member.id),
            )
            .await?;

        self.invalidate(member).await;
        self.publish(MemberEvent::Deleted {
            id: member.id.clone(),
        });
        info!(member_id = %member.id, "Member deleted");
        Ok(())
    }

    /// Remove every key that could reference this member: the primary
    /// id, the secondary email lookup, and the team roster listing it
    async fn invalidate(&self, member: &Member) {
        self.cache.remove(&id_key(&member.id)).await;
        self.cache.remove(&email_key(&member.email)).await;
        self.cache.remove(&team_key(&member.team_id)).await;
        debug!(member_id = %member.id, "Invalidated cached member keys");
    }

    fn publish(&self, event: MemberEvent) {
        // Events go out only after the write has committed; a send with
        // no live subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Try each strategy in order, returning the first success or an
/// aggregated error naming every attempt
async fn run_strategies(
    strategies: &[Arc<dyn MemberFetchStrategy>],
    id: &str,
) -> Result<Member, DataError> {
    let mut attempts = Vec::new();

    for strategy in strategies {
        match strategy.fetch_by_id(id).await {
            Ok(member) => {
                if !attempts.is_empty() {
                    info!(
                        strategy = strategy.name(),
                        member_id = %id,
                        failed_attempts = attempts.len(),
                        "Fallback fetch strategy succeeded"
                    );
                }
                return Ok(member);
            }
            Err(e) => {
                warn!(
                    strategy = strategy.name(),
                    member_id = %id,
                    error = %e,
                    "Fetch strategy failed"
                );
                attempts.push(StrategyFailure {
                    strategy: strategy.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(DataError::exhausted(attempts))
}

fn id_key(id: &str) -> String {
    format!("id:{}", id)
}

fn email_key(email: &str) -> String {
    format!("email:{}", email)
}

fn team_key(team_id: &str) -> String {
    format!("team:{}", team_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use crate::monitor::MonitorConfig;
    use crate::repo::member::MemberRole;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    type MemberMap = Arc<Mutex<HashMap<String, Member>>>;

    fn member(id: &str, email: &str, team_id: &str) -> Member {
        Member {
            id: id.to_string(),
            email: email.to_string(),
            team_id: team_id.to_string(),
            display_name: format!("Member {}", id),
            role: MemberRole::Member,
        }
    }

    struct StubStore {
        members: MemberMap,
        fail_writes: AtomicBool,
        email_fetches: AtomicUsize,
    }

    impl StubStore {
        fn new(members: MemberMap) -> Self {
            Self {
                members,
                fail_writes: AtomicBool::new(false),
                email_fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MemberStore for StubStore {
        async fn fetch_by_email(&self, email: &str) -> Result<Member, DataError> {
            self.email_fetches.fetch_add(1, Ordering::SeqCst);
            self.members
                .lock()
                .unwrap()
                .values()
                .find(|m| m.email == email)
                .cloned()
                .ok_or_else(|| DataError::NotFound(email.to_string()))
        }

        async fn fetch_team(&self, team_id: &str) -> Result<Vec<Member>, DataError> {
            Ok(self
                .members
                .lock()
                .unwrap()
                .values()
                .filter(|m| m.team_id == team_id)
                .cloned()
                .collect())
        }

        async fn save(&self, member: &Member) -> Result<(), DataError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(DataError::Query("write refused".to_string()));
            }
            self.members
                .lock()
                .unwrap()
                .insert(member.id.clone(), member.clone());
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<(), DataError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(DataError::Query("write refused".to_string()));
            }
            self.members.lock().unwrap().remove(id);
            Ok(())
        }
    }

    /// Fetches out of the shared map, counting its invocations
    struct MapStrategy {
        name: &'static str,
        members: MemberMap,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MemberFetchStrategy for MapStrategy {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch_by_id(&self, id: &str) -> Result<Member, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.members
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| DataError::NotFound(id.to_string()))
        }
    }

    /// Always fails, counting its invocations
    struct FailingStrategy {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MemberFetchStrategy for FailingStrategy {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch_by_id(&self, _id: &str) -> Result<Member, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DataError::Query("connection reset".to_string()))
        }
    }

    struct Fixture {
        repo: MemberRepository,
        store: Arc<StubStore>,
        primary_calls: Arc<AtomicUsize>,
        fallback_calls: Arc<AtomicUsize>,
    }

    fn fixture(primary_fails: bool) -> Fixture {
        let members: MemberMap = Arc::new(Mutex::new(HashMap::new()));
        members
            .lock()
            .unwrap()
            .insert("m-1".to_string(), member("m-1", "ada@crewdeck.app", "t-9"));

        let store = Arc::new(StubStore::new(members.clone()));
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let fallback_calls = Arc::new(AtomicUsize::new(0));

        let primary: Arc<dyn MemberFetchStrategy> = if primary_fails {
            Arc::new(FailingStrategy {
                name: "joined_query",
                calls: primary_calls.clone(),
            })
        } else {
            Arc::new(MapStrategy {
                name: "joined_query",
                members: members.clone(),
                calls: primary_calls.clone(),
            })
        };
        let fallback: Arc<dyn MemberFetchStrategy> = Arc::new(MapStrategy {
            name: "decomposed_query",
            members: members.clone(),
            calls: fallback_calls.clone(),
        });

        let cache = CacheService::new(
            Arc::new(MemoryStorage::new()),
            CacheOptions::for_namespace("members"),
        );
        let monitor = PerformanceMonitor::new(MonitorConfig::default()).unwrap();

        Fixture {
            repo: MemberRepository::new(store.clone(), vec![primary, fallback], cache, monitor),
            store,
            primary_calls,
            fallback_calls,
        }
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let fx = fixture(false);
        let first = fx.repo.find_by_id("m-1").await.unwrap();
        let second = fx.repo.find_by_id("m-1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_serves_when_primary_fails() {
        let fx = fixture(true);

        let found = fx.repo.find_by_id("m-1").await.unwrap();
        assert_eq!(found.id, "m-1");
        assert_eq!(fx.primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.fallback_calls.load(Ordering::SeqCst), 1);

        // The fallback result was cached; no strategy runs again
        fx.repo.find_by_id("m-1").await.unwrap();
        assert_eq!(fx.primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_strategies_aggregate_every_attempt() {
        let fx = fixture(true);

        let result = fx.repo.find_by_id("m-404").await;
        match result {
            Err(DataError::FetchExhausted { attempts }) => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].strategy, "joined_query");
                assert_eq!(attempts[1].strategy, "decomposed_query");
                assert!(attempts[0].reason.contains("connection reset"));
            }
            other => panic!("Expected FetchExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_save_invalidates_cached_reads() {
        let fx = fixture(false);

        let original = fx.repo.find_by_id("m-1").await.unwrap();
        assert_eq!(original.display_name, "Member m-1");

        let mut updated = original.clone();
        updated.display_name = "Ada Lovelace".to_string();
        fx.repo.save(&updated).await.unwrap();

        // The stale cached entry was invalidated; this read refetches
        let fresh = fx.repo.find_by_id("m-1").await.unwrap();
        assert_eq!(fresh.display_name, "Ada Lovelace");
        assert_eq!(fx.primary_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_cache_untouched() {
        let fx = fixture(false);
        let mut events = fx.repo.subscribe();

        let original = fx.repo.find_by_id("m-1").await.unwrap();

        fx.store.fail_writes.store(true, Ordering::SeqCst);
        let mut updated = original.clone();
        updated.display_name = "Changed".to_string();

        let result = fx.repo.save(&updated).await;
        assert!(matches!(result, Err(DataError::Query(_))));

        // Cached value still served, no event published
        let cached = fx.repo.find_by_id("m-1").await.unwrap();
        assert_eq!(cached, original);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_publish_after_successful_writes() {
        let fx = fixture(false);
        let mut events = fx.repo.subscribe();
        let m = member("m-2", "grace@crewdeck.app", "t-9");

        fx.repo.save(&m).await.unwrap();
        match events.recv().await.unwrap() {
            MemberEvent::Saved(saved) => assert_eq!(saved.id, "m-2"),
            other => panic!("Expected Saved, got {:?}", other),
        }

        fx.repo.delete(&m).await.unwrap();
        match events.recv().await.unwrap() {
            MemberEvent::Deleted { id } => assert_eq!(id, "m-2"),
            other => panic!("Expected Deleted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_find_by_email_is_cached() {
        let fx = fixture(false);

        let first = fx.repo.find_by_email("ada@crewdeck.app").await.unwrap();
        let second = fx.repo.find_by_email("ada@crewdeck.app").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.store.email_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_team_roster_invalidated_by_member_save() {
        let fx = fixture(false);

        let roster = fx.repo.find_by_team("t-9").await.unwrap();
        assert_eq!(roster.len(), 1);

        fx.repo
            .save(&member("m-3", "lin@crewdeck.app", "t-9"))
            .await
            .unwrap();

        let roster = fx.repo.find_by_team("t-9").await.unwrap();
        assert_eq!(roster.len(), 2);

        assert!(fx.repo.find_by_team("t-0").await.unwrap().is_empty());
    }
}
