use anyhow::anyhow;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use shoprec::algorithms::{PredictionError, RatingPredictor};
use shoprec::api::create_router;
use shoprec::config::TrainingConfig;
use shoprec::services::recommendation::{RecommendError, RecommendationService};
use shoprec::services::snapshot::{FileSnapshotProvider, ModelSnapshot, SnapshotHandle, SnapshotProvider};
use shoprec::services::store::{CatalogStore, InMemoryCatalogStore, InMemoryInteractionStore, InteractionStore};
use shoprec::services::training::{
    train_snapshot, ProcessRetrainExecutor, RetrainError, RetrainExecutor, TrainerOutput, TrainingService,
};
use shoprec::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

const SECRET: &str = "integration-secret";

/// Scores products from a fixed table; anything else is unscorable.
struct ScoreTable(HashMap<String, f32>);

impl ScoreTable {
    fn new(scores: &[(&str, f32)]) -> Self {
        Self(scores.iter().map(|(id, s)| (id.to_string(), *s)).collect())
    }
}

impl RatingPredictor for ScoreTable {
    fn predict(&self, _user_id: &str, product_id: &str) -> Result<f32, PredictionError> {
        self.0
            .get(product_id)
            .copied()
            .ok_or_else(|| PredictionError::UnknownProduct(product_id.to_string()))
    }
}

fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

fn snapshot(
    products: &[&str],
    users: &[&str],
    popular: &[&str],
    predictor: impl RatingPredictor + 'static,
) -> ModelSnapshot {
    ModelSnapshot::new(
        Arc::new(predictor),
        TrainingMembership::new(
            ids(products),
            ids(users),
            100,
            50,
            Utc::now(),
            ModelPerformance { n_factors: 100, n_epochs: 20, rmse: 0.91234, mae: 0.71234 },
        ),
        PopularityList::new(ids(popular)),
    )
}

fn service(events: Vec<Event>, catalog: &[&str], snapshot: Option<ModelSnapshot>) -> RecommendationService {
    RecommendationService::new(
        Arc::new(InMemoryInteractionStore::new(events)),
        Arc::new(InMemoryCatalogStore::new(catalog.iter().copied())),
        Arc::new(SnapshotHandle::new(snapshot)),
    )
}

fn seeded() -> StdRng {
    StdRng::seed_from_u64(7)
}

#[tokio::test]
async fn test_untrained_user_never_gets_seen_products() {
    let events = vec![
        Event::new("u1", "P1", Action::View),
        Event::new("u1", "P2", Action::Purchase),
        Event::new("u1", "P3", Action::View),
    ];
    let snap = snapshot(
        &["P1", "P2", "P3", "P4", "P5"],
        &["someone-else"],
        &["P2", "P4", "P1", "P5"],
        ScoreTable::new(&[]),
    );
    let svc = service(events, &["P1", "P2", "P3", "P4", "P5"], Some(snap));

    let result = svc.get_recommendations_with_rng("u1", &mut seeded()).await.unwrap();

    assert_eq!(result.strategy(), Strategy::Collaborative);
    assert_eq!(result.recommendations, vec!["P4", "P5"]);
    for seen in ["P1", "P2", "P3"] {
        assert!(!result.recommendations.contains(&seen.to_string()));
    }
    assert_eq!(result.metadata.user_seen_count, 3);
    assert_eq!(result.metadata.catalog_size, 5);
    assert_eq!(result.metadata.recommendation_count, 2);
}

#[tokio::test]
async fn test_untrained_user_gets_peer_purchases() {
    let events = vec![
        Event::new("u1", "P1", Action::Purchase),
        Event::new("peer", "P1", Action::Purchase),
        Event::new("peer", "P7", Action::Purchase),
    ];
    let snap = snapshot(&["P1", "P7"], &["peer"], &[], ScoreTable::new(&[]));
    let svc = service(events, &["P1", "P7"], Some(snap));

    let result = svc.get_recommendations_with_rng("u1", &mut seeded()).await.unwrap();
    assert_eq!(result.strategy(), Strategy::Collaborative);
    assert_eq!(result.recommendations, vec!["P7"]);
}

#[tokio::test]
async fn test_collaborative_stage_takes_five_then_backfills() {
    let mut events = vec![
        Event::new("u1", "P0", Action::Purchase),
        Event::new("peer", "P0", Action::Purchase),
    ];
    let bought = ["Q1", "Q2", "Q3", "Q4", "Q5", "Q6", "Q7", "Q8"];
    for (rank, product) in bought.iter().enumerate() {
        for _ in 0..(bought.len() - rank) {
            events.push(Event::new("peer", *product, Action::Purchase));
        }
    }
    let mut catalog = vec!["P0"];
    catalog.extend(bought);
    let snap = snapshot(&catalog, &["peer"], &["Q1", "Z1", "Z2", "Z3", "Z4", "Z5", "Z6"], ScoreTable::new(&[]));
    let svc = service(events, &catalog, Some(snap));

    let result = svc.get_recommendations_with_rng("u1", &mut seeded()).await.unwrap();

    assert_eq!(result.strategy(), Strategy::Collaborative);
    assert_eq!(
        result.recommendations,
        vec!["Q1", "Q2", "Q3", "Q4", "Q5", "Z1", "Z2", "Z3", "Z4", "Z5"]
    );
}

fn ml_with_fresh_products(fresh: &[&str]) -> RecommendationService {
    let trained = ["p1", "p2", "p3", "p4", "p5", "p6"];
    let scores: Vec<(&str, f32)> = trained.iter().zip([6.0, 5.0, 4.0, 3.0, 2.0, 1.0]).map(|(id, s)| (*id, s)).collect();
    let mut catalog: Vec<&str> = trained.to_vec();
    catalog.extend(fresh);
    let snap = snapshot(&trained, &["u1"], &["x1", "x2", "x3", "x4"], ScoreTable::new(&scores));
    service(Vec::new(), &catalog, Some(snap))
}

#[tokio::test]
async fn test_eight_collected_skips_popularity_backfill() {
    let svc = ml_with_fresh_products(&["n1", "n2"]);

    let result = svc.get_recommendations_with_rng("u1", &mut seeded()).await.unwrap();

    assert_eq!(result.strategy(), Strategy::Ml);
    assert_eq!(result.recommendations.len(), 8);
    assert!(result.recommendations.iter().all(|id| !id.starts_with('x')));
}

#[tokio::test]
async fn test_seven_collected_backfills_to_ten() {
    let svc = ml_with_fresh_products(&["n1"]);

    let result = svc.get_recommendations_with_rng("u1", &mut seeded()).await.unwrap();

    assert_eq!(result.strategy(), Strategy::Ml);
    assert_eq!(
        result.recommendations,
        vec!["p1", "p2", "p3", "p4", "p5", "p6", "n1", "x1", "x2", "x3"]
    );
}

#[tokio::test]
async fn test_empty_catalog_and_history_is_an_empty_random_result() {
    let snap = snapshot(&[], &[], &[], ScoreTable::new(&[]));
    let svc = service(Vec::new(), &[], Some(snap));

    let result = svc.get_recommendations_with_rng("nobody", &mut seeded()).await.unwrap();
    assert!(result.recommendations.is_empty());
    assert_eq!(result.strategy(), Strategy::Random);
    assert_eq!(result.metadata.recommendation_count, 0);
}

#[tokio::test]
async fn test_zero_history_with_catalog_is_never_empty() {
    let snap = snapshot(&["a", "b", "c"], &[], &[], ScoreTable::new(&[]));
    let svc = service(Vec::new(), &["a", "b", "c"], Some(snap));

    let result = svc.get_recommendations_with_rng("newcomer", &mut seeded()).await.unwrap();
    assert_eq!(result.strategy(), Strategy::Random);
    let got: HashSet<String> = result.recommendations.iter().cloned().collect();
    let expected: HashSet<String> = ids(&["a", "b", "c"]).into_iter().collect();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn test_popularity_backfill_keeps_branch_label() {
    // The label names the branch attempted, even when only popularity filled the list.
    let snap = snapshot(&["a", "b"], &[], &["b", "a"], ScoreTable::new(&[]));
    let svc = service(Vec::new(), &["a", "b"], Some(snap));

    let result = svc.get_recommendations_with_rng("newcomer", &mut seeded()).await.unwrap();
    assert_eq!(result.recommendations, vec!["b", "a"]);
    assert_eq!(result.strategy(), Strategy::Collaborative);
}

#[tokio::test]
async fn test_trained_user_gets_top_six_predictions_in_score_order() {
    let products = ["p1", "p2", "p3", "p4", "p5", "p6", "p7", "p8", "p9"];
    let scores: Vec<(&str, f32)> = products
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, 1.0 + (i as f32 * 0.37) % 4.0))
        .collect();
    let snap = snapshot(&products, &["u1"], &[], ScoreTable::new(&scores));
    let svc = service(vec![Event::new("u1", "p1", Action::View)], &products, Some(snap));

    let result = svc.get_recommendations_with_rng("u1", &mut seeded()).await.unwrap();
    assert_eq!(result.strategy(), Strategy::Ml);
    assert_eq!(result.recommendations.len(), 6);
    assert!(!result.recommendations.contains(&"p1".to_string()));

    let table: HashMap<&str, f32> = scores.iter().copied().collect();
    let returned: Vec<f32> = result.recommendations.iter().map(|id| table[id.as_str()]).collect();
    assert!(returned.windows(2).all(|w| w[0] >= w[1]));

    let mut eligible: Vec<f32> = scores.iter().filter(|(id, _)| *id != "p1").map(|(_, s)| *s).collect();
    eligible.sort_by(|a, b| b.partial_cmp(a).unwrap());
    assert_eq!(returned, eligible[..6].to_vec());
}

#[tokio::test]
async fn test_ml_stage_yields_all_eligible_when_fewer_than_six() {
    let products = ["p1", "p2", "p3", "p4"];
    let snap = snapshot(
        &products,
        &["u1"],
        &[],
        ScoreTable::new(&[("p1", 2.0), ("p2", 4.5), ("p3", 3.0), ("p4", 1.0)]),
    );
    // p4 left the catalog and must not be recommended.
    let svc = service(vec![Event::new("u1", "p1", Action::Purchase)], &["p1", "p2", "p3"], Some(snap));

    let result = svc.get_recommendations_with_rng("u1", &mut seeded()).await.unwrap();
    assert_eq!(result.strategy(), Strategy::Ml);
    assert_eq!(result.recommendations, vec!["p2", "p3"]);
}

#[tokio::test]
async fn test_failed_predictions_are_skipped() {
    let products = ["p1", "p2", "p3"];
    let snap = snapshot(&products, &["u1"], &[], ScoreTable::new(&[("p3", 4.0)]));
    let svc = service(Vec::new(), &products, Some(snap));

    let result = svc.get_recommendations_with_rng("u1", &mut seeded()).await.unwrap();
    assert_eq!(result.recommendations, vec!["p3"]);
    assert_eq!(result.strategy(), Strategy::Ml);
}

#[tokio::test]
async fn test_exploration_adds_new_products_after_ml() {
    let trained = ["p1", "p2", "p3", "p4", "p5", "p6", "p7"];
    let scores: Vec<(&str, f32)> = trained.iter().map(|id| (*id, 3.0)).collect();
    let mut catalog: Vec<&str> = trained.to_vec();
    catalog.extend(["n1", "n2", "n3", "n4", "n5"]);

    let snap = snapshot(&trained, &["u1"], &["p1", "n1"], ScoreTable::new(&scores));
    let svc = service(vec![Event::new("u1", "n5", Action::View)], &catalog, Some(snap));

    let result = svc.get_recommendations_with_rng("u1", &mut seeded()).await.unwrap();
    assert_eq!(result.strategy(), Strategy::Ml);
    assert_eq!(result.recommendations.len(), 9);
    assert_eq!(result.recommendations[..6], ids(&["p1", "p2", "p3", "p4", "p5", "p6"])[..]);

    let explored: Vec<&String> = result.recommendations[6..].iter().collect();
    assert!(explored.iter().all(|id| id.starts_with('n') && id.as_str() != "n5"));
}

#[tokio::test]
async fn test_favorites_resurface_seen_products_as_last_resort() {
    let events = vec![
        Event::new("u1", "p2", Action::View),
        Event::new("u1", "p1", Action::Purchase),
        Event::new("u1", "p2", Action::View),
    ];
    let snap = snapshot(&[], &[], &["p1", "p2"], ScoreTable::new(&[]));
    let svc = service(events, &["p1", "p2"], Some(snap));

    let result = svc.get_recommendations_with_rng("u1", &mut seeded()).await.unwrap();
    assert_eq!(result.strategy(), Strategy::Favorites);
    assert_eq!(result.recommendations, vec!["p1", "p2"]);
}

#[tokio::test]
async fn test_results_are_bounded_unique_and_unseen() {
    let mut rng = StdRng::seed_from_u64(1234);
    let catalog: Vec<String> = (0..40).map(|i| format!("p{:02}", i)).collect();
    let catalog_refs: Vec<&str> = catalog.iter().map(String::as_str).collect();
    let actions = [Action::View, Action::AddToCart, Action::Purchase, Action::Rating, Action::Search];

    for round in 0..30 {
        let mut events = Vec::new();
        for _ in 0..rng.gen_range(0..120) {
            let user = format!("u{}", rng.gen_range(0..12));
            let product = catalog[rng.gen_range(0..catalog.len())].clone();
            let action = actions[rng.gen_range(0..actions.len())].clone();
            events.push(Event::new(user, product, action));
        }

        let trained_products: Vec<&str> = catalog_refs.iter().copied().filter(|_| rng.gen_bool(0.6)).collect();
        let scores: Vec<(&str, f32)> = trained_products.iter().map(|id| (*id, rng.gen_range(1.0..5.0))).collect();
        let popular: Vec<&str> = catalog_refs.iter().copied().filter(|_| rng.gen_bool(0.3)).collect();
        let snap = snapshot(&trained_products, &["u0", "u1", "u2", "u3"], &popular, ScoreTable::new(&scores));
        let svc = service(events.clone(), &catalog_refs, Some(snap));

        for user in ["u0", "u5", "u11", "stranger"] {
            let result = svc.get_recommendations_with_rng(user, &mut rng).await.unwrap();
            let recs = &result.recommendations;

            assert!(recs.len() <= 10, "round {round}: too many for {user}");
            let unique: HashSet<&String> = recs.iter().collect();
            assert_eq!(unique.len(), recs.len(), "round {round}: duplicates for {user}");
            assert!(!recs.is_empty(), "round {round}: empty list for {user}");
            assert_eq!(result.metadata.recommendation_count, recs.len());

            if result.strategy() != Strategy::Favorites {
                let seen: HashSet<&str> = events
                    .iter()
                    .filter(|e| e.user_id == user)
                    .map(|e| e.product_id.as_str())
                    .collect();
                assert!(recs.iter().all(|id| !seen.contains(id.as_str())), "round {round}: seen item for {user}");
            }
        }
    }
}

#[tokio::test]
async fn test_no_snapshot_is_model_unavailable() {
    let svc = service(Vec::new(), &["p1"], None);
    let err = svc.get_recommendations("u1").await.unwrap_err();
    assert!(matches!(err, RecommendError::ModelUnavailable));
}

struct BrokenCatalog;

#[async_trait]
impl CatalogStore for BrokenCatalog {
    async fn list_product_ids(&self) -> anyhow::Result<Vec<String>> {
        Err(anyhow!("connection refused"))
    }
}

struct BrokenInteractions;

#[async_trait]
impl InteractionStore for BrokenInteractions {
    async fn find_events(&self, _user_id: &str) -> anyhow::Result<Vec<Event>> {
        Err(anyhow!("timeout"))
    }

    async fn find_strong_events_for_products(&self, _product_ids: &[String]) -> anyhow::Result<Vec<Event>> {
        Err(anyhow!("timeout"))
    }

    async fn find_strong_events_for_users(&self, _user_ids: &[String]) -> anyhow::Result<Vec<Event>> {
        Err(anyhow!("timeout"))
    }

    async fn count_all_events(&self) -> anyhow::Result<u64> {
        Err(anyhow!("timeout"))
    }

    async fn all_events(&self) -> anyhow::Result<Vec<Event>> {
        Err(anyhow!("timeout"))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Err(anyhow!("timeout"))
    }
}

#[tokio::test]
async fn test_catalog_outage_is_an_error() {
    let svc = RecommendationService::new(
        Arc::new(InMemoryInteractionStore::default()),
        Arc::new(BrokenCatalog),
        Arc::new(SnapshotHandle::new(Some(snapshot(&[], &[], &["p1"], ScoreTable::new(&[]))))),
    );
    let err = svc.get_recommendations("u1").await.unwrap_err();
    assert!(matches!(err, RecommendError::CatalogUnavailable(_)));
}

#[tokio::test]
async fn test_interaction_store_outage_degrades_to_popularity() {
    let svc = RecommendationService::new(
        Arc::new(BrokenInteractions),
        Arc::new(InMemoryCatalogStore::new(["p1", "p2"])),
        Arc::new(SnapshotHandle::new(Some(snapshot(&["p1", "p2"], &[], &["p2", "p1"], ScoreTable::new(&[]))))),
    );
    let result = svc.get_recommendations_with_rng("u1", &mut seeded()).await.unwrap();
    assert_eq!(result.recommendations, vec!["p2", "p1"]);
    assert_eq!(result.metadata.user_seen_count, 0);
}

// Retraining

fn small_training_config() -> TrainingConfig {
    TrainingConfig {
        n_factors: 4,
        n_epochs: 5,
        ..Config::default().training
    }
}

fn training_events() -> Vec<Event> {
    let mut events = Vec::new();
    for user in ["u1", "u2", "u3", "u4"] {
        events.push(Event::new(user, "p1", Action::Purchase));
        events.push(Event::new(user, "p2", Action::View));
        events.push(Event::new(user, "p3", Action::AddToCart));
    }
    events
}

enum Outcome {
    WriteSnapshot,
    Succeed,
    Fail,
}

struct FakeExecutor {
    outcome: Outcome,
    provider: Arc<FileSnapshotProvider>,
    started: Arc<Notify>,
    release: Option<Arc<Notify>>,
}

impl FakeExecutor {
    fn new(outcome: Outcome, provider: Arc<FileSnapshotProvider>) -> Self {
        Self {
            outcome,
            provider,
            started: Arc::new(Notify::new()),
            release: None,
        }
    }
}

#[async_trait]
impl RetrainExecutor for FakeExecutor {
    async fn run(&self) -> Result<TrainerOutput, RetrainError> {
        self.started.notify_one();
        if let Some(release) = &self.release {
            release.notified().await;
        }
        match self.outcome {
            Outcome::WriteSnapshot => {
                let bundle = train_snapshot(&training_events(), &small_training_config(), Utc::now())
                    .map_err(|e| RetrainError::Reload(e.to_string()))?;
                self.provider
                    .persist(&bundle)
                    .map_err(|e| RetrainError::Reload(e.to_string()))?;
                Ok(TrainerOutput::default())
            }
            Outcome::Succeed => Ok(TrainerOutput::default()),
            Outcome::Fail => Err(RetrainError::NonZeroExit {
                code: Some(1),
                stderr: "no event data found".to_string(),
            }),
        }
    }
}

fn live_handle() -> Arc<SnapshotHandle> {
    Arc::new(SnapshotHandle::new(Some(snapshot(&["old"], &["old-user"], &["old"], ScoreTable::new(&[])))))
}

#[tokio::test]
async fn test_retrain_success_swaps_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FileSnapshotProvider::new(dir.path().join("snapshot.json")));
    let handle = live_handle();
    let before = handle.current().unwrap();

    let training = TrainingService::new(
        Arc::new(FakeExecutor::new(Outcome::WriteSnapshot, provider.clone())),
        provider,
        handle.clone(),
    );
    let summary = training.retrain().await.unwrap();

    assert_eq!(summary.total_users, 4);
    assert_eq!(summary.total_products, 3);
    let after = handle.current().unwrap();
    assert_ne!(after.version, before.version);
    assert!(after.membership.has_user("u1"));
    assert!(!after.membership.has_product("old"));
    // requests holding the old snapshot keep a consistent view
    assert!(before.membership.has_product("old"));
}

#[tokio::test]
async fn test_retrain_failure_keeps_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FileSnapshotProvider::new(dir.path().join("snapshot.json")));
    let handle = live_handle();
    let before = handle.current().unwrap();

    let training = TrainingService::new(
        Arc::new(FakeExecutor::new(Outcome::Fail, provider.clone())),
        provider,
        handle.clone(),
    );
    let err = training.retrain().await.unwrap_err();

    assert!(matches!(err, RetrainError::NonZeroExit { code: Some(1), .. }));
    assert!(Arc::ptr_eq(&before, &handle.current().unwrap()));
}

#[tokio::test]
async fn test_retrain_without_artifacts_keeps_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FileSnapshotProvider::new(dir.path().join("never-written.json")));
    let handle = live_handle();
    let before = handle.current().unwrap();

    let training = TrainingService::new(
        Arc::new(FakeExecutor::new(Outcome::Succeed, provider.clone())),
        provider,
        handle.clone(),
    );
    assert!(matches!(training.retrain().await, Err(RetrainError::Reload(_))));
    assert!(Arc::ptr_eq(&before, &handle.current().unwrap()));
}

#[tokio::test]
async fn test_retrain_rejects_stale_snapshot_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FileSnapshotProvider::new(dir.path().join("snapshot.json")));
    let stale = train_snapshot(&training_events(), &small_training_config(), Utc::now() - ChronoDuration::days(1)).unwrap();
    provider.persist(&stale).unwrap();
    let handle = live_handle();
    let before = handle.current().unwrap();

    // trainer exits cleanly but leaves yesterday's file in place
    let training = TrainingService::new(
        Arc::new(FakeExecutor::new(Outcome::Succeed, provider.clone())),
        provider,
        handle.clone(),
    );
    match training.retrain().await {
        Err(RetrainError::Reload(message)) => assert!(message.contains("not newer")),
        other => panic!("unexpected result: {:?}", other.map(|s| s.trained_at)),
    }
    assert!(Arc::ptr_eq(&before, &handle.current().unwrap()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_retrain_timeout_keeps_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FileSnapshotProvider::new(dir.path().join("snapshot.json")));
    let handle = live_handle();
    let before = handle.current().unwrap();

    let executor = ProcessRetrainExecutor::new(
        "sh",
        vec!["-c".to_string(), "sleep 5".to_string()],
        Duration::from_millis(100),
    );
    let training = TrainingService::new(Arc::new(executor), provider, handle.clone());

    assert!(matches!(training.retrain().await, Err(RetrainError::Timeout(_))));
    assert!(Arc::ptr_eq(&before, &handle.current().unwrap()));
}

#[tokio::test]
async fn test_concurrent_retrain_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FileSnapshotProvider::new(dir.path().join("snapshot.json")));
    let release = Arc::new(Notify::new());
    let mut executor = FakeExecutor::new(Outcome::WriteSnapshot, provider.clone());
    executor.release = Some(release.clone());
    let started = executor.started.clone();

    let training = Arc::new(TrainingService::new(Arc::new(executor), provider, live_handle()));
    let first = {
        let training = training.clone();
        tokio::spawn(async move { training.retrain().await })
    };
    started.notified().await;

    assert!(matches!(training.retrain().await, Err(RetrainError::AlreadyRunning)));

    release.notify_one();
    assert!(first.await.unwrap().is_ok());
}

// HTTP surface

fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = SECRET.to_string();
    config
}

fn app_state(snapshot: Option<ModelSnapshot>, outcome: Outcome, dir: &tempfile::TempDir) -> AppState {
    let provider = Arc::new(FileSnapshotProvider::new(dir.path().join("snapshot.json")));
    let events = vec![
        Event::new("u1", "P1", Action::View),
        Event::new("u1", "P2", Action::Purchase),
    ];
    AppState::from_parts(
        test_config(),
        Arc::new(InMemoryInteractionStore::new(events)),
        Arc::new(InMemoryCatalogStore::new(["P1", "P2", "P3", "P4"])),
        Arc::new(SnapshotHandle::new(snapshot)),
        provider.clone(),
        Arc::new(FakeExecutor::new(outcome, provider)),
    )
}

fn default_snapshot() -> ModelSnapshot {
    snapshot(&["P1", "P2", "P3", "P4"], &[], &["P3", "P1", "P4"], ScoreTable::new(&[]))
}

fn bearer(claims: Value, secret: &str) -> String {
    let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap();
    format!("Bearer {}", token)
}

async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = create_router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_authorized(uri: &str, authorization: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", authorization)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_http_root_and_health() {
    let dir = tempfile::tempdir().unwrap();

    let (status, body) = send(app_state(None, Outcome::Fail, &dir), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");

    let (status, body) = send(app_state(Some(default_snapshot()), Outcome::Fail, &dir), get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["database_connected"], true);
}

#[tokio::test]
async fn test_http_recommendations_for_valid_token() {
    let dir = tempfile::tempdir().unwrap();
    let auth = bearer(json!({ "_id": "u1", "exp": Utc::now().timestamp() + 3600 }), SECRET);

    let (status, body) = send(
        app_state(Some(default_snapshot()), Outcome::Fail, &dir),
        get_authorized("/api/recommendations", &auth),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["recommendations"], json!(["P3", "P4"]));
    assert_eq!(body["metadata"]["strategy_used"], "collaborative");
    assert_eq!(body["metadata"]["user_seen_count"], 2);
    assert_eq!(body["metadata"]["catalog_size"], 4);
    assert_eq!(body["metadata"]["recommendation_count"], 2);
}

#[tokio::test]
async fn test_http_auth_failures_are_distinct() {
    let dir = tempfile::tempdir().unwrap();

    let (status, body) = send(
        app_state(Some(default_snapshot()), Outcome::Fail, &dir),
        get("/api/recommendations"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Authorization required");

    let expired = bearer(json!({ "_id": "u1", "exp": Utc::now().timestamp() - 3600 }), SECRET);
    let (status, body) = send(
        app_state(Some(default_snapshot()), Outcome::Fail, &dir),
        get_authorized("/api/recommendations", &expired),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Token has expired");

    let forged = bearer(json!({ "_id": "u1", "exp": Utc::now().timestamp() + 3600 }), "wrong-secret");
    let (status, body) = send(
        app_state(Some(default_snapshot()), Outcome::Fail, &dir),
        get_authorized("/api/recommendations", &forged),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Token is invalid.");
    assert!(body["error_details"].is_string());
}

#[tokio::test]
async fn test_http_not_ready_without_model() {
    let dir = tempfile::tempdir().unwrap();
    let auth = bearer(json!({ "_id": "u1", "exp": Utc::now().timestamp() + 3600 }), SECRET);

    let (status, body) = send(app_state(None, Outcome::Fail, &dir), get_authorized("/api/recommendations", &auth)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert_eq!(
        body["message"],
        "Recommendation service is not ready. Please train the model first."
    );
}

#[tokio::test]
async fn test_http_retrain_failure_and_success() {
    let dir = tempfile::tempdir().unwrap();
    let post = || Request::builder().method("POST").uri("/api/retrain").body(Body::empty()).unwrap();

    let (status, body) = send(app_state(Some(default_snapshot()), Outcome::Fail, &dir), post()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Model training failed");
    assert_eq!(body["error"], "no event data found");

    let (status, body) = send(app_state(None, Outcome::WriteSnapshot, &dir), post()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Model retrained successfully");
    assert_eq!(body["metadata"]["total_users"], 4);
    assert!(body["metadata"]["model_performance"]["rmse"].is_number());
}

#[tokio::test]
async fn test_http_status_report() {
    let dir = tempfile::tempdir().unwrap();
    let mut snap = default_snapshot();
    snap.membership.trained_at = Utc::now() - ChronoDuration::days(10);

    let (status, body) = send(app_state(Some(snap), Outcome::Fail, &dir), get("/api/status")).await;
    assert_eq!(status, StatusCode::OK);
    let report = &body["status"];
    assert_eq!(report["model_loaded"], true);
    assert_eq!(report["catalog"]["total_products"], 4);
    assert_eq!(report["catalog"]["new_products"], 0);
    assert_eq!(report["interactions"]["total_events"], 2);
    assert_eq!(report["interactions"]["events_in_training"], 100);
    assert_eq!(report["maintenance"]["needs_retraining"], true);
    assert_eq!(report["maintenance"]["reasons"], json!(["Model is 10 days old"]));

    let (_, body) = send(app_state(None, Outcome::Fail, &dir), get("/api/status")).await;
    assert_eq!(body["status"]["model_loaded"], false);
    assert_eq!(body["status"]["maintenance"]["reasons"], json!(["No model found"]));
}
