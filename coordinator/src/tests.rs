use crate::api::Api;
use crate::coordinator::{Coordinator, Error, Settlement};
use crate::store::Store;
use crate::Config;
use holdout_types::{RoundInfo, Wallet};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const THRESHOLD_WEI: u128 = 100_000;
const TOLERANCE_MS: u64 = 2_000;

/// Scripted settlement chain with call counting.
#[derive(Default)]
struct MockSettlement {
    paid: AtomicBool,
    rpc_down: AtomicBool,
    chain_round: AtomicU64,
    chain_finalized: AtomicBool,
    pot_wei: AtomicU64,
    signer: AtomicBool,
    finalize_ok: AtomicBool,
    finalize_calls: AtomicU64,
}

impl Settlement for Arc<MockSettlement> {
    fn can_finalize(&self) -> bool {
        self.signer.load(Ordering::SeqCst)
    }

    async fn has_paid(&self, _wallet: &Wallet, _round_id: u64) -> bool {
        // The payment check is fail-closed, so an unreachable chain and a
        // missing event look the same to the coordinator.
        !self.rpc_down.load(Ordering::SeqCst) && self.paid.load(Ordering::SeqCst)
    }

    async fn round_info(&self) -> holdout_chain::Result<RoundInfo> {
        if self.rpc_down.load(Ordering::SeqCst) {
            return Err(holdout_chain::Error::Rpc("unavailable".into()));
        }
        Ok(RoundInfo {
            id: self.chain_round.load(Ordering::SeqCst),
            pot_wei: u128::from(self.pot_wei.load(Ordering::SeqCst)),
            start: 0,
            end: 0,
            finalized: self.chain_finalized.load(Ordering::SeqCst),
        })
    }

    async fn finalize_round(&self, _winner: &Wallet) -> holdout_chain::Result<String> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        if self.finalize_ok.load(Ordering::SeqCst) {
            Ok("0xd00d".into())
        } else {
            Err(holdout_chain::Error::Rpc("payout failed".into()))
        }
    }
}

fn wallet(n: u8) -> Wallet {
    Wallet::from([n; 20])
}

fn paid_mock() -> Arc<MockSettlement> {
    let mock = Arc::new(MockSettlement::default());
    mock.paid.store(true, Ordering::SeqCst);
    mock.chain_round.store(7, Ordering::SeqCst);
    mock.signer.store(true, Ordering::SeqCst);
    mock.finalize_ok.store(true, Ordering::SeqCst);
    mock
}

fn test_coordinator(mock: Arc<MockSettlement>) -> Coordinator<Arc<MockSettlement>> {
    let store = Store::open_in_memory().unwrap();
    Coordinator::new(store, mock, THRESHOLD_WEI, TOLERANCE_MS, 100)
}

#[tokio::test]
async fn test_start_attempt_requires_payment() {
    let mock = Arc::new(MockSettlement::default());
    let coordinator = test_coordinator(mock.clone());
    let w = wallet(0xaa);

    assert!(matches!(
        coordinator.start_attempt(&w, 7).await,
        Err(Error::EntryFeeRequired)
    ));

    // A paid wallet behind a dead RPC is still rejected: fail-closed.
    mock.paid.store(true, Ordering::SeqCst);
    mock.rpc_down.store(true, Ordering::SeqCst);
    assert!(matches!(
        coordinator.start_attempt(&w, 7).await,
        Err(Error::EntryFeeRequired)
    ));
}

#[tokio::test]
async fn test_accepted_scores_keep_maximum() {
    let coordinator = test_coordinator(paid_mock());
    let w = wallet(0xaa);

    let token = coordinator.start_attempt(&w, 7).await.unwrap();
    let outcome = coordinator
        .submit_score(&w, &token, 1_000, Some(7))
        .await
        .unwrap();
    assert_eq!(outcome.round_id, 7);
    assert_eq!(outcome.best_score_ms, 1_000);
    assert!(outcome.closure.is_none());

    // A lower claim is accepted but the stored best is reported back.
    let token = coordinator.start_attempt(&w, 7).await.unwrap();
    let outcome = coordinator
        .submit_score(&w, &token, 400, Some(7))
        .await
        .unwrap();
    assert_eq!(outcome.best_score_ms, 1_000);
}

#[tokio::test]
async fn test_session_is_single_use() {
    let coordinator = test_coordinator(paid_mock());
    let w = wallet(0xaa);

    let token = coordinator.start_attempt(&w, 7).await.unwrap();
    coordinator
        .submit_score(&w, &token, 500, Some(7))
        .await
        .unwrap();

    assert!(matches!(
        coordinator.submit_score(&w, &token, 500, Some(7)).await,
        Err(Error::SessionNotFound)
    ));
}

#[tokio::test]
async fn test_new_session_supersedes_and_mismatch_destroys() {
    let coordinator = test_coordinator(paid_mock());
    let w = wallet(0xaa);

    let stale = coordinator.start_attempt(&w, 7).await.unwrap();
    let fresh = coordinator.start_attempt(&w, 7).await.unwrap();
    assert_ne!(stale, fresh);

    // The stale token no longer matches, and judging it consumed the live
    // session too: the wallet must start a fresh paid attempt.
    assert!(matches!(
        coordinator.submit_score(&w, &stale, 500, Some(7)).await,
        Err(Error::InvalidSession)
    ));
    assert!(matches!(
        coordinator.submit_score(&w, &fresh, 500, Some(7)).await,
        Err(Error::SessionNotFound)
    ));
}

#[tokio::test]
async fn test_cheat_claim_rejected_and_unusable() {
    let coordinator = test_coordinator(paid_mock());
    let w = wallet(0xaa);

    let token = coordinator.start_attempt(&w, 7).await.unwrap();
    // Far beyond anything the server could have observed since start.
    assert!(matches!(
        coordinator.submit_score(&w, &token, 600_000, Some(7)).await,
        Err(Error::TimeVerification)
    ));

    // Nothing was recorded and the session is gone.
    assert!(coordinator.leaderboard(7, 10).unwrap().is_empty());
    assert!(matches!(
        coordinator.submit_score(&w, &token, 500, Some(7)).await,
        Err(Error::SessionNotFound)
    ));
}

#[tokio::test]
async fn test_finalizes_once_at_threshold() {
    let mock = paid_mock();
    mock.pot_wei.store(THRESHOLD_WEI as u64, Ordering::SeqCst);
    let coordinator = test_coordinator(mock.clone());
    let w = wallet(0xaa);

    let token = coordinator.start_attempt(&w, 7).await.unwrap();
    let outcome = coordinator
        .submit_score(&w, &token, 1_000, Some(7))
        .await
        .unwrap();
    let closure = outcome.closure.expect("round should close");
    assert_eq!(closure.winner, w);
    assert_eq!(closure.closing_pot_wei, THRESHOLD_WEI);
    assert_eq!(mock.finalize_calls.load(Ordering::SeqCst), 1);

    // The closed flag is durable: later submissions never trigger another
    // payout, whatever the pot reads.
    let other = wallet(0xbb);
    let token = coordinator.start_attempt(&other, 7).await.unwrap();
    let outcome = coordinator
        .submit_score(&other, &token, 1_500, Some(7))
        .await
        .unwrap();
    assert!(outcome.closure.is_some());
    assert_eq!(outcome.closure.unwrap().winner, w);
    assert_eq!(mock.finalize_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_finalize_below_threshold() {
    let mock = paid_mock();
    mock.pot_wei
        .store(THRESHOLD_WEI as u64 - 1, Ordering::SeqCst);
    let coordinator = test_coordinator(mock.clone());
    let w = wallet(0xaa);

    let token = coordinator.start_attempt(&w, 7).await.unwrap();
    let outcome = coordinator
        .submit_score(&w, &token, 1_000, Some(7))
        .await
        .unwrap();
    assert!(outcome.closure.is_none());
    assert_eq!(mock.finalize_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_finalize_without_scores() {
    let mock = paid_mock();
    mock.pot_wei.store(u64::MAX, Ordering::SeqCst);
    let coordinator = test_coordinator(mock.clone());

    // Threshold crossed and a signer is ready, but an empty round cannot
    // close.
    coordinator.maybe_close(7).await;
    assert_eq!(mock.finalize_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_finalize_without_signer() {
    let mock = paid_mock();
    mock.pot_wei.store(u64::MAX, Ordering::SeqCst);
    mock.signer.store(false, Ordering::SeqCst);
    let coordinator = test_coordinator(mock.clone());
    let w = wallet(0xaa);

    let token = coordinator.start_attempt(&w, 7).await.unwrap();
    let outcome = coordinator
        .submit_score(&w, &token, 1_000, Some(7))
        .await
        .unwrap();
    assert!(outcome.closure.is_none());
    assert_eq!(mock.finalize_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_payout_leaves_round_open_then_retries() {
    let mock = paid_mock();
    mock.pot_wei.store(u64::MAX, Ordering::SeqCst);
    mock.finalize_ok.store(false, Ordering::SeqCst);
    let coordinator = test_coordinator(mock.clone());
    let w = wallet(0xaa);

    let token = coordinator.start_attempt(&w, 7).await.unwrap();
    let outcome = coordinator
        .submit_score(&w, &token, 1_000, Some(7))
        .await
        .unwrap();
    // Payout failed: the score stands and the round stays open.
    assert_eq!(outcome.best_score_ms, 1_000);
    assert!(outcome.closure.is_none());
    assert_eq!(mock.finalize_calls.load(Ordering::SeqCst), 1);

    // The next accepted submission retries and closes.
    mock.finalize_ok.store(true, Ordering::SeqCst);
    let token = coordinator.start_attempt(&w, 7).await.unwrap();
    let outcome = coordinator
        .submit_score(&w, &token, 1_100, Some(7))
        .await
        .unwrap();
    assert!(outcome.closure.is_some());
    assert_eq!(mock.finalize_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_no_finalize_when_chain_round_differs() {
    let mock = paid_mock();
    mock.pot_wei.store(u64::MAX, Ordering::SeqCst);
    mock.chain_round.store(8, Ordering::SeqCst);
    let coordinator = test_coordinator(mock.clone());
    let w = wallet(0xaa);

    // Session for round 7 while the chain has moved to round 8: the observed
    // pot belongs to another round, so no payout.
    let token = coordinator.start_attempt(&w, 7).await.unwrap();
    let outcome = coordinator
        .submit_score(&w, &token, 1_000, Some(7))
        .await
        .unwrap();
    assert!(outcome.closure.is_none());
    assert_eq!(mock.finalize_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_config_validation() {
    let config = || Config {
        port: 4000,
        db_path: "holdout.db".into(),
        log_level: "info".into(),
        rpc_url: "http://localhost:8545".into(),
        contract_address: format!("0x{}", "22".repeat(20)),
        chain_id: 84532,
        signer_key: None,
        entry_fee_wei: 300_000_000_000_000,
        pot_multiplier: 333,
        tolerance_buffer_ms: 4_000,
        payment_lookback_blocks: 50_000,
        leaderboard_limit: 100,
    };

    let validated = config().validate().unwrap();
    assert_eq!(validated.threshold_wei, 300_000_000_000_000 * 333);
    assert_eq!(validated.log_level, tracing::Level::INFO);

    let mut bad = config();
    bad.log_level = "noisy".into();
    assert!(bad.validate().is_err());

    let mut bad = config();
    bad.pot_multiplier = 0;
    assert!(bad.validate().is_err());

    let mut bad = config();
    bad.entry_fee_wei = u128::MAX;
    assert!(matches!(
        bad.validate(),
        Err(crate::ConfigError::ThresholdOverflow)
    ));
}

// HTTP-level coverage over the real router.

struct TestContext {
    mock: Arc<MockSettlement>,
    base_url: String,
    client: reqwest::Client,
    server_handle: tokio::task::JoinHandle<()>,
}

impl TestContext {
    async fn new() -> Self {
        let mock = paid_mock();
        let coordinator = Arc::new(test_coordinator(mock.clone()));
        let api = Api::new(coordinator);

        // Start server on random port
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let router = api.router();
        let server_handle = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give server time to start
        sleep(Duration::from_millis(50)).await;

        Self {
            mock,
            base_url,
            client: reqwest::Client::new(),
            server_handle,
        }
    }

    async fn post(&self, path: &str, body: Value) -> (reqwest::StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (reqwest::StatusCode, Value) {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

#[tokio::test]
async fn test_http_validation_errors() {
    let ctx = TestContext::new().await;

    let (status, body) = ctx.post("/api/start-attempt", json!({})).await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = ctx
        .post(
            "/api/start-attempt",
            json!({ "wallet": "not-an-address", "roundId": 7 }),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

    let wallet = format!("0x{}", "aa".repeat(20));
    let (status, _) = ctx
        .post(
            "/api/submit-score",
            json!({ "wallet": wallet, "roundId": 7, "scoreMs": 500 }),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

    let (status, body) = ctx
        .post(
            "/api/submit-score",
            json!({ "wallet": wallet, "roundId": 7, "scoreMs": 0, "sessionToken": "t" }),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid scoreMs");

    let (status, body) = ctx.get("/api/leaderboard").await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "roundId required");
}

#[tokio::test]
async fn test_http_entry_fee_required() {
    let ctx = TestContext::new().await;
    ctx.mock.paid.store(false, Ordering::SeqCst);

    let (status, body) = ctx
        .post(
            "/api/start-attempt",
            json!({ "wallet": format!("0x{}", "aa".repeat(20)), "roundId": 7 }),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "entry fee required");
}

#[tokio::test]
async fn test_http_full_flow() {
    let ctx = TestContext::new().await;
    // Mixed-case input address; everything below must come back lowercase.
    let wallet = format!("0x{}", "AA".repeat(20));

    let (status, body) = ctx
        .post(
            "/api/start-attempt",
            json!({ "wallet": wallet, "roundId": 7 }),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let token = body["sessionToken"].as_str().unwrap().to_string();

    let (status, body) = ctx
        .post(
            "/api/submit-score",
            json!({ "wallet": wallet, "roundId": 7, "scoreMs": 1500, "sessionToken": token }),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["roundId"], 7);
    assert_eq!(body["bestScoreMs"], 1500);
    assert_eq!(body["roundClosed"], false);
    assert!(body["winner"].is_null());

    // The consumed token is unusable.
    let (status, body) = ctx
        .post(
            "/api/submit-score",
            json!({ "wallet": wallet, "roundId": 7, "scoreMs": 1500, "sessionToken": token }),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "session not found");

    let (status, body) = ctx.get("/api/leaderboard?roundId=7").await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["wallet"], format!("0x{}", "aa".repeat(20)));
    assert_eq!(entries[0]["bestScoreMs"], 1500);

    let (status, body) = ctx.get("/api/current-round").await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["roundId"], 7);
    assert_eq!(body["potWei"], "0");
    assert_eq!(body["finalized"], false);

    let (status, body) = ctx.get("/").await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_http_current_round_unavailable() {
    let ctx = TestContext::new().await;
    ctx.mock.rpc_down.store(true, Ordering::SeqCst);

    let (status, body) = ctx.get("/api/current-round").await;
    assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_http_metrics_exposed() {
    let ctx = TestContext::new().await;
    let wallet = format!("0x{}", "aa".repeat(20));

    let (_, body) = ctx
        .post(
            "/api/start-attempt",
            json!({ "wallet": wallet, "roundId": 7 }),
        )
        .await;
    let token = body["sessionToken"].as_str().unwrap().to_string();
    ctx.post(
        "/api/submit-score",
        json!({ "wallet": wallet, "roundId": 7, "scoreMs": 100, "sessionToken": token }),
    )
    .await;

    let response = ctx
        .client
        .get(format!("{}/metrics", ctx.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("coordinator_sessions_started"));
    assert!(body.contains("coordinator_scores_accepted"));
}
