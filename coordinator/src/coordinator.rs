//! Round-lifecycle logic: session issue and verification, score recording,
//! and opportunistic round finalization.

use crate::metrics::Metrics;
use crate::store::{Store, StoreError};
use holdout_types::{RoundClosure, RoundInfo, ScoreRow, Session, Wallet};
use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The settlement chain as the coordinator sees it. The production
/// implementation is [`holdout_chain::Client`].
pub trait Settlement: Send + Sync + 'static {
    /// Whether a payout signing authority is configured.
    fn can_finalize(&self) -> bool;

    /// Whether an entry-fee payment event exists for (wallet, round).
    /// Fail-closed: implementations report errors as unpaid.
    fn has_paid(&self, wallet: &Wallet, round_id: u64) -> impl Future<Output = bool> + Send;

    fn round_info(&self) -> impl Future<Output = holdout_chain::Result<RoundInfo>> + Send;

    fn finalize_round(
        &self,
        winner: &Wallet,
    ) -> impl Future<Output = holdout_chain::Result<String>> + Send;
}

impl Settlement for holdout_chain::Client {
    fn can_finalize(&self) -> bool {
        holdout_chain::Client::can_finalize(self)
    }

    async fn has_paid(&self, wallet: &Wallet, round_id: u64) -> bool {
        holdout_chain::Client::has_paid(self, wallet, round_id).await
    }

    async fn round_info(&self) -> holdout_chain::Result<RoundInfo> {
        holdout_chain::Client::round_info(self).await
    }

    async fn finalize_round(&self, winner: &Wallet) -> holdout_chain::Result<String> {
        holdout_chain::Client::finalize_round(self, winner).await
    }
}

/// Error type for coordinator operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("entry fee required")]
    EntryFeeRequired,
    #[error("session not found")]
    SessionNotFound,
    #[error("invalid session")]
    InvalidSession,
    #[error("time verification failed")]
    TimeVerification,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of an accepted score submission.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub round_id: u64,
    pub best_score_ms: u64,
    pub closure: Option<RoundClosure>,
}

pub struct Coordinator<S: Settlement> {
    store: Store,
    settlement: S,
    metrics: Metrics,
    threshold_wei: u128,
    tolerance_buffer_ms: u64,
    leaderboard_limit: usize,
}

impl<S: Settlement> Coordinator<S> {
    pub fn new(
        store: Store,
        settlement: S,
        threshold_wei: u128,
        tolerance_buffer_ms: u64,
        leaderboard_limit: usize,
    ) -> Self {
        Self {
            store,
            settlement,
            metrics: Metrics::new(),
            threshold_wei,
            tolerance_buffer_ms,
            leaderboard_limit,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn leaderboard_limit(&self) -> usize {
        self.leaderboard_limit
    }

    /// Issue a single-use timing session after verifying the entry fee.
    /// Replaces any unconsumed session the wallet still holds.
    pub async fn start_attempt(&self, wallet: &Wallet, round_id: u64) -> Result<String, Error> {
        if !self.settlement.has_paid(wallet, round_id).await {
            return Err(Error::EntryFeeRequired);
        }
        let session = Session {
            wallet: *wallet,
            token: Uuid::new_v4().to_string(),
            round_id,
            started_at_ms: now_ms(),
        };
        self.store.put_session(&session)?;
        self.metrics.sessions_started.inc();
        debug!(%wallet, round_id, "session issued");
        Ok(session.token)
    }

    /// Verify the session and claimed duration, record the score, and give
    /// the finalizer a chance to close the round.
    pub async fn submit_score(
        &self,
        wallet: &Wallet,
        session_token: &str,
        claimed_ms: u64,
        submitted_round_id: Option<u64>,
    ) -> Result<SubmitOutcome, Error> {
        let session = self.verify_and_consume(wallet, session_token, claimed_ms)?;
        if let Some(round_id) = submitted_round_id {
            if round_id != session.round_id {
                debug!(
                    %wallet,
                    submitted = round_id,
                    session = session.round_id,
                    "submitted round differs from session round, using session round"
                );
            }
        }

        let best = self
            .store
            .record_if_best(session.round_id, wallet, claimed_ms, now_ms())?;
        self.metrics.scores_accepted.inc();
        info!(%wallet, round_id = session.round_id, claimed_ms, best, "score recorded");

        self.maybe_close(session.round_id).await;
        let closure = self.store.round_closure(session.round_id)?;
        Ok(SubmitOutcome {
            round_id: session.round_id,
            best_score_ms: best,
            closure,
        })
    }

    /// Single-use session check. Whatever session the wallet holds is removed
    /// before the token and claimed time are judged, so every rejection also
    /// forces a fresh paid attempt.
    fn verify_and_consume(
        &self,
        wallet: &Wallet,
        session_token: &str,
        claimed_ms: u64,
    ) -> Result<Session, Error> {
        let Some(session) = self.store.take_session(wallet)? else {
            self.metrics.submissions_rejected.inc();
            return Err(Error::SessionNotFound);
        };
        if session.token != session_token {
            self.metrics.submissions_rejected.inc();
            return Err(Error::InvalidSession);
        }
        let observed_ms = now_ms().saturating_sub(session.started_at_ms);
        if claimed_ms > observed_ms + self.tolerance_buffer_ms {
            self.metrics.submissions_rejected.inc();
            warn!(%wallet, claimed_ms, observed_ms, "claimed duration exceeds observed window");
            return Err(Error::TimeVerification);
        }
        Ok(session)
    }

    pub fn leaderboard(&self, round_id: u64, limit: usize) -> Result<Vec<ScoreRow>, Error> {
        Ok(self.store.leaderboard(round_id, limit)?)
    }

    pub async fn current_round(&self) -> holdout_chain::Result<RoundInfo> {
        self.settlement.round_info().await
    }

    /// Close the round if its pot crossed the threshold. Every failure is a
    /// logged no-op; the next accepted submission retries. Score recording is
    /// never blocked or failed by anything in here.
    pub async fn maybe_close(&self, round_id: u64) {
        match self.store.round_closure(round_id) {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(err) => {
                warn!(round_id, %err, "closure lookup failed, skipping finalization");
                return;
            }
        }

        let info = match self.settlement.round_info().await {
            Ok(info) => info,
            Err(err) => {
                warn!(round_id, %err, "pot read failed, skipping finalization");
                return;
            }
        };
        // The contract only reports its current round; a stale or already
        // finalized round cannot be paid out from here.
        if info.id != round_id || info.finalized {
            debug!(
                round_id,
                chain_round = info.id,
                finalized = info.finalized,
                "round not open on chain, skipping finalization"
            );
            return;
        }
        if info.pot_wei < self.threshold_wei {
            debug!(
                round_id,
                pot_wei = info.pot_wei,
                threshold_wei = self.threshold_wei,
                "pot below threshold"
            );
            return;
        }

        let top = match self.store.top_score(round_id) {
            Ok(Some(top)) => top,
            Ok(None) => {
                info!(round_id, "threshold reached but round has no scores, skipping close");
                return;
            }
            Err(err) => {
                warn!(round_id, %err, "winner lookup failed, skipping finalization");
                return;
            }
        };

        if !self.settlement.can_finalize() {
            warn!(round_id, "no payout signer configured, skipping on-chain payout");
            return;
        }

        self.metrics.finalize_attempts.inc();
        match self.settlement.finalize_round(&top.wallet).await {
            Ok(tx_hash) => {
                let newly_closed =
                    match self
                        .store
                        .close_round(round_id, &top.wallet, info.pot_wei, now_ms())
                    {
                        Ok(newly_closed) => newly_closed,
                        Err(err) => {
                            // The payout is on chain; the finalized flag the
                            // contract now reports keeps a retry from paying
                            // twice even though the local row is missing.
                            warn!(round_id, %err, "payout confirmed but closure write failed");
                            return;
                        }
                    };
                if newly_closed {
                    self.metrics.rounds_closed.inc();
                    info!(
                        round_id,
                        winner = %top.wallet,
                        pot_wei = info.pot_wei,
                        %tx_hash,
                        "round closed"
                    );
                }
            }
            Err(err) => {
                self.metrics.finalize_failures.inc();
                warn!(round_id, winner = %top.wallet, %err, "payout failed, round left open");
            }
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
