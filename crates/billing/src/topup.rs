//! Idempotent top-up recorder
//!
//! Payment processors redeliver notifications; crediting must survive any
//! number of replays. The receipt insert is the synchronization point: the
//! first delivery wins the insert and credits the account, every replay
//! sees the conflict and returns as a successful no-op. If the credit
//! itself fails, the receipt is deleted again (compensation) so a
//! legitimate retry is not permanently blocked.

use std::sync::{Arc, OnceLock};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;
use tollgate_shared::{AccountId, Store, TopupReceipt};

use crate::error::BillingResult;
use crate::ledger::Ledger;

type HmacSha256 = Hmac<Sha256>;

/// Default conversion rate: credits per US dollar.
/// Configurable via CREDITS_PER_USD.
const DEFAULT_CREDITS_PER_USD: i64 = 100;

fn get_credits_per_usd() -> i64 {
    static RATE: OnceLock<i64> = OnceLock::new();
    *RATE.get_or_init(|| {
        std::env::var("CREDITS_PER_USD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CREDITS_PER_USD)
    })
}

/// Convert a verified payment amount in US cents to credits
pub fn credits_for_usd_cents(amount_usd_cents: i64) -> i64 {
    amount_usd_cents * get_credits_per_usd() / 100
}

/// Verify an HMAC-SHA256 payment webhook signature (hex-encoded).
/// Comparison is constant-time via the Mac verifier.
pub fn verify_payment_signature(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Outcome of applying a verified payment notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopupOutcome {
    /// Account was credited with this many credits
    Credited(i64),
    /// Same transaction id seen before; nothing changed
    Duplicate,
}

/// Dedupes external payment notifications before crediting the ledger
#[derive(Clone)]
pub struct TopupRecorder {
    store: Arc<dyn Store>,
    ledger: Ledger,
}

impl TopupRecorder {
    pub fn new(store: Arc<dyn Store>, ledger: Ledger) -> Self {
        Self { store, ledger }
    }

    /// Apply a payment notification whose authenticity has already been
    /// verified upstream (signature check on the webhook body).
    pub async fn apply_verified_topup(
        &self,
        external_transaction_id: &str,
        account_id: AccountId,
        amount_usd_cents: i64,
    ) -> BillingResult<TopupOutcome> {
        let credits = credits_for_usd_cents(amount_usd_cents);

        let receipt = TopupReceipt {
            external_transaction_id: external_transaction_id.to_string(),
            account_id,
            amount: credits,
            processed_at: OffsetDateTime::now_utc(),
        };

        if !self.store.insert_topup_receipt(&receipt).await? {
            tracing::info!(
                account_id = %account_id,
                external_transaction_id,
                "Duplicate payment notification ignored"
            );
            return Ok(TopupOutcome::Duplicate);
        }

        let reason = format!("payment {}", external_transaction_id);
        match self.ledger.topup(account_id, credits, &reason).await {
            Ok(_) => Ok(TopupOutcome::Credited(credits)),
            Err(e) => {
                // Compensate so the processor's retry can succeed
                if let Err(del_err) = self
                    .store
                    .delete_topup_receipt(external_transaction_id)
                    .await
                {
                    tracing::error!(
                        account_id = %account_id,
                        external_transaction_id,
                        error = %del_err,
                        "Failed to compensate top-up receipt; transaction is blocked until manual cleanup"
                    );
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use tollgate_shared::{Account, MemoryStore, Plan};

    async fn setup() -> (TopupRecorder, Arc<MemoryStore>, AccountId) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone() as Arc<dyn Store>);
        let recorder = TopupRecorder::new(store.clone() as Arc<dyn Store>, ledger);
        let account = Account::new(Plan::Free, OffsetDateTime::now_utc());
        store.insert_account(&account).await.unwrap();
        (recorder, store, account.id)
    }

    #[tokio::test]
    async fn test_topup_credits_once() {
        let (recorder, store, id) = setup().await;

        let outcome = recorder
            .apply_verified_topup("evt_1", id, 1_000)
            .await
            .unwrap();
        assert_eq!(outcome, TopupOutcome::Credited(1_000));
        assert_eq!(store.get_account(id).await.unwrap().prepaid_balance, 1_000);
    }

    #[tokio::test]
    async fn test_replayed_notification_credits_exactly_once() {
        let (recorder, store, id) = setup().await;

        for _ in 0..5 {
            recorder
                .apply_verified_topup("evt_replay", id, 500)
                .await
                .unwrap();
        }

        assert_eq!(store.get_account(id).await.unwrap().prepaid_balance, 500);
        let outcome = recorder
            .apply_verified_topup("evt_replay", id, 500)
            .await
            .unwrap();
        assert_eq!(outcome, TopupOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_failed_credit_unblocks_retry() {
        let (recorder, store, _) = setup().await;
        let missing = AccountId::new();

        // Credit fails: the account does not exist
        assert!(recorder
            .apply_verified_topup("evt_retry", missing, 500)
            .await
            .is_err());

        // Receipt was compensated, so a retry for a now-existing account id
        // with the same transaction id is not treated as a duplicate
        let account = Account::new(Plan::Free, OffsetDateTime::now_utc());
        store.insert_account(&account).await.unwrap();
        // Different account, same external id: allowed because compensation
        // removed the receipt
        let outcome = recorder
            .apply_verified_topup("evt_retry", account.id, 500)
            .await
            .unwrap();
        assert_eq!(outcome, TopupOutcome::Credited(500));
    }

    #[test]
    fn test_usd_conversion_default_rate() {
        // 100 credits per USD -> cents map 1:1
        assert_eq!(credits_for_usd_cents(1_000), 1_000);
        assert_eq!(credits_for_usd_cents(50), 50);
    }

    #[test]
    fn test_signature_verification_round_trip() {
        let secret = "whsec_test";
        let payload = br#"{"id":"evt_1","amount":1000}"#;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_payment_signature(secret, payload, &signature));
        assert!(!verify_payment_signature(secret, b"tampered", &signature));
        assert!(!verify_payment_signature(secret, payload, "deadbeef"));
        assert!(!verify_payment_signature(secret, payload, "not-hex"));
    }
}
