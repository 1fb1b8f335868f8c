//! Call documents
//!
//! Calls are kept as JSON documents so records written by older releases
//! can sit next to current ones. Every read goes through schema migration
//! and legacy documents are rewritten in the current format on first touch.

use async_trait::async_trait;
use callmeter_core::models::{
    migrate, BillingStart, Call, CallDocument, CallPatch, CallStatus, MeterSnapshot,
};
use callmeter_core::traits::{CallRepository, FinalizationClaim};
use callmeter_core::{AppError, AppResult};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A thread-safe in-memory store for call documents.
#[derive(Default, Clone)]
pub struct InMemoryCallRepository {
    documents: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryCallRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw document as-is, e.g. one exported by an older writer.
    pub async fn insert_document(&self, call_id: &str, document: Value) {
        let mut documents = self.documents.write().await;
        documents.insert(call_id.to_string(), document);
    }

    /// The stored document, without migration.
    pub async fn raw_document(&self, call_id: &str) -> Option<Value> {
        let documents = self.documents.read().await;
        documents.get(call_id).cloned()
    }

    fn decode(call_id: &str, value: &Value) -> AppResult<(Call, bool)> {
        let doc = CallDocument::from_value(value.clone())?;
        let current = doc.is_current();
        Ok((migrate(doc, call_id)?, current))
    }

    fn encode(call: &Call) -> AppResult<Value> {
        CallDocument::from(call).to_value()
    }

    /// Read-modify-write under the write lock.
    async fn modify<R, F>(&self, call_id: &str, f: F) -> AppResult<Option<(Call, R)>>
    where
        F: FnOnce(&mut Call) -> R + Send,
        R: Send,
    {
        let mut documents = self.documents.write().await;
        let Some(value) = documents.get(call_id) else {
            return Ok(None);
        };
        let (mut call, _) = Self::decode(call_id, value)?;
        let result = f(&mut call);
        documents.insert(call_id.to_string(), Self::encode(&call)?);
        Ok(Some((call, result)))
    }
}

#[async_trait]
impl CallRepository for InMemoryCallRepository {
    async fn insert(&self, call: &Call) -> AppResult<()> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&call.call_id) {
            return Err(AppError::Conflict(format!(
                "call {} already exists",
                call.call_id
            )));
        }
        documents.insert(call.call_id.clone(), Self::encode(call)?);
        Ok(())
    }

    async fn find(&self, call_id: &str) -> AppResult<Option<Call>> {
        let (call, current) = {
            let documents = self.documents.read().await;
            match documents.get(call_id) {
                Some(value) => Self::decode(call_id, value)?,
                None => return Ok(None),
            }
        };

        if !current {
            debug!(call_id = %call_id, "Upgrading legacy call document");
            // Another writer may have upgraded it in between; modify re-reads.
            if let Some((upgraded, _)) = self.modify(call_id, |_| ()).await? {
                return Ok(Some(upgraded));
            }
        }

        Ok(Some(call))
    }

    async fn merge(&self, call_id: &str, patch: &CallPatch) -> AppResult<Call> {
        let now = Utc::now();
        self.modify(call_id, |call| call.apply(patch, now))
            .await?
            .map(|(call, _)| call)
            .ok_or_else(|| AppError::call_not_found(call_id))
    }

    async fn record_snapshot(&self, call_id: &str, snapshot: &MeterSnapshot) -> AppResult<bool> {
        let now = Utc::now();
        let outcome = self
            .modify(call_id, |call| {
                if !call.is_billing_live() {
                    return false;
                }
                let patch = CallPatch {
                    meter: Some(*snapshot),
                    ..CallPatch::default()
                };
                call.apply(&patch, now);
                true
            })
            .await?;

        Ok(outcome.map(|(_, written)| written).unwrap_or(false))
    }

    async fn claim_billing_start(
        &self,
        call_id: &str,
        start: &BillingStart,
    ) -> AppResult<Option<Call>> {
        let outcome = self
            .modify(call_id, |call| call.begin_billing(start))
            .await?
            .ok_or_else(|| AppError::call_not_found(call_id))?;

        match outcome {
            (call, true) => Ok(Some(call)),
            (_, false) => Ok(None),
        }
    }

    async fn claim_finalization(&self, call_id: &str) -> AppResult<FinalizationClaim> {
        let now = Utc::now();
        let outcome = self
            .modify(call_id, |call| {
                if !call.billing_started {
                    false
                } else {
                    call.claim_finalization(now)
                }
            })
            .await?;

        Ok(match outcome {
            None => FinalizationClaim::NotFound,
            Some((call, true)) => FinalizationClaim::Claimed(call),
            Some((call, false)) if call.billing_started => {
                FinalizationClaim::AlreadyFinalized(call)
            }
            Some((call, false)) => FinalizationClaim::NotStarted(call),
        })
    }

    async fn list_by_status(&self, status: CallStatus) -> AppResult<Vec<Call>> {
        let documents = self.documents.read().await;
        let mut calls: Vec<Call> = documents
            .iter()
            .filter_map(|(id, value)| match Self::decode(id, value) {
                Ok((call, _)) => Some(call),
                Err(e) => {
                    warn!(call_id = %id, error = %e, "Skipping unreadable call document");
                    None
                }
            })
            .filter(|call| call.status == status)
            .collect();
        calls.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(calls)
    }

    async fn list_settlement_failures(&self) -> AppResult<Vec<Call>> {
        let completed = self.list_by_status(CallStatus::Completed).await?;
        Ok(completed
            .into_iter()
            .filter(|call| call.settlement.as_ref().is_some_and(|s| s.is_failure()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmeter_core::models::{CallType, SettlementStatus, CURRENT_SCHEMA_VERSION};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn call(id: &str) -> Call {
        Call::new(id, "user-1", "provider-1", CallType::Voice, Utc::now())
    }

    fn start() -> BillingStart {
        BillingStart {
            started_at: Utc::now(),
            rate_per_minute: dec!(60),
            rate_per_second: dec!(1),
        }
    }

    async fn connected(repo: &InMemoryCallRepository, id: &str) {
        repo.insert(&call(id)).await.unwrap();
        let patch = CallPatch {
            status: Some(CallStatus::Connected),
            ..CallPatch::default()
        };
        repo.merge(id, &patch).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate() {
        let repo = InMemoryCallRepository::new();
        repo.insert(&call("c1")).await.unwrap();
        let err = repo.insert(&call("c1")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_legacy_document_is_upgraded_on_read() {
        let repo = InMemoryCallRepository::new();
        repo.insert_document(
            "old-1",
            json!({"userId": "u1", "providerId": "p1", "status": "queued"}),
        )
        .await;

        let call = repo.find("old-1").await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Created);
        assert_eq!(call.call_id, "old-1");

        let raw = repo.raw_document("old-1").await.unwrap();
        assert_eq!(raw["schemaVersion"], json!(CURRENT_SCHEMA_VERSION));
        assert_eq!(raw["status"], json!("created"));
    }

    #[tokio::test]
    async fn test_billing_start_claimed_once() {
        let repo = InMemoryCallRepository::new();
        connected(&repo, "c1").await;

        let first = repo.claim_billing_start("c1", &start()).await.unwrap();
        assert!(first.is_some());
        let second = repo.claim_billing_start("c1", &start()).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_finalization_claimed_once() {
        let repo = InMemoryCallRepository::new();
        connected(&repo, "c1").await;

        assert!(matches!(
            repo.claim_finalization("c1").await.unwrap(),
            FinalizationClaim::NotStarted(_)
        ));

        repo.claim_billing_start("c1", &start()).await.unwrap();
        assert!(matches!(
            repo.claim_finalization("c1").await.unwrap(),
            FinalizationClaim::Claimed(_)
        ));
        assert!(matches!(
            repo.claim_finalization("c1").await.unwrap(),
            FinalizationClaim::AlreadyFinalized(_)
        ));
        assert!(matches!(
            repo.claim_finalization("missing").await.unwrap(),
            FinalizationClaim::NotFound
        ));
    }

    #[tokio::test]
    async fn test_snapshot_only_while_billing_live() {
        let repo = InMemoryCallRepository::new();
        connected(&repo, "c1").await;
        let snap = MeterSnapshot {
            elapsed_seconds: 5,
            accrued_amount: dec!(5),
            provider_earning: dec!(5),
        };

        assert!(!repo.record_snapshot("c1", &snap).await.unwrap());

        repo.claim_billing_start("c1", &start()).await.unwrap();
        assert!(repo.record_snapshot("c1", &snap).await.unwrap());
        assert_eq!(repo.find("c1").await.unwrap().unwrap().elapsed_seconds, 5);

        repo.claim_finalization("c1").await.unwrap();
        assert!(!repo.record_snapshot("c1", &snap).await.unwrap());
        assert!(!repo.record_snapshot("missing", &snap).await.unwrap());
    }

    #[tokio::test]
    async fn test_lists_settlement_failures() {
        let repo = InMemoryCallRepository::new();
        for (id, settlement) in [
            ("ok", SettlementStatus::Settled),
            (
                "bad",
                SettlementStatus::DebitFailed {
                    reason: "insufficient".into(),
                },
            ),
        ] {
            repo.insert(&call(id)).await.unwrap();
            let patch = CallPatch {
                status: Some(CallStatus::Completed),
                settlement: Some(settlement),
                ..CallPatch::default()
            };
            repo.merge(id, &patch).await.unwrap();
        }

        let failures = repo.list_settlement_failures().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].call_id, "bad");
    }
}
