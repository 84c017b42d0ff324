//! Reset of transport sessions that were already reported abandoned

use std::sync::Arc;
use svtk_common::config::DuplicatePolicy;
use svtk_common::uuid_utils::new_transport_id;
use svtk_common::Result;
use tracing::info;

use super::store::{correlation_key, SessionStore};
use super::transport::{SessionContext, TransportSessions};

/// Runs first in every hook
///
/// If the session row behind this request was reported abandoned, the visitor
/// gets a new transport id and a clean context so that no further activity
/// lands on the abandoned row. Under [`DuplicatePolicy::Keep`] the row is the
/// request's own tab and the old context stays with the other tabs.
#[derive(Clone)]
pub struct GuardEnforcer {
    store: SessionStore,
    transports: Arc<dyn TransportSessions>,
}

impl GuardEnforcer {
    pub fn new(store: SessionStore, transports: Arc<dyn TransportSessions>) -> Self {
        Self { store, transports }
    }

    /// Returns true when the context was reset
    pub async fn enforce(
        &self,
        ctx: &mut SessionContext,
        survey_id: i64,
        tab_id: Option<&str>,
    ) -> Result<bool> {
        let policy = self.store.duplicate_policy();
        let row = match policy {
            DuplicatePolicy::Collapse => {
                self.store
                    .latest_for_transport(survey_id, &ctx.transport_id)
                    .await?
            }
            DuplicatePolicy::Keep => {
                self.store
                    .find_by_key(&correlation_key(survey_id, &ctx.transport_id, tab_id))
                    .await?
            }
        };

        match row {
            Some(row) if row.abandoned_sent => {}
            _ => return Ok(false),
        }

        let old_id = ctx.transport_id.clone();
        match policy {
            DuplicatePolicy::Collapse => self.transports.regenerate(ctx).await?,
            DuplicatePolicy::Keep => ctx.transport_id = new_transport_id(),
        }
        ctx.purge();
        self.transports.save(ctx).await?;

        info!(
            survey_id,
            old_transport = %old_id,
            new_transport = %ctx.transport_id,
            "Abandoned transport session reset"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::Heartbeat;
    use crate::session::transport::SqliteTransportSessions;
    use svtk_common::db::init_memory_database;
    use svtk_common::time::now;

    async fn setup() -> (SessionStore, Arc<SqliteTransportSessions>, GuardEnforcer) {
        setup_with(DuplicatePolicy::Collapse).await
    }

    async fn setup_with(
        policy: DuplicatePolicy,
    ) -> (SessionStore, Arc<SqliteTransportSessions>, GuardEnforcer) {
        let pool = init_memory_database().await.unwrap();
        let store = SessionStore::new(pool.clone(), policy);
        let transports = Arc::new(SqliteTransportSessions::new(pool));
        let guard = GuardEnforcer::new(store.clone(), transports.clone());
        (store, transports, guard)
    }

    fn heartbeat() -> Heartbeat {
        Heartbeat {
            survey_id: 12,
            transport_id: "tx1".to_string(),
            step: Some(2),
            ..Heartbeat::default()
        }
    }

    #[tokio::test]
    async fn test_no_row_no_reset() {
        let (_, _, guard) = setup().await;
        let mut ctx = SessionContext::new("tx1");
        assert!(!guard.enforce(&mut ctx, 12, None).await.unwrap());
        assert_eq!(ctx.transport_id, "tx1");
    }

    #[tokio::test]
    async fn test_completed_session_is_not_reset() {
        let (store, _, guard) = setup().await;
        store.upsert(now(), &heartbeat()).await.unwrap();
        store.mark_completed(now(), &heartbeat()).await.unwrap();

        let mut ctx = SessionContext::new("tx1");
        ctx.scope_mut(12).started_sent = true;
        assert!(!guard.enforce(&mut ctx, 12, None).await.unwrap());
        assert_eq!(ctx.transport_id, "tx1");
        assert!(ctx.scope(12).is_some());
    }

    #[tokio::test]
    async fn test_abandoned_session_is_reset() {
        let (store, transports, guard) = setup().await;
        store.upsert(now(), &heartbeat()).await.unwrap();
        let row = store.find_by_key("survey_12_tx1").await.unwrap().unwrap();
        store.claim_abandoned(now(), row.id).await.unwrap();

        let mut ctx = SessionContext::new("tx1");
        ctx.scope_mut(12).uuid = Some("u-1".to_string());
        transports.save(&ctx).await.unwrap();

        assert!(guard.enforce(&mut ctx, 12, None).await.unwrap());
        assert_ne!(ctx.transport_id, "tx1");
        assert!(ctx.surveys.is_empty());
        assert!(transports.load("tx1").await.unwrap().is_none());

        // The new id has no rows, so the next hook passes
        assert!(!guard.enforce(&mut ctx, 12, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_keep_policy_resets_only_the_abandoned_tab() {
        let (store, transports, guard) = setup_with(DuplicatePolicy::Keep).await;
        let mut idle = heartbeat();
        idle.tab_id = Some("a".to_string());
        let mut active = heartbeat();
        active.tab_id = Some("b".to_string());
        store.upsert(now(), &idle).await.unwrap();
        store.upsert(now(), &active).await.unwrap();

        let row = store.find_by_key("survey_12_tx1_a").await.unwrap().unwrap();
        store.claim_abandoned(now(), row.id).await.unwrap();

        let mut shared = SessionContext::new("tx1");
        shared.scope_mut(12).started_sent = true;
        transports.save(&shared).await.unwrap();

        // The active tab keeps its transport and context
        let mut ctx_b = shared.clone();
        assert!(!guard.enforce(&mut ctx_b, 12, Some("b")).await.unwrap());
        assert_eq!(ctx_b.transport_id, "tx1");

        // The abandoned tab moves on without deleting the shared context
        let mut ctx_a = shared.clone();
        assert!(guard.enforce(&mut ctx_a, 12, Some("a")).await.unwrap());
        assert_ne!(ctx_a.transport_id, "tx1");
        assert!(ctx_a.surveys.is_empty());
        assert!(transports.load("tx1").await.unwrap().is_some());
    }
}
