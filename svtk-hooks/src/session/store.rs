//! Durable session rows
//!
//! Every mutation here is a single conditional statement whose affected-row
//! count decides the outcome, so concurrent requests for the same session need
//! no other coordination.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use svtk_common::config::DuplicatePolicy;
use svtk_common::db::{SessionRecord, SessionState};
use svtk_common::time::to_millis;
use svtk_common::Result;
use tracing::{debug, info, warn};

const SESSION_COLUMNS: &str = "id, correlation_key, survey_id, response_id, step, started_at, \
     last_seen, completed, abandoned_sent, abandoned_sent_at, uuid, custom_id, transport_session_id";

/// Correlation key of a (survey, transport session[, tab]) triple
pub fn correlation_key(survey_id: i64, transport_id: &str, tab_id: Option<&str>) -> String {
    match tab_id.map(str::trim).filter(|t| !t.is_empty()) {
        Some(tab) => format!("survey_{}_{}_{}", survey_id, transport_id, tab),
        None => format!("survey_{}_{}", survey_id, transport_id),
    }
}

/// One heartbeat observation for a tracked session
#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    pub survey_id: i64,
    pub transport_id: String,
    pub tab_id: Option<String>,
    pub response_id: Option<i64>,
    pub step: Option<i64>,
    pub uuid: Option<String>,
    pub custom_id: Option<String>,
}

impl Heartbeat {
    pub fn correlation_key(&self) -> String {
        correlation_key(self.survey_id, &self.transport_id, self.tab_id.as_deref())
    }
}

/// Result of [`SessionStore::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Row is completed or abandoned; nothing was written
    IgnoredTerminal(SessionState),
}

/// Result of [`SessionStore::mark_completed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// This call moved the session to completed
    Completed,
    /// A previous call already completed it
    AlreadyCompleted,
    /// The session was reported abandoned first
    Abandoned,
}

/// Session row store over `tracked_sessions`
#[derive(Clone)]
pub struct SessionStore {
    db: SqlitePool,
    duplicate_policy: DuplicatePolicy,
}

impl SessionStore {
    pub fn new(db: SqlitePool, duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            db,
            duplicate_policy,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    /// Record a heartbeat
    ///
    /// Creates the row on first sight; otherwise bumps `last_seen`, keeps the
    /// highest `step`, fills `response_id`, and fills `uuid`/`custom_id` only if
    /// still unset. Terminal rows are never touched.
    pub async fn upsert(&self, now: DateTime<Utc>, hb: &Heartbeat) -> Result<UpsertOutcome> {
        let key = hb.correlation_key();
        let now_ms = to_millis(now);

        let existed: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tracked_sessions WHERE correlation_key = ?)")
                .bind(&key)
                .fetch_one(&self.db)
                .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO tracked_sessions (
                correlation_key, survey_id, response_id, step, started_at, last_seen,
                uuid, custom_id, transport_session_id
            ) VALUES (?, ?, ?, COALESCE(?, 0), ?, ?, ?, ?, ?)
            ON CONFLICT(correlation_key) DO UPDATE SET
                last_seen = excluded.last_seen,
                step = MAX(tracked_sessions.step, excluded.step),
                response_id = COALESCE(excluded.response_id, tracked_sessions.response_id),
                uuid = COALESCE(tracked_sessions.uuid, excluded.uuid),
                custom_id = COALESCE(tracked_sessions.custom_id, excluded.custom_id),
                transport_session_id = COALESCE(tracked_sessions.transport_session_id, excluded.transport_session_id)
            WHERE tracked_sessions.abandoned_sent = 0 AND tracked_sessions.completed = 0
            "#,
        )
        .bind(&key)
        .bind(hb.survey_id)
        .bind(hb.response_id)
        .bind(hb.step)
        .bind(now_ms)
        .bind(now_ms)
        .bind(&hb.uuid)
        .bind(&hb.custom_id)
        .bind(&hb.transport_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            let state = self
                .find_by_key(&key)
                .await?
                .map(|r| r.state())
                .unwrap_or(SessionState::Abandoned);
            info!(correlation_key = %key, ?state, "Heartbeat ignored for terminal session");
            return Ok(UpsertOutcome::IgnoredTerminal(state));
        }

        if self.duplicate_policy == DuplicatePolicy::Collapse {
            if let Err(e) = self
                .delete_siblings(hb.survey_id, &hb.transport_id, &key)
                .await
            {
                warn!(correlation_key = %key, "Duplicate cleanup failed: {}", e);
            }
        }

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    /// Delete other non-terminal rows of the same survey and transport session
    async fn delete_siblings(&self, survey_id: i64, transport_id: &str, key: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tracked_sessions
            WHERE survey_id = ?
              AND transport_session_id = ?
              AND correlation_key <> ?
              AND completed = 0
              AND abandoned_sent = 0
            "#,
        )
        .bind(survey_id)
        .bind(transport_id)
        .bind(key)
        .execute(&self.db)
        .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!(correlation_key = %key, removed, "Removed duplicate session rows");
        }
        Ok(removed)
    }

    /// Move a session to completed
    ///
    /// Safe under double submits: only the call that performs the transition
    /// gets [`CompletionOutcome::Completed`]. A session never seen before is
    /// recorded directly as completed.
    pub async fn mark_completed(&self, now: DateTime<Utc>, hb: &Heartbeat) -> Result<CompletionOutcome> {
        let key = hb.correlation_key();
        let now_ms = to_millis(now);

        // A concurrent first heartbeat can slip in between the statements below
        for _ in 0..3 {
            let result = sqlx::query(
                r#"
                UPDATE tracked_sessions
                SET completed = 1,
                    last_seen = ?,
                    response_id = COALESCE(?, response_id)
                WHERE correlation_key = ? AND completed = 0 AND abandoned_sent = 0
                "#,
            )
            .bind(now_ms)
            .bind(hb.response_id)
            .bind(&key)
            .execute(&self.db)
            .await?;

            if result.rows_affected() == 1 {
                return Ok(CompletionOutcome::Completed);
            }

            match self.find_by_key(&key).await? {
                Some(row) if row.abandoned_sent => return Ok(CompletionOutcome::Abandoned),
                Some(row) if row.completed => {
                    sqlx::query(
                        "UPDATE tracked_sessions SET last_seen = ? WHERE id = ? AND abandoned_sent = 0",
                    )
                    .bind(now_ms)
                    .bind(row.id)
                    .execute(&self.db)
                    .await?;
                    return Ok(CompletionOutcome::AlreadyCompleted);
                }
                Some(_) => continue,
                None => {
                    let inserted = sqlx::query(
                        r#"
                        INSERT OR IGNORE INTO tracked_sessions (
                            correlation_key, survey_id, response_id, step, started_at, last_seen,
                            completed, uuid, custom_id, transport_session_id
                        ) VALUES (?, ?, ?, COALESCE(?, 0), ?, ?, 1, ?, ?, ?)
                        "#,
                    )
                    .bind(&key)
                    .bind(hb.survey_id)
                    .bind(hb.response_id)
                    .bind(hb.step)
                    .bind(now_ms)
                    .bind(now_ms)
                    .bind(&hb.uuid)
                    .bind(&hb.custom_id)
                    .bind(&hb.transport_id)
                    .execute(&self.db)
                    .await?;

                    if inserted.rows_affected() == 1 {
                        return Ok(CompletionOutcome::Completed);
                    }
                }
            }
        }

        warn!(correlation_key = %key, "Completion raced with concurrent heartbeats, treating as already completed");
        Ok(CompletionOutcome::AlreadyCompleted)
    }

    /// Claim the exclusive right to report `row_id` as abandoned
    ///
    /// Returns true only for the single caller whose update flipped the flag.
    pub async fn claim_abandoned(&self, now: DateTime<Utc>, row_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tracked_sessions SET abandoned_sent = 1, abandoned_sent_at = ?
             WHERE id = ? AND abandoned_sent = 0",
        )
        .bind(to_millis(now))
        .bind(row_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// After a won claim, mark every other open row of the same logical session
    ///
    /// Under [`DuplicatePolicy::Collapse`] rows match by transport id, response
    /// id, or exact correlation key. Under [`DuplicatePolicy::Keep`] each tab is
    /// its own session: sibling tabs on the claimed transport stay open, and only
    /// rows of the same response on other transports are marked.
    pub async fn cascade_mark_abandoned(&self, now: DateTime<Utc>, claimed: &SessionRecord) -> Result<u64> {
        let transport = claimed.transport_id();
        let query = match self.duplicate_policy {
            DuplicatePolicy::Collapse => sqlx::query(
                r#"
                UPDATE tracked_sessions
                SET abandoned_sent = 1, abandoned_sent_at = ?
                WHERE survey_id = ?
                  AND id <> ?
                  AND abandoned_sent = 0
                  AND completed = 0
                  AND (
                        transport_session_id = ?
                     OR (? IS NOT NULL AND response_id = ?)
                     OR correlation_key = ?
                  )
                "#,
            ),
            DuplicatePolicy::Keep => sqlx::query(
                r#"
                UPDATE tracked_sessions
                SET abandoned_sent = 1, abandoned_sent_at = ?
                WHERE survey_id = ?
                  AND id <> ?
                  AND abandoned_sent = 0
                  AND completed = 0
                  AND (
                        (? IS NOT NULL AND response_id = ?
                         AND COALESCE(transport_session_id, '') <> ?)
                     OR correlation_key = ?
                  )
                "#,
            ),
        };

        let query = query
            .bind(to_millis(now))
            .bind(claimed.survey_id)
            .bind(claimed.id);
        let query = match self.duplicate_policy {
            DuplicatePolicy::Collapse => query
                .bind(&transport)
                .bind(claimed.response_id)
                .bind(claimed.response_id),
            DuplicatePolicy::Keep => query
                .bind(claimed.response_id)
                .bind(claimed.response_id)
                .bind(&transport),
        };
        let result = query
            .bind(&claimed.correlation_key)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    /// True while any survey still has an open row on `transport_id`
    pub async fn has_open_rows(&self, transport_id: &str) -> Result<bool> {
        let open: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM tracked_sessions
             WHERE transport_session_id = ? AND completed = 0 AND abandoned_sent = 0)",
        )
        .bind(transport_id)
        .fetch_one(&self.db)
        .await?;
        Ok(open)
    }

    pub async fn find_by_key(&self, correlation_key: &str) -> Result<Option<SessionRecord>> {
        let sql = format!(
            "SELECT {} FROM tracked_sessions WHERE correlation_key = ?",
            SESSION_COLUMNS
        );
        let row = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(correlation_key)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    pub async fn get(&self, id: i64) -> Result<Option<SessionRecord>> {
        let sql = format!("SELECT {} FROM tracked_sessions WHERE id = ?", SESSION_COLUMNS);
        let row = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    /// Most recent row of a transport session within a survey
    pub async fn latest_for_transport(
        &self,
        survey_id: i64,
        transport_id: &str,
    ) -> Result<Option<SessionRecord>> {
        let sql = format!(
            "SELECT {} FROM tracked_sessions
             WHERE survey_id = ? AND transport_session_id = ?
             ORDER BY id DESC LIMIT 1",
            SESSION_COLUMNS
        );
        let row = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(survey_id)
            .bind(transport_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    /// Best abandonment candidate per group
    ///
    /// A group is a (survey, transport session) pair, or a single correlation
    /// key under [`DuplicatePolicy::Keep`]. Candidates are open rows past
    /// `cutoff` with `step > 0`. Within a group the winner has a response id,
    /// then the highest step, then the latest `last_seen`, then the highest id.
    pub async fn abandonment_candidates(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionRecord>> {
        let group = match self.duplicate_policy {
            DuplicatePolicy::Collapse => {
                "s.survey_id, COALESCE(s.transport_session_id, s.correlation_key)"
            }
            DuplicatePolicy::Keep => "s.correlation_key",
        };
        let sql = format!(
            r#"
            SELECT {cols} FROM (
                SELECT s.*, ROW_NUMBER() OVER (
                    PARTITION BY {group}
                    ORDER BY (s.response_id IS NOT NULL) DESC, s.step DESC, s.last_seen DESC, s.id DESC
                ) AS rn
                FROM tracked_sessions s
                WHERE s.completed = 0
                  AND s.abandoned_sent = 0
                  AND s.last_seen < ?
                  AND s.step > 0
            ) x
            WHERE x.rn = 1
            ORDER BY x.id
            "#,
            cols = SESSION_COLUMNS,
            group = group
        );
        let rows = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(to_millis(cutoff))
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use svtk_common::db::init_memory_database;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()
    }

    fn hb(step: Option<i64>) -> Heartbeat {
        Heartbeat {
            survey_id: 12,
            transport_id: "tx1".to_string(),
            step,
            ..Heartbeat::default()
        }
    }

    async fn store(policy: DuplicatePolicy) -> SessionStore {
        SessionStore::new(init_memory_database().await.unwrap(), policy)
    }

    #[test]
    fn test_correlation_key_format() {
        assert_eq!(correlation_key(12, "abc", None), "survey_12_abc");
        assert_eq!(correlation_key(12, "abc", Some(" ")), "survey_12_abc");
        assert_eq!(correlation_key(12, "abc", Some("t2")), "survey_12_abc_t2");
    }

    #[tokio::test]
    async fn test_step_is_monotonic() {
        let store = store(DuplicatePolicy::Collapse).await;
        let steps = [1, 3, 2, 5, 4, 0];
        let mut max_seen = 0;

        for (i, step) in steps.iter().enumerate() {
            store
                .upsert(t0() + Duration::seconds(i as i64), &hb(Some(*step)))
                .await
                .unwrap();
            let row = store.find_by_key("survey_12_tx1").await.unwrap().unwrap();
            max_seen = max_seen.max(*step);
            assert_eq!(row.step, max_seen);
        }
    }

    #[tokio::test]
    async fn test_upsert_without_step_keeps_step() {
        let store = store(DuplicatePolicy::Collapse).await;
        assert_eq!(
            store.upsert(t0(), &hb(Some(3))).await.unwrap(),
            UpsertOutcome::Created
        );
        assert_eq!(
            store.upsert(t0(), &hb(None)).await.unwrap(),
            UpsertOutcome::Updated
        );
        let row = store.find_by_key("survey_12_tx1").await.unwrap().unwrap();
        assert_eq!(row.step, 3);
    }

    #[tokio::test]
    async fn test_identifiers_fill_only_when_unset() {
        let store = store(DuplicatePolicy::Collapse).await;
        let mut first = hb(Some(1));
        first.uuid = Some("u-1".to_string());
        store.upsert(t0(), &first).await.unwrap();

        let mut second = hb(Some(2));
        second.uuid = Some("u-2".to_string());
        second.custom_id = Some("c-9".to_string());
        second.response_id = Some(44);
        store.upsert(t0(), &second).await.unwrap();

        let row = store.find_by_key("survey_12_tx1").await.unwrap().unwrap();
        assert_eq!(row.uuid.as_deref(), Some("u-1"));
        assert_eq!(row.custom_id.as_deref(), Some("c-9"));
        assert_eq!(row.response_id, Some(44));
    }

    #[tokio::test]
    async fn test_abandoned_row_ignores_heartbeats() {
        let store = store(DuplicatePolicy::Collapse).await;
        store.upsert(t0(), &hb(Some(2))).await.unwrap();
        let before = store.find_by_key("survey_12_tx1").await.unwrap().unwrap();
        assert!(store.claim_abandoned(t0(), before.id).await.unwrap());

        let mut late = hb(Some(7));
        late.response_id = Some(99);
        let outcome = store
            .upsert(t0() + Duration::minutes(10), &late)
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::IgnoredTerminal(SessionState::Abandoned));

        let after = store.find_by_key("survey_12_tx1").await.unwrap().unwrap();
        assert_eq!(after.step, before.step);
        assert_eq!(after.last_seen, before.last_seen);
        assert_eq!(after.response_id, before.response_id);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = store(DuplicatePolicy::Collapse).await;
        store.upsert(t0(), &hb(Some(1))).await.unwrap();
        let row = store.find_by_key("survey_12_tx1").await.unwrap().unwrap();

        assert!(store.claim_abandoned(t0(), row.id).await.unwrap());
        assert!(!store.claim_abandoned(t0(), row.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_collapse_removes_sibling_rows() {
        let store = store(DuplicatePolicy::Collapse).await;
        let mut tab_a = hb(Some(1));
        tab_a.tab_id = Some("a".to_string());
        let mut tab_b = hb(Some(1));
        tab_b.tab_id = Some("b".to_string());

        store.upsert(t0(), &tab_a).await.unwrap();
        store.upsert(t0(), &tab_b).await.unwrap();

        assert!(store.find_by_key("survey_12_tx1_a").await.unwrap().is_none());
        assert!(store.find_by_key("survey_12_tx1_b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_keep_policy_tracks_tabs_separately() {
        let store = store(DuplicatePolicy::Keep).await;
        let mut tab_a = hb(Some(1));
        tab_a.tab_id = Some("a".to_string());
        let mut tab_b = hb(Some(1));
        tab_b.tab_id = Some("b".to_string());

        store.upsert(t0(), &tab_a).await.unwrap();
        store.upsert(t0(), &tab_b).await.unwrap();

        assert!(store.find_by_key("survey_12_tx1_a").await.unwrap().is_some());
        assert!(store.find_by_key("survey_12_tx1_b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mark_completed_transitions_once() {
        let store = store(DuplicatePolicy::Collapse).await;
        store.upsert(t0(), &hb(Some(3))).await.unwrap();

        assert_eq!(
            store.mark_completed(t0(), &hb(None)).await.unwrap(),
            CompletionOutcome::Completed
        );
        assert_eq!(
            store.mark_completed(t0(), &hb(None)).await.unwrap(),
            CompletionOutcome::AlreadyCompleted
        );

        let row = store.find_by_key("survey_12_tx1").await.unwrap().unwrap();
        assert!(row.completed);
        assert_eq!(
            store.upsert(t0(), &hb(Some(9))).await.unwrap(),
            UpsertOutcome::IgnoredTerminal(SessionState::Completed)
        );
    }

    #[tokio::test]
    async fn test_mark_completed_records_untracked_session() {
        let store = store(DuplicatePolicy::Collapse).await;
        assert_eq!(
            store.mark_completed(t0(), &hb(None)).await.unwrap(),
            CompletionOutcome::Completed
        );
        let row = store.find_by_key("survey_12_tx1").await.unwrap().unwrap();
        assert!(row.completed);
    }

    #[tokio::test]
    async fn test_mark_completed_after_abandon() {
        let store = store(DuplicatePolicy::Collapse).await;
        store.upsert(t0(), &hb(Some(3))).await.unwrap();
        let row = store.find_by_key("survey_12_tx1").await.unwrap().unwrap();
        store.claim_abandoned(t0(), row.id).await.unwrap();

        assert_eq!(
            store.mark_completed(t0(), &hb(None)).await.unwrap(),
            CompletionOutcome::Abandoned
        );
    }

    /// Collapse-policy view over rows seeded with per-tab keys
    fn collapsed(store: &SessionStore) -> SessionStore {
        SessionStore::new(store.pool().clone(), DuplicatePolicy::Collapse)
    }

    #[tokio::test]
    async fn test_candidate_tie_breaks() {
        let seeded = store(DuplicatePolicy::Keep).await;
        let store = collapsed(&seeded);

        // Three rows on one transport session; the one with a response id wins
        // even though another has a higher step
        let mut a = hb(Some(5));
        a.tab_id = Some("a".to_string());
        let mut b = hb(Some(2));
        b.tab_id = Some("b".to_string());
        b.response_id = Some(7);
        let mut c = hb(Some(1));
        c.tab_id = Some("c".to_string());
        // Step 0 rows are never candidates
        let mut other = hb(Some(0));
        other.transport_id = "tx2".to_string();

        for row in [&a, &b, &c, &other] {
            store.upsert(t0(), row).await.unwrap();
        }

        let candidates = store
            .abandonment_candidates(t0() + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].correlation_key, "survey_12_tx1_b");

        // Not yet past the cutoff
        assert!(store.abandonment_candidates(t0()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cascade_marks_related_rows() {
        let seeded = store(DuplicatePolicy::Keep).await;
        let store = collapsed(&seeded);
        let mut a = hb(Some(2));
        a.tab_id = Some("a".to_string());
        a.response_id = Some(7);
        let mut b = hb(Some(1));
        b.tab_id = Some("b".to_string());
        // Same response on a different transport session
        let mut c = hb(Some(1));
        c.transport_id = "tx9".to_string();
        c.response_id = Some(7);
        // Unrelated
        let mut d = hb(Some(1));
        d.transport_id = "tx3".to_string();

        for row in [&a, &b, &c, &d] {
            store.upsert(t0(), row).await.unwrap();
        }

        let winner = store.find_by_key("survey_12_tx1_a").await.unwrap().unwrap();
        assert!(store.claim_abandoned(t0(), winner.id).await.unwrap());
        let cascaded = store.cascade_mark_abandoned(t0(), &winner).await.unwrap();
        assert_eq!(cascaded, 2);

        let unrelated = store.find_by_key("survey_12_tx3").await.unwrap().unwrap();
        assert!(!unrelated.abandoned_sent);
    }

    #[tokio::test]
    async fn test_keep_policy_scans_tabs_independently() {
        let store = store(DuplicatePolicy::Keep).await;
        let mut idle = hb(Some(2));
        idle.tab_id = Some("a".to_string());
        let mut active = hb(Some(1));
        active.tab_id = Some("b".to_string());

        store.upsert(t0(), &idle).await.unwrap();
        store.upsert(t0() + Duration::seconds(10), &active).await.unwrap();
        store.upsert(t0() + Duration::seconds(220), &active).await.unwrap();

        let candidates = store
            .abandonment_candidates(t0() + Duration::minutes(4))
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].correlation_key, "survey_12_tx1_a");

        let winner = &candidates[0];
        assert!(store.claim_abandoned(t0(), winner.id).await.unwrap());
        assert_eq!(store.cascade_mark_abandoned(t0(), winner).await.unwrap(), 0);

        let other_tab = store.find_by_key("survey_12_tx1_b").await.unwrap().unwrap();
        assert!(!other_tab.abandoned_sent);
        assert!(store.has_open_rows("tx1").await.unwrap());
    }

    #[tokio::test]
    async fn test_keep_policy_cascades_same_response_elsewhere() {
        let store = store(DuplicatePolicy::Keep).await;
        let mut a = hb(Some(2));
        a.tab_id = Some("a".to_string());
        a.response_id = Some(7);
        let mut b = hb(Some(2));
        b.tab_id = Some("b".to_string());
        b.response_id = Some(7);
        let mut moved = hb(Some(1));
        moved.transport_id = "tx9".to_string();
        moved.response_id = Some(7);

        for row in [&a, &b, &moved] {
            store.upsert(t0(), row).await.unwrap();
        }

        let winner = store.find_by_key("survey_12_tx1_a").await.unwrap().unwrap();
        assert!(store.claim_abandoned(t0(), winner.id).await.unwrap());
        assert_eq!(store.cascade_mark_abandoned(t0(), &winner).await.unwrap(), 1);

        assert!(store.find_by_key("survey_12_tx9").await.unwrap().unwrap().abandoned_sent);
        assert!(!store.find_by_key("survey_12_tx1_b").await.unwrap().unwrap().abandoned_sent);
    }

    #[tokio::test]
    async fn test_latest_for_transport() {
        let store = store(DuplicatePolicy::Keep).await;
        let mut a = hb(Some(1));
        a.tab_id = Some("a".to_string());
        let mut b = hb(Some(1));
        b.tab_id = Some("b".to_string());
        store.upsert(t0(), &a).await.unwrap();
        store.upsert(t0(), &b).await.unwrap();

        let latest = store.latest_for_transport(12, "tx1").await.unwrap().unwrap();
        assert_eq!(latest.correlation_key, "survey_12_tx1_b");
        assert!(store.latest_for_transport(12, "nope").await.unwrap().is_none());
    }
}
