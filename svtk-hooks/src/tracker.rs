//! Hook-point handlers
//!
//! Each hook loads the transport session context, runs the self-scan and then
//! the guard, updates the session row, and emits events. Failures are logged
//! and never reach the survey engine: every hook returns a response.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use svtk_common::config::TrackingConfig;
use svtk_common::events::EventPayload;
use svtk_common::time::{from_millis, now, to_millis};
use svtk_common::uuid_utils::new_transport_id;
use svtk_common::{Error, Result};
use tracing::{debug, error, info, warn};

use crate::assembler::{self, EventSource};
use crate::decoder::{AnswerDecoder, QuestionCatalog};
use crate::dispatch::ChannelDispatcher;
use crate::scanner::AbandonmentScanner;
use crate::session::{
    CompletionOutcome, GuardEnforcer, Heartbeat, SessionContext, SessionStore,
    SqliteTransportSessions, TransportSessions, UpsertOutcome,
};

/// A survey page is about to be shown
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageViewRequest {
    #[serde(default)]
    pub transport_session_id: Option<String>,
    pub survey_id: i64,
    #[serde(default)]
    pub step: Option<i64>,
    #[serde(default)]
    pub response_id: Option<i64>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub tab_id: Option<String>,
}

/// A page form was posted back; `step` is the page now being entered
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostBackRequest {
    #[serde(default)]
    pub transport_session_id: Option<String>,
    #[serde(default)]
    pub survey_id: Option<i64>,
    #[serde(default)]
    pub step: Option<i64>,
    #[serde(default)]
    pub response_id: Option<i64>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub tab_id: Option<String>,
}

/// The survey was submitted; `fields` holds the stored response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteRequest {
    #[serde(default)]
    pub transport_session_id: Option<String>,
    pub survey_id: i64,
    #[serde(default)]
    pub response_id: Option<i64>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub tab_id: Option<String>,
}

/// Answer to every hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResponse {
    /// Id the engine must use from now on (changes after a reset)
    pub transport_session_id: String,
    /// True when the engine must drop its own state for the survey
    pub reset: bool,
    /// Names of the events emitted by this hook
    pub events: Vec<String>,
}

#[derive(Default)]
struct HookOutcome {
    reset: bool,
    events: Vec<String>,
}

pub struct Tracker {
    store: SessionStore,
    transports: Arc<dyn TransportSessions>,
    guard: GuardEnforcer,
    scanner: AbandonmentScanner,
    dispatcher: ChannelDispatcher,
    catalog: Arc<dyn QuestionCatalog>,
    started_debounce: Duration,
}

impl Tracker {
    pub fn new(
        db: SqlitePool,
        catalog: Arc<dyn QuestionCatalog>,
        dispatcher: ChannelDispatcher,
        tracking: &TrackingConfig,
    ) -> Self {
        let store = SessionStore::new(db.clone(), tracking.duplicate_rows);
        let transports: Arc<dyn TransportSessions> = Arc::new(SqliteTransportSessions::new(db));
        let guard = GuardEnforcer::new(store.clone(), Arc::clone(&transports));
        let scanner = AbandonmentScanner::new(
            store.clone(),
            Arc::clone(&transports),
            dispatcher.clone(),
            tracking,
        );

        Self {
            store,
            transports,
            guard,
            scanner,
            dispatcher,
            catalog,
            started_debounce: Duration::seconds(tracking.started_debounce_seconds as i64),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn transports(&self) -> &Arc<dyn TransportSessions> {
        &self.transports
    }

    pub fn scanner(&self) -> &AbandonmentScanner {
        &self.scanner
    }

    pub async fn page_view(&self, req: PageViewRequest) -> HookResponse {
        self.page_view_at(req, now()).await
    }

    pub async fn post_back(&self, req: PostBackRequest) -> HookResponse {
        self.post_back_at(req, now()).await
    }

    pub async fn complete(&self, req: CompleteRequest) -> HookResponse {
        self.complete_at(req, now()).await
    }

    pub async fn page_view_at(&self, req: PageViewRequest, now: DateTime<Utc>) -> HookResponse {
        let mut ctx = self.open_context(req.transport_session_id.as_deref()).await;
        let mut outcome = HookOutcome::default();

        if let Err(e) = self.handle_page_view(&mut ctx, &req, now, &mut outcome).await {
            error!(survey_id = req.survey_id, transport = %ctx.transport_id, "Page view hook failed: {}", e);
        }
        self.finish(ctx, outcome).await
    }

    pub async fn post_back_at(&self, req: PostBackRequest, now: DateTime<Utc>) -> HookResponse {
        let mut ctx = self.open_context(req.transport_session_id.as_deref()).await;
        let mut outcome = HookOutcome::default();

        if let Err(e) = self.handle_post_back(&mut ctx, &req, now, &mut outcome).await {
            error!(survey_id = ?req.survey_id, transport = %ctx.transport_id, "Post-back hook failed: {}", e);
        }
        self.finish(ctx, outcome).await
    }

    pub async fn complete_at(&self, req: CompleteRequest, now: DateTime<Utc>) -> HookResponse {
        let mut ctx = self.open_context(req.transport_session_id.as_deref()).await;
        let mut outcome = HookOutcome::default();

        if let Err(e) = self.handle_complete(&mut ctx, &req, now, &mut outcome).await {
            error!(survey_id = req.survey_id, transport = %ctx.transport_id, "Completion hook failed: {}", e);
        }
        self.finish(ctx, outcome).await
    }

    async fn open_context(&self, transport_id: Option<&str>) -> SessionContext {
        match self.transports.load_or_new(transport_id).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!("Transport session unavailable, starting empty: {}", e);
                let id = transport_id
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(new_transport_id);
                SessionContext::new(id)
            }
        }
    }

    async fn finish(&self, ctx: SessionContext, outcome: HookOutcome) -> HookResponse {
        if let Err(e) = self.transports.save(&ctx).await {
            warn!(transport = %ctx.transport_id, "Failed to save transport session: {}", e);
        }
        HookResponse {
            transport_session_id: ctx.transport_id,
            reset: outcome.reset,
            events: outcome.events,
        }
    }

    /// Self-scan ahead of the guard
    ///
    /// When the scan drops this request's own transport session, the request
    /// continues on a fresh one so the dropped context is never saved again.
    async fn self_scan(&self, ctx: &mut SessionContext, now: DateTime<Utc>, outcome: &mut HookOutcome) {
        let Some(report) = self.scanner.maybe_scan(now).await else {
            return;
        };
        if report.invalidated.iter().any(|t| *t == ctx.transport_id) {
            let old = std::mem::replace(ctx, SessionContext::new(new_transport_id()));
            outcome.reset = true;
            info!(
                old_transport = %old.transport_id,
                new_transport = %ctx.transport_id,
                "Transport session abandoned by this request's scan"
            );
        }
    }

    async fn run_guard(&self, ctx: &mut SessionContext, survey_id: i64, tab_id: Option<&str>) -> bool {
        match self.guard.enforce(ctx, survey_id, tab_id).await {
            Ok(reset) => reset,
            Err(e) => {
                warn!(survey_id, "Abandoned-session guard skipped: {}", e);
                false
            }
        }
    }

    async fn emit(&self, payload: EventPayload, outcome: &mut HookOutcome) {
        self.dispatcher.dispatch(&payload).await;
        outcome.events.push(payload.event_name().to_string());
    }

    async fn record_heartbeat(&self, now: DateTime<Utc>, hb: &Heartbeat) {
        match self.store.upsert(now, hb).await {
            Ok(UpsertOutcome::IgnoredTerminal(_)) | Ok(UpsertOutcome::Updated) => {}
            Ok(UpsertOutcome::Created) => debug!(correlation_key = %hb.correlation_key(), "Session tracked"),
            Err(e) if e.is_transient() => warn!("Heartbeat not recorded: {}", e),
            Err(e) => error!(correlation_key = %hb.correlation_key(), "Heartbeat failed: {}", e),
        }
    }

    async fn handle_page_view(
        &self,
        ctx: &mut SessionContext,
        req: &PageViewRequest,
        now: DateTime<Utc>,
        outcome: &mut HookOutcome,
    ) -> Result<()> {
        let survey_id = req.survey_id;
        self.self_scan(ctx, now, outcome).await;
        outcome.reset |= self.run_guard(ctx, survey_id, req.tab_id.as_deref()).await;

        let uuid = non_blank(req.uuid.as_deref());
        let custom_id = non_blank(req.custom_id.as_deref());
        let transport_id = ctx.transport_id.clone();
        let scope = ctx.scope_mut(survey_id);

        if uuid.is_some() {
            scope.uuid = uuid.clone();
        }
        if custom_id.is_some() {
            scope.custom_id = custom_id.clone();
        }
        if scope.start_time.is_none() {
            scope.start_time = Some(to_millis(now));
            scope.started_sent = false;
        }

        let fresh_start = !scope.started_sent && req.step.map_or(true, |s| s <= 1);
        if fresh_start {
            // Identifiers left over from an earlier run of this survey
            if uuid.is_none() {
                scope.uuid = None;
            }
            if custom_id.is_none() {
                scope.custom_id = None;
            }

            let debounced = scope
                .started_sent_at
                .map(|at| now - from_millis(at) < self.started_debounce)
                .unwrap_or(false);

            if debounced {
                debug!(survey_id, transport = %transport_id, "survey_started debounced");
            } else {
                scope.started_sent = true;
                scope.started_sent_at = Some(to_millis(now));
                let source = EventSource::from_scope(survey_id, &transport_id, req.response_id, scope);
                let payload = assembler::started(now, &source, req.step.unwrap_or(0));
                info!(survey_id, transport = %transport_id, step = ?req.step, "Survey started");
                self.emit(payload, outcome).await;
            }
        }

        let scope = ctx.scope_mut(survey_id);
        let hb = Heartbeat {
            survey_id,
            transport_id,
            tab_id: req.tab_id.clone(),
            response_id: req.response_id,
            step: Some(req.step.unwrap_or(0)),
            uuid: scope.uuid.clone(),
            custom_id: scope.custom_id.clone(),
        };
        self.record_heartbeat(now, &hb).await;
        Ok(())
    }

    async fn handle_post_back(
        &self,
        ctx: &mut SessionContext,
        req: &PostBackRequest,
        now: DateTime<Utc>,
        outcome: &mut HookOutcome,
    ) -> Result<()> {
        self.self_scan(ctx, now, outcome).await;

        let Some(survey_id) = req.survey_id else {
            debug!("Post-back without survey id ignored");
            return Ok(());
        };
        outcome.reset |= self.run_guard(ctx, survey_id, req.tab_id.as_deref()).await;

        let step = match req.step {
            Some(step) if step >= 1 => step,
            _ => {
                debug!(survey_id, step = ?req.step, "Post-back before the first page ignored");
                return Ok(());
            }
        };
        let submitted = step - 1;

        let mut decoder = AnswerDecoder::new(Arc::clone(&self.catalog));
        let answers = decoder.decode(survey_id, &req.fields).await;

        let transport_id = ctx.transport_id.clone();
        let scope = ctx.scope_mut(survey_id);
        if answers.is_empty() {
            debug!(survey_id, step_submitted = submitted, "No answers in post-back");
        } else {
            let source = EventSource::from_scope(survey_id, &transport_id, req.response_id, scope);
            let payload = assembler::page_submit(now, &source, submitted, answers);
            self.emit(payload, outcome).await;
        }

        let scope = ctx.scope_mut(survey_id);
        let hb = Heartbeat {
            survey_id,
            transport_id,
            tab_id: req.tab_id.clone(),
            response_id: req.response_id,
            step: Some(submitted),
            uuid: scope.uuid.clone(),
            custom_id: scope.custom_id.clone(),
        };
        self.record_heartbeat(now, &hb).await;
        Ok(())
    }

    async fn handle_complete(
        &self,
        ctx: &mut SessionContext,
        req: &CompleteRequest,
        now: DateTime<Utc>,
        outcome: &mut HookOutcome,
    ) -> Result<()> {
        let survey_id = req.survey_id;
        self.self_scan(ctx, now, outcome).await;
        outcome.reset |= self.run_guard(ctx, survey_id, req.tab_id.as_deref()).await;

        if outcome.reset {
            info!(survey_id, "Completion after abandonment ignored");
            return Ok(());
        }

        let transport_id = ctx.transport_id.clone();
        let scope = ctx.scope_mut(survey_id);
        let hb = Heartbeat {
            survey_id,
            transport_id: transport_id.clone(),
            tab_id: req.tab_id.clone(),
            response_id: req.response_id,
            step: None,
            uuid: scope.uuid.clone(),
            custom_id: scope.custom_id.clone(),
        };

        let transition = self.store.mark_completed(now, &hb).await?;

        match transition {
            CompletionOutcome::Completed => {}
            CompletionOutcome::AlreadyCompleted => {
                debug!(survey_id, transport = %transport_id, "Survey already completed");
                return Ok(());
            }
            CompletionOutcome::Abandoned => {
                info!(survey_id, transport = %transport_id, "Completion of an abandoned session ignored");
                return Ok(());
            }
        }

        if req.response_id.is_none() {
            let e = Error::InvalidInput("completion without response id".to_string());
            error!(survey_id, transport = %transport_id, "survey_completed not sent: {}", e);
            return Ok(());
        }

        let mut decoder = AnswerDecoder::new(Arc::clone(&self.catalog));
        let answers = decoder.decode(survey_id, &req.fields).await;

        let scope = ctx.scope_mut(survey_id);
        let source = EventSource::from_scope(survey_id, &transport_id, req.response_id, scope);
        let payload = assembler::completed(now, &source, answers);
        if let EventPayload::SurveyCompleted {
            duration_seconds, ..
        } = &payload
        {
            info!(survey_id, transport = %transport_id, duration_seconds = ?duration_seconds, "Survey completed");
        }
        scope.clear_after_completion();
        self.emit(payload, outcome).await;
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
