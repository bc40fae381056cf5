//! The clarification queue driver.
//!
//! Per clarifier, one round is: prompt → (pick one of several) → collect the
//! clarification → analyze → tell the requester → excise the request. Rounds
//! repeat until nothing unresolved is left. Silence at either wait removes
//! the affected requests after telling their requesters, so a quiet clarifier
//! never wedges the queue.

use crate::collector::{CollectOptions, ReplyCollector};
use crate::error::{ClarifyError, Stage};
use crate::messages;
use crate::request::ClarificationRequest;
use crate::store::{ClarificationQueue, ClarificationQueueStore};
use crate::traits::{DirectChannel, ToneAnalyzer};
use std::sync::Arc;
use std::time::Duration;
use vibe_channels::{MessageId, UserId};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Bound on each wait for a clarifier reply.
    pub reply_timeout: Duration,
    /// Tone reported when analysis fails or comes back empty.
    pub fallback_tone: String,
    /// Thank the clarifier after their answer is delivered.
    pub acknowledge_clarifier: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(60),
            fallback_tone: "Neutral".to_string(),
            acknowledge_clarifier: true,
        }
    }
}

/// What one driver run did before the queue drained.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub rounds: usize,
    pub resolved: Vec<ClarificationRequest>,
    pub timed_out: Vec<ClarificationRequest>,
    pub undeliverable: Vec<ClarificationRequest>,
}

#[derive(Debug, Clone)]
pub enum QueueRun {
    /// Another driver owns this clarifier; it will pick up new requests.
    Busy,
    /// This call drove the queue until nothing unresolved was left.
    Completed(RunSummary),
}

impl QueueRun {
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            QueueRun::Busy => None,
            QueueRun::Completed(summary) => Some(summary),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    /// False when an unresolved request for the same message already existed.
    pub inserted: bool,
    pub run: QueueRun,
}

pub struct ClarificationEngine {
    store: ClarificationQueueStore,
    direct: Arc<dyn DirectChannel>,
    analyzer: Arc<dyn ToneAnalyzer>,
    settings: EngineSettings,
}

impl ClarificationEngine {
    pub fn new(
        store: ClarificationQueueStore,
        direct: Arc<dyn DirectChannel>,
        analyzer: Arc<dyn ToneAnalyzer>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            direct,
            analyzer,
            settings,
        }
    }

    pub fn store(&self) -> &ClarificationQueueStore {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Append without driving. Returns false for a duplicate unresolved request.
    pub fn enqueue(&self, request: ClarificationRequest) -> bool {
        self.store.get_queue(&request.clarifier_id).push(request)
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(clarifier_id = %clarifier_id, message_id = %message_id)
    )]
    pub async fn enqueue_and_process(
        &self,
        clarifier_id: UserId,
        requester_id: UserId,
        message_id: MessageId,
        content: impl Into<String>,
    ) -> EnqueueOutcome {
        let request =
            ClarificationRequest::new(clarifier_id.clone(), requester_id, message_id, content);
        let inserted = self.enqueue(request);
        if !inserted {
            tracing::debug!("clarification already pending for this message");
        }
        let run = self.process_queue(&clarifier_id).await;
        EnqueueOutcome { inserted, run }
    }

    /// Drive the clarifier's queue until it has nothing unresolved. Returns
    /// `Busy` immediately if a driver is already active for this clarifier.
    #[tracing::instrument(level = "info", skip_all, fields(clarifier_id = %clarifier_id))]
    pub async fn process_queue(&self, clarifier_id: &UserId) -> QueueRun {
        let queue = self.store.get_queue(clarifier_id);
        let Some(mut lease) = queue.try_acquire_driver() else {
            tracing::debug!("clarification driver already active");
            return QueueRun::Busy;
        };

        let mut summary = RunSummary::default();
        loop {
            // Let requests arriving in the same burst join this round.
            tokio::task::yield_now().await;
            let Some(pending) = lease.next_pending() else {
                break;
            };
            summary.rounds += 1;
            tracing::debug!(pending = pending.len(), round = summary.rounds, "clarification round");
            self.run_round(&queue, pending, &mut summary).await;
        }

        tracing::info!(
            rounds = summary.rounds,
            resolved = summary.resolved.len(),
            timed_out = summary.timed_out.len(),
            undeliverable = summary.undeliverable.len(),
            "clarification queue drained"
        );
        QueueRun::Completed(summary)
    }

    async fn run_round(
        &self,
        queue: &ClarificationQueue,
        pending: Vec<ClarificationRequest>,
        summary: &mut RunSummary,
    ) {
        let clarifier_id = queue.clarifier_id();
        let options = CollectOptions::within(self.settings.reply_timeout);

        if let [only] = pending.as_slice() {
            let collector = match self
                .open_and_prompt(clarifier_id, options.max_messages(1), &messages::single_prompt(only))
                .await
            {
                Ok(collector) => collector,
                Err(e) => return self.abandon(queue, &pending, e, summary).await,
            };
            return self.finish_request(queue, only, collector, summary).await;
        }

        let mut selection = match self
            .open_and_prompt(clarifier_id, options, &messages::list_prompt(&pending))
            .await
        {
            Ok(collector) => collector,
            Err(e) => return self.abandon(queue, &pending, e, summary).await,
        };
        let chosen = match self
            .await_selection(&mut selection, clarifier_id, pending.len())
            .await
        {
            Ok(idx) => &pending[idx],
            Err(e) => return self.abandon(queue, &pending, e, summary).await,
        };
        drop(selection);

        let collector = match self
            .open_and_prompt(clarifier_id, options.max_messages(1), &messages::selected(chosen))
            .await
        {
            Ok(collector) => collector,
            Err(e) => return self.abandon(queue, std::slice::from_ref(chosen), e, summary).await,
        };
        self.finish_request(queue, chosen, collector, summary).await;
    }

    /// Subscribe first, then prompt, so an instant reply is never missed.
    async fn open_and_prompt(
        &self,
        clarifier_id: &UserId,
        options: CollectOptions,
        prompt: &str,
    ) -> Result<ReplyCollector, ClarifyError> {
        let mut collector = self
            .direct
            .collect(clarifier_id, options)
            .await
            .map_err(|e| ClarifyError::delivery(clarifier_id, &e))?;
        if let Err(e) = self.direct.send(clarifier_id, prompt).await {
            collector.stop();
            return Err(ClarifyError::delivery(clarifier_id, &e));
        }
        Ok(collector)
    }

    /// Keep listening until a valid 1-based index arrives or the deadline passes.
    async fn await_selection(
        &self,
        collector: &mut ReplyCollector,
        clarifier_id: &UserId,
        count: usize,
    ) -> Result<usize, ClarifyError> {
        while let Some(reply) = collector.next().await {
            match messages::parse_selection(&reply.content, count) {
                Ok(idx) => {
                    collector.stop();
                    return Ok(idx);
                }
                Err(e) => {
                    tracing::debug!(%e, "rejected selection reply");
                    self.direct
                        .send(clarifier_id, &messages::invalid_selection(count))
                        .await
                        .map_err(|e| ClarifyError::delivery(clarifier_id, &e))?;
                }
            }
        }
        Err(ClarifyError::NoResponse {
            clarifier_id: clarifier_id.clone(),
            stage: Stage::Selection,
        })
    }

    async fn finish_request(
        &self,
        queue: &ClarificationQueue,
        request: &ClarificationRequest,
        mut collector: ReplyCollector,
        summary: &mut RunSummary,
    ) {
        let Some(reply) = collector.next().await else {
            let e = ClarifyError::NoResponse {
                clarifier_id: queue.clarifier_id().clone(),
                stage: Stage::Clarification,
            };
            return self
                .abandon(queue, std::slice::from_ref(request), e, summary)
                .await;
        };
        collector.stop();

        let tone = self.analyze(&reply.content).await;
        self.notify_requester(request, &messages::tone_result(request, &tone))
            .await;
        if let Some(resolved) = queue.resolve(&request.message_id) {
            tracing::info!(message_id = %resolved.message_id, tone = %tone, "clarification resolved");
            summary.resolved.push(resolved);
        }

        if self.settings.acknowledge_clarifier {
            if let Err(e) = self
                .direct
                .send(queue.clarifier_id(), messages::CLARIFIER_THANKS)
                .await
            {
                tracing::warn!(%e, "could not acknowledge clarifier");
            }
        }
    }

    /// Drop requests that cannot progress and tell each requester why.
    async fn abandon(
        &self,
        queue: &ClarificationQueue,
        requests: &[ClarificationRequest],
        reason: ClarifyError,
        summary: &mut RunSummary,
    ) {
        tracing::warn!(%reason, affected = requests.len(), "abandoning clarification requests");
        let timed_out = matches!(reason, ClarifyError::NoResponse { .. });
        let notice = if timed_out {
            messages::NO_RESPONSE
        } else {
            messages::DELIVERY_FAILED
        };
        for request in requests {
            let Some(removed) = queue.remove(&request.message_id) else {
                continue;
            };
            self.notify_requester(&removed, notice).await;
            if timed_out {
                summary.timed_out.push(removed);
            } else {
                summary.undeliverable.push(removed);
            }
        }
    }

    async fn analyze(&self, text: &str) -> String {
        let failure = match self.analyzer.analyze(text).await {
            Ok(tone) if !tone.trim().is_empty() => return tone.trim().to_string(),
            Ok(_) => ClarifyError::Analysis("empty tone label".to_string()),
            Err(e) => ClarifyError::Analysis(format!("{e:#}")),
        };
        tracing::warn!(%failure, fallback = %self.settings.fallback_tone, "using fallback tone");
        self.settings.fallback_tone.clone()
    }

    async fn notify_requester(&self, request: &ClarificationRequest, text: &str) {
        if let Err(e) = self.direct.send(&request.requester_id, text).await {
            let e = ClarifyError::delivery(&request.requester_id, &e);
            tracing::warn!(%e, message_id = %request.message_id, "could not notify requester");
        }
    }
}
