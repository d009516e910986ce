//! Per-model admission control.
//!
//! Each model id owns a lane: an `active` counter and a FIFO wait-list.
//! A caller is admitted straight away only when the lane has a free slot
//! *and* nobody is waiting; otherwise it parks on a one-shot grant. When a
//! call finishes, its slot is handed directly to the head of the wait-list,
//! so `active` never exceeds `max_concurrency` and nobody can jump the
//! queue. Waiters whose caller has gone away are skipped.

use super::mock;
use super::transport::ModelTransport;
use super::{ModelRequest, ModelResponse};
use crate::config::{ModelCategory, ModelConfig, ModelsConfig};
use crate::error::DocmillError;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct Lane {
    active: usize,
    limit: usize,
    waiting: VecDeque<Waiter>,
}

struct Waiter {
    id: String,
    category: ModelCategory,
    enqueued_at: Instant,
    grant: oneshot::Sender<()>,
}

impl Lane {
    /// Hand free slots to waiters, oldest first.
    fn drain(&mut self, model_id: &str) {
        while self.active < self.limit {
            let Some(waiter) = self.waiting.pop_front() else {
                break;
            };
            if waiter.grant.send(()).is_ok() {
                self.active += 1;
                info!(
                    event = "model.queue.process",
                    model_id,
                    category = %waiter.category,
                    request_id = %waiter.id,
                    waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64,
                    remaining = self.waiting.len(),
                    "processing queued request"
                );
            }
        }
    }
}

/// The request queue in front of every external model.
pub struct ModelService {
    config: RwLock<Arc<ModelsConfig>>,
    transport: Arc<dyn ModelTransport>,
    mock_dir: PathBuf,
    lanes: Mutex<HashMap<String, Lane>>,
}

impl fmt::Debug for ModelService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelService")
            .field("mock_dir", &self.mock_dir)
            .field("queue", &self.queue_status())
            .finish_non_exhaustive()
    }
}

impl ModelService {
    pub fn new(
        config: ModelsConfig,
        transport: Arc<dyn ModelTransport>,
        mock_dir: impl Into<PathBuf>,
    ) -> Self {
        info!(
            event = "model.service.init",
            categories = ModelCategory::ALL
                .iter()
                .filter(|c| !config.models(**c).is_empty())
                .count(),
            "model service initialised"
        );
        Self {
            config: RwLock::new(Arc::new(config)),
            transport,
            mock_dir: mock_dir.into(),
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<ModelsConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// First enabled model for `category`, in configuration order.
    pub fn select_model(&self, category: ModelCategory) -> Option<ModelConfig> {
        let config = self.config();
        let models = config.models(category);
        if models.is_empty() {
            warn!(event = "model.select.missing", %category, "no models configured for category");
            return None;
        }
        let chosen = config.first_enabled(category).cloned();
        if chosen.is_none() {
            warn!(event = "model.select.disabled", %category, "no enabled models for category");
        }
        chosen
    }

    /// Run `request` against the category's model, waiting for a slot if the
    /// model is at its concurrency ceiling.
    pub async fn call_model(
        &self,
        category: ModelCategory,
        request: &ModelRequest,
        trace_id: Option<&str>,
    ) -> Result<ModelResponse, DocmillError> {
        let model = self
            .select_model(category)
            .ok_or_else(|| DocmillError::ModelNotAvailable {
                category: category.to_string(),
            })?;
        let trace_id = trace_id.unwrap_or("-");

        let _slot = self.acquire(&model, category, trace_id).await?;

        info!(
            event = "model.request.start",
            model_id = %model.id,
            %category,
            provider = %model.provider,
            mocked = model.is_mocked(),
            active = self.active_count(&model.id),
            trace_id,
            "executing model request"
        );

        match timeout(model.timeout(), self.dispatch(&model, request)).await {
            Err(_) => {
                let err = DocmillError::ModelTimeout {
                    model_id: model.id.clone(),
                    timeout_ms: model.timeout,
                };
                error!(event = "model.request.timeout", model_id = %model.id, %category, trace_id, "{err}");
                Err(err)
            }
            Ok(Err(err)) => {
                error!(event = "model.request.failed", model_id = %model.id, %category, trace_id, "{err}");
                Err(err)
            }
            Ok(Ok(response)) => {
                info!(
                    event = "model.request.complete",
                    model_id = %model.id,
                    %category,
                    tokens = response.total_tokens(),
                    trace_id,
                    "model request completed"
                );
                Ok(response)
            }
        }
    }

    /// Swap in a new configuration. Lanes, counters and waiters are kept;
    /// a changed `max_concurrency` applies from the next admission or release.
    pub fn reload(&self, config: ModelsConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        info!(event = "model.config.reload", "model configuration reloaded");
    }

    /// Whether each category currently has an enabled model.
    pub fn check_availability(&self) -> HashMap<ModelCategory, bool> {
        let config = self.config();
        ModelCategory::ALL
            .iter()
            .map(|c| (*c, config.first_enabled(*c).is_some()))
            .collect()
    }

    /// Number of live waiters per model id.
    pub fn queue_status(&self) -> HashMap<String, usize> {
        self.lanes()
            .iter()
            .map(|(id, lane)| {
                let live = lane.waiting.iter().filter(|w| !w.grant.is_closed()).count();
                (id.clone(), live)
            })
            .collect()
    }

    /// Calls currently holding a slot on `model_id`.
    pub fn active_count(&self, model_id: &str) -> usize {
        self.lanes().get(model_id).map(|l| l.active).unwrap_or(0)
    }

    async fn dispatch(
        &self,
        model: &ModelConfig,
        request: &ModelRequest,
    ) -> Result<ModelResponse, DocmillError> {
        match model.mock.as_ref().filter(|m| m.enabled) {
            Some(mock_config) => mock::respond(model, mock_config, request, &self.mock_dir).await,
            None => self.transport.send(model, request).await,
        }
    }

    async fn acquire(
        &self,
        model: &ModelConfig,
        category: ModelCategory,
        trace_id: &str,
    ) -> Result<Slot<'_>, DocmillError> {
        let rx = {
            let mut lanes = self.lanes();
            let lane = lanes.entry(model.id.clone()).or_default();
            lane.limit = model.max_concurrency;
            lane.waiting.retain(|w| !w.grant.is_closed());
            lane.drain(&model.id);

            if lane.waiting.is_empty() && lane.active < lane.limit {
                lane.active += 1;
                return Ok(Slot {
                    service: self,
                    model_id: model.id.clone(),
                });
            }

            info!(
                event = "model.queue.add",
                model_id = %model.id,
                %category,
                active = lane.active,
                limit = lane.limit,
                trace_id,
                "model at concurrency limit, queuing request"
            );
            let (tx, rx) = oneshot::channel();
            let id = Uuid::new_v4().to_string();
            lane.waiting.push_back(Waiter {
                id: id.clone(),
                category,
                enqueued_at: Instant::now(),
                grant: tx,
            });
            info!(
                event = "model.queue.position",
                model_id = %model.id,
                request_id = %id,
                position = lane.waiting.len(),
                "request queued"
            );
            rx
        };

        PendingGrant {
            service: self,
            model_id: model.id.clone(),
            rx,
            granted: false,
        }
        .wait()
        .await
    }

    fn release(&self, model_id: &str) {
        let mut lanes = self.lanes();
        if let Some(lane) = lanes.get_mut(model_id) {
            lane.active = lane.active.saturating_sub(1);
            lane.drain(model_id);
        }
    }

    fn lanes(&self) -> MutexGuard<'_, HashMap<String, Lane>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A held concurrency slot; released on drop.
struct Slot<'a> {
    service: &'a ModelService,
    model_id: String,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.service.release(&self.model_id);
    }
}

/// A parked caller. If the caller is dropped after its grant was sent but
/// before it turned into a [`Slot`], the slot is given back here.
struct PendingGrant<'a> {
    service: &'a ModelService,
    model_id: String,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl<'a> PendingGrant<'a> {
    async fn wait(mut self) -> Result<Slot<'a>, DocmillError> {
        match (&mut self.rx).await {
            Ok(()) => {
                self.granted = true;
                Ok(Slot {
                    service: self.service,
                    model_id: self.model_id.clone(),
                })
            }
            Err(_) => Err(DocmillError::Internal(format!(
                "request queue for '{}' dropped a waiter",
                self.model_id
            ))),
        }
    }
}

impl Drop for PendingGrant<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.service.release(&self.model_id);
        }
    }
}
