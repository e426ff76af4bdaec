use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use wp_log::{error_data, info_data, warn_data};

use crate::config::EndpointConfig;
use crate::error::BridgeResult;
use crate::lifecycle::Lifecycle;
use crate::session::{BrokerClient, ConsumerSession, DeliveryTracker};
use crate::worker::{MessageProcessor, StateCell, StreamWorker, WorkerReport, WorkerState};

/// One running [`StreamWorker`], owned by the bridge.
pub struct WorkerHandle {
    id: usize,
    state: StateCell,
    join: JoinHandle<WorkerReport>,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }
}

/// Fixed-size pool: one worker per partition stream, never more than `concurrent_consumers`.
pub struct ConsumerBridge {
    endpoint: Arc<EndpointConfig>,
    broker: Arc<dyn BrokerClient>,
    processor: Arc<dyn MessageProcessor>,
    deferred_delivery: bool,
    session: Option<ConsumerSession>,
    workers: Vec<WorkerHandle>,
    stop_tx: Option<watch::Sender<bool>>,
    reports: Vec<WorkerReport>,
}

impl ConsumerBridge {
    pub fn new(
        endpoint: Arc<EndpointConfig>,
        broker: Arc<dyn BrokerClient>,
        processor: Arc<dyn MessageProcessor>,
    ) -> Self {
        Self {
            endpoint,
            broker,
            processor,
            deferred_delivery: false,
            session: None,
            workers: Vec::new(),
            stop_tx: None,
            reports: Vec::new(),
        }
    }

    /// Acceptance by the processor no longer counts as delivery; the owner marks
    /// delivered records through [`ConsumerBridge::delivery_tracker`] instead.
    pub fn with_deferred_delivery(mut self) -> Self {
        self.deferred_delivery = true;
        self
    }

    /// Tracker of the open session, `None` before start and after stop.
    pub fn delivery_tracker(&self) -> Option<DeliveryTracker> {
        self.session.as_ref().map(ConsumerSession::tracker)
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn running_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| matches!(w.state(), WorkerState::Created | WorkerState::Running))
            .count()
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Reports collected by the last `stop()`.
    pub fn reports(&self) -> &[WorkerReport] {
        &self.reports
    }

    async fn drain(&mut self) -> Vec<WorkerReport> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
        }
        let mut reports = Vec::with_capacity(self.workers.len());
        for worker in self.workers.drain(..) {
            match worker.join.await {
                Ok(report) => reports.push(report),
                Err(e) => error_data!("[kafka-bridge] worker {} join error: {}", worker.id, e),
            }
        }
        reports
    }
}

#[async_trait]
impl Lifecycle for ConsumerBridge {
    async fn start(&mut self) -> BridgeResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let (session, streams) = ConsumerSession::open(self.broker.as_ref(), &self.endpoint).await?;

        let capacity = self.endpoint.concurrent_consumers;
        if streams.len() > capacity {
            warn_data!(
                "[kafka-bridge] {} streams exceed pool size {}, extra streams are not consumed",
                streams.len(),
                capacity
            );
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let timeout = self.endpoint.consumer_timeout();
        for (id, stream) in streams.into_iter().take(capacity).enumerate() {
            let mut worker = StreamWorker::new(id, stream, self.processor.clone(), timeout);
            if !self.deferred_delivery {
                worker = worker.with_tracker(session.tracker());
            }
            let state = worker.state();
            let join = tokio::spawn(worker.run(stop_rx.clone()));
            self.workers.push(WorkerHandle { id, state, join });
        }
        self.stop_tx = Some(stop_tx);
        self.session = Some(session);
        self.reports.clear();
        info_data!(
            "[kafka-bridge] consumer started: topic {}, workers {}",
            self.endpoint.topic,
            self.workers.len()
        );
        Ok(())
    }

    async fn stop(&mut self) -> BridgeResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let reports = self.drain().await;
        let forwarded: u64 = reports.iter().map(|r| r.forwarded).sum();
        let failed: u64 = reports.iter().map(|r| r.failed).sum();
        info_data!(
            "[kafka-bridge] workers drained: {} forwarded, {} failed",
            forwarded,
            failed
        );
        self.reports = reports;

        // commit needs the session open, so it always precedes close
        let committed = session.commit_offsets().await;
        if let Err(e) = &committed {
            error_data!("[kafka-bridge] offset commit failed: {}", e);
        }
        let closed = session.close().await;
        if let Err(e) = &closed {
            error_data!("[kafka-bridge] consumer close failed: {}", e);
        }
        info_data!("[kafka-bridge] consumer stopped: topic {}", self.endpoint.topic);
        committed.and(closed)
    }

    fn is_running(&self) -> bool {
        self.session.is_some()
    }
}

impl Drop for ConsumerBridge {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn_data!(
                "[kafka-bridge] consumer for {} dropped while running; offsets not committed",
                self.endpoint.topic
            );
        }
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
        }
    }
}
