//! 单分区流的拉取-转发循环
//!
//! 状态：Created -> Running -> Draining -> Stopped。
//! 转发失败只记日志并继续；流读取失败或超时进入 Draining。

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::{BridgeError, BridgeResult};
use crate::message::{InboundRecord, Message};
use crate::session::{DeliveryTracker, RecordStream};

/// Entry point of the routing pipeline.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Returns once the message is accepted; the worker does not pull again until then.
    async fn process(&self, message: Message) -> BridgeResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Created = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }
}

/// Shared view of a worker's state.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Created as u8)))
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The bridge asked the worker to stop.
    Cancelled,
    /// The stream ended, failed or timed out.
    StreamEnded(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: usize,
    pub forwarded: u64,
    pub failed: u64,
    pub exit: ExitReason,
}

pub struct StreamWorker {
    id: usize,
    stream: Box<dyn RecordStream>,
    processor: Arc<dyn MessageProcessor>,
    state: StateCell,
    consumer_timeout: Option<Duration>,
    tracker: Option<DeliveryTracker>,
}

impl StreamWorker {
    pub fn new(
        id: usize,
        stream: Box<dyn RecordStream>,
        processor: Arc<dyn MessageProcessor>,
        consumer_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            stream,
            processor,
            state: StateCell::new(),
            consumer_timeout,
            tracker: None,
        }
    }

    /// Marks every record the processor accepts as delivered.
    pub fn with_tracker(mut self, tracker: DeliveryTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> StateCell {
        self.state.clone()
    }

    /// Runs until the stream ends or `stop` flips to `true` (or its sender is dropped).
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> WorkerReport {
        self.state.set(WorkerState::Running);
        let mut report = WorkerReport {
            id: self.id,
            forwarded: 0,
            failed: 0,
            exit: ExitReason::Cancelled,
        };

        report.exit = loop {
            if *stop.borrow_and_update() {
                break ExitReason::Cancelled;
            }
            let pulled = tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break ExitReason::Cancelled;
                    }
                    continue;
                }
                pulled = self.pull() => pulled,
            };
            match pulled {
                Ok(record) => self.forward(record, &mut report).await,
                Err(e) => break ExitReason::StreamEnded(e.to_string()),
            }
        };

        self.state.set(WorkerState::Draining);
        match &report.exit {
            ExitReason::Cancelled => wp_log::info_data!(
                "[kafka-bridge] worker {} cancelled after {} records",
                self.id,
                report.forwarded
            ),
            ExitReason::StreamEnded(why) => wp_log::info_data!(
                "[kafka-bridge] worker {} draining: {}",
                self.id,
                why
            ),
        }
        self.state.set(WorkerState::Stopped);
        report
    }

    async fn pull(&mut self) -> BridgeResult<InboundRecord> {
        let Some(limit) = self.consumer_timeout else {
            return self.stream.next_record().await;
        };
        match tokio::time::timeout(limit, self.stream.next_record()).await {
            Ok(res) => res,
            Err(_) => Err(BridgeError::StreamTermination(format!(
                "no record within {} ms",
                limit.as_millis()
            ))),
        }
    }

    // `&mut self`: the stream is only Send, so a shared borrow held across
    // the await would make the run future !Send.
    async fn forward(&mut self, record: InboundRecord, report: &mut WorkerReport) {
        let topic = record.topic.clone();
        let (partition, offset) = (record.partition, record.offset);
        match self.processor.process(record.into_message()).await {
            Ok(()) => {
                report.forwarded += 1;
                if let Some(tracker) = &self.tracker {
                    tracker.mark(&topic, partition, offset);
                }
                log::debug!(
                    "[kafka-bridge] worker {} forwarded partition {} offset {}",
                    self.id,
                    partition,
                    offset
                );
            }
            Err(e) => {
                report.failed += 1;
                wp_log::warn_data!(
                    "[kafka-bridge] worker {} forward failed at partition {} offset {}: {}",
                    self.id,
                    partition,
                    offset,
                    e
                );
            }
        }
    }
}
