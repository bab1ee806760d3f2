//! Result Dispatcher
//!
//! Fans the outcome of one round trip back out to every request of the batch, in order.
//!
//! ## Rules
//! - **Batch failure**: every request receives the same error (one `Arc`, shared).
//! - **Batch success**: request `i` receives result `i`. A short result list leaves the
//!   remaining requests with `MissingResult` instead of leaving them hanging.
//! - **Isolation**: each resolution runs under `catch_unwind`. A panicking completion handler
//!   is logged and reported on the alert channel; the remaining requests are still resolved.

use super::batch::{CommandRequest, ExecutingBatch};
use super::types::{BatchState, CommandError, CommandResult, PartitionId, PipelineAlert};
use crate::client::CommandOutcome;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Counters describing one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub resolved: usize,
    pub failed: usize,
    pub panicked: usize,
}

pub struct Dispatcher {
    alerts: broadcast::Sender<PipelineAlert>,
}

impl Dispatcher {
    pub fn new(alerts: broadcast::Sender<PipelineAlert>) -> Self {
        Self { alerts }
    }

    pub fn dispatch(
        &self,
        batch: &mut ExecutingBatch,
        outcome: anyhow::Result<Vec<CommandOutcome>>,
    ) -> DispatchReport {
        let requests = std::mem::take(&mut batch.requests);
        let mut report = DispatchReport::default();

        match outcome {
            Err(error) => {
                tracing::warn!(
                    "Batch {} on {} failed for {} commands: {:#}",
                    batch.id,
                    batch.partition,
                    requests.len(),
                    error
                );
                let shared = Arc::new(error);
                for request in requests {
                    let result = Err(CommandError::Batch(shared.clone()));
                    self.resolve(&batch.partition, request, result, &mut report);
                }
            }
            Ok(results) => {
                let returned = results.len();
                if returned > requests.len() {
                    tracing::warn!(
                        "Batch {} returned {} results for {} commands, extra results ignored",
                        batch.id,
                        returned,
                        requests.len()
                    );
                }

                let mut results = results.into_iter();
                for (index, request) in requests.into_iter().enumerate() {
                    let result = match results.next() {
                        Some(Ok(value)) => Ok(value),
                        Some(Err(reply)) => Err(CommandError::Reply(reply.0)),
                        None => Err(CommandError::MissingResult { index, returned }),
                    };
                    self.resolve(&batch.partition, request, result, &mut report);
                }
            }
        }

        batch.state = BatchState::Done;
        report
    }

    fn resolve(
        &self,
        partition: &PartitionId,
        request: CommandRequest,
        result: CommandResult,
        report: &mut DispatchReport,
    ) {
        if result.is_err() {
            report.failed += 1;
        }

        let CommandRequest { command, resolver } = request;
        match catch_unwind(AssertUnwindSafe(move || resolver.complete(result))) {
            Ok(()) => report.resolved += 1,
            Err(panic) => {
                report.panicked += 1;
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    "Completion handler for '{}' on {} panicked: {}",
                    command,
                    partition,
                    message
                );
                // No subscribers is fine, the log line above is the fallback.
                let _ = self.alerts.send(PipelineAlert::HandlerPanicked {
                    partition: partition.clone(),
                    command,
                    message,
                });
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}
