//! Batching link: coalesces operations issued within one scheduling window
//! into a single physical request and demultiplexes the response by
//! position.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Operation, OperationResult, Transport};
use crate::error::{Result, SyncError};

struct Pending {
  operation: Operation,
  reply: oneshot::Sender<Result<OperationResult>>,
}

/// Handle to the batching worker. Shared behind the data client; all
/// callers feed the same batching window.
pub struct BatchLink {
  queue: Mutex<Option<mpsc::UnboundedSender<Pending>>>,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchLink {
  /// Start the batching worker over the given transport.
  pub fn spawn(transport: Arc<dyn Transport>, window: Duration, max_operations: usize) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = tokio::spawn(run_worker(rx, transport, window, max_operations.max(1)));
    Self {
      queue: Mutex::new(Some(tx)),
      worker: Mutex::new(Some(worker)),
    }
  }

  /// Enqueue one operation; resolves when its batch completes.
  pub async fn request(&self, operation: Operation) -> Result<OperationResult> {
    let (reply, rx) = oneshot::channel();

    {
      let queue = self
        .queue
        .lock()
        .map_err(|e| SyncError::Transport(format!("Batch queue lock poisoned: {}", e)))?;
      let sender = queue
        .as_ref()
        .ok_or_else(|| SyncError::Transport("Batch link is shut down".to_string()))?;
      sender
        .send(Pending { operation, reply })
        .map_err(|_| SyncError::Transport("Batch link is shut down".to_string()))?;
    }

    rx.await
      .map_err(|_| SyncError::Transport("Batch link dropped the request".to_string()))?
  }

  /// Stop accepting operations, drain in-flight batches, and stop the
  /// worker.
  pub async fn shutdown(&self) {
    let sender = self.queue.lock().ok().and_then(|mut q| q.take());
    drop(sender);

    let worker = self.worker.lock().ok().and_then(|mut w| w.take());
    if let Some(handle) = worker {
      if let Err(e) = handle.await {
        warn!(error = %e, "batch worker did not shut down cleanly");
      }
    }
  }
}

async fn run_worker(
  mut rx: mpsc::UnboundedReceiver<Pending>,
  transport: Arc<dyn Transport>,
  window: Duration,
  max_operations: usize,
) {
  while let Some(first) = rx.recv().await {
    let mut batch = vec![first];

    // Collect everything issued within the batching window, up to the cap.
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);
    loop {
      if batch.len() >= max_operations {
        break;
      }
      tokio::select! {
        _ = &mut deadline => break,
        next = rx.recv() => match next {
          Some(pending) => batch.push(pending),
          None => break,
        },
      }
    }

    dispatch(transport.as_ref(), batch).await;
  }
}

async fn dispatch(transport: &dyn Transport, batch: Vec<Pending>) {
  let operations: Vec<Operation> = batch.iter().map(|p| p.operation.clone()).collect();
  debug!(size = operations.len(), "dispatching batch");

  match transport.send(&operations).await {
    Ok(results) => {
      if results.len() != batch.len() {
        // Ordering cannot be trusted either; the whole batch fails rather
        // than risking misattributed results.
        let error = SyncError::Protocol(format!(
          "Batch response count mismatch: sent {}, received {}",
          batch.len(),
          results.len()
        ));
        warn!(sent = batch.len(), received = results.len(), "batch count mismatch");
        fail_all(batch, &error);
        return;
      }

      for (pending, result) in batch.into_iter().zip(results) {
        let _ = pending.reply.send(Ok(result));
      }
    }
    Err(error) => fail_all(batch, &error),
  }
}

/// Surface the same failure to every request in the batch.
fn fail_all(batch: Vec<Pending>, error: &SyncError) {
  for pending in batch {
    let _ = pending.reply.send(Err(replicate(error)));
  }
}

fn replicate(error: &SyncError) -> SyncError {
  match error {
    SyncError::Transport(m) => SyncError::Transport(m.clone()),
    SyncError::Protocol(m) => SyncError::Protocol(m.clone()),
    SyncError::Auth(m) => SyncError::Auth(m.clone()),
    other => SyncError::Transport(other.to_string()),
  }
}
