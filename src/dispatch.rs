//!
//! Drives a [`DeliveryAdapter`] from a tokio channel the way a transport's callback thread would.
//!
//! Messages are delivered strictly one at a time in arrival order. Each delivery runs on the
//! blocking pool, so a slow handler stalls only its own subscription and never an async worker.
//!
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ConsumerError;
use crate::listener::DeliveryAdapter;
use crate::message::TransportMessage;

/// Deliver every message received on `receiver` until the channel closes, then hand the
/// adapter back.
///
/// # Errors
/// Raise ConsumerError::Dispatch if a delivery task could not run to completion, e.g. because
/// the runtime is shutting down.
pub async fn run<M>(
    mut receiver: mpsc::Receiver<M>,
    mut adapter: DeliveryAdapter<M>,
) -> Result<DeliveryAdapter<M>, ConsumerError>
where
    M: TransportMessage + Send + 'static,
{
    debug!("listener dispatch started");
    let mut delivered = 0u64;
    while let Some(mut message) = receiver.recv().await {
        adapter = tokio::task::spawn_blocking(move || {
            adapter.deliver(&mut message);
            adapter
        })
        .await
        .map_err(|e| ConsumerError::Dispatch(e.to_string()))?;
        delivered += 1;
    }
    debug!(delivered, "listener dispatch stopped, channel closed");
    Ok(adapter)
}

/// Spawn [`run`] on the current runtime.
pub fn spawn<M>(
    receiver: mpsc::Receiver<M>,
    adapter: DeliveryAdapter<M>,
) -> JoinHandle<Result<DeliveryAdapter<M>, ConsumerError>>
where
    M: TransportMessage + Send + 'static,
{
    tokio::spawn(run(receiver, adapter))
}
