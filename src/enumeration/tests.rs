use super::*;
use crate::controller::engine::Op;
use crate::protocol::AemStatusCode;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const TARGET: UniqueIdentifier = UniqueIdentifier::new(0x0011_2233_4455_6677);

/// A stand-in event loop that answers each AECP op from a script and
/// counts the attempts it saw. Responses past the end of the script
/// time out.
fn scripted_handle(
    script: Vec<Result<AemStatusCode, AemError>>,
) -> (CommandHandle, Arc<Mutex<usize>>) {
    let (ops_tx, mut ops_rx) = mpsc::unbounded_channel();
    let attempts = Arc::new(Mutex::new(0usize));
    let counter = attempts.clone();
    tokio::spawn(async move {
        let mut script = script.into_iter();
        while let Some(op) = ops_rx.recv().await {
            if let Op::Aecp { reply, .. } = op {
                *counter.lock().unwrap() += 1;
                let outcome = match script.next() {
                    Some(Ok(status)) => Ok(AecpResponse {
                        status,
                        payload: Bytes::new(),
                    }),
                    Some(Err(err)) => Err(err),
                    None => Err(AemError::TimedOut),
                };
                let _ = reply.send(outcome);
            }
        }
    });
    (CommandHandle::new(ops_tx), attempts)
}

async fn run_retry(handle: &CommandHandle) -> Result<AecpResponse, AemError> {
    aecp_retry(
        handle,
        &ControllerConfig::default(),
        TARGET,
        AemCommandType::GetName,
        Bytes::new(),
    )
    .await
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_is_retried_with_backoff() {
    let (handle, attempts) = scripted_handle(vec![
        Err(AemError::TimedOut),
        Err(AemError::TimedOut),
        Ok(AemStatusCode::SUCCESS),
    ]);
    assert!(run_retry(&handle).await.is_ok());
    assert_eq!(*attempts.lock().unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_locked_by_other_is_retried() {
    let (handle, attempts) = scripted_handle(vec![
        Ok(AemStatusCode::ENTITY_LOCKED),
        Ok(AemStatusCode::SUCCESS),
    ]);
    assert!(run_retry(&handle).await.is_ok());
    assert_eq!(*attempts.lock().unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_network_error_is_not_retried() {
    let (handle, attempts) = scripted_handle(vec![Err(AemError::NetworkError)]);
    assert_eq!(run_retry(&handle).await.unwrap_err(), AemError::NetworkError);
    // A single attempt: NetworkError is outside the retriable set
    assert_eq!(*attempts.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_in_progress_is_not_retried() {
    let (handle, attempts) = scripted_handle(vec![Ok(AemStatusCode::IN_PROGRESS)]);
    assert_eq!(run_retry(&handle).await.unwrap_err(), AemError::InProgress);
    assert_eq!(*attempts.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hard_status_is_not_retried() {
    let (handle, attempts) = scripted_handle(vec![Ok(AemStatusCode::NO_SUCH_DESCRIPTOR)]);
    assert_eq!(
        run_retry(&handle).await.unwrap_err(),
        AemError::NoSuchDescriptor
    );
    assert_eq!(*attempts.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhausted() {
    // Nothing but timeouts: the initial attempt plus three retries
    let (handle, attempts) = scripted_handle(Vec::new());
    assert_eq!(run_retry(&handle).await.unwrap_err(), AemError::TimedOut);
    assert_eq!(*attempts.lock().unwrap(), 4);
}
