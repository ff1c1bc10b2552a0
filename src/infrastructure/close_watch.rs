//! Resolves once a broker connection is gone, whichever way it went.
//!
//! Errors arrive through a watch channel fed by the client's error hook. A
//! graceful close initiated by the broker never reaches that hook, so the
//! connection status is polled as well.

use std::time::Duration;
use tokio::sync::watch;

/// Wait until `errors` carries a reason or `is_closed` reports the
/// connection as closed, and return a human-readable reason.
pub(crate) async fn wait_for_close<F>(
    mut errors: watch::Receiver<Option<String>>,
    poll_interval: Duration,
    is_closed: F,
) -> String
where
    F: Fn() -> Option<String>,
{
    let mut poll = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            reason = errors.wait_for(Option::is_some) => {
                return match reason {
                    Ok(reason) => reason.clone().unwrap_or_default(),
                    Err(_) => "connection dropped".to_string(),
                };
            }
            _ = poll.tick() => {
                if let Some(reason) = is_closed() {
                    return reason;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_error_signal_resolves() {
        let (signal, errors) = watch::channel(None);
        signal.send_replace(Some("connection reset".to_string()));

        let reason = wait_for_close(errors, Duration::from_secs(60), || None).await;
        assert_eq!(reason, "connection reset");
    }

    #[tokio::test]
    async fn test_close_without_error_resolves() {
        let (_signal, errors) = watch::channel(None);
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();

        let waiter = tokio::spawn(wait_for_close(errors, Duration::from_millis(5), move || {
            flag.load(Ordering::SeqCst).then(|| "closed by broker".to_string())
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        closed.store(true, Ordering::SeqCst);
        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("close not observed")
            .expect("waiter panicked");
        assert_eq!(reason, "closed by broker");
    }
}
