//! Bounded-wait wrapper for blocking driver calls. Neither `hdbconnect` nor
//! `odbc-api` expose a connect-timeout knob through the calls this crate
//! makes, so a timed connect runs the attempt on a helper thread and gives
//! up waiting after `timeout`; the helper thread is left to finish (or hang)
//! on its own and its result, if any, is simply dropped.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Run `f` to completion, but don't wait longer than `timeout` for it.
/// Returns `None` on timeout.
pub(crate) fn run_with_timeout<T, F>(timeout: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_the_value_when_the_call_finishes_in_time() {
        let result = run_with_timeout(Duration::from_secs(1), || 42);
        assert_eq!(result, Some(42));
    }

    #[test]
    fn returns_none_when_the_call_outlives_the_timeout() {
        let result = run_with_timeout(Duration::from_millis(20), || {
            thread::sleep(Duration::from_secs(5));
            42
        });
        assert_eq!(result, None);
    }
}
