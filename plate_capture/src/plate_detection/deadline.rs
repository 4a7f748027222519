use crossbeam::channel::{bounded, RecvTimeoutError};
use std::thread;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeadlineError {
    #[error("{0} did not finish within {1:?}")]
    Elapsed(&'static str, Duration),
    #[error("{0} worker exited without a result")]
    WorkerLost(&'static str),
}

/// Runs `work` and waits at most `limit` for it.
///
/// With no limit the closure runs on the calling thread. Otherwise it runs on
/// a helper thread; on timeout that thread is abandoned and whatever it
/// eventually returns is dropped there.
pub fn run_with_deadline<T, F>(
    what: &'static str,
    limit: Option<Duration>,
    work: F,
) -> Result<T, DeadlineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let Some(limit) = limit else {
        return Ok(work());
    };

    let (done_s, done_r) = bounded(1);
    thread::Builder::new()
        .name(format!("deadline-{what}"))
        .spawn(move || {
            // The receiver is gone after a timeout; the value is dropped here.
            let _ = done_s.send(work());
        })
        .map_err(|_| DeadlineError::WorkerLost(what))?;

    match done_r.recv_timeout(limit) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(DeadlineError::Elapsed(what, limit)),
        Err(RecvTimeoutError::Disconnected) => Err(DeadlineError::WorkerLost(what)),
    }
}
