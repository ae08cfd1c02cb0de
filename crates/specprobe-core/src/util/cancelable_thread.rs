use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

/// Cooperative stop flag handed to a cancelable worker.
///
/// The worker polls [`StopFlag::is_running`] and returns once it reads `false`.
#[derive(Clone, Debug)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    fn new() -> Self {
        StopFlag(Arc::new(AtomicBool::new(true)))
    }

    /// `true` until the owning handle requests a stop.
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// A thread handle that can be signaled to stop.
///
/// Dropping the handle without joining still signals the worker, so a
/// forgotten handle never leaves a spinning thread behind.
pub struct CancelableJoinHandle<T> {
    handle: Option<thread::JoinHandle<T>>,
    running: StopFlag,
}

/// Spawns a named cancelable worker thread.
///
/// The worker receives a [`StopFlag`]; it is requested to stop once the flag
/// reads `false`.
pub fn spawn_cancelable<T: Send + 'static>(
    name: &str,
    func: impl FnOnce(StopFlag) -> T + Send + 'static,
) -> std::io::Result<CancelableJoinHandle<T>> {
    let running = StopFlag::new();
    let flag = running.clone();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || func(flag))?;
    Ok(CancelableJoinHandle {
        handle: Some(handle),
        running,
    })
}

impl<T> CancelableJoinHandle<T> {
    /// `true` if the thread has not been signaled to stop.
    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// Signals the thread to stop without waiting for it.
    pub fn cancel(&self) {
        self.running.stop();
    }

    /// Signals the thread to stop and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns error if the thread panicked
    pub fn join(mut self) -> thread::Result<T> {
        self.running.stop();
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => unreachable!("join handle taken twice"),
        }
    }
}

impl<T> Drop for CancelableJoinHandle<T> {
    fn drop(&mut self) {
        self.running.stop();
    }
}
