use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::EngineError;

/// Shared cancellation flag. Jobs check it before their first store access;
/// once a job is past that point it runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

/// A query or cache rebuild running on its own thread.
pub struct JobHandle<T> {
    name: &'static str,
    token: CancelToken,
    handle: JoinHandle<Result<T, EngineError>>,
}

impl<T: Send + 'static> JobHandle<T> {
    pub(crate) fn spawn<F>(name: &'static str, token: CancelToken, work: F) -> Result<Self, EngineError>
    where
        F: FnOnce(&CancelToken) -> Result<T, EngineError> + Send + 'static,
    {
        let job_token = token.clone();
        let handle = thread::Builder::new()
            .name(format!("regstat-{name}"))
            .spawn(move || {
                job_token.check()?;
                work(&job_token)
            })
            .map_err(|err| EngineError::Worker(format!("failed to spawn {name}: {err}")))?;

        tracing::debug!(job = name, "spawned background job");
        Ok(Self {
            name,
            token,
            handle,
        })
    }

    /// Requests cancellation. Has no effect on a job that already started
    /// reading or writing.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<T, EngineError> {
        let name = self.name;
        self.handle
            .join()
            .map_err(|_| EngineError::Worker(format!("{name} job panicked")))?
    }
}
