use crate::utils::error::{PricingError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Expired { redirect: String },
}

/// Runs backend calls while tracking loading and error state.
///
/// An expired session is not an ordinary failure: the `on_error` callback is
/// skipped and a [`SessionEvent::Expired`] is published instead, so a single
/// listener can send the user back to the login page.
pub struct ApiExecutor {
    in_flight: AtomicUsize,
    last_error: Mutex<Option<String>>,
    session_events: broadcast::Sender<SessionEvent>,
    login_path: String,
}

impl ApiExecutor {
    pub fn new(login_path: impl Into<String>) -> Self {
        let (session_events, _) = broadcast::channel(16);
        Self {
            in_flight: AtomicUsize::new(0),
            last_error: Mutex::new(None),
            session_events,
            login_path: login_path.into(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_events.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, message: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = message;
    }

    pub async fn execute<T, Fut>(&self, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with(call, |_| {}, |_| {}).await
    }

    pub async fn execute_with<T, Fut, S, E>(&self, call: Fut, on_success: S, on_error: E) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
        S: FnOnce(&T),
        E: FnOnce(&PricingError),
    {
        let result = {
            let _loading = LoadingGuard::enter(&self.in_flight);
            self.set_last_error(None);
            call.await
        };

        match &result {
            Ok(value) => on_success(value),
            Err(PricingError::SessionExpired) => {
                tracing::warn!("🔒 Session expired, redirecting to {}", self.login_path);
                // no receiver is fine: nobody is listening yet
                let _ = self.session_events.send(SessionEvent::Expired {
                    redirect: self.login_path.clone(),
                });
            }
            Err(e) => {
                self.set_last_error(Some(e.user_friendly_message()));
                on_error(e);
            }
        }
        result
    }
}

struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ApiExecutor {
    fn default() -> Self {
        Self::new("/login")
    }
}
