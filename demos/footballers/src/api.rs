//! In-memory footballer service shared by both stores

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// A footballer on the roster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footballer {
    /// Service-assigned id
    pub id: u32,
    /// Full name
    pub name: String,
    /// Current club
    pub club: String,
}

/// Failures reported by [`FootballerApi`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Name was blank
    #[error("footballer name must not be empty")]
    EmptyName,

    /// A footballer with this name already exists
    #[error("{0} is already on the roster")]
    Duplicate(String),

    /// The service is switched off
    #[error("footballer service unavailable")]
    Unavailable,
}

struct ApiInner {
    footballers: RwLock<Vec<Footballer>>,
    next_id: AtomicU32,
    latency: Duration,
    offline: AtomicBool,
}

/// Cheaply cloneable handle to the service
#[derive(Clone)]
pub struct FootballerApi {
    inner: Arc<ApiInner>,
}

impl FootballerApi {
    /// Empty service answering after `latency`
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self::seeded(latency, Vec::new())
    }

    /// Service pre-populated with `footballers`
    #[must_use]
    pub fn seeded(latency: Duration, footballers: Vec<Footballer>) -> Self {
        let next_id = footballers.iter().map(|f| f.id).max().unwrap_or(0) + 1;
        Self {
            inner: Arc::new(ApiInner {
                footballers: RwLock::new(footballers),
                next_id: AtomicU32::new(next_id),
                latency,
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// Make every later call fail with [`ApiError::Unavailable`]
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Every footballer, in creation order
    ///
    /// # Errors
    ///
    /// [`ApiError::Unavailable`] while offline.
    pub async fn list(&self) -> Result<Vec<Footballer>, ApiError> {
        self.respond().await?;
        Ok(self.inner.footballers.read().await.clone())
    }

    /// Add a footballer
    ///
    /// # Errors
    ///
    /// Rejects blank and duplicate names, and fails while offline.
    pub async fn create(&self, name: String, club: String) -> Result<Footballer, ApiError> {
        self.respond().await?;
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ApiError::EmptyName);
        }

        let mut footballers = self.inner.footballers.write().await;
        if footballers.iter().any(|f| f.name.eq_ignore_ascii_case(&name)) {
            return Err(ApiError::Duplicate(name));
        }
        let footballer = Footballer {
            id: self.inner.next_id.fetch_add(1, Ordering::SeqCst),
            name,
            club,
        };
        footballers.push(footballer.clone());
        tracing::debug!(id = footballer.id, name = %footballer.name, "Footballer created");
        Ok(footballer)
    }

    async fn respond(&self) -> Result<(), ApiError> {
        if !self.inner.latency.is_zero() {
            tokio::time::sleep(self.inner.latency).await;
        }
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Unavailable);
        }
        Ok(())
    }
}

impl std::fmt::Debug for FootballerApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FootballerApi")
            .field("latency", &self.inner.latency)
            .field("offline", &self.inner.offline.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
