//! Explicit per-store context handed to every repository.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;

use pulse_core::config::SamplingConfig;
use pulse_core::error::Result;
use pulse_core::time::{Clock, DayWindow, SystemClock};
use pulse_core::types::Timestamp;

use crate::db::Database;
use crate::projects::{ProjectRepository, VocabularyRepository};

/// Project, tag scope, thresholds and clock used by the repositories.
#[derive(Clone)]
pub struct StoreContext {
    pub project_id: i64,
    /// Vocabulary that tag values are recorded in.
    pub vocabulary_id: i64,
    pub language: String,
    /// Uptime intervals shorter than this are discarded on close.
    pub min_uptime_duration: Duration,
    pub clock: Arc<dyn Clock>,
}

impl StoreContext {
    pub fn new(
        project_id: i64,
        vocabulary_id: i64,
        language: impl Into<String>,
        min_uptime_duration: Duration,
    ) -> Self {
        Self {
            project_id,
            vocabulary_id,
            language: language.into(),
            min_uptime_duration,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve the configured project and vocabulary, creating them if needed.
    pub fn bootstrap(db: &Arc<Database>, sampling: &SamplingConfig) -> Result<Self> {
        let project = ProjectRepository::new(Arc::clone(db)).ensure(&sampling.project)?;
        let vocabulary =
            VocabularyRepository::new(Arc::clone(db)).ensure(project.id, &sampling.vocabulary)?;
        Ok(Self::new(
            project.id,
            vocabulary.id,
            sampling.language.clone(),
            sampling.min_uptime_duration(),
        ))
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Local calendar day containing the clock's current instant.
    pub fn today(&self) -> Result<DayWindow> {
        DayWindow::containing(&Local, &self.now())
    }

    pub(crate) fn min_uptime_millis(&self) -> i64 {
        i64::try_from(self.min_uptime_duration.as_millis()).unwrap_or(i64::MAX)
    }
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("project_id", &self.project_id)
            .field("vocabulary_id", &self.vocabulary_id)
            .field("language", &self.language)
            .field("min_uptime_duration", &self.min_uptime_duration)
            .finish()
    }
}
