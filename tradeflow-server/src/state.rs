use std::{fmt, sync::Arc};

use tradeflow_core::{ReasoningPipeline, RunRegistry};

use crate::config::Settings;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RunRegistry>,
    pub pipeline: Arc<dyn ReasoningPipeline>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(pipeline: Arc<dyn ReasoningPipeline>, settings: Settings) -> Self {
        Self {
            registry: Arc::new(RunRegistry::new()),
            pipeline,
            settings: Arc::new(settings),
        }
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
