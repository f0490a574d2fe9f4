use std::sync::Arc;

use crate::base_system::config::Config;
use crate::jobs::job_store::JobStore;
use crate::jobs::orchestrator::Orchestrator;
use crate::tts::EngineFactory;
use crate::web::auth::IdentityResolver;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<Config>,
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) jobs: Arc<JobStore>,
    pub(crate) identity: Arc<IdentityResolver>,
    pub(crate) engines: Arc<dyn EngineFactory>,
}
