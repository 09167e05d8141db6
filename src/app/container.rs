use std::sync::Arc;

use crate::adapters::toml_config::AppConfig;
use crate::app::{compress_service::CompressService, inspect_interactor::InspectInteractor};
use crate::domain::rules::QualityStrategy;
use crate::error::{CompressXError, CompressXResult};
use crate::ports::MediaPorts;

pub trait AppContainer: Send + Sync {
    fn compress_service(&self) -> Arc<CompressService>;
    fn inspect_interactor(&self) -> Arc<InspectInteractor>;
    fn strategy(&self) -> Arc<dyn QualityStrategy>;
}

pub struct DefaultAppContainer {
    compress_service: Arc<CompressService>,
    inspect_interactor: Arc<InspectInteractor>,
    strategy: Arc<dyn QualityStrategy>,
}

impl DefaultAppContainer {
    /// Wire the services over `ports`. Must run inside a tokio runtime.
    pub fn new(ports: MediaPorts, config: &AppConfig) -> CompressXResult<Self> {
        config.validate().map_err(CompressXError::from)?;
        let strategy = config.strategy.build().map_err(CompressXError::from)?;

        let inspect_interactor = Arc::new(InspectInteractor::new(
            Arc::clone(&ports.metadata),
            Arc::clone(&strategy),
        ));
        let compress_service = Arc::new(CompressService::new(
            ports,
            Arc::clone(&strategy),
            config.engine.clone(),
            config.jobs.max_concurrent,
        )?);

        Ok(Self {
            compress_service,
            inspect_interactor,
            strategy,
        })
    }
}

impl AppContainer for DefaultAppContainer {
    fn compress_service(&self) -> Arc<CompressService> {
        Arc::clone(&self.compress_service)
    }

    fn inspect_interactor(&self) -> Arc<InspectInteractor> {
        Arc::clone(&self.inspect_interactor)
    }

    fn strategy(&self) -> Arc<dyn QualityStrategy> {
        Arc::clone(&self.strategy)
    }
}
