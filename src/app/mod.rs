// Application layer - Use case interactors

pub mod compress_service;
pub mod container;
pub mod inspect_interactor;

// Re-export interactors
pub use compress_service::{CompressService, JobTicket};
pub use container::{AppContainer, DefaultAppContainer};
pub use inspect_interactor::{InspectFormat, InspectInteractor, InspectRequest, InspectResponse};
