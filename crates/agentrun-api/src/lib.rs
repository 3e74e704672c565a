mod dto;
mod error;
mod runtime;
mod service;

pub use dto::{
    OutcomeView, PausedView, RunView, SignalRunRequest, SignalRunResponse, StartRunRequest,
    StartRunResponse, StartStatus,
};
pub use error::{ApiError, ErrorCode};
pub use runtime::RuntimeApi;
pub use service::ApiService;
