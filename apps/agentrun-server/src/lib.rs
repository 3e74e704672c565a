use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use agentrun_api::{
    ApiError, ApiService, ErrorCode, OutcomeView, PausedView, RunView, RuntimeApi,
    SignalRunRequest, SignalRunResponse, StartRunRequest, StartRunResponse,
};

#[derive(Clone)]
struct AppState {
    api: Arc<dyn ApiService>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorBody>)>;

pub fn router(api: Arc<dyn ApiService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/runs", post(start_run))
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/signal", post(signal_run))
        .route("/runs/{run_id}/cancel", post(cancel_run))
        .route("/runs/{run_id}/paused", get(get_paused))
        .route("/runs/{run_id}/outcome", get(get_outcome))
        .with_state(AppState { api })
}

/// Serve until ctrl-c, then detach live runs so a restart can recover them.
pub async fn run_server(config: PathBuf, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let api = RuntimeApi::from_config_path(config)
        .await
        .context("build runtime failed")?;
    let listen = match listen {
        Some(listen) => listen,
        None => {
            let configured = api.runtime_app().config.server.listen.clone();
            configured
                .parse()
                .with_context(|| format!("invalid server.listen '{}'", configured))?
        }
    };
    let orchestrator = api.orchestrator().clone();
    let app = router(Arc::new(api));

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .context("bind server listener failed")?;
    tracing::info!(listen = %listen, "agentrun-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated with error")?;

    orchestrator.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status":"ok"}))
}

async fn start_run(
    State(state): State<AppState>,
    Json(payload): Json<StartRunRequest>,
) -> ApiResult<(StatusCode, Json<StartRunResponse>)> {
    let resp = state.api.start_run(payload).await.map_err(map_api_error)?;
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

async fn signal_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<SignalRunRequest>,
) -> ApiResult<(StatusCode, Json<SignalRunResponse>)> {
    let resp = state
        .api
        .signal_run(&run_id, &payload.signal)
        .await
        .map_err(map_api_error)?;
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<(StatusCode, Json<SignalRunResponse>)> {
    let resp = state
        .api
        .signal_run(&run_id, "cancel")
        .await
        .map_err(map_api_error)?;
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunView>> {
    let view = state.api.get_run(&run_id).await.map_err(map_api_error)?;
    Ok(Json(view))
}

async fn get_paused(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<PausedView>> {
    let paused = state
        .api
        .query_run_paused(&run_id)
        .await
        .map_err(map_api_error)?;
    Ok(Json(PausedView { run_id, paused }))
}

async fn get_outcome(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<OutcomeView>> {
    let view = state
        .api
        .get_run_outcome(&run_id)
        .await
        .map_err(map_api_error)?;
    Ok(Json(view))
}

fn map_api_error(err: ApiError) -> (StatusCode, Json<ErrorBody>) {
    let (status, code) = match err.code() {
        ErrorCode::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        ErrorCode::Conflict => (StatusCode::CONFLICT, "conflict"),
        ErrorCode::InvalidArgument => (StatusCode::BAD_REQUEST, "invalid_argument"),
        ErrorCode::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (
        status,
        Json(ErrorBody {
            code: code.to_string(),
            message: err.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_api::StartStatus;
    use agentrun_core::types::RunStatus;
    use async_trait::async_trait;
    use serde_json::Map;

    struct FakeApi;

    #[async_trait]
    impl ApiService for FakeApi {
        async fn start_run(
            &self,
            request: StartRunRequest,
        ) -> Result<StartRunResponse, ApiError> {
            Ok(StartRunResponse {
                run_id: request.run_id.unwrap_or_else(|| "generated".to_string()),
                status: StartStatus::Started,
            })
        }

        async fn signal_run(
            &self,
            run_id: &str,
            signal: &str,
        ) -> Result<SignalRunResponse, ApiError> {
            if run_id == "ghost" {
                return Err(ApiError::NotFound(format!("run '{}' not found", run_id)));
            }
            Ok(SignalRunResponse {
                run_id: run_id.to_string(),
                signal: signal.to_string(),
                paused: signal == "pause",
                cancel_requested: signal == "cancel",
            })
        }

        async fn query_run_paused(&self, run_id: &str) -> Result<bool, ApiError> {
            if run_id == "ghost" {
                return Err(ApiError::NotFound(format!("run '{}' not found", run_id)));
            }
            Ok(true)
        }

        async fn get_run_outcome(&self, run_id: &str) -> Result<OutcomeView, ApiError> {
            Ok(OutcomeView {
                run_id: run_id.to_string(),
                finished: false,
                outcome: None,
            })
        }

        async fn get_run(&self, run_id: &str) -> Result<RunView, ApiError> {
            Ok(RunView {
                run_id: run_id.to_string(),
                status: RunStatus::Paused,
                paused: true,
                cancel_requested: false,
                outcome: None,
            })
        }
    }

    fn state() -> State<AppState> {
        State(AppState {
            api: Arc::new(FakeApi),
        })
    }

    #[tokio::test]
    async fn test_start_and_signals_are_accepted() {
        let (status, Json(started)) = start_run(
            state(),
            Json(StartRunRequest {
                run_id: Some("run-1".to_string()),
                tenant_id: "t".to_string(),
                agent_id: "a".to_string(),
                agent_version_id: "v1".to_string(),
                config: Map::new(),
                input: Map::new(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(started.run_id, "run-1");

        let (status, Json(cancelled)) = cancel_run(state(), Path("run-1".to_string()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(cancelled.cancel_requested);

        let (_, Json(paused)) = signal_run(
            state(),
            Path("run-1".to_string()),
            Json(SignalRunRequest {
                signal: "pause".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(paused.paused);
    }

    #[tokio::test]
    async fn test_queries() {
        let Json(view) = get_paused(state(), Path("run-1".to_string()))
            .await
            .unwrap();
        assert!(view.paused);

        let Json(outcome) = get_outcome(state(), Path("run-1".to_string()))
            .await
            .unwrap();
        assert!(!outcome.finished);

        let Json(run) = get_run(state(), Path("run-1".to_string())).await.unwrap();
        assert_eq!(run.status, RunStatus::Paused);
    }

    #[tokio::test]
    async fn test_unknown_run_is_404() {
        let (status, Json(body)) = get_paused(state(), Path("ghost".to_string()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, "not_found");
    }

    #[test]
    fn test_error_codes_map_to_status() {
        let cases = [
            (ApiError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (ApiError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(map_api_error(err).0, expected);
        }
    }
}
