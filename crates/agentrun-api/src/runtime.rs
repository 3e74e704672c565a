use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use agentrun_core::types::{RunConfig, RunId, RunIdentity, RunInput, RunOutcome, RunSignal};
use agentrun_runtime::{Orchestrator, RuntimeApp, StartDisposition};

use crate::dto::{
    OutcomeView, RunView, SignalRunResponse, StartRunRequest, StartRunResponse, StartStatus,
};
use crate::{ApiError, ApiService};

/// `ApiService` backed by an in-process orchestrator.
#[derive(Clone)]
pub struct RuntimeApi {
    app: Arc<RuntimeApp>,
}

impl RuntimeApi {
    pub async fn from_config_path(config: PathBuf) -> Result<Self, ApiError> {
        let app = RuntimeApp::from_config_path(config)
            .await
            .map_err(|err| ApiError::Internal(format!("build runtime app failed: {}", err)))?;
        Ok(Self::new(app))
    }

    pub fn new(app: RuntimeApp) -> Self {
        Self { app: Arc::new(app) }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.app.orchestrator
    }

    pub fn runtime_app(&self) -> Arc<RuntimeApp> {
        self.app.clone()
    }

    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<RunOutcome> {
        self.app.outcomes.subscribe()
    }
}

fn parse_run_id(run_id: &str) -> Result<RunId, ApiError> {
    if run_id.trim().is_empty() {
        return Err(ApiError::InvalidArgument(
            "run_id must not be empty".to_string(),
        ));
    }
    Ok(RunId::from(run_id))
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::InvalidArgument(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

#[async_trait]
impl ApiService for RuntimeApi {
    async fn start_run(&self, request: StartRunRequest) -> Result<StartRunResponse, ApiError> {
        require("tenant_id", &request.tenant_id)?;
        require("agent_id", &request.agent_id)?;
        require("agent_version_id", &request.agent_version_id)?;
        let run_id = request
            .run_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let identity = RunIdentity::new(
            run_id.as_str(),
            request.tenant_id,
            request.agent_id,
            request.agent_version_id,
        );
        let disposition = self
            .app
            .orchestrator
            .start_run(
                identity,
                RunConfig::from(request.config),
                RunInput::from(request.input),
            )
            .await?;

        let status = match disposition {
            StartDisposition::Started => StartStatus::Started,
            StartDisposition::AlreadyStarted => StartStatus::AlreadyStarted,
        };
        Ok(StartRunResponse { run_id, status })
    }

    async fn signal_run(
        &self,
        run_id: &str,
        signal: &str,
    ) -> Result<SignalRunResponse, ApiError> {
        let id = parse_run_id(run_id)?;
        let signal: RunSignal = signal.parse()?;
        let control = self.app.orchestrator.signal(&id, signal).await?;
        Ok(SignalRunResponse {
            run_id: id.to_string(),
            signal: signal.to_string(),
            paused: control.paused,
            cancel_requested: control.cancel_requested,
        })
    }

    async fn query_run_paused(&self, run_id: &str) -> Result<bool, ApiError> {
        let id = parse_run_id(run_id)?;
        Ok(self.app.orchestrator.query_paused(&id)?)
    }

    async fn get_run_outcome(&self, run_id: &str) -> Result<OutcomeView, ApiError> {
        let id = parse_run_id(run_id)?;
        let outcome = self.app.orchestrator.get_outcome(&id).await?;
        Ok(OutcomeView {
            run_id: id.to_string(),
            finished: outcome.is_some(),
            outcome,
        })
    }

    async fn get_run(&self, run_id: &str) -> Result<RunView, ApiError> {
        let id = parse_run_id(run_id)?;
        let snapshot = self.app.orchestrator.describe(&id).await?;
        Ok(RunView {
            run_id: id.to_string(),
            status: snapshot.status,
            paused: snapshot.control.paused,
            cancel_requested: snapshot.control.cancel_requested,
            outcome: snapshot.outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use agentrun_activities::ToolRegistry;
    use agentrun_config::AgentRunConfig;
    use agentrun_core::types::OutcomeStatus;
    use serde_json::{json, Map};

    async fn api() -> RuntimeApi {
        let app = RuntimeApp::from_config(AgentRunConfig::default(), ToolRegistry::with_builtins())
            .await
            .unwrap();
        RuntimeApi::new(app)
    }

    fn request(run_id: Option<&str>) -> StartRunRequest {
        let mut input = Map::new();
        input.insert("prompt".to_string(), json!("Say hi"));
        StartRunRequest {
            run_id: run_id.map(str::to_string),
            tenant_id: "tenant-1".to_string(),
            agent_id: "agent-1".to_string(),
            agent_version_id: "v1".to_string(),
            config: Map::new(),
            input,
        }
    }

    #[tokio::test]
    async fn test_start_then_read_outcome() {
        let api = api().await;
        let started = api.start_run(request(Some("run-1"))).await.unwrap();
        assert_eq!(started.run_id, "run-1");
        assert_eq!(started.status, StartStatus::Started);

        let again = api.start_run(request(Some("run-1"))).await.unwrap();
        assert_eq!(again.status, StartStatus::AlreadyStarted);

        let outcome = api
            .orchestrator()
            .wait_for_outcome(&RunId::from("run-1"))
            .await
            .unwrap();
        let content = outcome.output.unwrap()["response"].clone();
        assert_eq!(content, json!("[Placeholder response for: Say hi...]"));

        let view = api.get_run_outcome("run-1").await.unwrap();
        assert!(view.finished);
        let run = api.get_run("run-1").await.unwrap();
        assert_eq!(run.status.as_str(), "completed");
        assert!(!api.query_run_paused("run-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_run_id_is_generated() {
        let api = api().await;
        let started = api.start_run(request(None)).await.unwrap();
        assert!(Uuid::parse_str(&started.run_id).is_ok());
    }

    #[tokio::test]
    async fn test_errors_map_to_codes() {
        let api = api().await;
        assert_eq!(
            api.query_run_paused("ghost").await.unwrap_err().code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            api.get_run(" ").await.unwrap_err().code(),
            ErrorCode::InvalidArgument
        );

        api.start_run(request(Some("run-2"))).await.unwrap();
        assert_eq!(
            api.signal_run("run-2", "stop").await.unwrap_err().code(),
            ErrorCode::InvalidArgument
        );

        let mut other_tenant = request(Some("run-2"));
        other_tenant.tenant_id = "tenant-2".to_string();
        assert_eq!(
            api.start_run(other_tenant).await.unwrap_err().code(),
            ErrorCode::Conflict
        );

        let mut blank_agent = request(Some("run-3"));
        blank_agent.agent_id = String::new();
        assert_eq!(
            api.start_run(blank_agent).await.unwrap_err().code(),
            ErrorCode::InvalidArgument
        );
    }

    #[tokio::test]
    async fn test_cancel_through_the_api() {
        let api = api().await;
        api.start_run(request(Some("run-4"))).await.unwrap();
        let response = api.signal_run("run-4", "CANCEL").await.unwrap();
        assert_eq!(response.signal, "cancel");
        assert!(response.cancel_requested);

        let outcome = api
            .orchestrator()
            .wait_for_outcome(&RunId::from("run-4"))
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Cancelled);
    }
}
