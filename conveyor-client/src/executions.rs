//! Execution-related API endpoints

use conveyor_core::domain::execution::Execution;
use conveyor_core::domain::log::LogEntry;
use conveyor_core::dto::execution::ExecutionSummary;
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// List all executions, newest first
    pub async fn list_executions(&self) -> Result<Vec<ExecutionSummary>> {
        let response = self.client.get(self.url("/execution/list")).send().await?;
        self.handle_response(response).await
    }

    /// List the executions of one pipeline
    ///
    /// # Arguments
    /// * `pipeline_id` - The pipeline UUID
    pub async fn list_executions_by_pipeline(&self, pipeline_id: Uuid) -> Result<Vec<ExecutionSummary>> {
        let response = self
            .client
            .get(self.url(&format!("/execution/pipeline/{}", pipeline_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Full execution record with stage/action records and failure cause
    ///
    /// # Arguments
    /// * `execution_id` - The execution UUID
    ///
    /// # Errors
    /// Returns `ClientError::ApiError` with status 404 if the execution is unknown.
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution> {
        let response = self
            .client
            .get(self.url(&format!("/execution/{}", execution_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Cancel a running execution
    ///
    /// # Arguments
    /// * `execution_id` - The execution UUID
    ///
    /// # Returns
    /// The execution as recorded after the cancellation was requested
    ///
    /// # Errors
    /// Returns `ClientError::ApiError` with status 409 if the execution has
    /// already reached a terminal state.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<Execution> {
        let response = self
            .client
            .post(self.url(&format!("/execution/{}/cancel", execution_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Log lines recorded for an execution, in arrival order
    ///
    /// # Arguments
    /// * `execution_id` - The execution UUID
    pub async fn get_execution_logs(&self, execution_id: Uuid) -> Result<Vec<LogEntry>> {
        let response = self
            .client
            .get(self.url(&format!("/execution/{}/logs", execution_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }
}
