//! Pipeline-related API endpoints

use conveyor_core::domain::execution::Execution;
use conveyor_core::domain::pipeline::{Pipeline, PipelineDefinition};
use conveyor_core::dto::execution::TriggerExecution;
use conveyor_core::dto::pipeline::{CreatePipeline, PipelineSummary, ValidationReport, VersionSummary};
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Management
    // =============================================================================

    /// Register a pipeline definition as version 1
    ///
    /// # Arguments
    /// * `definition` - The declared pipeline; validated server-side before it is stored
    ///
    /// # Returns
    /// The registered pipeline with its first stored version
    ///
    /// # Errors
    /// Returns `ClientError::ApiError` with status 400 when the definition fails
    /// validation, or 409 when a pipeline with the same name already exists.
    ///
    /// # Example
    /// ```no_run
    /// # use conveyor_client::OrchestratorClient;
    /// # use conveyor_core::domain::pipeline::PipelineDefinition;
    /// # async fn example(definition: PipelineDefinition) -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let pipeline = client.create_pipeline(definition).await?;
    /// println!("registered {}", pipeline.id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_pipeline(&self, definition: PipelineDefinition) -> Result<Pipeline> {
        let response = self
            .client
            .post(self.url("/pipeline/create"))
            .json(&CreatePipeline { definition })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Validate a definition server-side without registering it
    ///
    /// # Arguments
    /// * `definition` - The pipeline definition to check
    ///
    /// # Returns
    /// A report listing every validation error; an empty list means the
    /// definition would be accepted
    pub async fn validate_pipeline(&self, definition: PipelineDefinition) -> Result<ValidationReport> {
        let response = self
            .client
            .post(self.url("/pipeline/validate"))
            .json(&CreatePipeline { definition })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List all registered pipelines
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>> {
        let response = self.client.get(self.url("/pipeline/list")).send().await?;
        self.handle_response(response).await
    }

    /// Get a pipeline by ID
    ///
    /// # Arguments
    /// * `pipeline_id` - The pipeline UUID
    ///
    /// # Errors
    /// Returns `ClientError::ApiError` with status 404 if the pipeline is unknown.
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        let response = self
            .client
            .get(self.url(&format!("/pipeline/{}", pipeline_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Version history of a pipeline, oldest first
    ///
    /// # Arguments
    /// * `pipeline_id` - The pipeline UUID
    pub async fn list_versions(&self, pipeline_id: Uuid) -> Result<Vec<VersionSummary>> {
        let response = self
            .client
            .get(self.url(&format!("/pipeline/{}/versions", pipeline_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Delete a pipeline and its version history
    ///
    /// # Arguments
    /// * `pipeline_id` - The pipeline UUID to delete
    ///
    /// # Errors
    /// Returns `ClientError::ApiError` with status 409 while an execution of the
    /// pipeline is in progress.
    pub async fn delete_pipeline(&self, pipeline_id: Uuid) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/pipeline/{}", pipeline_id)))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Start an execution of a pipeline from a source revision
    ///
    /// # Arguments
    /// * `pipeline_id` - The pipeline UUID
    /// * `req` - Branch, revision and source files of the change
    ///
    /// # Returns
    /// The execution record, already queued on the engine
    ///
    /// # Errors
    /// Returns `ClientError::ApiError` with status 400 when the branch is not
    /// tracked by the pipeline or a source path leaves the workspace.
    pub async fn trigger_pipeline(&self, pipeline_id: Uuid, req: TriggerExecution) -> Result<Execution> {
        let response = self
            .client
            .post(self.url(&format!("/pipeline/{}/trigger", pipeline_id)))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
