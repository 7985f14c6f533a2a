//! Deployed stack endpoints

use conveyor_core::dto::stack::StackSummary;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// Deployed stacks with the template digest and execution that last changed them
    pub async fn list_stacks(&self) -> Result<Vec<StackSummary>> {
        let response = self.client.get(self.url("/stack/list")).send().await?;
        self.handle_response(response).await
    }
}
