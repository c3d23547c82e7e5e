use async_trait::async_trait;
use std::path::PathBuf;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CanarySubsetRequest, PipelineRunOutput, PipelineRunRequest};

/// Port for the categorization pipeline.
///
/// Implementations persist run statistics through the run stats repository
/// before returning. Any error is a runtime failure of the attempt.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(&self, request: &PipelineRunRequest) -> DomainResult<PipelineRunOutput>;
}

/// Port for building canary subsets. Same seed and hotlist, same subset.
#[async_trait]
pub trait CanarySubsetBuilder: Send + Sync {
    async fn build(&self, request: &CanarySubsetRequest) -> DomainResult<PathBuf>;
}
