use crate::core::error::{Error, Result};
use crate::core::event::OutputHandlers;
use crate::core::job_config::JobConfig;
use crate::core::runtime::{RuntimeConfig, RuntimeKind};

use super::{validate_paths, Execution, JobRunner};

/// Placeholder backend for cluster runtimes. Jobs validate but never run.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClusterRunner;

impl JobRunner for ClusterRunner {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Cluster
    }

    fn validate(&self, config: &JobConfig) -> Result<()> {
        validate_paths(config)?;
        match &config.runtime.config {
            RuntimeConfig::Cluster(cluster) if cluster.image.trim().is_empty() => {
                Err(Error::Validation {
                    message: "cluster runtime requires an image".to_string(),
                })
            }
            RuntimeConfig::Cluster(_) => Ok(()),
            other => Err(Error::Validation {
                message: format!("expected a cluster runtime, got {}", other.kind()),
            }),
        }
    }

    fn run(&self, config: &JobConfig, _handlers: &mut OutputHandlers) -> Result<Execution> {
        self.validate(config)?;
        tracing::warn!(runtime = %config.runtime.name, "cluster execution requested");
        Err(Error::Unsupported {
            what: "cluster runtime execution".to_string(),
        })
    }
}
