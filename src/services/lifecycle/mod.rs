//! 环境生命周期
//!
//! 每个环境一个独立的 tokio 任务，环境之间互不影响。

pub mod context;
pub mod deploy;
pub mod graph;
pub mod runner;

use futures::future::join_all;
use std::sync::Arc;
use tracing::error;

use crate::domain::environment::Environment;
use crate::domain::lifecycle::{OperationKind, RunReport};
use crate::error::LifecycleError;
use crate::infra::docker::ContainerRuntime;
use crate::services::provision::backend_for;

pub use context::OperationContext;
pub use graph::OperationGraph;
pub use runner::{LifecycleRunner, RunOutcome};

/// 在所有环境上并发执行目标操作，结果顺序与输入一致
pub async fn run_all(
    environments: Vec<Arc<Environment>>,
    target: OperationKind,
    runtime: Arc<dyn ContainerRuntime>,
) -> Vec<RunOutcome> {
    let handles: Vec<_> = environments
        .iter()
        .map(|environment| {
            let backend = backend_for(environment, runtime.clone());
            let runner = LifecycleRunner::new(environment.clone(), backend);
            tokio::spawn(async move { runner.run(target).await })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .zip(environments)
        .map(|(joined, environment)| match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(environment = %environment.name, error = %e, "Environment task aborted");
                let mut report = RunReport::new(environment.name.clone(), target);
                report.complete();
                RunOutcome {
                    report,
                    error: Some(LifecycleError::TaskAborted(environment.name.clone())),
                }
            }
        })
        .collect()
}
