//! 环境生命周期执行器
//!
//! 按 [`OperationGraph::plan`] 的顺序逐个执行操作，记录每个阶段的状态。

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::context::OperationContext;
use super::deploy;
use super::graph::OperationGraph;
use crate::domain::environment::Environment;
use crate::domain::lifecycle::{OperationKind, OperationStage, RunReport, StageStatus};
use crate::error::{LifecycleError, LifecycleResult};
use crate::services::provision::{ProvisioningBackend, Role};

/// 一次运行的结果：报告与首个致命错误
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub error: Option<LifecycleError>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// 单个环境的执行器
pub struct LifecycleRunner {
    environment: Arc<Environment>,
    backend: Arc<dyn ProvisioningBackend>,
    graph: OperationGraph,
}

impl LifecycleRunner {
    pub fn new(environment: Arc<Environment>, backend: Arc<dyn ProvisioningBackend>) -> Self {
        let graph = OperationGraph::for_environment(&environment.name);
        Self {
            environment,
            backend,
            graph,
        }
    }

    /// 使用自定义操作图
    pub fn with_graph(mut self, graph: OperationGraph) -> Self {
        self.graph = graph;
        self
    }

    /// 执行目标操作及其依赖
    ///
    /// 失败后剩余操作全部跳过，已执行操作的收尾操作除外。
    pub async fn run(&self, target: OperationKind) -> RunOutcome {
        let env_name = self.environment.name.clone();
        let mut report = RunReport::new(env_name.clone(), target);

        let plan = match self.graph.plan(target) {
            Ok(plan) => plan,
            Err(e) => {
                error!(environment = %env_name, error = %e, "Failed to plan operations");
                report.complete();
                return RunOutcome {
                    report,
                    error: Some(e),
                };
            }
        };

        info!(
            environment = %env_name,
            target = %target,
            plan = ?plan.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            "Running operations"
        );

        let mut executed: HashSet<OperationKind> = HashSet::new();
        let mut first_error: Option<LifecycleError> = None;

        for kind in plan {
            let ctx = OperationContext::new(self.environment.clone(), kind);
            let mut stage = OperationStage::new(kind, ctx.task.clone());

            if first_error.is_some() && !executed.iter().any(|node| self.graph.is_finalizer_of(kind, *node)) {
                warn!(task = %ctx.task, "Skipped after earlier failure");
                stage.skip(Some("previous operation failed".to_string()));
                report.stages.push(stage);
                continue;
            }

            stage.start();
            info!(task = %ctx.task, "Operation started");
            let result = self.execute(&ctx).await;
            executed.insert(kind);

            match result {
                Ok(()) => {
                    stage.finish(true, None);
                    info!(task = %ctx.task, duration_ms = ?stage.duration_ms, "Operation finished");
                }
                Err(e) => {
                    error!(task = %ctx.task, error = %e, "Operation failed");
                    stage.finish(false, Some(e.to_string()));
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
            report.stages.push(stage);
        }

        report.complete();
        RunOutcome {
            report,
            error: first_error,
        }
    }

    async fn execute(&self, ctx: &OperationContext) -> LifecycleResult<()> {
        match ctx.kind {
            OperationKind::Download => self.backend.download(ctx).await,
            OperationKind::Install => self.backend.provision(ctx).await,
            OperationKind::Deploy => deploy::deploy(ctx).await,
            OperationKind::Undeploy => deploy::undeploy(ctx).await,
            OperationKind::StartServer => self.backend.start_runtime(ctx, Role::Server).await,
            OperationKind::StopServer => self.backend.stop_runtime(ctx, Role::Server).await,
            OperationKind::StartAgent => self.backend.start_runtime(ctx, Role::Agent).await,
            OperationKind::StopAgent => self.backend.stop_runtime(ctx, Role::Agent).await,
            OperationKind::Start | OperationKind::Stop => Ok(()),
        }
    }
}

/// 阶段状态图标
pub fn status_icon(status: &StageStatus) -> &'static str {
    match status {
        StageStatus::Success => "✓",
        StageStatus::Failed => "✗",
        StageStatus::Skipped => "⊘",
        StageStatus::Running => "⟳",
        StageStatus::Pending => "○",
    }
}

/// 阶段汇总，每个阶段一行
pub fn stage_summary(report: &RunReport) -> Vec<String> {
    report
        .stages
        .iter()
        .map(|stage| {
            let duration = stage
                .duration_ms
                .map(|d| format!("{}ms", d))
                .unwrap_or_else(|| "-".to_string());
            match &stage.message {
                Some(message) => format!("{} {} ({}) {}", status_icon(&stage.status), stage.task, duration, message),
                None => format!("{} {} ({})", status_icon(&stage.status), stage.task, duration),
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 记录调用顺序的后端，可指定某个操作失败
    #[derive(Default)]
    pub struct RecordingBackend {
        pub fail_on: Option<OperationKind>,
        pub calls: Mutex<Vec<OperationKind>>,
    }

    impl RecordingBackend {
        pub fn failing_on(kind: OperationKind) -> Self {
            Self {
                fail_on: Some(kind),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<OperationKind> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, ctx: &OperationContext) -> LifecycleResult<()> {
            self.calls.lock().unwrap().push(ctx.kind);
            if self.fail_on == Some(ctx.kind) {
                return Err(LifecycleError::Download {
                    url: "https://download.example.com".to_string(),
                    message: "connection reset".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ProvisioningBackend for RecordingBackend {
        async fn download(&self, ctx: &OperationContext) -> LifecycleResult<()> {
            self.record(ctx)
        }

        async fn provision(&self, ctx: &OperationContext) -> LifecycleResult<()> {
            self.record(ctx)
        }

        async fn start_runtime(&self, ctx: &OperationContext, _role: Role) -> LifecycleResult<()> {
            self.record(ctx)
        }

        async fn stop_runtime(&self, ctx: &OperationContext, _role: Role) -> LifecycleResult<()> {
            self.record(ctx)
        }
    }
}
