//! 生命周期相关领域模型

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::environment::capitalize;
use crate::error::ValidationError;

/// 环境上的生命周期操作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Download,
    Install,
    Deploy,
    Undeploy,
    StartServer,
    StopServer,
    StartAgent,
    StopAgent,
    Start,
    Stop,
}

impl OperationKind {
    pub const ALL: [OperationKind; 10] = [
        OperationKind::Download,
        OperationKind::Install,
        OperationKind::Deploy,
        OperationKind::Undeploy,
        OperationKind::StartServer,
        OperationKind::StopServer,
        OperationKind::StartAgent,
        OperationKind::StopAgent,
        OperationKind::Start,
        OperationKind::Stop,
    ];

    /// 命令行使用的名称
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Download => "download",
            OperationKind::Install => "install",
            OperationKind::Deploy => "deploy",
            OperationKind::Undeploy => "undeploy",
            OperationKind::StartServer => "start-server",
            OperationKind::StopServer => "stop-server",
            OperationKind::StartAgent => "start-agent",
            OperationKind::StopAgent => "stop-agent",
            OperationKind::Start => "start",
            OperationKind::Stop => "stop",
        }
    }

    pub fn parse(name: &str) -> Result<Self, ValidationError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| ValidationError::UnknownOperation(name.to_string()))
    }

    /// 环境内的任务名，例如 `deployToLocal`、`startLocalServer`
    pub fn task_name(&self, environment: &str) -> String {
        let env = capitalize(environment);
        match self {
            OperationKind::Download => format!("download{env}"),
            OperationKind::Install => format!("install{env}"),
            OperationKind::Deploy => format!("deployTo{env}"),
            OperationKind::Undeploy => format!("undeployFrom{env}"),
            OperationKind::StartServer => format!("start{env}Server"),
            OperationKind::StopServer => format!("stop{env}Server"),
            OperationKind::StartAgent => format!("start{env}Agent"),
            OperationKind::StopAgent => format!("stop{env}Agent"),
            OperationKind::Start => format!("start{env}"),
            OperationKind::Stop => format!("stop{env}"),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 阶段状态
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// 单个操作的执行记录
#[derive(Clone, Debug, Serialize)]
pub struct OperationStage {
    pub kind: OperationKind,
    /// 任务名 (e.g., "deployToLocal")
    pub task: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    pub message: Option<String>,
}

impl OperationStage {
    pub fn new(kind: OperationKind, task: String) -> Self {
        Self {
            kind,
            task,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    pub fn finish(&mut self, success: bool, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = if success {
            StageStatus::Success
        } else {
            StageStatus::Failed
        };
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StageStatus::Skipped;
        self.message = reason;
    }
}

/// 一个环境上一次运行的报告
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub environment: String,
    pub target: OperationKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<OperationStage>,
}

impl RunReport {
    pub fn new(environment: impl Into<String>, target: OperationKind) -> Self {
        Self {
            environment: environment.into(),
            target,
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
        }
    }

    pub fn complete(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> bool {
        !self.stages.iter().any(|s| s.status == StageStatus::Failed)
    }

    /// 按执行顺序列出某状态的操作
    pub fn kinds_with_status(&self, status: StageStatus) -> Vec<OperationKind> {
        self.stages
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.kind)
            .collect()
    }
}
