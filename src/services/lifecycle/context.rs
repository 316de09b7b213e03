//! 操作上下文
//!
//! 单个生命周期操作的执行上下文，包含环境和任务名

use std::sync::Arc;

use crate::domain::environment::Environment;
use crate::domain::lifecycle::OperationKind;
use crate::infra::command::CommandRunner;
use crate::services::hot_reload::HotReloadClient;

/// 操作执行上下文
#[derive(Clone, Debug)]
pub struct OperationContext {
    /// 目标环境
    pub environment: Arc<Environment>,
    /// 操作类型
    pub kind: OperationKind,
    /// 任务名，写入日志的 `task` 字段
    pub task: String,
}

impl OperationContext {
    pub fn new(environment: Arc<Environment>, kind: OperationKind) -> Self {
        let task = kind.task_name(&environment.name);
        Self {
            environment,
            kind,
            task,
        }
    }

    /// 针对本环境管理端点的热重载客户端
    pub fn hot_reload(&self) -> HotReloadClient {
        HotReloadClient::new(
            self.environment.data_dir.clone(),
            self.environment.admin.clone(),
            self.task.clone(),
        )
    }

    /// 记录外部命令输出
    pub fn log_output(&self, output: &std::process::Output) {
        CommandRunner::log_output(&self.task, output);
    }
}
