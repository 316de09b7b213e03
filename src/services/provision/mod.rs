//! 环境后端
//!
//! 本地安装与 Docker 容器两种环境通过 [`ProvisioningBackend`] 统一调度，
//! 部署与卸载逻辑与后端无关。

pub mod docker;
pub mod local;

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::environment::{Environment, EnvironmentKind};
use crate::error::LifecycleResult;
use crate::infra::docker::ContainerRuntime;
use crate::services::lifecycle::context::OperationContext;

pub use docker::DockerBackend;
pub use local::LocalBackend;

/// 运行时角色
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Server,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Agent => "agent",
        }
    }
}

/// 环境后端
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// 下载发行包，默认无操作
    async fn download(&self, _ctx: &OperationContext) -> LifecycleResult<()> {
        Ok(())
    }

    /// 安装或检查运行所需的资源
    async fn provision(&self, ctx: &OperationContext) -> LifecycleResult<()>;

    async fn start_runtime(&self, ctx: &OperationContext, role: Role) -> LifecycleResult<()>;

    async fn stop_runtime(&self, ctx: &OperationContext, role: Role) -> LifecycleResult<()>;
}

/// 按环境类型选择后端
pub fn backend_for(environment: &Environment, runtime: Arc<dyn ContainerRuntime>) -> Arc<dyn ProvisioningBackend> {
    match &environment.kind {
        EnvironmentKind::Local(settings) => Arc::new(LocalBackend::new(settings.clone())),
        EnvironmentKind::Container(settings) => Arc::new(DockerBackend::new(settings.clone(), runtime)),
    }
}
