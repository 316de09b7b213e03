//! 领域模型模块
//!
//! 纯数据结构，不涉及网络与进程

pub mod container;
pub mod descriptor;
pub mod environment;
pub mod lifecycle;
pub mod version;

// Re-exports for convenience
pub use container::ContainerConfiguration;
pub use descriptor::DescriptorModel;
pub use environment::{
    AdminEndpoint, ContainerSettings, Environment, EnvironmentKind, LocalSettings, PluginArtifact,
};
pub use lifecycle::{OperationKind, OperationStage, RunReport, StageStatus};
pub use version::TeamCityVersion;
