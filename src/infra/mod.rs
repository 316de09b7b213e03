//! 基础设施模块
//!
//! 封装外部依赖（命令执行、docker、TCP 探测）

pub mod command;
pub mod docker;
pub mod net;

pub use command::CommandRunner;
pub use docker::{ContainerRuntime, DockerCli};
