//! 配置模块
//!
//! 配置文件解析与环境变量覆盖

pub mod env;
pub mod environments;

pub use env::EnvOverrides;
pub use environments::EnvironmentsConfig;
