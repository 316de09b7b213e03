//! 服务层模块
//!
//! 包含核心业务逻辑

pub mod descriptor;
pub mod hot_reload;
pub mod lifecycle;
pub mod provision;
pub mod shutdown;
