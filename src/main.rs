//! TeamCity 环境部署代理
//!
//! Usage:
//! - List environments: `tc-deploy-agent list`
//! - Show plan: `tc-deploy-agent plan start -e local`
//! - Deploy plugins: `tc-deploy-agent run deploy`
//! - Generate descriptor: `tc-deploy-agent descriptor --model plugin.toml --version 2024.03`
//! - Generate agent descriptor: `tc-deploy-agent agent-descriptor --model agent.toml`

use clap::Parser;
use std::process::ExitCode;

use tc_deploy_agent::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tc_deploy_agent::init_tracing();
    cli::run(cli).await
}
