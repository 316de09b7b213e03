//! 命令行入口
//!
//! `list` 列出环境，`plan` 打印执行顺序，`run` 执行操作，
//! `descriptor` 和 `agent-descriptor` 生成插件描述文件。

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::config::env::constants::DEFAULT_CONFIG_FILE;
use crate::config::env::CONFIG_PATH_VAR;
use crate::config::{EnvOverrides, EnvironmentsConfig};
use crate::domain::descriptor::{AgentDescriptorModel, DescriptorModel};
use crate::domain::environment::{Environment, EnvironmentKind};
use crate::domain::lifecycle::{OperationKind, RunReport};
use crate::domain::version::TeamCityVersion;
use crate::error::{ConfigError, DescriptorError, LifecycleError, ValidationError};
use crate::infra::docker::DockerCli;
use crate::services::descriptor::{
    generate_agent_descriptor, generate_descriptor, render_descriptor, AgentDescriptorGenerator, RenderedDescriptor,
};
use crate::services::lifecycle::graph::OperationGraph;
use crate::services::lifecycle::runner::stage_summary;
use crate::services::lifecycle::{run_all, RunOutcome};

/// TeamCity 插件环境部署工具
#[derive(Parser, Debug)]
#[command(name = "tc-deploy-agent", version, about, long_about = None)]
pub struct Cli {
    /// 环境配置文件
    #[arg(long, env = CONFIG_PATH_VAR, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 列出已配置的环境
    List,
    /// 打印操作的执行顺序
    Plan {
        /// 操作名，例如 deploy、start-server、stop
        operation: String,
        /// 目标环境，缺省为全部
        #[arg(short = 'e', long = "environment")]
        environments: Vec<String>,
    },
    /// 在环境上执行操作
    Run {
        operation: String,
        #[arg(short = 'e', long = "environment")]
        environments: Vec<String>,
        /// 以 JSON 输出运行报告
        #[arg(long)]
        json: bool,
    },
    /// 生成 teamcity-plugin.xml
    Descriptor {
        /// 描述文件模型 (TOML)
        #[arg(long)]
        model: PathBuf,
        /// 目标 TeamCity 版本
        #[arg(long)]
        version: String,
        #[arg(long)]
        allow_snapshots: bool,
        /// 输出路径，缺省写到 stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// 生成 Agent 插件的 teamcity-plugin.xml
    AgentDescriptor {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// 命令行错误
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("Failed to read descriptor model {path}: {source}")]
    Model {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse descriptor model: {0}")]
    ModelParse(#[from] toml::de::Error),

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON 输出中的单个环境
#[derive(Serialize)]
struct RunSummary<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    succeeded: bool,
    error: Option<String>,
}

/// 执行命令并返回退出码
pub async fn run(cli: Cli) -> ExitCode {
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode, CliError> {
    match cli.command {
        Commands::List => {
            for line in list_lines(&load_environments(&cli.config)?) {
                println!("{line}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Plan {
            operation,
            environments,
        } => {
            let target = OperationKind::parse(&operation)?;
            let selected = select(load_environments(&cli.config)?, &environments)?;
            for env in &selected {
                let plan = OperationGraph::for_environment(&env.name).plan(target)?;
                let tasks: Vec<String> = plan.iter().map(|k| k.task_name(&env.name)).collect();
                println!("{}: {}", env.name, tasks.join(" -> "));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            operation,
            environments,
            json,
        } => {
            let target = OperationKind::parse(&operation)?;
            let selected = select(load_environments(&cli.config)?, &environments)?;
            let selected: Vec<Arc<Environment>> = selected.into_iter().map(Arc::new).collect();
            let outcomes = run_all(selected, target, Arc::new(DockerCli::new())).await;
            print_outcomes(&outcomes, json)?;
            if outcomes.iter().all(RunOutcome::succeeded) {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Descriptor {
            model,
            version,
            allow_snapshots,
            output,
        } => {
            let version = TeamCityVersion::parse(&version, allow_snapshots)?;
            let model: DescriptorModel = load_model(&model)?;
            let rendered = server_descriptor(&model, &version, output.as_deref())?;
            if output.is_none() {
                print!("{}", rendered.xml);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::AgentDescriptor { model, output } => {
            let model: AgentDescriptorModel = load_model(&model)?;
            match output {
                Some(path) => generate_agent_descriptor(&model, &path)?,
                None => print!("{}", AgentDescriptorGenerator::new(&model).to_xml()?),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_environments(path: &Path) -> Result<Vec<Environment>, CliError> {
    let config = EnvironmentsConfig::load(path)?;
    let environments = config.resolve(&EnvOverrides::from_env())?;
    info!(path = %path.display(), count = environments.len(), "Environments loaded");
    Ok(environments)
}

/// 生成服务器插件描述；两种输出方式都会记录警告
fn server_descriptor(
    model: &DescriptorModel,
    version: &TeamCityVersion,
    output: Option<&Path>,
) -> Result<RenderedDescriptor, CliError> {
    let rendered = match output {
        Some(path) => generate_descriptor(model, version, path)?,
        None => render_descriptor(model, version)?,
    };
    Ok(rendered)
}

fn load_model<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let content = std::fs::read_to_string(path).map_err(|source| CliError::Model {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// 按名称选择环境，未指定时返回全部
pub fn select(environments: Vec<Environment>, names: &[String]) -> Result<Vec<Environment>, ValidationError> {
    if names.is_empty() {
        return Ok(environments);
    }
    if let Some(unknown) = names.iter().find(|n| !environments.iter().any(|e| &e.name == *n)) {
        return Err(ValidationError::UnknownEnvironment(unknown.clone()));
    }
    Ok(environments
        .into_iter()
        .filter(|e| names.contains(&e.name))
        .collect())
}

fn list_lines(environments: &[Environment]) -> Vec<String> {
    environments
        .iter()
        .map(|env| {
            let kind = match &env.kind {
                EnvironmentKind::Local(settings) => format!("local home={}", settings.home_dir.display()),
                EnvironmentKind::Container(settings) => format!("docker server={}", settings.server_image_ref()),
            };
            format!(
                "{} version={} data={} admin={} {}",
                env.name,
                env.version,
                env.data_dir.display(),
                env.admin.base_url(),
                kind
            )
        })
        .collect()
}

fn print_outcomes(outcomes: &[RunOutcome], json: bool) -> Result<(), CliError> {
    if json {
        let summaries: Vec<RunSummary<'_>> = outcomes
            .iter()
            .map(|o| RunSummary {
                report: &o.report,
                succeeded: o.succeeded(),
                error: o.error.as_ref().map(ToString::to_string),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    for outcome in outcomes {
        println!("\n=== Stage Summary: {} ===", outcome.report.environment);
        for line in stage_summary(&outcome.report) {
            println!("{line}");
        }
        if let Some(e) = &outcome.error {
            println!("Error: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::environment::fixtures::{container_environment, local_environment};

    fn environments() -> Vec<Environment> {
        vec![
            local_environment("local", "2024.03", Path::new("/data/local")),
            container_environment("docker", "2023.11", Path::new("/data/docker")),
        ]
    }

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "tc-deploy-agent",
            "--config",
            "envs.toml",
            "run",
            "deploy",
            "-e",
            "local",
            "-e",
            "docker",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("envs.toml"));
        match cli.command {
            Commands::Run {
                operation,
                environments,
                json,
            } => {
                assert_eq!(operation, "deploy");
                assert_eq!(environments, vec!["local", "docker"]);
                assert!(json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_config_path_reads_env_var() {
        use clap::CommandFactory;

        let command = Cli::command();
        let config = command
            .get_arguments()
            .find(|arg| arg.get_id() == "config")
            .unwrap();
        assert_eq!(config.get_env(), Some(std::ffi::OsStr::new(CONFIG_PATH_VAR)));
    }

    #[test]
    fn test_parse_descriptor_command() {
        let cli = Cli::try_parse_from([
            "tc-deploy-agent",
            "descriptor",
            "--model",
            "plugin.toml",
            "--version",
            "2021.1-SNAPSHOT",
            "--allow-snapshots",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Descriptor {
                allow_snapshots: true,
                output: None,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_agent_descriptor_command() {
        let cli = Cli::try_parse_from([
            "tc-deploy-agent",
            "agent-descriptor",
            "--model",
            "agent.toml",
            "--output",
            "build/teamcity-plugin.xml",
        ])
        .unwrap();
        match cli.command {
            Commands::AgentDescriptor { model, output } => {
                assert_eq!(model, PathBuf::from("agent.toml"));
                assert_eq!(output, Some(PathBuf::from("build/teamcity-plugin.xml")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn dependent_model() -> DescriptorModel {
        let mut model = DescriptorModel::new("example", "Example", "1.0");
        model.description = Some("Example plugin".to_string());
        model.vendor.name = "Acme".to_string();
        model.vendor.url = Some("https://acme.example".to_string());
        model.dependencies.plugins.push("other-plugin".to_string());
        model
    }

    #[test]
    fn test_stdout_descriptor_warns_gated_features() {
        let version = TeamCityVersion::parse("8.1", false).unwrap();
        let rendered = server_descriptor(&dependent_model(), &version, None).unwrap();
        assert_eq!(
            rendered.warnings,
            vec!["Plugin descriptor does not support dependencies for version 8.1".to_string()]
        );
        assert!(!rendered.xml.contains("<dependencies"));
    }

    #[test]
    fn test_file_descriptor_warns_like_stdout() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("teamcity-plugin.xml");
        let version = TeamCityVersion::parse("8.1", false).unwrap();
        let to_file = server_descriptor(&dependent_model(), &version, Some(&path)).unwrap();
        let to_stdout = server_descriptor(&dependent_model(), &version, None).unwrap();
        assert_eq!(to_file.warnings, to_stdout.warnings);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), to_stdout.xml);
    }

    #[test]
    fn test_select_environments() {
        let all = select(environments(), &[]).unwrap();
        assert_eq!(all.len(), 2);

        let one = select(environments(), &["docker".to_string()]).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name, "docker");

        let err = select(environments(), &["missing".to_string()]).unwrap_err();
        assert_eq!(err, ValidationError::UnknownEnvironment("missing".to_string()));
    }

    #[test]
    fn test_list_lines() {
        let lines = list_lines(&environments());
        assert!(lines[0].starts_with("local version=2024.03"));
        assert!(lines[0].contains("local home=/data/local/home"));
        assert!(lines[1].contains("docker server=jetbrains/teamcity-server:2023.11"));
    }
}
