//! 本地安装环境
//!
//! - 下载：HTTP 下载发行包，已存在时跳过
//! - 安装：`tar` 解压到安装目录并去掉顶层目录
//! - 启停：调用安装目录下的 `teamcity-server` / `agent` 脚本，退出码只记录

use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{ProvisioningBackend, Role};
use crate::domain::environment::LocalSettings;
use crate::error::{LifecycleError, LifecycleResult, ValidationError};
use crate::infra::command::{CommandRunner, DEFAULT_COMMAND_TIMEOUT};
use crate::services::lifecycle::context::OperationContext;
use crate::services::shutdown::wait_for_shutdown;

const AGENT_PROPERTIES: &str = "buildAgent.properties";

/// 本地安装后端
pub struct LocalBackend {
    settings: LocalSettings,
    client: Client,
    command_timeout: Duration,
}

impl LocalBackend {
    pub fn new(settings: LocalSettings) -> Self {
        Self {
            settings,
            client: Client::new(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// 校验安装目录和 Java 目录，返回 Java 目录
    fn validate(&self) -> Result<&Path, ValidationError> {
        valid_directory("homeDir", Some(self.settings.home_dir.as_path()))?;
        valid_directory("javaHome", self.settings.java_home.as_deref())
    }

    fn server_script(&self) -> PathBuf {
        let name = if cfg!(windows) { "teamcity-server.bat" } else { "teamcity-server.sh" };
        self.settings.home_dir.join("bin").join(name)
    }

    fn agent_script(&self) -> PathBuf {
        let name = if cfg!(windows) { "agent.bat" } else { "agent.sh" };
        self.settings.home_dir.join("buildAgent").join("bin").join(name)
    }

    /// 运行启停脚本，输出写入日志
    async fn run_script(
        &self,
        ctx: &OperationContext,
        role: Role,
        action: &str,
        envs: &[(&str, String)],
    ) -> LifecycleResult<()> {
        let script = match role {
            Role::Server => self.server_script(),
            Role::Agent => self.agent_script(),
        };
        let program = script.to_string_lossy().to_string();
        info!(task = %ctx.task, script = %program, action, "Running {} script", role.as_str());

        let output = CommandRunner::run_with_env(
            &program,
            &[action],
            envs,
            &self.settings.home_dir,
            self.command_timeout,
        )
        .await?;
        ctx.log_output(&output);
        Ok(())
    }

    fn server_env(&self, ctx: &OperationContext, java_home: &Path) -> Vec<(&'static str, String)> {
        let env = &ctx.environment;
        vec![
            ("JAVA_HOME", java_home.to_string_lossy().to_string()),
            ("TEAMCITY_DATA_PATH", env.data_dir.to_string_lossy().to_string()),
            ("TEAMCITY_SERVER_OPTS", env.server_options_line()),
        ]
    }

    fn agent_env(&self, ctx: &OperationContext, java_home: &Path) -> Vec<(&'static str, String)> {
        let env = &ctx.environment;
        vec![
            ("JAVA_HOME", java_home.to_string_lossy().to_string()),
            (
                "CONFIG_FILE",
                env.agent_config_dir().join(AGENT_PROPERTIES).to_string_lossy().to_string(),
            ),
            ("LOG_DIR", env.agent_logs_dir().to_string_lossy().to_string()),
            ("TEAMCITY_AGENT_OPTS", env.agent_options_line()),
        ]
    }

    /// 首次启动 Agent 时从安装目录复制默认配置
    async fn seed_agent_config(&self, ctx: &OperationContext) -> LifecycleResult<()> {
        let config_dir = ctx.environment.agent_config_dir();
        if fs::try_exists(config_dir.join(AGENT_PROPERTIES)).await.unwrap_or(false) {
            return Ok(());
        }
        fs::create_dir_all(&config_dir)
            .await
            .map_err(|e| LifecycleError::io("Failed to create agent configuration directory", e))?;
        let source = self.settings.home_dir.join("buildAgent").join("conf");
        info!(task = %ctx.task, from = %source.display(), to = %config_dir.display(), "Seeding agent configuration");
        copy_dir(&source, &config_dir).await
    }
}

#[async_trait]
impl ProvisioningBackend for LocalBackend {
    async fn download(&self, ctx: &OperationContext) -> LifecycleResult<()> {
        let url = &self.settings.download_url;
        let dest = &self.settings.installer_file;
        if fs::try_exists(dest).await.unwrap_or(false) {
            info!(task = %ctx.task, path = %dest.display(), "Installer already downloaded");
            return Ok(());
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| LifecycleError::io("Failed to create downloads directory", e))?;
        }

        info!(task = %ctx.task, url = %url, "Downloading TeamCity");
        let size = download_file(&self.client, url, dest).await?;
        info!(task = %ctx.task, path = %dest.display(), size, "TeamCity downloaded");
        Ok(())
    }

    async fn provision(&self, ctx: &OperationContext) -> LifecycleResult<()> {
        let source = &self.settings.installer_file;
        let target = &self.settings.home_dir;
        info!(
            task = %ctx.task,
            "Installing TeamCity from {} into {}",
            source.display(),
            target.display()
        );
        fs::create_dir_all(target)
            .await
            .map_err(|e| LifecycleError::io("Failed to create TeamCity home directory", e))?;

        let source = absolute(source)?;
        let source = source.to_string_lossy();
        let output = CommandRunner::run_simple(
            "tar",
            &["-xzf", &source, "--strip-components=1", "-C", "."],
            target,
            self.command_timeout,
        )
        .await?;
        ctx.log_output(&output);
        if !output.status.success() {
            return Err(LifecycleError::io(
                format!("Failed to unpack {}", source),
                std::io::Error::other(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            ));
        }
        Ok(())
    }

    async fn start_runtime(&self, ctx: &OperationContext, role: Role) -> LifecycleResult<()> {
        let java_home = self.validate()?;
        match role {
            Role::Server => {
                fs::create_dir_all(&ctx.environment.data_dir)
                    .await
                    .map_err(|e| LifecycleError::io("Failed to create environment data directory", e))?;
                let envs = self.server_env(ctx, java_home);
                self.run_script(ctx, role, "start", &envs).await
            }
            Role::Agent => {
                self.seed_agent_config(ctx).await?;
                let envs = self.agent_env(ctx, java_home);
                self.run_script(ctx, role, "start", &envs).await
            }
        }
    }

    async fn stop_runtime(&self, ctx: &OperationContext, role: Role) -> LifecycleResult<()> {
        let java_home = self.validate()?;
        match role {
            Role::Server => {
                let envs = self.server_env(ctx, java_home);
                self.run_script(ctx, role, "stop", &envs).await?;
                let env = &ctx.environment;
                wait_for_shutdown(&ctx.task, &env.admin.host, env.admin.port, env.shutdown_timeout).await
            }
            Role::Agent => {
                let envs = self.agent_env(ctx, java_home);
                self.run_script(ctx, role, "stop", &envs).await
            }
        }
    }
}

fn valid_directory<'a>(property: &'static str, value: Option<&'a Path>) -> Result<&'a Path, ValidationError> {
    let path = value.ok_or(ValidationError::PropertyNotSet(property))?;
    if !path.exists() {
        return Err(ValidationError::MissingDirectory {
            property,
            path: path.to_path_buf(),
        });
    }
    if !path.is_dir() {
        return Err(ValidationError::NotADirectory {
            property,
            path: path.to_path_buf(),
        });
    }
    Ok(path)
}

fn absolute(path: &Path) -> LifecycleResult<PathBuf> {
    std::path::absolute(path).map_err(|e| LifecycleError::io(format!("Invalid path {}", path.display()), e))
}

/// 流式下载到临时文件，完成后改名
async fn download_file(client: &Client, url: &str, dest: &Path) -> LifecycleResult<u64> {
    let download_error = |message: String| LifecycleError::Download {
        url: url.to_string(),
        message,
    };

    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| download_error(e.to_string()))?;
    if !response.status().is_success() {
        return Err(download_error(format!("status {}", response.status())));
    }

    let partial = dest.with_extension("part");
    let mut file = fs::File::create(&partial)
        .await
        .map_err(|e| LifecycleError::io(format!("Failed to create {}", partial.display()), e))?;
    let mut size = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(|e| download_error(e.to_string()))? {
        file.write_all(&chunk)
            .await
            .map_err(|e| LifecycleError::io(format!("Failed to write {}", partial.display()), e))?;
        size += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| LifecycleError::io(format!("Failed to write {}", partial.display()), e))?;
    fs::rename(&partial, dest)
        .await
        .map_err(|e| LifecycleError::io(format!("Failed to move {}", partial.display()), e))?;
    debug!(url, size, "Download complete");
    Ok(size)
}

/// 递归复制目录内容
async fn copy_dir(source: &Path, target: &Path) -> LifecycleResult<()> {
    let mut pending = vec![(source.to_path_buf(), target.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to)
            .await
            .map_err(|e| LifecycleError::io(format!("Failed to create {}", to.display()), e))?;
        let mut entries = fs::read_dir(&from)
            .await
            .map_err(|e| LifecycleError::io(format!("Failed to read {}", from.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LifecycleError::io(format!("Failed to read {}", from.display()), e))?
        {
            let path = entry.path();
            let dest = to.join(entry.file_name());
            if path.is_dir() {
                pending.push((path, dest));
            } else {
                fs::copy(&path, &dest)
                    .await
                    .map_err(|e| LifecycleError::io(format!("Failed to copy {}", path.display()), e))?;
            }
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::environment::fixtures::local_environment;
    use crate::domain::environment::{AdminEndpoint, EnvironmentKind};
    use crate::domain::lifecycle::OperationKind;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// 写入记录调用参数和环境变量的假脚本
    fn fake_script(path: &Path, record: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let body = format!(
            "#!/bin/sh\necho \"$1|$JAVA_HOME|$TEAMCITY_DATA_PATH|$TEAMCITY_SERVER_OPTS|$CONFIG_FILE|$TEAMCITY_AGENT_OPTS\" >> {}\n",
            record.display()
        );
        std::fs::write(path, body).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        context: OperationContext,
        backend: LocalBackend,
    }

    fn fixture(kind: OperationKind) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let mut env = local_environment("local", "2024.03", &root.join("data"));
        env.server_options = vec!["-Dfoo=bar".to_string(), "-Xmx1g".to_string()];
        env.agent_options = vec!["-Dagent=1".to_string()];

        let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        env.admin = AdminEndpoint::new("127.0.0.1", unused.local_addr().unwrap().port());
        drop(unused);

        let java_home = root.join("jdk");
        std::fs::create_dir_all(&java_home).unwrap();
        let EnvironmentKind::Local(settings) = &mut env.kind else {
            unreachable!()
        };
        settings.home_dir = root.join("home");
        settings.java_home = Some(java_home);
        settings.installer_file = root.join("downloads").join("TeamCity-2024.03.tar.gz");
        let backend = LocalBackend::new(settings.clone()).with_command_timeout(Duration::from_secs(10));

        Fixture {
            _dir: dir,
            root,
            context: OperationContext::new(Arc::new(env), kind),
            backend,
        }
    }

    #[tokio::test]
    async fn test_start_server_runs_script_with_environment() {
        let f = fixture(OperationKind::StartServer);
        let record = f.root.join("record.txt");
        fake_script(&f.root.join("home/bin/teamcity-server.sh"), &record);

        f.backend.start_runtime(&f.context, Role::Server).await.unwrap();

        let line = std::fs::read_to_string(&record).unwrap();
        let fields: Vec<&str> = line.trim().split('|').collect();
        assert_eq!(fields[0], "start");
        assert_eq!(fields[1], f.root.join("jdk").to_string_lossy());
        assert_eq!(fields[2], f.root.join("data").to_string_lossy());
        assert_eq!(fields[3], "-Dfoo=bar -Xmx1g");
        assert!(f.root.join("data").is_dir());
    }

    #[tokio::test]
    async fn test_stop_server_waits_for_shutdown() {
        let f = fixture(OperationKind::StopServer);
        let record = f.root.join("record.txt");
        fake_script(&f.root.join("home/bin/teamcity-server.sh"), &record);

        f.backend.stop_runtime(&f.context, Role::Server).await.unwrap();
        assert!(std::fs::read_to_string(&record).unwrap().starts_with("stop|"));
    }

    #[tokio::test]
    async fn test_start_agent_seeds_configuration() {
        let f = fixture(OperationKind::StartAgent);
        let record = f.root.join("record.txt");
        fake_script(&f.root.join("home/buildAgent/bin/agent.sh"), &record);
        let conf = f.root.join("home/buildAgent/conf");
        std::fs::create_dir_all(&conf).unwrap();
        std::fs::write(conf.join(AGENT_PROPERTIES), "serverUrl=http://localhost:8111\n").unwrap();

        f.backend.start_runtime(&f.context, Role::Agent).await.unwrap();

        let seeded = f.root.join("data/agent/conf").join(AGENT_PROPERTIES);
        assert!(seeded.is_file());
        let line = std::fs::read_to_string(&record).unwrap();
        let fields: Vec<&str> = line.trim().split('|').collect();
        assert_eq!(fields[4], seeded.to_string_lossy());
        assert_eq!(fields[5], "-Dagent=1");

        // 已存在的配置不会被覆盖
        std::fs::write(&seeded, "name=custom\n").unwrap();
        f.backend.start_runtime(&f.context, Role::Agent).await.unwrap();
        assert_eq!(std::fs::read_to_string(&seeded).unwrap(), "name=custom\n");
    }

    #[tokio::test]
    async fn test_missing_home_dir_is_rejected() {
        let f = fixture(OperationKind::StartServer);
        let err = f.backend.start_runtime(&f.context, Role::Server).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Validation(ValidationError::MissingDirectory { property: "homeDir", .. })
        ));
    }

    #[tokio::test]
    async fn test_unset_java_home_is_rejected() {
        let f = fixture(OperationKind::StartServer);
        std::fs::create_dir_all(f.root.join("home")).unwrap();
        let mut settings = f.backend.settings.clone();
        settings.java_home = None;
        let backend = LocalBackend::new(settings);

        let err = backend.start_runtime(&f.context, Role::Server).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Validation(ValidationError::PropertyNotSet("javaHome"))
        ));
    }

    #[tokio::test]
    async fn test_java_home_must_be_directory() {
        let f = fixture(OperationKind::StartServer);
        std::fs::create_dir_all(f.root.join("home")).unwrap();
        let file = f.root.join("not-a-dir");
        std::fs::write(&file, "").unwrap();
        let mut settings = f.backend.settings.clone();
        settings.java_home = Some(file);
        let backend = LocalBackend::new(settings);

        let err = backend.start_runtime(&f.context, Role::Server).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Validation(ValidationError::NotADirectory { property: "javaHome", .. })
        ));
    }

    #[tokio::test]
    async fn test_install_unpacks_archive() {
        let f = fixture(OperationKind::Install);
        let staging = f.root.join("staging/TeamCity/bin");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("teamcity-server.sh"), "#!/bin/sh\n").unwrap();
        std::fs::create_dir_all(f.root.join("downloads")).unwrap();
        let archive = f.backend.settings.installer_file.to_string_lossy().to_string();
        let status = std::process::Command::new("tar")
            .args(["-czf", &archive, "-C"])
            .arg(f.root.join("staging"))
            .arg("TeamCity")
            .status()
            .unwrap();
        assert!(status.success());

        f.backend.provision(&f.context).await.unwrap();
        assert!(f.root.join("home/bin/teamcity-server.sh").is_file());
    }

    #[tokio::test]
    async fn test_download_skips_existing_installer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/TeamCity-2024.03.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let f = fixture(OperationKind::Download);
        let mut settings = f.backend.settings.clone();
        settings.download_url = format!("{}/TeamCity-2024.03.tar.gz", server.uri());
        let backend = LocalBackend::new(settings.clone());

        backend.download(&f.context).await.unwrap();
        assert_eq!(std::fs::read(&settings.installer_file).unwrap(), b"archive");

        backend.download(&f.context).await.unwrap();
    }

    #[tokio::test]
    async fn test_download_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let f = fixture(OperationKind::Download);
        let mut settings = f.backend.settings.clone();
        settings.download_url = format!("{}/missing.tar.gz", server.uri());
        let backend = LocalBackend::new(settings.clone());

        let err = backend.download(&f.context).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Download { .. }));
        assert!(!settings.installer_file.exists());
    }
}
