//! 插件部署与卸载
//!
//! 两种环境共用：插件目录都在宿主机的数据目录下。
//! 2018.2 及以上版本在复制前后通过热重载卸载和重新加载插件。

use tokio::fs;
use tracing::{debug, info};

use super::context::OperationContext;
use crate::domain::environment::deployed_path;
use crate::domain::version::VERSION_2018_2;
use crate::error::{LifecycleError, LifecycleResult};

/// 部署插件到环境的插件目录
pub async fn deploy(ctx: &OperationContext) -> LifecycleResult<()> {
    let env = &ctx.environment;
    if env.version.equal_or_greater_than(&VERSION_2018_2) {
        let client = ctx.hot_reload();
        let outcome = client.disable(&env.plugins).await;
        copy_plugins(ctx).await?;
        client.enable(&env.plugins, &outcome).await;
    } else {
        copy_plugins(ctx).await?;
    }
    Ok(())
}

/// 从环境的插件目录移除插件，不存在的文件忽略
pub async fn undeploy(ctx: &OperationContext) -> LifecycleResult<()> {
    let env = &ctx.environment;
    if env.version.equal_or_greater_than(&VERSION_2018_2) {
        // 卸载后不再重新加载
        ctx.hot_reload().disable(&env.plugins).await;
    }

    let plugins_dir = env.plugins_dir();
    for artifact in &env.plugins {
        let path = deployed_path(&plugins_dir, artifact);
        match fs::remove_file(&path).await {
            Ok(()) => info!(task = %ctx.task, plugin = %artifact.name, "Plugin removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(task = %ctx.task, plugin = %artifact.name, "Plugin not deployed");
            }
            Err(e) => {
                return Err(LifecycleError::io(format!("Failed to remove {}", path.display()), e));
            }
        }
    }
    Ok(())
}

async fn copy_plugins(ctx: &OperationContext) -> LifecycleResult<()> {
    let env = &ctx.environment;
    let plugins_dir = env.plugins_dir();
    fs::create_dir_all(&plugins_dir)
        .await
        .map_err(|e| LifecycleError::io(format!("Failed to create {}", plugins_dir.display()), e))?;

    for artifact in &env.plugins {
        let target = deployed_path(&plugins_dir, artifact);
        fs::copy(&artifact.path, &target).await.map_err(|e| {
            LifecycleError::io(format!("Failed to copy plugin {}", artifact.path.display()), e)
        })?;
        info!(task = %ctx.task, plugin = %artifact.name, to = %plugins_dir.display(), "Plugin deployed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::environment::fixtures::local_environment;
    use crate::domain::environment::{AdminEndpoint, Environment, PluginArtifact};
    use crate::domain::lifecycle::OperationKind;
    use crate::services::hot_reload::SUPER_USER_TOKEN_PATH;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// 带一个插件产物的环境，管理端点指向 mock 服务器
    fn environment(root: &Path, version: &str, server: &MockServer) -> Environment {
        let artifact = root.join("build").join("my-plugin.zip");
        std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
        std::fs::write(&artifact, b"new").unwrap();

        let mut env = local_environment("local", version, &root.join("data"));
        env.plugins = vec![PluginArtifact::from_path(artifact)];
        env.admin = AdminEndpoint::new("127.0.0.1", server.address().port());

        let token = env.data_dir.join(SUPER_USER_TOKEN_PATH);
        std::fs::create_dir_all(token.parent().unwrap()).unwrap();
        std::fs::write(token, "12345").unwrap();
        env
    }

    fn context(env: Environment, kind: OperationKind) -> OperationContext {
        OperationContext::new(Arc::new(env), kind)
    }

    async fn mount(server: &MockServer, enabled: &str, body: &str, times: u64) {
        Mock::given(method("POST"))
            .and(query_param("enabled", enabled))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_deploy_before_runtime_reload_only_copies() {
        let server = MockServer::start().await;
        mount(&server, "false", "", 0).await;
        mount(&server, "true", "", 0).await;
        let dir = TempDir::new().unwrap();
        let env = environment(dir.path(), "2018.1", &server);
        std::fs::create_dir_all(env.plugins_dir()).unwrap();
        std::fs::write(env.plugins_dir().join("my-plugin.zip"), b"old").unwrap();
        let plugins_dir = env.plugins_dir();

        deploy(&context(env, OperationKind::Deploy)).await.unwrap();
        assert_eq!(std::fs::read(plugins_dir.join("my-plugin.zip")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_deploy_reloads_deployed_plugin() {
        let server = MockServer::start().await;
        mount(&server, "false", "<response>Plugin unloaded successfully</response>", 1).await;
        mount(&server, "true", "<response>Plugin loaded successfully</response>", 1).await;
        let dir = TempDir::new().unwrap();
        let env = environment(dir.path(), "2024.03", &server);
        std::fs::create_dir_all(env.plugins_dir()).unwrap();
        std::fs::write(env.plugins_dir().join("my-plugin.zip"), b"old").unwrap();
        let plugins_dir = env.plugins_dir();

        deploy(&context(env, OperationKind::Deploy)).await.unwrap();
        assert_eq!(std::fs::read(plugins_dir.join("my-plugin.zip")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_deploy_failed_unload_skips_enable() {
        let server = MockServer::start().await;
        mount(&server, "false", "<response>Plugin cannot be unloaded</response>", 1).await;
        mount(&server, "true", "", 0).await;
        let dir = TempDir::new().unwrap();
        let env = environment(dir.path(), "2024.03", &server);
        std::fs::create_dir_all(env.plugins_dir()).unwrap();
        std::fs::write(env.plugins_dir().join("my-plugin.zip"), b"old").unwrap();

        deploy(&context(env, OperationKind::Deploy)).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_deploy_enables_new_plugin() {
        let server = MockServer::start().await;
        mount(&server, "false", "", 0).await;
        mount(&server, "true", "<response>Plugin loaded successfully</response>", 1).await;
        let dir = TempDir::new().unwrap();
        let env = environment(dir.path(), "2024.03", &server);

        deploy(&context(env, OperationKind::Deploy)).await.unwrap();
    }

    #[tokio::test]
    async fn test_deploy_missing_artifact_fails() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let mut env = environment(dir.path(), "2018.1", &server);
        env.plugins.push(PluginArtifact::from_path(dir.path().join("missing.zip")));

        let err = deploy(&context(env, OperationKind::Deploy)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Io { .. }));
    }

    #[tokio::test]
    async fn test_undeploy_removes_plugins() {
        let server = MockServer::start().await;
        mount(&server, "false", "<response>Plugin unloaded successfully</response>", 1).await;
        mount(&server, "true", "", 0).await;
        let dir = TempDir::new().unwrap();
        let mut env = environment(dir.path(), "2024.03", &server);
        env.plugins.push(PluginArtifact::from_path("never-deployed.zip"));
        std::fs::create_dir_all(env.plugins_dir()).unwrap();
        std::fs::write(env.plugins_dir().join("my-plugin.zip"), b"old").unwrap();
        let plugins_dir = env.plugins_dir();

        undeploy(&context(env, OperationKind::Undeploy)).await.unwrap();
        assert!(!plugins_dir.join("my-plugin.zip").exists());
    }
}
