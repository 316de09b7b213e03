//! 插件描述文件模型：服务器插件与 Agent 插件

use serde::Deserialize;

use crate::error::ValidationError;

/// 服务器插件描述文件内容，可从 TOML 加载
///
/// 缺省字段读为空值，生成时再提示
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct DescriptorModel {
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub description: Option<String>,
    pub download_url: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub vendor: Vendor,
    pub min_build: Option<String>,
    pub max_build: Option<String>,
    pub use_separate_classloader: Option<bool>,
    pub allow_runtime_reload: Option<bool>,
    pub node_responsibilities_aware: Option<bool>,
    /// 按声明顺序保存的参数
    #[serde(deserialize_with = "deserialize_parameters")]
    pub parameters: Vec<(String, String)>,
    pub dependencies: Dependencies,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Vendor {
    #[serde(default)]
    pub name: String,
    pub url: Option<String>,
    pub logo: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Dependencies {
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

impl Dependencies {
    pub fn has_dependencies(&self) -> bool {
        !self.plugins.is_empty() || !self.tools.is_empty()
    }
}

impl DescriptorModel {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// 设置参数；已存在的名称覆盖原值并保持位置
    pub fn parameter(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.parameters.push((name, value)),
        }
        self
    }

    pub fn has_parameters(&self) -> bool {
        !self.parameters.is_empty()
    }
}

/// Agent 插件描述文件内容
///
/// `plugin-deployment` 与 `tool-deployment` 只能二选一
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct AgentDescriptorModel {
    pub plugin_deployment: Option<PluginDeployment>,
    pub tool_deployment: Option<ToolDeployment>,
    pub dependencies: Dependencies,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct PluginDeployment {
    pub use_separate_classloader: Option<bool>,
    /// 解包后需要设置可执行权限的相对路径
    pub executable_files: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ToolDeployment {
    pub executable_files: Vec<String>,
}

/// Agent 插件的部署方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentDeployment<'a> {
    Plugin(&'a PluginDeployment),
    Tool(&'a ToolDeployment),
}

impl AgentDeployment<'_> {
    pub fn executable_files(&self) -> &[String] {
        match self {
            AgentDeployment::Plugin(deployment) => &deployment.executable_files,
            AgentDeployment::Tool(deployment) => &deployment.executable_files,
        }
    }
}

impl AgentDescriptorModel {
    pub fn deployment(&self) -> Result<Option<AgentDeployment<'_>>, ValidationError> {
        match (&self.plugin_deployment, &self.tool_deployment) {
            (Some(_), Some(_)) => Err(ValidationError::ConflictingDeployment),
            (Some(plugin), None) => Ok(Some(AgentDeployment::Plugin(plugin))),
            (None, Some(tool)) => Ok(Some(AgentDeployment::Tool(tool))),
            (None, None) => Ok(None),
        }
    }
}

/// TOML 表按文档顺序读取为有序列表
fn deserialize_parameters<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct ParametersVisitor;

    impl<'de> serde::de::Visitor<'de> for ParametersVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a table of parameter names to values")
        }

        fn visit_map<A: serde::de::MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut parameters = Vec::new();
            while let Some((name, value)) = map.next_entry::<String, String>()? {
                parameters.push((name, value));
            }
            Ok(parameters)
        }
    }

    deserializer.deserialize_map(ParametersVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_toml() {
        let model: DescriptorModel = toml::from_str(
            r#"
            name = "example"
            display-name = "Example Plugin"
            version = "1.2.3"
            allow-runtime-reload = true

            [vendor]
            name = "Acme"
            url = "https://acme.example"

            [parameters]
            zeta = "last"
            alpha = "first"

            [dependencies]
            plugins = ["other-plugin"]
            "#,
        )
        .unwrap();

        assert_eq!(model.display_name, "Example Plugin");
        assert_eq!(model.vendor.url.as_deref(), Some("https://acme.example"));
        assert_eq!(model.allow_runtime_reload, Some(true));
        assert_eq!(model.use_separate_classloader, None);
        assert_eq!(
            model.parameters,
            vec![
                ("zeta".to_string(), "last".to_string()),
                ("alpha".to_string(), "first".to_string())
            ]
        );
        assert!(model.dependencies.has_dependencies());
    }

    #[test]
    fn test_missing_fields_read_as_empty() {
        let model: DescriptorModel = toml::from_str("version = \"1.0\"").unwrap();
        assert_eq!(model.name, "");
        assert_eq!(model.vendor.name, "");
        assert!(model.parameters.is_empty());
    }

    #[test]
    fn test_agent_model_deployment() {
        let model: AgentDescriptorModel = toml::from_str(
            r#"
            [tool-deployment]
            executable-files = ["bin/tool.sh"]

            [dependencies]
            tools = ["maven"]
            "#,
        )
        .unwrap();
        let deployment = model.deployment().unwrap().unwrap();
        assert!(matches!(deployment, AgentDeployment::Tool(_)));
        assert_eq!(deployment.executable_files(), ["bin/tool.sh".to_string()]);

        assert_eq!(AgentDescriptorModel::default().deployment(), Ok(None));
    }

    #[test]
    fn test_agent_model_rejects_both_deployments() {
        let model: AgentDescriptorModel = toml::from_str(
            r#"
            [plugin-deployment]
            use-separate-classloader = true

            [tool-deployment]
            "#,
        )
        .unwrap();
        assert_eq!(model.deployment(), Err(ValidationError::ConflictingDeployment));
    }

    #[test]
    fn test_parameter_overwrites_in_place() {
        let mut model = DescriptorModel::new("p", "P", "1.0");
        model.parameter("a", "1").parameter("b", "2").parameter("a", "3");
        assert_eq!(
            model.parameters,
            vec![("a".to_string(), "3".to_string()), ("b".to_string(), "2".to_string())]
        );
    }
}
