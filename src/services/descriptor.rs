//! 插件描述文件生成
//!
//! 服务器插件按目标服务器版本输出 `teamcity-plugin.xml`：低版本不支持的字段被省略，
//! 并通过 [`descriptor_warnings`] 提示。Agent 插件输出 `teamcity-agent-plugin.xml`。

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::path::Path;
use tracing::{info, warn};

use crate::domain::descriptor::{AgentDeployment, AgentDescriptorModel, Dependencies, DescriptorModel};
use crate::domain::version::{TeamCityVersion, VERSION_2018_2, VERSION_2020_1, VERSION_9_0};
use crate::error::DescriptorError;

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str = "urn:schemas-jetbrains-com:teamcity-plugin-v1-xml";
const AGENT_SCHEMA_LOCATION: &str = "urn:schemas-jetbrains-com:teamcity-agent-plugin-v1-xml";

/// 目标版本不支持、生成时被省略的字段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatedFeature {
    Dependencies,
    AllowRuntimeReload,
    NodeResponsibilitiesAware,
}

impl GatedFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatedFeature::Dependencies => "dependencies",
            GatedFeature::AllowRuntimeReload => "allowRuntimeReload",
            GatedFeature::NodeResponsibilitiesAware => "nodeResponsibilitiesAware",
        }
    }
}

/// 列出模型中请求了、但目标版本会省略的字段
pub fn gated_features(model: &DescriptorModel, version: &TeamCityVersion) -> Vec<GatedFeature> {
    let mut features = Vec::new();
    if version.less_than(&VERSION_9_0) && model.dependencies.has_dependencies() {
        features.push(GatedFeature::Dependencies);
    }
    if version.less_than(&VERSION_2018_2) && model.allow_runtime_reload.is_some() {
        features.push(GatedFeature::AllowRuntimeReload);
    }
    if version.less_than(&VERSION_2020_1) && model.node_responsibilities_aware.is_some() {
        features.push(GatedFeature::NodeResponsibilitiesAware);
    }
    features
}

/// 服务器插件描述中不应为空的字段
pub fn empty_values(model: &DescriptorModel) -> Vec<&'static str> {
    let blank = |value: Option<&str>| value.map_or(true, |v| v.trim().is_empty());
    let checks = [
        ("name", Some(model.name.as_str())),
        ("display name", Some(model.display_name.as_str())),
        ("version", Some(model.version.as_str())),
        ("vendor name", Some(model.vendor.name.as_str())),
        ("description", model.description.as_deref()),
        ("vendor url", model.vendor.url.as_deref()),
    ];
    checks
        .into_iter()
        .filter(|(_, value)| blank(*value))
        .map(|(field, _)| field)
        .collect()
}

/// 生成前需要提示的全部警告：被省略的字段和空值
pub fn descriptor_warnings(model: &DescriptorModel, version: &TeamCityVersion) -> Vec<String> {
    let gated = gated_features(model, version)
        .into_iter()
        .map(|feature| format!("Plugin descriptor does not support {} for version {}", feature.as_str(), version));
    let empty = empty_values(model)
        .into_iter()
        .map(|field| format!("Plugin descriptor value for {} must not be empty.", field));
    gated.chain(empty).collect()
}

/// 生成结果与已记录的警告
#[derive(Clone, Debug)]
pub struct RenderedDescriptor {
    pub xml: String,
    pub warnings: Vec<String>,
}

type XmlWriter = Writer<Vec<u8>>;

/// 描述文件生成器
pub struct DescriptorGenerator<'a> {
    model: &'a DescriptorModel,
    version: &'a TeamCityVersion,
}

impl<'a> DescriptorGenerator<'a> {
    pub fn new(model: &'a DescriptorModel, version: &'a TeamCityVersion) -> Self {
        Self { model, version }
    }

    /// 生成 XML 文本
    pub fn to_xml(&self) -> Result<String, DescriptorError> {
        let mut writer = document(SCHEMA_LOCATION, "teamcity-plugin")?;

        self.write_info(&mut writer)?;
        self.write_requirements(&mut writer)?;
        self.write_deployment(&mut writer)?;
        self.write_parameters(&mut writer)?;
        self.write_gated_dependencies(&mut writer)?;

        write(&mut writer, Event::End(BytesEnd::new("teamcity-plugin")))?;
        finish(writer)
    }

    fn write_info(&self, writer: &mut XmlWriter) -> Result<(), DescriptorError> {
        let model = self.model;
        start(writer, "info")?;
        text_element(writer, "name", &model.name)?;
        text_element(writer, "display-name", &model.display_name)?;
        text_element(writer, "version", &model.version)?;
        optional_element(writer, "description", model.description.as_deref())?;
        optional_element(writer, "download-url", model.download_url.as_deref())?;
        optional_element(writer, "email", model.email.as_deref())?;

        start(writer, "vendor")?;
        text_element(writer, "name", &model.vendor.name)?;
        optional_element(writer, "url", model.vendor.url.as_deref())?;
        optional_element(writer, "logo", model.vendor.logo.as_deref())?;
        end(writer, "vendor")?;

        end(writer, "info")
    }

    fn write_requirements(&self, writer: &mut XmlWriter) -> Result<(), DescriptorError> {
        let mut attributes = Vec::new();
        if let Some(min) = &self.model.min_build {
            attributes.push(("min-build", min.as_str()));
        }
        if let Some(max) = &self.model.max_build {
            attributes.push(("max-build", max.as_str()));
        }
        empty_with_attributes(writer, "requirements", &attributes)
    }

    fn write_deployment(&self, writer: &mut XmlWriter) -> Result<(), DescriptorError> {
        let model = self.model;
        let mut attributes = Vec::new();
        if let Some(value) = model.use_separate_classloader {
            attributes.push(("use-separate-classloader", bool_str(value)));
        }
        if let Some(value) = model.allow_runtime_reload {
            if self.version.equal_or_greater_than(&VERSION_2018_2) {
                attributes.push(("allow-runtime-reload", bool_str(value)));
            }
        }
        if let Some(value) = model.node_responsibilities_aware {
            if self.version.equal_or_greater_than(&VERSION_2020_1) {
                attributes.push(("node-responsibilities-aware", bool_str(value)));
            }
        }
        empty_with_attributes(writer, "deployment", &attributes)
    }

    fn write_parameters(&self, writer: &mut XmlWriter) -> Result<(), DescriptorError> {
        if !self.model.has_parameters() {
            return Ok(());
        }
        start(writer, "parameters")?;
        for (name, value) in &self.model.parameters {
            let mut element = BytesStart::new("parameter");
            element.push_attribute(("name", name.as_str()));
            write(writer, Event::Start(element))?;
            write(writer, Event::Text(BytesText::new(value)))?;
            end(writer, "parameter")?;
        }
        end(writer, "parameters")
    }

    fn write_gated_dependencies(&self, writer: &mut XmlWriter) -> Result<(), DescriptorError> {
        if self.version.less_than(&VERSION_9_0) {
            return Ok(());
        }
        write_dependencies(writer, &self.model.dependencies)
    }
}

/// Agent 插件描述文件生成器
pub struct AgentDescriptorGenerator<'a> {
    model: &'a AgentDescriptorModel,
}

impl<'a> AgentDescriptorGenerator<'a> {
    pub fn new(model: &'a AgentDescriptorModel) -> Self {
        Self { model }
    }

    pub fn to_xml(&self) -> Result<String, DescriptorError> {
        let mut writer = document(AGENT_SCHEMA_LOCATION, "teamcity-agent-plugin")?;
        if let Some(deployment) = self.model.deployment()? {
            write_agent_deployment(&mut writer, deployment)?;
        }
        write_dependencies(&mut writer, &self.model.dependencies)?;
        write(&mut writer, Event::End(BytesEnd::new("teamcity-agent-plugin")))?;
        finish(writer)
    }

    pub fn write_to(&self, path: &Path) -> Result<(), DescriptorError> {
        write_file(path, &self.to_xml()?)
    }
}

fn write_agent_deployment(writer: &mut XmlWriter, deployment: AgentDeployment<'_>) -> Result<(), DescriptorError> {
    let name = match deployment {
        AgentDeployment::Plugin(_) => "plugin-deployment",
        AgentDeployment::Tool(_) => "tool-deployment",
    };
    let mut element = BytesStart::new(name);
    if let AgentDeployment::Plugin(plugin) = deployment {
        if let Some(value) = plugin.use_separate_classloader {
            element.push_attribute(("use-separate-classloader", bool_str(value)));
        }
    }

    let files = deployment.executable_files();
    if files.is_empty() {
        return write(writer, Event::Empty(element));
    }
    write(writer, Event::Start(element))?;
    start(writer, "layout")?;
    start(writer, "executable-files")?;
    for file in files {
        empty_with_attributes(writer, "include", &[("name", file.as_str())])?;
    }
    end(writer, "executable-files")?;
    end(writer, "layout")?;
    end(writer, name)
}

/// 记录警告并生成服务器插件描述
pub fn render_descriptor(model: &DescriptorModel, version: &TeamCityVersion) -> Result<RenderedDescriptor, DescriptorError> {
    let warnings = descriptor_warnings(model, version);
    for warning in &warnings {
        warn!(version = %version, "{}", warning);
    }
    let xml = DescriptorGenerator::new(model, version).to_xml()?;
    Ok(RenderedDescriptor { xml, warnings })
}

/// 记录警告后写出服务器插件描述文件
pub fn generate_descriptor(
    model: &DescriptorModel,
    version: &TeamCityVersion,
    destination: &Path,
) -> Result<RenderedDescriptor, DescriptorError> {
    let rendered = render_descriptor(model, version)?;
    write_file(destination, &rendered.xml)?;
    info!(path = %destination.display(), version = %version, "Plugin descriptor generated");
    Ok(rendered)
}

/// 写出 Agent 插件描述文件
pub fn generate_agent_descriptor(model: &AgentDescriptorModel, destination: &Path) -> Result<(), DescriptorError> {
    AgentDescriptorGenerator::new(model).write_to(destination)?;
    info!(path = %destination.display(), "Agent plugin descriptor generated");
    Ok(())
}

fn document(schema: &str, root: &str) -> Result<XmlWriter, DescriptorError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    write(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    let mut element = BytesStart::new(root);
    element.push_attribute(("xmlns:xsi", XSI_NAMESPACE));
    element.push_attribute(("xsi:noNamespaceSchemaLocation", schema));
    write(&mut writer, Event::Start(element))?;
    Ok(writer)
}

fn finish(writer: XmlWriter) -> Result<String, DescriptorError> {
    let mut xml = String::from_utf8(writer.into_inner()).map_err(|e| DescriptorError::Xml(e.to_string()))?;
    xml.push('\n');
    Ok(xml)
}

/// 写入文件，自动创建父目录
fn write_file(path: &Path, xml: &str) -> Result<(), DescriptorError> {
    let io_error = |source| DescriptorError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, xml).map_err(io_error)
}

/// 没有依赖时不输出
fn write_dependencies(writer: &mut XmlWriter, dependencies: &Dependencies) -> Result<(), DescriptorError> {
    if !dependencies.has_dependencies() {
        return Ok(());
    }
    start(writer, "dependencies")?;
    for plugin in &dependencies.plugins {
        empty_with_attributes(writer, "plugin", &[("name", plugin.as_str())])?;
    }
    for tool in &dependencies.tools {
        empty_with_attributes(writer, "tool", &[("name", tool.as_str())])?;
    }
    end(writer, "dependencies")
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn write(writer: &mut XmlWriter, event: Event<'_>) -> Result<(), DescriptorError> {
    writer
        .write_event(event)
        .map_err(|e| DescriptorError::Xml(e.to_string()))
}

fn start(writer: &mut XmlWriter, name: &str) -> Result<(), DescriptorError> {
    write(writer, Event::Start(BytesStart::new(name)))
}

fn end(writer: &mut XmlWriter, name: &str) -> Result<(), DescriptorError> {
    write(writer, Event::End(BytesEnd::new(name)))
}

fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<(), DescriptorError> {
    start(writer, name)?;
    write(writer, Event::Text(BytesText::new(text)))?;
    end(writer, name)
}

fn optional_element(writer: &mut XmlWriter, name: &str, text: Option<&str>) -> Result<(), DescriptorError> {
    match text {
        Some(text) => text_element(writer, name, text),
        None => Ok(()),
    }
}

/// 属性为空时不输出元素
fn empty_with_attributes(writer: &mut XmlWriter, name: &str, attributes: &[(&str, &str)]) -> Result<(), DescriptorError> {
    if attributes.is_empty() {
        return Ok(());
    }
    let mut element = BytesStart::new(name);
    for attribute in attributes {
        element.push_attribute(*attribute);
    }
    write(writer, Event::Empty(element))
}
