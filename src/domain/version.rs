//! TeamCity 版本模型
//!
//! 解析、校验、比较版本号，并派生数据目录使用的 `major.minor` 数据版本

use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use crate::error::ValidationError;

static RELEASE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(([.\-]\d+){1,2}){1,2}$").expect("valid release regex"));

static SNAPSHOT_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(\.\d+){1,2}|LOCAL)-(SNAPSHOT|\d+)$").expect("valid snapshot regex")
});

static DATA_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+\.\d+)").expect("valid data version regex"));

const SNAPSHOT: &str = "SNAPSHOT";
const LOCAL_SNAPSHOT: &str = "LOCAL-SNAPSHOT";
const LOCAL_PART: &str = "LOCAL";

/// 已解析的 TeamCity 版本
///
/// 只能通过 [`TeamCityVersion::parse`] 创建，创建后不可变。
/// 比较关系不是全序（相同数值、相同段数但字面不同的版本互相"小于"），
/// 因此不实现 `Ord`。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TeamCityVersion {
    raw: String,
    parts: Vec<String>,
}

/// 依赖节点从该版本开始生效
pub static VERSION_9_0: LazyLock<TeamCityVersion> = LazyLock::new(|| TeamCityVersion::release("9.0"));
/// 运行时重载（以及热部署协议）从该版本开始生效
pub static VERSION_2018_2: LazyLock<TeamCityVersion> =
    LazyLock::new(|| TeamCityVersion::release("2018.2"));
/// 节点职责感知从该版本开始生效
pub static VERSION_2020_1: LazyLock<TeamCityVersion> =
    LazyLock::new(|| TeamCityVersion::release("2020.1"));
pub static VERSION_2024_03: LazyLock<TeamCityVersion> =
    LazyLock::new(|| TeamCityVersion::release("2024.03"));

impl TeamCityVersion {
    /// 解析版本号
    ///
    /// `allow_snapshots` 为 false 时只接受发布版本格式；字面量 `SNAPSHOT`
    /// 与 `LOCAL-SNAPSHOT` 也只在允许快照时接受。
    pub fn parse(raw: &str, allow_snapshots: bool) -> Result<Self, ValidationError> {
        let is_release = RELEASE_VERSION.is_match(raw);
        if allow_snapshots {
            let is_literal = raw == SNAPSHOT || raw == LOCAL_SNAPSHOT;
            if !is_literal && !is_release && !SNAPSHOT_VERSION.is_match(raw) {
                return Err(ValidationError::InvalidSnapshot(raw.to_string()));
            }
        } else if !is_release {
            return Err(ValidationError::InvalidRelease(raw.to_string()));
        }
        Ok(Self::new_unchecked(raw))
    }

    /// 仅用于内部常量
    fn release(raw: &str) -> Self {
        Self::new_unchecked(raw)
    }

    fn new_unchecked(raw: &str) -> Self {
        let parts = raw.split(['.', '-']).map(str::to_string).collect();
        Self {
            raw: raw.to_string(),
            parts,
        }
    }

    /// 原始版本字符串
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 按 `.` / `-` 拆分后的各段
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// 是否为快照或本地构建版本
    pub fn is_snapshot(&self) -> bool {
        self.parts.iter().any(|p| p == SNAPSHOT || p == LOCAL_PART)
    }

    /// 比较两个版本
    ///
    /// 字面量 `SNAPSHOT` / `LOCAL-SNAPSHOT` 大于任何其他版本；逐段比较数值，
    /// 跳过 `SNAPSHOT` / `LOCAL` 段；前缀相同时段数多者更大，段数相同则为 Less。
    pub fn compare(&self, other: &TeamCityVersion) -> Ordering {
        let (a, b) = (self.raw.as_str(), other.raw.as_str());
        if (a == SNAPSHOT && b != SNAPSHOT) || (a == LOCAL_SNAPSHOT && b != LOCAL_SNAPSHOT) {
            return Ordering::Greater;
        }
        if (b == SNAPSHOT && a != SNAPSHOT) || (b == LOCAL_SNAPSHOT && a != LOCAL_SNAPSHOT) {
            return Ordering::Less;
        }
        if a == b {
            return Ordering::Equal;
        }
        compare_parts(&self.parts, &other.parts)
    }

    pub fn equal_or_greater_than(&self, other: &TeamCityVersion) -> bool {
        self.compare(other) != Ordering::Less
    }

    pub fn less_than(&self, other: &TeamCityVersion) -> bool {
        self.compare(other) == Ordering::Less
    }

    /// 数据版本，例如 `10.0.5` -> `10.0`
    pub fn data_version(&self) -> Result<String, ValidationError> {
        DATA_VERSION
            .captures(&self.raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ValidationError::InvalidDataVersion(self.raw.clone()))
    }
}

fn compare_parts(parts: &[String], other_parts: &[String]) -> Ordering {
    for (part, other) in parts.iter().zip(other_parts.iter()) {
        if is_ignored_part(part) || is_ignored_part(other) {
            continue;
        }
        match compare_numeric(part, other) {
            Ordering::Equal => continue,
            decided => return decided,
        }
    }
    if parts.len() > other_parts.len() {
        Ordering::Greater
    } else {
        Ordering::Less
    }
}

/// 按十进制数值比较任意长度的数字段；非数字段视为 0
fn compare_numeric(a: &str, b: &str) -> Ordering {
    fn significant(part: &str) -> &str {
        if part.bytes().all(|c| c.is_ascii_digit()) {
            part.trim_start_matches('0')
        } else {
            ""
        }
    }
    let (a, b) = (significant(a), significant(b));
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn is_ignored_part(part: &str) -> bool {
    part == SNAPSHOT || part == LOCAL_PART
}

impl fmt::Display for TeamCityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for TeamCityVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TeamCityVersion::parse(&raw, false).map_err(serde::de::Error::custom)
    }
}
