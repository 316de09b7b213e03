//! 操作依赖图
//!
//! 每个环境一张图：节点是 [`OperationKind`]，边分为依赖（先执行）和
//! 收尾（被收尾的节点执行后紧接着执行）。

use std::collections::{HashMap, HashSet};

use crate::domain::lifecycle::OperationKind;
use crate::error::{LifecycleError, LifecycleResult};

#[derive(Clone, Debug, Default)]
struct Node {
    depends_on: Vec<OperationKind>,
    finalized_by: Vec<OperationKind>,
}

/// 单个环境的操作图
#[derive(Clone, Debug)]
pub struct OperationGraph {
    environment: String,
    nodes: HashMap<OperationKind, Node>,
}

impl OperationGraph {
    /// 空图，所有操作互不依赖
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            nodes: OperationKind::ALL.iter().map(|k| (*k, Node::default())).collect(),
        }
    }

    /// 标准生命周期：
    /// download <- install <- deploy <- start-server，
    /// stop-server 之后执行 undeploy，
    /// start = start-server + start-agent，stop = stop-agent + stop-server
    pub fn for_environment(environment: &str) -> Self {
        use OperationKind::*;
        let mut graph = Self::new(environment);
        graph.depends_on(Install, Download);
        graph.depends_on(Deploy, Install);
        graph.depends_on(StartServer, Deploy);
        graph.finalized_by(StopServer, Undeploy);
        graph.depends_on(Start, StartServer);
        graph.depends_on(Start, StartAgent);
        graph.depends_on(Stop, StopAgent);
        graph.depends_on(Stop, StopServer);
        graph
    }

    pub fn depends_on(&mut self, kind: OperationKind, dependency: OperationKind) -> &mut Self {
        self.node_mut(kind).depends_on.push(dependency);
        self
    }

    pub fn finalized_by(&mut self, kind: OperationKind, finalizer: OperationKind) -> &mut Self {
        self.node_mut(kind).finalized_by.push(finalizer);
        self
    }

    pub fn dependencies(&self, kind: OperationKind) -> &[OperationKind] {
        self.nodes.get(&kind).map(|n| n.depends_on.as_slice()).unwrap_or(&[])
    }

    pub fn finalizers(&self, kind: OperationKind) -> &[OperationKind] {
        self.nodes.get(&kind).map(|n| n.finalized_by.as_slice()).unwrap_or(&[])
    }

    /// `kind` 是否为 `node` 的收尾操作
    pub fn is_finalizer_of(&self, kind: OperationKind, node: OperationKind) -> bool {
        self.finalizers(node).contains(&kind)
    }

    fn node_mut(&mut self, kind: OperationKind) -> &mut Node {
        self.nodes.entry(kind).or_default()
    }

    /// 计算执行顺序：深度优先，依赖在前，每个节点只出现一次，
    /// 收尾操作紧跟在被收尾的节点之后
    pub fn plan(&self, target: OperationKind) -> LifecycleResult<Vec<OperationKind>> {
        let mut planner = Planner {
            graph: self,
            visiting: HashSet::new(),
            done: HashSet::new(),
            order: Vec::new(),
        };
        planner.visit(target)?;
        Ok(planner.order)
    }
}

struct Planner<'a> {
    graph: &'a OperationGraph,
    visiting: HashSet<OperationKind>,
    done: HashSet<OperationKind>,
    order: Vec<OperationKind>,
}

impl Planner<'_> {
    fn visit(&mut self, kind: OperationKind) -> LifecycleResult<()> {
        if self.done.contains(&kind) {
            return Ok(());
        }
        if !self.visiting.insert(kind) {
            return Err(LifecycleError::Cycle(kind.task_name(&self.graph.environment)));
        }
        for dependency in self.graph.dependencies(kind) {
            self.visit(*dependency)?;
        }
        self.visiting.remove(&kind);
        self.done.insert(kind);
        self.order.push(kind);

        for finalizer in self.graph.finalizers(kind) {
            self.visit(*finalizer)?;
        }
        Ok(())
    }
}
