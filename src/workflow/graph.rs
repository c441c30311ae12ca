//! 计划依赖图
//!
//! 使用邻接表和入度表实现 DAG 校验（Kahn 拓扑排序）。
//! 校验通过的计划按升序索引执行即可满足依赖顺序，无需运行时再排序。

use std::collections::{BTreeSet, VecDeque};

use serde_json::Value;

use crate::core::EngineError;
use crate::workflow::types::PlanStep;

/// 计划依赖图
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// 邻接表：步骤索引 -> 依赖该步骤的步骤列表
    pub adjacency: Vec<Vec<usize>>,
    /// 入度表：步骤索引 -> 依赖数
    pub in_degree: Vec<usize>,
}

impl DependencyGraph {
    /// 构建并校验：越界索引、环、前向引用都会被拒绝
    pub fn build(steps: &[PlanStep]) -> Result<Self, EngineError> {
        let n = steps.len();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut in_degree: Vec<usize> = vec![0; n];

        for (index, step) in steps.iter().enumerate() {
            let deps: BTreeSet<usize> = step.dependencies.iter().copied().collect();
            for dep in deps {
                if dep >= n {
                    return Err(EngineError::DependencyResolution(format!(
                        "step {} depends on undefined step {}",
                        index, dep
                    )));
                }
                adjacency[dep].push(index);
                in_degree[index] += 1;
            }
        }

        let graph = Self {
            adjacency,
            in_degree,
        };

        if graph.topological_order().is_none() {
            let members = graph.cycle_members();
            return Err(EngineError::DependencyResolution(format!(
                "cyclic dependency among steps {:?}",
                members
            )));
        }

        for (index, step) in steps.iter().enumerate() {
            if let Some(dep) = step.dependencies.iter().find(|&&d| d >= index) {
                return Err(EngineError::DependencyResolution(format!(
                    "step {} depends on later step {}",
                    index, dep
                )));
            }
        }

        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.in_degree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_degree.is_empty()
    }

    /// Kahn 拓扑排序；存在环时返回 None
    pub fn topological_order(&self) -> Option<Vec<usize>> {
        let order = self.partial_order();
        (order.len() == self.len()).then_some(order)
    }

    /// 排序后仍有入度的节点（环及其下游）
    fn cycle_members(&self) -> Vec<usize> {
        let order = self.partial_order();
        (0..self.len()).filter(|i| !order.contains(i)).collect()
    }

    fn partial_order(&self) -> Vec<usize> {
        let mut degree = self.in_degree.clone();
        let mut queue: VecDeque<usize> = degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(degree.len());
        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &next in &self.adjacency[node] {
                degree[next] -= 1;
                if degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        order
    }

    /// 直接或间接依赖 `index` 的所有步骤
    pub fn dependents_of(&self, index: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![index];
        while let Some(node) = stack.pop() {
            for &next in self.adjacency.get(node).into_iter().flatten() {
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        seen
    }
}

/// 按点分路径从 JSON 中取值；支持 `$.` / `$` 前缀与数组下标（`data.primary.0.url`）
pub fn extract_path(value: &Value, path: &str) -> Option<Value> {
    let path = path.trim();
    let path = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('$'))
        .unwrap_or(path);

    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    (!current.is_null()).then(|| current.clone())
}
