//! 排序引擎
//!
//! 对带有 `before:` / `after:` 约束的命名条目做稳定拓扑排序，供有序配置、
//! 装饰器链、对象提供者链共用。
//!
//! - 边 `a -> b` 表示 "a 在 b 之前"
//! - 目标支持逗号分隔列表与 `*` 通配（大小写不敏感）
//! - 每一步选择字典序最小的就绪 id，保证同样输入得到同样输出
//! - 循环约束不会导致失败：每次丢弃环上最近添加的一条边并记录警告

use crate::errors::{RegistryError, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// 约束方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Before,
    After,
}

impl ConstraintKind {
    fn prefix(self) -> &'static str {
        match self {
            ConstraintKind::Before => "before",
            ConstraintKind::After => "after",
        }
    }
}

/// 单个排序约束，目标为 id 或通配模式
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    kind: ConstraintKind,
    target: String,
}

impl Constraint {
    pub fn before(target: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::Before,
            target: target.into(),
        }
    }

    pub fn after(target: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::After,
            target: target.into(),
        }
    }

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// 目标是否为通配模式
    pub fn is_pattern(&self) -> bool {
        self.target.contains('*')
    }

    /// 解析 `before:A,B` / `after:*` 形式的约束字符串
    pub fn parse(input: &str) -> Result<Vec<Constraint>> {
        let invalid = |reason: &str| RegistryError::InvalidConstraint {
            constraint: input.to_string(),
            reason: reason.to_string(),
        };

        let (prefix, targets) = input
            .split_once(':')
            .ok_or_else(|| invalid("expected 'before:<ids>' or 'after:<ids>'"))?;

        let kind = match prefix.trim().to_ascii_lowercase().as_str() {
            "before" => ConstraintKind::Before,
            "after" => ConstraintKind::After,
            _ => return Err(invalid("unknown constraint type")),
        };

        let parsed: Vec<Constraint> = targets
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| Constraint {
                kind,
                target: t.to_string(),
            })
            .collect();

        if parsed.is_empty() {
            return Err(invalid("no target ids"));
        }
        Ok(parsed)
    }

    /// 解析一组约束字符串
    pub fn parse_all<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<Constraint>> {
        let mut all = Vec::new();
        for input in inputs {
            all.extend(Constraint::parse(input.as_ref())?);
        }
        Ok(all)
    }

    /// 用给定函数改写目标（符号展开时使用）
    pub fn map_target<F>(self, f: F) -> Result<Constraint>
    where
        F: FnOnce(&str) -> Result<String>,
    {
        Ok(Constraint {
            kind: self.kind,
            target: f(&self.target)?,
        })
    }

    fn same_as(&self, other: &Constraint) -> bool {
        self.kind == other.kind && self.target.eq_ignore_ascii_case(&other.target)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.prefix(), self.target)
    }
}

/// 大小写不敏感的通配匹配，`*` 匹配任意长度字符
pub fn glob_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = text.to_lowercase().chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while t < text.len() {
        if p < pattern.len() && pattern[p] != '*' && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// 带 id 与约束的可排序条目；`value` 为 `None` 时是占位符，参与排序但不出现在结果中
#[derive(Debug, Clone)]
pub struct Orderable<T> {
    pub id: String,
    pub value: Option<T>,
    pub constraints: Vec<Constraint>,
}

impl<T> Orderable<T> {
    pub fn new(id: impl Into<String>, value: T, constraints: Vec<Constraint>) -> Self {
        Self {
            id: id.into(),
            value: Some(value),
            constraints,
        }
    }

    pub fn placeholder(id: impl Into<String>, constraints: Vec<Constraint>) -> Self {
        Self {
            id: id.into(),
            value: None,
            constraints,
        }
    }
}

#[derive(Debug)]
struct Edge {
    from: usize,
    to: usize,
    active: bool,
}

/// 拓扑排序器
pub struct Orderer<T> {
    context: String,
    items: Vec<Orderable<T>>,
    index: HashMap<String, usize>,
}

impl<T> Orderer<T> {
    /// `context` 仅用于日志与错误信息，例如 "ordered configuration of 'Pipeline'"
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn add(&mut self, id: impl Into<String>, value: T, constraints: Vec<Constraint>) -> Result<()> {
        self.add_orderable(Orderable::new(id, value, constraints))
    }

    pub fn add_placeholder(&mut self, id: impl Into<String>, constraints: Vec<Constraint>) -> Result<()> {
        self.add_orderable(Orderable::placeholder(id, constraints))
    }

    pub fn add_orderable(&mut self, orderable: Orderable<T>) -> Result<()> {
        let key = orderable.id.to_lowercase();
        if self.index.contains_key(&key) {
            return Err(RegistryError::DuplicateOrderingId {
                id: orderable.id,
                context: self.context.clone(),
            });
        }
        self.index.insert(key, self.items.len());
        self.items.push(orderable);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 排序后的 id（包含占位符）
    pub fn order_ids(&self) -> Vec<String> {
        self.sorted_positions()
            .into_iter()
            .map(|pos| self.items[pos].id.clone())
            .collect()
    }

    /// 排序后的条目（包含占位符）
    pub fn order_orderables(self) -> Vec<Orderable<T>> {
        let positions = self.sorted_positions();
        let mut slots: Vec<Option<Orderable<T>>> = self.items.into_iter().map(Some).collect();
        positions
            .into_iter()
            .filter_map(|pos| slots[pos].take())
            .collect()
    }

    /// 排序后的值（跳过占位符）
    pub fn order(self) -> Vec<T> {
        self.order_orderables()
            .into_iter()
            .filter_map(|o| o.value)
            .collect()
    }

    fn build_edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        let mut seen = HashSet::new();

        for (pos, item) in self.items.iter().enumerate() {
            for constraint in &item.constraints {
                for other in self.resolve_targets(pos, constraint) {
                    let (from, to) = match constraint.kind {
                        ConstraintKind::Before => (pos, other),
                        ConstraintKind::After => (other, pos),
                    };
                    if seen.insert((from, to)) {
                        edges.push(Edge { from, to, active: true });
                    }
                }
            }
        }
        edges
    }

    fn resolve_targets(&self, pos: usize, constraint: &Constraint) -> Vec<usize> {
        if constraint.is_pattern() {
            // 携带相同通配约束的条目之间不互相约束，避免多个 before:* 构成人为的环
            return self
                .items
                .iter()
                .enumerate()
                .filter(|(other, item)| {
                    *other != pos
                        && glob_matches(constraint.target(), &item.id)
                        && !item.constraints.iter().any(|c| c.same_as(constraint))
                })
                .map(|(other, _)| other)
                .collect();
        }

        match self.index.get(&constraint.target().to_lowercase()) {
            Some(&other) if other != pos => vec![other],
            Some(_) => Vec::new(),
            None => {
                tracing::debug!(
                    context = %self.context,
                    id = %self.items[pos].id,
                    constraint = %constraint,
                    "Ordering constraint references an unknown id and is ignored"
                );
                Vec::new()
            }
        }
    }

    fn sorted_positions(&self) -> Vec<usize> {
        let count = self.items.len();
        let mut edges = self.build_edges();

        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut indegree = vec![0usize; count];
        for (edge_index, edge) in edges.iter().enumerate() {
            outgoing[edge.from].push(edge_index);
            incoming[edge.to].push(edge_index);
            indegree[edge.to] += 1;
        }

        let sort_key = |pos: usize| (self.items[pos].id.to_lowercase(), pos);
        let mut ready: BTreeSet<(String, usize)> = (0..count)
            .filter(|&pos| indegree[pos] == 0)
            .map(sort_key)
            .collect();

        let mut placed = vec![false; count];
        let mut output = Vec::with_capacity(count);

        while output.len() < count {
            let Some(first) = ready.pop_first() else {
                self.break_cycle(&mut edges, &incoming, &placed, &mut indegree, &mut ready);
                continue;
            };

            let pos = first.1;
            placed[pos] = true;
            output.push(pos);

            for &edge_index in &outgoing[pos] {
                let edge = &mut edges[edge_index];
                if !edge.active {
                    continue;
                }
                edge.active = false;
                indegree[edge.to] -= 1;
                if indegree[edge.to] == 0 {
                    ready.insert(sort_key(edge.to));
                }
            }
        }

        output
    }

    /// 找到一个环，丢弃环上最近添加的那条边
    ///
    /// 此时所有未放置的条目都有来自其他未放置条目的有效入边，
    /// 从任一未放置条目沿入边反向走，必然回到走过的条目。
    fn break_cycle(
        &self,
        edges: &mut [Edge],
        incoming: &[Vec<usize>],
        placed: &[bool],
        indegree: &mut [usize],
        ready: &mut BTreeSet<(String, usize)>,
    ) {
        let start = (0..self.items.len())
            .filter(|&pos| !placed[pos])
            .min_by_key(|&pos| (self.items[pos].id.to_lowercase(), pos));
        let Some(start) = start else {
            return;
        };

        let mut on_path: HashMap<usize, usize> = HashMap::new();
        let mut path_edges: Vec<usize> = Vec::new();
        let mut node = start;
        let cycle_start = loop {
            if let Some(&depth) = on_path.get(&node) {
                break Some(depth);
            }
            on_path.insert(node, path_edges.len());
            let entering = incoming[node]
                .iter()
                .rev()
                .copied()
                .find(|&e| edges[e].active && !placed[edges[e].from]);
            match entering {
                Some(edge_index) => {
                    path_edges.push(edge_index);
                    node = edges[edge_index].from;
                }
                None => break None,
            }
        };

        let victim = cycle_start.and_then(|depth| path_edges[depth..].iter().copied().max());
        let Some(victim) = victim else {
            // 不应出现；解除起点的全部入边，保证排序能结束
            for &edge_index in &incoming[start] {
                edges[edge_index].active = false;
            }
            indegree[start] = 0;
            ready.insert((self.items[start].id.to_lowercase(), start));
            return;
        };

        let edge = &mut edges[victim];
        edge.active = false;
        tracing::warn!(
            context = %self.context,
            before = %self.items[edge.from].id,
            after = %self.items[edge.to].id,
            "Cyclic ordering constraints; dropping constraint that '{}' precede '{}'",
            self.items[edge.from].id,
            self.items[edge.to].id,
        );

        indegree[edge.to] -= 1;
        if indegree[edge.to] == 0 {
            ready.insert((self.items[edge.to].id.to_lowercase(), edge.to));
        }
    }
}

/// 便捷函数：一次性排序一组条目
pub fn order<T>(context: &str, items: Vec<Orderable<T>>) -> Result<Vec<T>> {
    let mut orderer = Orderer::new(context);
    for item in items {
        orderer.add_orderable(item)?;
    }
    Ok(orderer.order())
}
