//! Dependency sorter.
//!
//! Orders type declarations so every by-value dependency is fully defined
//! before use. Cycles are allowed only when every cycle passes through a
//! pointer edge; the pointer targets inside such a strongly connected
//! component are forward-declared, and nothing else is.

use std::collections::{BTreeSet, HashMap};

use apigen_ir::ClassId;
use tracing::debug;

use crate::error::{BindgenError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Field, payload or array element held by value: needs the full definition.
    Value,
    /// Reached through a reference or pointer: a forward declaration suffices.
    Pointer,
}

#[derive(Debug, Clone)]
pub struct SortNode {
    pub id: ClassId,
    pub name: String,
    pub deps: Vec<(ClassId, EdgeKind)>,
    /// Aggregates (structs, unions) can be forward-declared; typedefs and plain enums cannot.
    pub forward_declarable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortOutput {
    pub order: Vec<ClassId>,
    pub forward_declared: BTreeSet<ClassId>,
    /// Order for targets without forward declarations: inside a cycle the
    /// forward-declared element comes before the container pointing at it.
    pub element_order: Vec<ClassId>,
}

/// Sort `nodes`, which must be given in schema insertion order.
pub fn sort(nodes: &[SortNode]) -> Result<SortOutput> {
    let index: HashMap<ClassId, usize> = nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
    let edges: Vec<Vec<(usize, EdgeKind)>> = nodes
        .iter()
        .map(|n| {
            n.deps
                .iter()
                .filter_map(|(d, k)| index.get(d).map(|i| (*i, *k)))
                .collect()
        })
        .collect();

    let forward = forward_declarations(nodes, &edges)?;
    let order = sweep(nodes, &edges, &forward)?;
    let element_order = element_first(&edges, &forward);

    debug!(
        "Sorter: placed {} declarations, {} forward-declared",
        order.len(),
        forward.len()
    );
    Ok(SortOutput {
        order: order.into_iter().map(|i| nodes[i].id).collect(),
        forward_declared: forward.into_iter().map(|i| nodes[i].id).collect(),
        element_order: element_order.into_iter().map(|i| nodes[i].id).collect(),
    })
}

/// Derive the forward-declaration set from the strongly connected components.
fn forward_declarations(nodes: &[SortNode], edges: &[Vec<(usize, EdgeKind)>]) -> Result<BTreeSet<usize>> {
    let mut forward = BTreeSet::new();

    for component in strongly_connected(edges) {
        let members: BTreeSet<usize> = component.iter().copied().collect();
        let cyclic = component.len() > 1 || edges[component[0]].iter().any(|(t, _)| *t == component[0]);
        if !cyclic {
            continue;
        }

        if let Some(stuck) = value_cycle(&members, edges) {
            return Err(BindgenError::CyclicDependency {
                remaining: stuck.iter().map(|i| nodes[*i].name.clone()).collect(),
            });
        }

        for &m in &component {
            for &(t, kind) in &edges[m] {
                if kind == EdgeKind::Pointer && members.contains(&t) {
                    if !nodes[t].forward_declarable {
                        return Err(BindgenError::CyclicDependency {
                            remaining: component.iter().map(|i| nodes[*i].name.clone()).collect(),
                        });
                    }
                    forward.insert(t);
                }
            }
        }
    }

    Ok(forward)
}

/// Members of `members` that sit on a cycle made only of value edges.
fn value_cycle(members: &BTreeSet<usize>, edges: &[Vec<(usize, EdgeKind)>]) -> Option<Vec<usize>> {
    let mut indegree: HashMap<usize, usize> = members.iter().map(|m| (*m, 0)).collect();
    for &m in members {
        for &(t, kind) in &edges[m] {
            if kind == EdgeKind::Value && members.contains(&t) {
                *indegree.entry(t).or_default() += 1;
            }
        }
    }

    let mut ready: Vec<usize> = members.iter().copied().filter(|m| indegree[m] == 0).collect();
    let mut removed = 0;
    while let Some(m) = ready.pop() {
        removed += 1;
        for &(t, kind) in &edges[m] {
            if kind == EdgeKind::Value && members.contains(&t) {
                if let Some(d) = indegree.get_mut(&t) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(t);
                    }
                }
            }
        }
    }

    if removed == members.len() {
        None
    } else {
        Some(members.iter().copied().filter(|m| indegree[m] > 0).collect())
    }
}

/// Fixed-point sweep over insertion order.
fn sweep(nodes: &[SortNode], edges: &[Vec<(usize, EdgeKind)>], forward: &BTreeSet<usize>) -> Result<Vec<usize>> {
    let mut placed = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    let max_sweeps = 2 * nodes.len() + 1;

    for _ in 0..max_sweeps {
        let mut progress = false;
        for i in 0..nodes.len() {
            if placed[i] {
                continue;
            }
            let ready = edges[i]
                .iter()
                .all(|&(t, kind)| placed[t] || (kind == EdgeKind::Pointer && forward.contains(&t)));
            if ready {
                placed[i] = true;
                order.push(i);
                progress = true;
            }
        }
        if !progress {
            break;
        }
    }

    if order.len() != nodes.len() {
        let remaining = (0..nodes.len())
            .filter(|i| !placed[*i])
            .map(|i| nodes[i].name.clone())
            .collect();
        return Err(BindgenError::CyclicDependency { remaining });
    }
    Ok(order)
}

/// Dependency-first order where a forward-declared node ignores its value
/// edges back into its own component. A stalled sweep places the earliest
/// unplaced node, so this never fails once `forward_declarations` succeeded.
fn element_first(edges: &[Vec<(usize, EdgeKind)>], forward: &BTreeSet<usize>) -> Vec<usize> {
    let mut component = vec![0; edges.len()];
    for (c, members) in strongly_connected(edges).into_iter().enumerate() {
        for m in members {
            component[m] = c;
        }
    }

    let blocking = |from: usize, to: usize, kind: EdgeKind| {
        from != to && !(kind == EdgeKind::Value && forward.contains(&from) && component[from] == component[to])
    };

    let mut placed = vec![false; edges.len()];
    let mut order = Vec::with_capacity(edges.len());
    while order.len() < edges.len() {
        let mut progress = false;
        for i in 0..edges.len() {
            if placed[i] {
                continue;
            }
            if edges[i].iter().all(|&(t, kind)| placed[t] || !blocking(i, t, kind)) {
                placed[i] = true;
                order.push(i);
                progress = true;
            }
        }
        if !progress {
            if let Some(i) = (0..edges.len()).find(|i| !placed[*i]) {
                placed[i] = true;
                order.push(i);
            }
        }
    }
    order
}

/// Tarjan's algorithm; components come out in reverse topological order.
fn strongly_connected(edges: &[Vec<(usize, EdgeKind)>]) -> Vec<Vec<usize>> {
    struct Tarjan<'e> {
        edges: &'e [Vec<(usize, EdgeKind)>],
        counter: usize,
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        components: Vec<Vec<usize>>,
    }

    impl Tarjan<'_> {
        fn visit(&mut self, v: usize) {
            self.index[v] = Some(self.counter);
            self.lowlink[v] = self.counter;
            self.counter += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            for &(w, _) in &self.edges[v] {
                match self.index[w] {
                    None => {
                        self.visit(w);
                        self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                    }
                    Some(iw) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(iw);
                    }
                    Some(_) => {}
                }
            }

            if Some(self.lowlink[v]) == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                component.sort_unstable();
                self.components.push(component);
            }
        }
    }

    let n = edges.len();
    let mut t = Tarjan {
        edges,
        counter: 0,
        index: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        components: Vec::new(),
    };
    for v in 0..n {
        if t.index[v].is_none() {
            t.visit(v);
        }
    }
    t.components
}
