use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

use crate::domain::{Expr, Literal, PathTemplate};

use super::error::CompileError;
use super::gate::{Gate, GateCond};

/// Registration order of a slot within its graph. Never reused.
pub type Ordinal = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// `LET` binding
    Value,
    /// Materialized `WHERE` expression of a static include
    Gate,
}

/// One definition of a slot: expression, activation gate and dependencies.
#[derive(Debug, Clone)]
pub struct Definition {
    pub expr: Expr,
    pub gate: Gate,
    /// Names referenced by `expr`, in first-appearance order
    pub dependencies: Vec<String>,
    /// Module the definition came from
    pub origin: String,
}

impl Definition {
    fn new(expr: Expr, gate: Gate, origin: &str) -> Self {
        let dependencies = expr.references();
        Definition {
            expr,
            gate,
            dependencies,
            origin: origin.to_string(),
        }
    }

    /// Names the activation gate depends on.
    pub fn gate_dependencies(&self) -> Vec<String> {
        self.gate.dependencies()
    }

    fn literal_text(&self) -> Option<String> {
        match &self.expr {
            Expr::Literal(lit @ (Literal::String(_) | Literal::Number(_))) if self.gate.is_always() => {
                lit.as_path_text()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Definitions {
    Primary(Definition),
    Default(Definition),
    Both {
        primary: Definition,
        default: Definition,
    },
}

/// A named, conditionally active computation.
#[derive(Debug, Clone)]
pub struct Slot {
    name: String,
    ordinal: Ordinal,
    kind: SlotKind,
    defs: Definitions,
}

impl Slot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ordinal(&self) -> Ordinal {
        self.ordinal
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    /// The non-`DEFAULT` definition, if any.
    pub fn primary(&self) -> Option<&Definition> {
        match &self.defs {
            Definitions::Primary(def) | Definitions::Both { primary: def, .. } => Some(def),
            Definitions::Default(_) => None,
        }
    }

    /// The `DEFAULT` fallback definition, if any.
    pub fn default_definition(&self) -> Option<&Definition> {
        match &self.defs {
            Definitions::Default(def) | Definitions::Both { default: def, .. } => Some(def),
            Definitions::Primary(_) => None,
        }
    }

    /// The definition that wins when its gate holds: non-default over default.
    pub fn active(&self) -> &Definition {
        match &self.defs {
            Definitions::Primary(def)
            | Definitions::Default(def)
            | Definitions::Both { primary: def, .. } => def,
        }
    }

    /// Whether the only definition carries the `DEFAULT` marker.
    pub fn is_default(&self) -> bool {
        matches!(self.defs, Definitions::Default(_))
    }

    pub fn expr(&self) -> &Expr {
        &self.active().expr
    }

    pub fn gate(&self) -> &Gate {
        &self.active().gate
    }

    pub fn dependencies(&self) -> &[String] {
        &self.active().dependencies
    }

    pub fn origin(&self) -> &str {
        &self.active().origin
    }

    fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.primary().into_iter().chain(self.default_definition())
    }
}

/// A templated include retained in the graph for resolution at execution time.
#[derive(Debug, Clone)]
pub struct DynamicIncludeSite {
    /// Position among the graph's sites (registration order)
    pub id: usize,
    pub template: PathTemplate,
    /// Ambient gate inherited from the including module
    pub gate: Gate,
    pub origin: String,
    pub line: usize,
}

/// Compiled, immutable slot graph. Shared read-only across executions.
#[derive(Debug, Clone)]
pub struct SlotGraph {
    root: String,
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    sites: Vec<DynamicIncludeSite>,
    /// Names the sites depend on, directly or through other slots
    site_bindings: HashSet<String>,
    fingerprint: u64,
}

impl SlotGraph {
    /// Graph with no slots.
    pub fn empty(root: impl Into<String>) -> Self {
        SlotGraph {
            root: root.into(),
            slots: Vec::new(),
            index: HashMap::new(),
            sites: Vec::new(),
            site_bindings: HashSet::new(),
            fingerprint: 0,
        }
    }

    /// Entry module path the graph was compiled from.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&Slot> {
        self.index.get(name).map(|&i| &self.slots[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Slots in ordinal order.
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Slot names in ordinal order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Dynamic include sites in registration order.
    pub fn sites(&self) -> &[DynamicIncludeSite] {
        &self.sites
    }

    /// Whether a dynamic include of this graph depends on `name` through its
    /// template or its inherited gate. Such names are never defined by a
    /// dynamic include of the same graph.
    pub fn binds_sites(&self, name: &str) -> bool {
        self.site_bindings.contains(name)
    }

    /// Hash of every module source fetched to build the graph.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

/// Accumulates slots during the resolution walk.
#[derive(Debug, Default)]
pub struct SlotGraphBuilder {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    sites: Vec<DynamicIncludeSite>,
    /// Names bound to compile-time literal text
    literals: HashMap<String, String>,
}

impl SlotGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `LET` binding.
    ///
    /// A name may carry at most one `DEFAULT` and one non-default definition,
    /// registered in either order; anything else is a duplicate.
    pub fn define(
        &mut self,
        name: &str,
        expr: Expr,
        gate: Gate,
        origin: &str,
        is_default: bool,
    ) -> Result<Ordinal, CompileError> {
        let definition = Definition::new(expr, gate, origin);
        let literal = if is_default {
            None
        } else {
            definition.literal_text()
        };

        let ordinal = match self.index.get(name) {
            None => {
                let defs = if is_default {
                    Definitions::Default(definition)
                } else {
                    Definitions::Primary(definition)
                };
                self.push(name, SlotKind::Value, defs)
            }
            Some(&idx) => {
                let slot = &mut self.slots[idx];
                let merged = match (&slot.defs, is_default, slot.kind) {
                    (Definitions::Default(default), false, SlotKind::Value) => Definitions::Both {
                        primary: definition,
                        default: default.clone(),
                    },
                    (Definitions::Primary(primary), true, SlotKind::Value) => Definitions::Both {
                        primary: primary.clone(),
                        default: definition,
                    },
                    _ => {
                        return Err(CompileError::DuplicateSlotName {
                            name: name.to_string(),
                            first_origin: slot.origin().to_string(),
                            origin: origin.to_string(),
                        })
                    }
                };
                slot.defs = merged;
                debug!(slot = name, ordinal = slot.ordinal, default = is_default, "Merged slot definition");
                slot.ordinal
            }
        };

        if let Some(text) = literal {
            self.literals.insert(name.to_string(), text);
        }

        Ok(ordinal)
    }

    /// Materialize a `WHERE` expression as a gate condition.
    ///
    /// A bare name gates on that name directly. Any other expression becomes
    /// a gate slot named by its canonical text, shared by every include that
    /// uses the same expression.
    pub fn define_gate(&mut self, expr: &Expr, origin: &str) -> GateCond {
        if let Some(name) = expr.as_name() {
            return GateCond::new(name, self.ordinal_of(name));
        }

        let name = expr.to_string();
        if let Some(ordinal) = self.ordinal_of(&name) {
            trace!(gate = %name, ordinal, "Reusing gate slot");
            return GateCond::new(name, Some(ordinal));
        }

        let defs = Definitions::Primary(Definition::new(expr.clone(), Gate::Always, origin));
        let ordinal = self.push(&name, SlotKind::Gate, defs);
        GateCond::new(name, Some(ordinal))
    }

    /// Register a dynamic include placeholder.
    pub fn add_site(&mut self, template: PathTemplate, gate: Gate, origin: &str, line: usize) -> usize {
        let id = self.sites.len();
        debug!(site = id, template = %template, origin, "Registered dynamic include site");
        self.sites.push(DynamicIncludeSite {
            id,
            template,
            gate,
            origin: origin.to_string(),
            line,
        });
        id
    }

    /// Names currently bound to compile-time literal text.
    pub fn literal_bindings(&self) -> &HashMap<String, String> {
        &self.literals
    }

    pub fn ordinal_of(&self, name: &str) -> Option<Ordinal> {
        self.index.get(name).map(|&i| self.slots[i].ordinal)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Emit the graph, rejecting dependency cycles between slots.
    pub fn build(self, root: impl Into<String>, fingerprint: u64) -> Result<SlotGraph, CompileError> {
        let mut graph = SlotGraph {
            root: root.into(),
            slots: self.slots,
            index: self.index,
            sites: self.sites,
            site_bindings: HashSet::new(),
            fingerprint,
        };

        if let Some(cycle) = find_dependency_cycle(&graph) {
            return Err(CompileError::DependencyCycle { cycle });
        }

        graph.site_bindings = site_bindings(&graph);
        Ok(graph)
    }

    fn push(&mut self, name: &str, kind: SlotKind, defs: Definitions) -> Ordinal {
        let ordinal = self.slots.len() as Ordinal;
        trace!(slot = name, ordinal, ?kind, "Registered slot");
        self.index.insert(name.to_string(), self.slots.len());
        self.slots.push(Slot {
            name: name.to_string(),
            ordinal,
            kind,
            defs,
        });
        ordinal
    }
}

/// Transitive closure of the names referenced by site templates and gates.
fn site_bindings(graph: &SlotGraph) -> HashSet<String> {
    let mut pending: Vec<String> = Vec::new();
    for site in &graph.sites {
        pending.extend(site.template.inputs().map(str::to_string));
        pending.extend(site.gate.dependencies());
    }

    let mut seen = HashSet::new();
    while let Some(name) = pending.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(slot) = graph.get(&name) {
            for def in slot.definitions() {
                pending.extend(def.dependencies.iter().cloned());
                pending.extend(def.gate_dependencies());
            }
        }
    }
    seen
}

/// Depth-first search over value and gate dependencies between slots.
fn find_dependency_cycle(graph: &SlotGraph) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        graph: &SlotGraph,
        idx: usize,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        marks[idx] = Mark::InProgress;
        path.push(idx);

        let slot = &graph.slots[idx];
        for def in slot.definitions() {
            let gate_deps = def.gate_dependencies();
            for dep in def.dependencies.iter().chain(gate_deps.iter()) {
                let Some(&next) = graph.index.get(dep) else {
                    continue;
                };
                match marks[next] {
                    Mark::InProgress => {
                        let start = path.iter().position(|&i| i == next).unwrap_or(0);
                        let mut cycle: Vec<String> = path[start..]
                            .iter()
                            .map(|&i| graph.slots[i].name.clone())
                            .collect();
                        cycle.push(graph.slots[next].name.clone());
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(graph, next, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
        }

        path.pop();
        marks[idx] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; graph.slots.len()];
    let mut path = Vec::new();
    for idx in 0..graph.slots.len() {
        if marks[idx] == Mark::Unvisited {
            if let Some(cycle) = visit(graph, idx, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}
