//! Activation gates and the rules for combining them along include edges.

use std::fmt;
use std::sync::Arc;

use crate::domain::IncludeDirective;

use super::error::CompileError;
use super::graph::Ordinal;

/// A single gate condition: the named slot must evaluate to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GateCond {
    /// Slot (or input) whose value decides the condition
    pub name: String,
    /// Ordinal of the slot, when the name is a slot in the graph
    pub ordinal: Option<Ordinal>,
}

impl GateCond {
    pub fn new(name: impl Into<String>, ordinal: Option<Ordinal>) -> Self {
        GateCond {
            name: name.into(),
            ordinal,
        }
    }
}

/// Node of a shared gate tree.
#[derive(Debug)]
pub enum GateNode {
    Cond(GateCond),
    And(Arc<GateNode>, Arc<GateNode>),
}

impl GateNode {
    fn collect<'a>(&'a self, out: &mut Vec<&'a GateCond>) {
        match self {
            GateNode::Cond(cond) => out.push(cond),
            GateNode::And(left, right) => {
                left.collect(out);
                right.collect(out);
            }
        }
    }
}

/// Boolean activation condition of a slot.
///
/// Either always true or an immutable AND tree of conditions. Sub-trees are
/// shared between every slot reached through the same include edge.
#[derive(Debug, Clone, Default)]
pub enum Gate {
    #[default]
    Always,
    When(Arc<GateNode>),
}

impl Gate {
    /// Gate holding a single condition.
    pub fn cond(cond: GateCond) -> Self {
        Gate::When(Arc::new(GateNode::Cond(cond)))
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Gate::Always)
    }

    /// Conditions of the gate from root include to leaf, left to right.
    pub fn conjuncts(&self) -> Vec<&GateCond> {
        let mut out = Vec::new();
        if let Gate::When(node) = self {
            node.collect(&mut out);
        }
        out
    }

    /// Names the gate depends on, in evaluation order.
    pub fn dependencies(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for cond in self.conjuncts() {
            if !names.contains(&cond.name) {
                names.push(cond.name.clone());
            }
        }
        names
    }
}

/// Gates compare by their flattened conjunct sequence, so AND is associative.
impl PartialEq for Gate {
    fn eq(&self, other: &Self) -> bool {
        self.conjuncts() == other.conjuncts()
    }
}

impl Eq for Gate {}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conds = self.conjuncts();
        if conds.is_empty() {
            return write!(f, "true");
        }
        let parts: Vec<&str> = conds.iter().map(|c| c.name.as_str()).collect();
        write!(f, "{}", parts.join(" AND "))
    }
}

/// AND-combine the caller's ambient gate with an include edge's local gate.
///
/// `Always` is the identity element; neither input is modified.
pub fn combine(ambient: &Gate, local: &Gate) -> Gate {
    match (ambient, local) {
        (Gate::Always, gate) | (gate, Gate::Always) => gate.clone(),
        (Gate::When(left), Gate::When(right)) => {
            Gate::When(Arc::new(GateNode::And(left.clone(), right.clone())))
        }
    }
}

/// Dynamic includes cannot be statically gated: their slot set is unknown
/// until a concrete path is chosen at execution time.
pub fn check_dynamic_include(
    directive: &IncludeDirective,
    origin: &str,
) -> Result<(), CompileError> {
    if directive.gate.is_some() {
        return Err(CompileError::InvalidGate {
            template: directive.target.to_string(),
            origin: origin.to_string(),
            line: directive.line,
        });
    }
    Ok(())
}
