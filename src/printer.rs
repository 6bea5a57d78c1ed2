//! Diagnostic rendering of compiled slots with their gates inlined.

use std::fmt::Write;

use crate::compiler::{Definition, Gate, GateCond, SlotGraph, SlotKind};

/// Renders compiled slot sources for debugging and tests.
///
/// Slot references print as `Name:NN` where `NN` is the slot ordinal; a
/// gated definition prints as `if(<gate>, <expr>, <fallback>)`.
#[derive(Debug, Clone, Copy)]
pub struct SourcePrinter<'a> {
    graph: &'a SlotGraph,
}

impl<'a> SourcePrinter<'a> {
    pub fn new(graph: &'a SlotGraph) -> Self {
        SourcePrinter { graph }
    }

    /// Compiled source of slot `name`, or `None` if no such slot exists.
    pub fn source_for_slot_name(&self, name: &str) -> Option<String> {
        let slot = self.graph.get(name)?;
        let rendered = match (slot.primary(), slot.default_definition()) {
            (Some(primary), Some(default)) => {
                let fallback = self.render_definition(default, "null".to_string());
                self.render_definition(primary, fallback)
            }
            (Some(def), None) | (None, Some(def)) => self.render_definition(def, "null".to_string()),
            (None, None) => "null".to_string(),
        };
        Some(rendered)
    }

    /// Every slot in ordinal order, then every dynamic include site.
    pub fn print_graph(&self) -> String {
        let mut out = String::new();

        for slot in self.graph.slots() {
            let marker = match (slot.kind(), slot.is_default()) {
                (SlotKind::Gate, _) => " [gate]",
                (SlotKind::Value, true) => " [default]",
                (SlotKind::Value, false) => "",
            };
            let source = self
                .source_for_slot_name(slot.name())
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "{:02} {}{} := {}",
                slot.ordinal(),
                slot.name(),
                marker,
                source
            );
        }

        for site in self.graph.sites() {
            let _ = write!(out, "site {}: INCLUDE \"{}\"", site.id, site.template);
            if !site.gate.is_always() {
                let _ = write!(out, " WHEN {}", self.render_gate(&site.gate));
            }
            let _ = writeln!(out, " ({}:{})", site.origin, site.line);
        }

        out
    }

    fn render_definition(&self, def: &Definition, fallback: String) -> String {
        let expr = def.expr.render_with(&|name| self.render_name(name));
        if def.gate.is_always() {
            return expr;
        }
        format!("if({}, {}, {})", self.render_gate(&def.gate), expr, fallback)
    }

    fn render_gate(&self, gate: &Gate) -> String {
        let conds: Vec<String> = gate
            .conjuncts()
            .into_iter()
            .map(|cond| format!("bool({})", self.render_cond(cond)))
            .collect();

        match conds.len() {
            0 => "true".to_string(),
            1 => conds.concat(),
            _ => format!("and({})", conds.join(", ")),
        }
    }

    fn render_cond(&self, cond: &GateCond) -> String {
        match cond.ordinal {
            Some(ordinal) => format!("{}:{:02}", cond.name, ordinal),
            None => cond.name.clone(),
        }
    }

    fn render_name(&self, name: &str) -> String {
        match self.graph.get(name) {
            Some(slot) => format!("{}:{:02}", name, slot.ordinal()),
            None => name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Compiler, MemoryLoader};
    use std::sync::Arc;

    async fn compile(sources: &[(&str, &str)]) -> SlotGraph {
        let loader = Arc::new(MemoryLoader::from_sources(sources.iter().copied()));
        Compiler::new(loader).compile("main.sqrl").await.unwrap()
    }

    #[tokio::test]
    async fn test_gate_reaches_count() {
        let graph = compile(&[
            ("x.sqrl", "LET Count := count(BY Ip);"),
            (
                "main.sqrl",
                "LET Action := input();\nLET Ip := input();\nINCLUDE \"x.sqrl\" WHERE Action=\"x\";",
            ),
        ])
        .await;

        let printer = SourcePrinter::new(&graph);
        let source = printer.source_for_slot_name("Count").unwrap();
        // the gate slot is registered at the include site, after Action and Ip
        assert_eq!(source, "if(bool(Action=\"x\":02), count(BY Ip:01), null)");
        assert_eq!(
            printer.source_for_slot_name("Action=\"x\"").unwrap(),
            "Action:00=\"x\""
        );
        assert!(printer.source_for_slot_name("Nope").is_none());
    }

    #[tokio::test]
    async fn test_nested_gates_and_defaults() {
        let graph = compile(&[
            (
                "main.sqrl",
                "LET A := input();\nLET B := input();\nLET Thing := \"fallback\" DEFAULT;\nINCLUDE \"a.sqrl\" WHERE A;",
            ),
            ("a.sqrl", "INCLUDE \"b.sqrl\" WHERE B;"),
            ("b.sqrl", "LET Thing := \"deep\";"),
        ])
        .await;

        let printer = SourcePrinter::new(&graph);
        assert_eq!(
            printer.source_for_slot_name("Thing").unwrap(),
            "if(and(bool(A:00), bool(B:01)), \"deep\", \"fallback\")"
        );
    }

    #[tokio::test]
    async fn test_print_graph_lists_slots_and_sites() {
        let graph = compile(&[(
            "main.sqrl",
            "LET Action := input();\nLET Thing := \"from default\" DEFAULT;\nINCLUDE \"features/${Action}.sqrl\";",
        )])
        .await;

        let printed = SourcePrinter::new(&graph).print_graph();
        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(
            lines,
            vec![
                "00 Action := input()",
                "01 Thing [default] := \"from default\"",
                "site 0: INCLUDE \"features/${Action}.sqrl\" (main.sqrl:3)",
            ]
        );
    }
}
