use serde::{Deserialize, Serialize};
use std::fmt;

/// Literal value appearing in rule source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Literal {
    /// Text of the literal when it can stand in for a path segment.
    pub fn as_path_text(&self) -> Option<String> {
        match self {
            Literal::String(s) => Some(s.clone()),
            Literal::Number(n) => Some(format_number(*n)),
            Literal::Null | Literal::Bool(_) => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Number(n) => write!(f, "{}", format_number(*n)),
            Literal::String(s) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
        }
    }
}

/// Format a number the way it would be written in source.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    /// Source spelling of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    /// Logical operators are printed with surrounding spaces.
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Functions whose evaluation reads or writes the state backend.
pub const STATEFUL_FUNCTIONS: &[&str] = &["count", "count_unique", "rate_limit"];

/// Expression AST produced by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Call {
        func: String,
        args: Vec<Expr>,
        /// Grouping dimensions (`count(BY Ip)`)
        by: Vec<Expr>,
    },
}

impl Expr {
    pub fn string(s: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(s.into()))
    }

    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name(name.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// The referenced name when this expression is a bare name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Expr::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Every name referenced by this expression, in first-appearance order.
    pub fn references(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_references(&mut names);
        names
    }

    fn collect_references(&self, names: &mut Vec<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Name(name) => {
                if !names.iter().any(|n| n == name) {
                    names.push(name.clone());
                }
            }
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => {
                expr.collect_references(names)
            }
            Expr::Binary { left, right, .. } => {
                left.collect_references(names);
                right.collect_references(names);
            }
            Expr::Call { args, by, .. } => {
                for arg in args.iter().chain(by.iter()) {
                    arg.collect_references(names);
                }
            }
        }
    }

    /// Whether evaluating this expression touches the state backend.
    pub fn is_stateful(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Name(_) => false,
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => expr.is_stateful(),
            Expr::Binary { left, right, .. } => left.is_stateful() || right.is_stateful(),
            Expr::Call { func, args, by } => {
                STATEFUL_FUNCTIONS.contains(&func.as_str())
                    || args.iter().chain(by.iter()).any(Expr::is_stateful)
            }
        }
    }

    /// Render the expression, spelling each referenced name through `name`.
    pub fn render_with(&self, name: &dyn Fn(&str) -> String) -> String {
        match self {
            Expr::Literal(lit) => lit.to_string(),
            Expr::Name(n) => name(n),
            Expr::Unary { op, expr } => {
                let inner = expr.render_operand(name);
                match op {
                    UnaryOp::Not => format!("NOT {}", inner),
                    UnaryOp::Neg => format!("-{}", inner),
                }
            }
            Expr::Binary { op, left, right } => {
                let l = left.render_operand(name);
                let r = right.render_operand(name);
                if op.is_logical() {
                    format!("{} {} {}", l, op.as_str(), r)
                } else {
                    format!("{}{}{}", l, op.as_str(), r)
                }
            }
            Expr::IsNull { expr, negated } => {
                let inner = expr.render_operand(name);
                if *negated {
                    format!("{} IS NOT NULL", inner)
                } else {
                    format!("{} IS NULL", inner)
                }
            }
            Expr::Call { func, args, by } => {
                let mut out = format!("{}(", func);
                let args: Vec<String> = args.iter().map(|a| a.render_with(name)).collect();
                out.push_str(&args.join(", "));
                if !by.is_empty() {
                    if !args.is_empty() {
                        out.push(' ');
                    }
                    let dims: Vec<String> = by.iter().map(|d| d.render_with(name)).collect();
                    out.push_str("BY ");
                    out.push_str(&dims.join(", "));
                }
                out.push(')');
                out
            }
        }
    }

    fn render_operand(&self, name: &dyn Fn(&str) -> String) -> String {
        match self {
            Expr::Binary { .. } | Expr::IsNull { .. } => format!("({})", self.render_with(name)),
            _ => self.render_with(name),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_with(&|n| n.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_rendering() {
        let expr = Expr::binary(BinaryOp::Eq, Expr::name("Action"), Expr::string("x"));
        assert_eq!(expr.to_string(), "Action=\"x\"");

        let expr = Expr::binary(
            BinaryOp::And,
            expr,
            Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(Expr::name("IsGood")),
            },
        );
        assert_eq!(expr.to_string(), "(Action=\"x\") AND NOT IsGood");
    }

    #[test]
    fn test_call_rendering() {
        let count = Expr::Call {
            func: "count".to_string(),
            args: vec![],
            by: vec![Expr::name("Ip")],
        };
        assert_eq!(count.to_string(), "count(BY Ip)");
        assert!(count.is_stateful());

        let unique = Expr::Call {
            func: "count_unique".to_string(),
            args: vec![Expr::name("Email")],
            by: vec![Expr::name("Ip"), Expr::name("Country")],
        };
        assert_eq!(unique.to_string(), "count_unique(Email BY Ip, Country)");
    }

    #[test]
    fn test_references_are_ordered_and_unique() {
        let expr = Expr::Call {
            func: "concat".to_string(),
            args: vec![Expr::name("A"), Expr::name("B"), Expr::name("A")],
            by: vec![],
        };
        assert_eq!(expr.references(), vec!["A", "B"]);
        assert!(!expr.is_stateful());
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(9000.0), "9000");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(Literal::Number(10.0).as_path_text(), Some("10".to_string()));
    }
}
