use std::collections::HashMap;

use crate::domain::{canonical_path, PathTemplate};

/// Classification of an include target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    /// Path fully known at compile time (canonicalized)
    Static(String),
    /// Path depends on runtime input; segments kept unevaluated
    Dynamic(PathTemplate),
}

/// Classify `template` given the names bound to compile-time literal text.
///
/// A target without interpolation is always static. A templated target is
/// static only when every referenced name is such a literal.
pub fn classify(template: &PathTemplate, literals: &HashMap<String, String>) -> ResolvedTarget {
    match template.render(|name| literals.get(name).cloned()) {
        Ok(path) => ResolvedTarget::Static(canonical_path(&path)),
        Err(_) => ResolvedTarget::Dynamic(template.clone()),
    }
}
