//! Structured rationale for a translation.

use serde::{Deserialize, Serialize};

use crate::composer::Binding;
use crate::template::{Provenance, Template, TemplateId};

/// One bound slot as it reads in an explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RationaleSlot {
    pub name: String,
    pub kind: String,
    /// The resolved schema element or literal, rendered for display.
    pub resolved: String,
}

/// Why a given SQL statement was produced for a given question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rationale {
    pub template_id: TemplateId,
    /// The matched NL pattern.
    pub pattern: String,
    pub provenance: Provenance,
    /// Lexical similarity between question and pattern, in [0, 1].
    pub similarity: f64,
    /// The template's feedback-adjusted weight at selection time.
    pub weight: f64,
    pub slots: Vec<RationaleSlot>,
}

/// Build the rationale for a winning (template, binding) pair. Pure.
pub fn explain(template: &Template, binding: &Binding, similarity: f64) -> Rationale {
    Rationale {
        template_id: template.id,
        pattern: template.pattern.clone(),
        provenance: template.provenance,
        similarity,
        weight: template.weight,
        slots: binding
            .slots
            .iter()
            .map(|slot| RationaleSlot {
                name: slot.name.clone(),
                kind: slot.kind.to_string(),
                resolved: slot.value.rendered(),
            })
            .collect(),
    }
}
