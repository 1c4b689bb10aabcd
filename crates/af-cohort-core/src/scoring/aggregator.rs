//! Per-document component counting.

use std::collections::BTreeMap;

use crate::models::{AnnotatedDocument, CodeList, ComponentCounts};

/// Count affirmed mentions of each component, one row per document in input order.
///
/// Every component of `codes` is present in every row, at 0 when unseen.
/// Negated and uncertain mentions, and codes outside the list, are skipped.
pub fn aggregate(documents: &[AnnotatedDocument], codes: &CodeList) -> Vec<ComponentCounts> {
    documents
        .iter()
        .map(|doc| {
            let mut counts: BTreeMap<String, u32> = codes
                .component_names()
                .map(|name| (name.to_string(), 0))
                .collect();

            for annotation in doc.annotations.iter().filter(|a| a.is_affirmed()) {
                if let Some(component) = codes.component_for_code(&annotation.code) {
                    *counts.entry(component.to_string()).or_insert(0) += 1;
                }
            }

            ComponentCounts {
                key: doc.key(),
                counts,
            }
        })
        .collect()
}
