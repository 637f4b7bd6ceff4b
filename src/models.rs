//! Models offered to clients and their backend identifiers.
//!
//! The built-in table covers the models the backend serves; `[models]` in the
//! config adds entries or remaps existing ones.

use crate::translate::openai_types::{ModelCard, ModelList};
use std::collections::{BTreeSet, HashMap};
use std::hash::BuildHasher;

pub const OWNED_BY: &str = "monica";

/// Client-facing model name -> backend model id.
const BUILTIN_MODELS: &[(&str, &str)] = &[
    ("gpt-4o", "gpt-4o"),
    ("gpt-4o-mini", "gpt-4o-mini"),
    ("gpt-4.1", "gpt-4-1"),
    ("gpt-4.1-mini", "gpt-4-1-mini"),
    ("o1-mini", "o1-mini"),
    ("o3-mini", "o3-mini"),
    ("claude-3-5-sonnet", "claude-3-5-sonnet"),
    ("claude-3-7-sonnet", "claude-3-7-sonnet"),
    ("claude-3-5-haiku", "claude-3-5-haiku"),
    ("gemini-2.0-flash", "gemini_2_0"),
    ("gemini-1.5-pro", "gemini_1_5"),
    ("deepseek-reasoner", "deepseek_reasoner"),
    ("deepseek-chat", "deepseek_chat"),
    ("grok-3", "grok-3"),
];

/// Resolve the backend model id for a client model name.
/// Config entries win over the built-in table; unknown names pass through.
pub fn resolve_backend_model<S: BuildHasher>(
    model: &str,
    overrides: &HashMap<String, String, S>,
) -> String {
    if let Some(mapped) = overrides.get(model) {
        return mapped.clone();
    }
    BUILTIN_MODELS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, id)| (*id).to_string())
        .unwrap_or_else(|| model.to_string())
}

/// All model names clients may request, sorted.
pub fn supported_models<S: BuildHasher>(overrides: &HashMap<String, String, S>) -> Vec<String> {
    let mut names: BTreeSet<&str> = BUILTIN_MODELS.iter().map(|(name, _)| *name).collect();
    names.extend(overrides.keys().map(String::as_str));
    names.into_iter().map(str::to_string).collect()
}

pub fn model_list<S: BuildHasher>(overrides: &HashMap<String, String, S>) -> ModelList {
    ModelList {
        object: "list".to_string(),
        data: supported_models(overrides)
            .into_iter()
            .map(|id| ModelCard {
                id,
                object: "model".to_string(),
                owned_by: OWNED_BY.to_string(),
            })
            .collect(),
    }
}
