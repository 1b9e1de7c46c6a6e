//! Bilingual prompt templates: loading and `[var]` substitution.
//! File format: `{ "<id>": { "title", "description", "prompt_ru", "prompt_en" } }`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Deserialize;
use thiserror::Error;

static VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([a-zA-Z0-9_]+)\]").expect("template variable pattern"));

#[derive(Debug, Clone, Deserialize)]
pub struct PromptTemplate {
    pub title: String,
    pub description: String,
    pub prompt_ru: String,
    pub prompt_en: String,
}

impl PromptTemplate {
    /// Template text for a language code (`ru` or `en`).
    pub fn variant(&self, lang: &str) -> Option<&str> {
        match lang {
            "ru" => Some(&self.prompt_ru),
            "en" => Some(&self.prompt_en),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("template parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("template '{id}' not found (available: {})", .available.join(", "))]
    UnknownTemplate { id: String, available: Vec<String> },
    #[error("language '{lang}' is not available for template '{id}'")]
    UnknownLanguage { id: String, lang: String },
    #[error("required fields are empty: {}", .0.join(", "))]
    MissingFields(Vec<String>),
}

pub struct TemplateStore {
    templates: BTreeMap<String, PromptTemplate>,
}

impl TemplateStore {
    pub fn load_from_file(path: &Path) -> Result<Self, TemplateError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            templates: serde_json::from_str(json)?,
        })
    }

    pub fn get(&self, id: &str) -> Option<&PromptTemplate> {
        self.templates.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Substitute `fields` into the `lang` variant of template `id`.
    /// Every `[var]` in the template must have a non-blank value.
    pub fn render(
        &self,
        id: &str,
        lang: &str,
        fields: &HashMap<String, String>,
    ) -> Result<String, TemplateError> {
        let template = self
            .get(id)
            .ok_or_else(|| TemplateError::UnknownTemplate {
                id: id.to_string(),
                available: self.ids().map(String::from).collect(),
            })?;
        let text = template.variant(lang).ok_or_else(|| TemplateError::UnknownLanguage {
            id: id.to_string(),
            lang: lang.to_string(),
        })?;
        render(text, fields)
    }
}

/// Variable names referenced by a template, sorted.
pub fn variables(template: &str) -> BTreeSet<String> {
    VAR_PATTERN
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

pub fn render(template: &str, fields: &HashMap<String, String>) -> Result<String, TemplateError> {
    let missing: Vec<String> = variables(template)
        .into_iter()
        .filter(|v| fields.get(v).map_or(true, |value| value.trim().is_empty()))
        .collect();
    if !missing.is_empty() {
        return Err(TemplateError::MissingFields(missing));
    }
    Ok(VAR_PATTERN
        .replace_all(template, |caps: &Captures| {
            fields
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned())
}
