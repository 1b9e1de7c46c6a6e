//! Translate a JSON object of form fields read from stdin.
//!
//! Usage: `formlingo [--templates <file> --template <id> [--lang <code>]] < fields.json`

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use formlingo::metrics::MetricSummary;
use formlingo::templates::{TemplateError, TemplateStore};
use formlingo::translate::UsageCounters;
use formlingo::{build_service, ConfigError, RunNotices, TranslateConfig};

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("failed to read stdin: {0}")]
    Stdin(#[from] std::io::Error),
    #[error("input must be a JSON object of field values: {0}")]
    Input(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Default)]
struct Args {
    templates: Option<PathBuf>,
    template: Option<String>,
    lang: Option<String>,
}

fn parse_args() -> Result<Args, CliError> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        let mut value = || {
            it.next()
                .ok_or_else(|| CliError::Usage(format!("{flag} needs a value")))
        };
        match flag.as_str() {
            "--templates" => args.templates = Some(PathBuf::from(value()?)),
            "--template" => args.template = Some(value()?),
            "--lang" => args.lang = Some(value()?),
            other => return Err(CliError::Usage(format!("unknown argument: {other}"))),
        }
    }
    if args.templates.is_some() != args.template.is_some() {
        return Err(CliError::Usage(
            "--templates and --template must be given together".into(),
        ));
    }
    Ok(args)
}

#[derive(Serialize)]
struct Report {
    fields: serde_json::Map<String, Value>,
    fallback: Vec<String>,
    notices: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rendered: Option<String>,
    usage: UsageCounters,
    timings: HashMap<String, MetricSummary>,
}

/// `--lang` picks both the template variant and the backend target language,
/// so rendered templates are filled with values in their own language.
fn apply_args(mut config: TranslateConfig, args: &Args) -> TranslateConfig {
    if let Some(lang) = &args.lang {
        config.target_lang = lang.clone();
    }
    config
}

async fn run() -> Result<(), CliError> {
    let args = parse_args()?;

    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw)?;
    let input: serde_json::Map<String, Value> = serde_json::from_str(&raw)?;
    let fields: Vec<(String, String)> = input
        .into_iter()
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (k, text)
        })
        .collect();

    let config = apply_args(TranslateConfig::from_env(), &args);
    let budget = config.global_budget;
    let target_lang = config.target_lang.clone();
    let service = build_service(config)?;

    let notices = RunNotices::new();
    let outcome = service.translate_all(fields, budget, &notices).await;
    service.shutdown();

    let rendered = match (&args.templates, &args.template) {
        (Some(path), Some(id)) => {
            let store = TemplateStore::load_from_file(path)?;
            Some(store.render(id, &target_lang, &outcome.to_map())?)
        }
        _ => None,
    };

    let report = Report {
        fields: outcome
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
        fallback: outcome.fallback.clone(),
        notices: notices.take(),
        rendered,
        usage: service.usage(),
        timings: service.metrics().summary(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    formlingo::init_tracing();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "formlingo failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lang_overrides_backend_target() {
        let args = Args {
            lang: Some("ru".into()),
            ..Args::default()
        };
        let config = apply_args(TranslateConfig::default(), &args);
        assert_eq!(config.target_lang, "ru");

        let config = apply_args(TranslateConfig::default(), &Args::default());
        assert_eq!(config.target_lang, "en");
    }
}
