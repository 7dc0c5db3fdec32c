//! `repromp settings` command implementation.

use crate::cli::{App, mask_key};
use crate::core::{ApiProvider, SettingsRecord, TemplateParams};
use crate::error::{Error, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Print keys (masked) and default generation parameters.
///
/// # Errors
///
/// Returns an error if settings cannot be loaded.
pub async fn show(app: &App) -> Result<()> {
    let store = app.context.settings();
    store.load_settings().await?;
    print!("{}", render_settings(&store.settings()));
    println!("\nStorage: {}", store.backend().kind());
    Ok(())
}

/// Set one provider key. An empty key clears it.
///
/// # Errors
///
/// Returns an error for an unknown provider or a failed write.
pub async fn set_key(app: &App, provider: &str, key: &str) -> Result<()> {
    let provider: ApiProvider = provider.parse()?;
    let store = app.context.settings();
    store.load_settings().await?;
    match provider {
        ApiProvider::Visionati => store.set_visionati_key(key).await?,
        ApiProvider::Straico => store.set_straico_key(key).await?,
    }
    if key.is_empty() {
        println!("{} key cleared", provider.label());
    } else {
        println!("{} key saved", provider.label());
    }
    Ok(())
}

/// Change default generation parameters from `field=value` pairs.
///
/// # Errors
///
/// `InvalidState` for a malformed pair, otherwise write errors.
pub async fn set_params(app: &App, pairs: &[String]) -> Result<()> {
    let store = app.context.settings();
    store.load_settings().await?;
    let params = apply_pairs(&store.settings().default_template_params, pairs)?;
    store.set_default_template_params(params).await?;
    println!("Default parameters saved");
    Ok(())
}

/// Write the keys to a settings file, or stdout without a path.
///
/// # Errors
///
/// Returns an error if settings cannot be loaded or the file written.
pub async fn export(app: &App, output: Option<&Path>) -> Result<()> {
    let store = app.context.settings();
    store.load_settings().await?;
    let json = store.export_settings()?;
    match output {
        Some(path) => {
            fs::write(path, format!("{json}\n"))?;
            eprintln!("Settings exported to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Apply keys from a settings file.
///
/// # Errors
///
/// `InvalidImport` for a malformed file, otherwise read or write errors.
pub async fn import(app: &App, input: &Path) -> Result<()> {
    let json = fs::read_to_string(input)?;
    let store = app.context.settings();
    store.load_settings().await?;
    store.import_settings(&json).await?;
    println!("Settings imported from {}", input.display());
    Ok(())
}

fn render_settings(record: &SettingsRecord) -> String {
    let mut out = String::new();
    for provider in ApiProvider::ALL {
        out.push_str(&format!(
            "{:<12} {}\n",
            format!("{}:", provider.label()),
            mask_key(record.key(provider))
        ));
    }

    out.push_str("\nDefault parameters:\n");
    if let Value::Object(fields) = record.default_template_params.to_value() {
        for (name, value) in fields {
            let shown = match value {
                Value::String(s) if s.is_empty() => "(empty)".to_string(),
                Value::String(s) => s,
                other => other.to_string(),
            };
            out.push_str(&format!("  {name:<16} {shown}\n"));
        }
    }
    out
}

/// `artistic_style` -> `artisticStyle`.
fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' || c == '-' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn apply_pairs(current: &TemplateParams, pairs: &[String]) -> Result<TemplateParams> {
    let Value::Object(mut fields) = current.to_value() else {
        return Err(Error::InvalidState("template parameters are not an object".to_string()));
    };
    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::InvalidState(format!("expected field=value, got {pair:?}")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidState(format!("missing field name in {pair:?}")));
        }
        fields.insert(camel_case(name), Value::String(value.trim().to_string()));
    }
    Ok(TemplateParams::merged_over_defaults(&Value::Object(fields)))
}
