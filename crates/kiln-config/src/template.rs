//! Job template environment.
//!
//! Templates are minijinja documents rendered with `Owner`, `Repo`,
//! `Revision` and, for branch refs, `Branch`. Undefined variables are an
//! error. Besides minijinja's builtin filters the following helpers exist:
//!
//! - `quote`, `trim_prefix(p)`, `trim_suffix(s)`, `trunc(n)`
//! - `sha256sum`, `short_sha`, `dns_label`
//! - `regex_replace(pattern, replacement)`
//! - function `split(s, sep)`

use kiln_core::TriggerContext;
use minijinja::{Environment, Error, ErrorKind, UndefinedBehavior};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Name the job template is registered under.
pub const TEMPLATE_NAME: &str = "job";

/// Values a job template is rendered with.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateContext {
    pub owner: String,
    pub repo: String,
    pub revision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl From<&TriggerContext> for TemplateContext {
    fn from(ctx: &TriggerContext) -> Self {
        Self {
            owner: ctx.owner.clone(),
            repo: ctx.repo.clone(),
            revision: ctx.revision.clone(),
            branch: ctx.branch().map(str::to_string),
        }
    }
}

/// Create an environment with the helper library registered.
pub fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    env.add_filter("quote", quote);
    env.add_filter("trim_prefix", trim_prefix);
    env.add_filter("trim_suffix", trim_suffix);
    env.add_filter("trunc", trunc);
    env.add_filter("sha256sum", sha256sum);
    env.add_filter("short_sha", short_sha);
    env.add_filter("dns_label", dns_label);
    env.add_filter("regex_replace", regex_replace);
    env.add_function("split", split);
    env
}

/// Parse a job template into a ready-to-render environment.
pub fn parse(source: impl Into<String>) -> Result<Environment<'static>, Error> {
    let mut env = environment();
    env.add_template_owned(TEMPLATE_NAME, source.into())?;
    Ok(env)
}

fn quote(value: String) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn trim_prefix(value: String, prefix: String) -> String {
    match value.strip_prefix(prefix.as_str()) {
        Some(rest) => rest.to_string(),
        None => value,
    }
}

fn trim_suffix(value: String, suffix: String) -> String {
    match value.strip_suffix(suffix.as_str()) {
        Some(rest) => rest.to_string(),
        None => value,
    }
}

fn trunc(value: String, len: usize) -> String {
    value.chars().take(len).collect()
}

fn sha256sum(value: String) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

fn short_sha(value: String) -> String {
    value.chars().take(7).collect()
}

/// Lowercase, replace anything but `[a-z0-9-]` with `-`, trim dashes and
/// cap at 63 characters, so the result is usable as a Kubernetes name.
fn dns_label(value: String) -> String {
    let label: String = value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let label: String = label.trim_matches('-').chars().take(63).collect();
    label.trim_end_matches('-').to_string()
}

fn regex_replace(value: String, pattern: String, replacement: String) -> Result<String, Error> {
    let re = Regex::new(&pattern).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("invalid pattern {:?}: {}", pattern, e),
        )
    })?;
    Ok(re.replace_all(&value, replacement.as_str()).into_owned())
}

fn split(value: String, separator: String) -> Vec<String> {
    value.split(separator.as_str()).map(str::to_string).collect()
}
