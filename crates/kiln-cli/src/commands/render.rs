//! Local render and validate commands.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use kiln_config::{ConfigRules, template};
use kiln_core::files::FileProvider;
use kiln_core::{TriggerContext, TriggerKind};
use kiln_pipeline::{Compiler, DirFiles, Resolver};
use tracing::debug;

/// Print the job spec `trigger` would start for a local checkout.
pub async fn render(
    dir: &Path,
    owner: &str,
    repo: &str,
    rev: &str,
    trigger: TriggerKind,
) -> Result<()> {
    let ctx = TriggerContext::new(owner, repo, rev);
    match render_spec(dir, trigger, &ctx).await? {
        Some(yaml) => print!("{}", yaml),
        None => eprintln!("Trigger conditions not met: {} to {} starts no job", trigger, ctx),
    }
    Ok(())
}

/// Resolve and compile, returning the spec as YAML, or `None` when the
/// trigger would not start a job.
pub async fn render_spec(
    dir: &Path,
    trigger: TriggerKind,
    ctx: &TriggerContext,
) -> Result<Option<String>> {
    let files = DirFiles::new(dir);
    let resolver = Resolver::new(Arc::new(ConfigRules));
    let Some(resolved) = resolver.resolve(&files, trigger, ctx).await? else {
        return Ok(None);
    };
    debug!(template = %resolved.template_path, context = %ctx, "Rendering");

    let spec = Compiler::new()
        .compile(&resolved.template, ctx)
        .await
        .with_context(|| format!("Failed to compile {}", resolved.template_path))?;
    Ok(Some(serde_yaml::to_string(&spec)?))
}

/// Check that the build configuration parses and every template it names
/// exists and parses.
pub async fn validate(dir: &Path) -> Result<()> {
    let templates = check_config(dir).await?;
    println!("Configuration is valid");
    for path in templates {
        println!("  template {}", path);
    }
    Ok(())
}

async fn check_config(dir: &Path) -> Result<BTreeSet<String>> {
    let files = DirFiles::new(dir);
    let config = Resolver::new(Arc::new(ConfigRules))
        .load_config(&files)
        .await?;

    let templates: BTreeSet<String> = std::iter::once(config.default_template_path.clone())
        .chain(config.triggers.iter().filter_map(|r| r.template.clone()))
        .filter(|p| !p.trim().is_empty())
        .collect();

    for path in &templates {
        let raw = files
            .fetch(path)
            .await
            .with_context(|| format!("Failed to read template {}", path))?;
        let source = String::from_utf8(raw.to_vec())
            .with_context(|| format!("Template {} is not valid UTF-8", path))?;
        template::parse(source).with_context(|| format!("Failed to parse template {}", path))?;
    }
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_config::CONFIG_PATH;

    fn checkout(config: &str, templates: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_PATH), config).unwrap();
        for (path, content) in templates {
            let path = dir.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    const TEMPLATE: &str = "containers:\n  - name: build\n    image: alpine\n    args: [\"{{ Revision }}\"]\n";

    #[tokio::test(flavor = "multi_thread")]
    async fn test_render_spec() {
        let dir = checkout(
            "defaultTemplatePath: ci/build.yaml.tpl\n",
            &[("ci/build.yaml.tpl", TEMPLATE)],
        );
        let ctx = TriggerContext::new("acme", "widgets", "refs/heads/main");

        let yaml = render_spec(dir.path(), TriggerKind::Push, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert!(yaml.contains("refs/heads/main"), "{yaml}");
        assert!(yaml.contains("image: alpine"), "{yaml}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_render_declined_trigger() {
        let dir = checkout(
            "defaultTemplatePath: build.yaml.tpl\ntriggers:\n  - on: push\n    branches: [main]\n",
            &[("build.yaml.tpl", TEMPLATE)],
        );
        let ctx = TriggerContext::new("acme", "widgets", "refs/heads/dev");
        assert!(
            render_spec(dir.path(), TriggerKind::Push, &ctx)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_validate_lists_templates() {
        let dir = checkout(
            "defaultTemplatePath: build.yaml.tpl\ntriggers:\n  - on: push\n    branches: [docs/*]\n    template: docs.yaml.tpl\n",
            &[("build.yaml.tpl", TEMPLATE), ("docs.yaml.tpl", TEMPLATE)],
        );
        let templates = check_config(dir.path()).await.unwrap();
        assert_eq!(
            templates.into_iter().collect::<Vec<_>>(),
            ["build.yaml.tpl", "docs.yaml.tpl"]
        );
    }

    #[tokio::test]
    async fn test_validate_reports_broken_template() {
        let dir = checkout(
            "defaultTemplatePath: build.yaml.tpl\n",
            &[("build.yaml.tpl", "{% for %}")],
        );
        let err = check_config(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("build.yaml.tpl"));
    }

    #[tokio::test]
    async fn test_validate_missing_template() {
        let dir = checkout("defaultTemplatePath: build.yaml.tpl\n", &[]);
        assert!(check_config(dir.path()).await.is_err());
    }
}
