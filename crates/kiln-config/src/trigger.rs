//! Trigger policies: decide whether an event builds and with which template.

use kiln_core::{TriggerContext, TriggerKind};

use crate::BuildConfig;

/// Decides, from a repository's build configuration, whether a trigger
/// should produce a job and which template to compile for it.
pub trait TriggerPolicy: Send + Sync {
    fn should_run(&self, config: &BuildConfig, kind: TriggerKind, ctx: &TriggerContext) -> bool;

    /// Template path for a trigger. Only meaningful when `should_run` is true.
    fn template_path(
        &self,
        config: &BuildConfig,
        kind: TriggerKind,
        ctx: &TriggerContext,
    ) -> Option<String>;
}

/// Always runs, always with the default template.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRun;

impl TriggerPolicy for AlwaysRun {
    fn should_run(&self, _config: &BuildConfig, _kind: TriggerKind, _ctx: &TriggerContext) -> bool {
        true
    }

    fn template_path(
        &self,
        config: &BuildConfig,
        _kind: TriggerKind,
        _ctx: &TriggerContext,
    ) -> Option<String> {
        non_empty(&config.default_template_path)
    }
}

/// Evaluates the `triggers` rules of the build configuration.
///
/// Without rules this behaves like [`AlwaysRun`]. With rules, the first rule
/// matching the trigger kind and branch wins; no match means no build.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigRules;

impl ConfigRules {
    fn matching_rule<'a>(
        config: &'a BuildConfig,
        kind: TriggerKind,
        ctx: &TriggerContext,
    ) -> Option<&'a crate::TriggerRule> {
        config.triggers.iter().find(|rule| {
            if rule.on != kind {
                return false;
            }
            if rule.branches.is_empty() {
                return true;
            }
            match ctx.branch() {
                Some(branch) => rule.branches.iter().any(|p| matches_branch_pattern(branch, p)),
                None => false,
            }
        })
    }
}

impl TriggerPolicy for ConfigRules {
    fn should_run(&self, config: &BuildConfig, kind: TriggerKind, ctx: &TriggerContext) -> bool {
        if config.triggers.is_empty() {
            return AlwaysRun.should_run(config, kind, ctx);
        }
        Self::matching_rule(config, kind, ctx).is_some()
    }

    fn template_path(
        &self,
        config: &BuildConfig,
        kind: TriggerKind,
        ctx: &TriggerContext,
    ) -> Option<String> {
        match Self::matching_rule(config, kind, ctx).and_then(|r| r.template.as_deref()) {
            Some(template) => non_empty(template),
            None => non_empty(&config.default_template_path),
        }
    }
}

fn non_empty(path: &str) -> Option<String> {
    let path = path.trim();
    (!path.is_empty()).then(|| path.to_string())
}

/// Check if a branch name matches a pattern with `*` wildcards.
pub fn matches_branch_pattern(branch: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return branch == pattern;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = (parts[0], &parts[1..]);
    let Some(mut remaining) = branch.strip_prefix(first) else {
        return false;
    };

    let (last, middle) = rest.split_last().unwrap_or((&"", &[]));
    for part in middle {
        match remaining.find(part) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TriggerRule;

    fn ctx(revision: &str) -> TriggerContext {
        TriggerContext::new("acme", "widgets", revision)
    }

    fn config_with_rules() -> BuildConfig {
        BuildConfig {
            default_template_path: "build.yaml.tpl".to_string(),
            triggers: vec![
                TriggerRule {
                    on: TriggerKind::Push,
                    branches: vec!["docs/*".to_string()],
                    template: Some("docs.yaml.tpl".to_string()),
                },
                TriggerRule {
                    on: TriggerKind::Push,
                    branches: vec!["main".to_string()],
                    template: None,
                },
            ],
        }
    }

    #[test]
    fn test_always_run_uses_default_template() {
        let config = BuildConfig {
            default_template_path: "build.yaml.tpl".to_string(),
            triggers: vec![],
        };
        for kind in [TriggerKind::Push, TriggerKind::Comment, TriggerKind::Create] {
            assert!(AlwaysRun.should_run(&config, kind, &ctx("refs/heads/any")));
            assert_eq!(
                AlwaysRun.template_path(&config, kind, &ctx("refs/heads/any")).as_deref(),
                Some("build.yaml.tpl")
            );
        }
    }

    #[test]
    fn test_config_rules_without_rules_builds_every_push() {
        let config = BuildConfig {
            default_template_path: "build.yaml.tpl".to_string(),
            triggers: vec![],
        };
        assert!(ConfigRules.should_run(&config, TriggerKind::Push, &ctx("refs/heads/feature/x")));
        assert!(ConfigRules.should_run(&config, TriggerKind::Push, &ctx("refs/tags/v1")));
    }

    #[test]
    fn test_config_rules_branch_filter() {
        let config = config_with_rules();
        assert!(ConfigRules.should_run(&config, TriggerKind::Push, &ctx("refs/heads/main")));
        assert!(!ConfigRules.should_run(&config, TriggerKind::Push, &ctx("refs/heads/dev")));
        assert!(!ConfigRules.should_run(&config, TriggerKind::Push, &ctx("refs/tags/v1")));
        assert!(!ConfigRules.should_run(&config, TriggerKind::Comment, &ctx("refs/heads/main")));
    }

    #[test]
    fn test_config_rules_template_override() {
        let config = config_with_rules();
        assert_eq!(
            ConfigRules
                .template_path(&config, TriggerKind::Push, &ctx("refs/heads/docs/intro"))
                .as_deref(),
            Some("docs.yaml.tpl")
        );
        assert_eq!(
            ConfigRules
                .template_path(&config, TriggerKind::Push, &ctx("refs/heads/main"))
                .as_deref(),
            Some("build.yaml.tpl")
        );
    }

    #[test]
    fn test_empty_template_path_is_none() {
        let config = BuildConfig::default();
        assert_eq!(AlwaysRun.template_path(&config, TriggerKind::Push, &ctx("x")), None);
    }

    #[test]
    fn test_branch_patterns() {
        assert!(matches_branch_pattern("main", "main"));
        assert!(!matches_branch_pattern("main2", "main"));
        assert!(matches_branch_pattern("release/1.0", "release/*"));
        assert!(matches_branch_pattern("feature/login-fix", "feature/*-fix"));
        assert!(matches_branch_pattern("anything", "*"));
        assert!(matches_branch_pattern("a/b/c", "a/*/c"));
        assert!(!matches_branch_pattern("a/b/d", "a/*/c"));
        assert!(!matches_branch_pattern("hotfix/1", "release/*"));
    }
}
