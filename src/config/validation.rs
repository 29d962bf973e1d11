//! Tenant configuration validation
//!
//! Validates a tenant document before a worker is allowed to start:
//! - Required connection fields and project keys are present
//! - The base URL is an http(s) URL
//! - Rule ids are unique and every rule is internally consistent
//! - Tenant names are unique across a config directory

use super::rules::{Direction, Rule, WILDCARD_STATUS};
use super::tenant::{AuthMode, TenantConfig};
use crate::model::ProjectRole;
use crate::SyncFlowError;
use std::collections::HashSet;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub context: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref ctx) = self.context {
            write!(f, "[{}] {}: {}", ctx, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Validate a single tenant configuration
pub fn validate_tenant(config: &TenantConfig) -> ValidationResult {
    let mut errors = Vec::new();
    let ctx = if is_blank(&config.name) {
        "<unnamed>".to_string()
    } else {
        config.name.clone()
    };

    if is_blank(&config.name) {
        errors.push(ValidationError::new("name", "name is required"));
    }

    let base_url = config.jira.base_url.trim();
    if base_url.is_empty() {
        errors.push(ValidationError::new("jira.baseUrl", "jira.baseUrl is required"));
    } else if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        errors.push(ValidationError::new(
            "jira.baseUrl",
            format!("Invalid URL '{}': must start with http:// or https://", base_url),
        ));
    }

    if is_blank(&config.jira.api_token) {
        errors.push(ValidationError::new(
            "jira.apiToken",
            "jira.apiToken is required",
        ));
    }

    if config.jira.auth_type == AuthMode::Basic
        && config.jira.email.as_deref().map(is_blank).unwrap_or(true)
    {
        errors.push(ValidationError::new(
            "jira.email",
            "jira.email is required for basic auth",
        ));
    }

    for role in [ProjectRole::Source, ProjectRole::Target] {
        if is_blank(config.project_key(role)) {
            errors.push(ValidationError::new(
                format!("{}ProjectKey", role),
                format!("{} project key is required", role),
            ));
        }
    }

    if !is_blank(&config.source_project_key)
        && config.source_project_key.trim() == config.target_project_key.trim()
    {
        errors.push(ValidationError::new(
            "targetProjectKey",
            "source and target project keys must differ",
        ));
    }

    if config.sync_interval_minutes == 0 {
        errors.push(ValidationError::new(
            "syncIntervalMinutes",
            "Interval must be greater than 0",
        ));
    }

    if is_blank(&config.issue_type) {
        errors.push(ValidationError::new("issueType", "issueType must not be empty"));
    }

    let mut seen_ids = HashSet::new();
    for (index, rule) in config.rules.iter().enumerate() {
        if !seen_ids.insert(rule.id.as_str()) {
            errors.push(ValidationError::new(
                format!("rules[{}].id", index),
                format!("Duplicate rule id: {}", rule.id),
            ));
        }
        validate_rule(rule, index, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors
            .into_iter()
            .map(|e| e.with_context(ctx.clone()))
            .collect())
    }
}

fn validate_rule(rule: &Rule, index: usize, errors: &mut Vec<ValidationError>) {
    let field = |name: &str| format!("rules[{}].{}", index, name);

    if is_blank(&rule.id) {
        errors.push(ValidationError::new(field("id"), "rule id is required"));
    }

    if is_blank(&rule.source_status) {
        errors.push(ValidationError::new(
            field("sourceStatus"),
            "sourceStatus is required (use \"*\" to match any status)",
        ));
    }

    if rule.actions.create_issue && rule.conditions.requires_mapping() {
        errors.push(ValidationError::new(
            field("conditions.requireMapping"),
            format!(
                "rule '{}' creates issues but requires an existing mapping; it can never fire",
                rule.id
            ),
        ));
    }

    if rule.actions.add_comment
        && rule
            .actions
            .comment_template
            .as_deref()
            .map(is_blank)
            .unwrap_or(true)
    {
        errors.push(ValidationError::new(
            field("actions.commentTemplate"),
            "addComment requires a commentTemplate",
        ));
    }

    let acts_on_own_project = match rule.direction {
        Direction::SourceToTarget => rule.target_project == ProjectRole::Source,
        Direction::TargetToSource => rule.target_project == ProjectRole::Target,
        Direction::Both => false,
    };
    if acts_on_own_project {
        errors.push(ValidationError::new(
            field("targetProject"),
            format!(
                "rule '{}' reacts to {} changes and must act on the other project",
                rule.id, rule.target_project
            ),
        ));
    }

    if !rule.has_actions() {
        tracing::warn!(rule_id = %rule.id, "Rule has no actions and will never do anything");
    }

    if let Some(ref status) = rule.actions.target_status {
        if status.trim() == WILDCARD_STATUS {
            errors.push(ValidationError::new(
                field("actions.targetStatus"),
                "targetStatus cannot be the wildcard",
            ));
        }
    }
}

/// Validate a set of tenants loaded together
pub fn validate_tenants(configs: &[TenantConfig]) -> ValidationResult {
    let mut errors = Vec::new();

    let mut seen_names = HashSet::new();
    for config in configs {
        if !seen_names.insert(config.name.as_str()) {
            errors.push(ValidationError::new(
                "name",
                format!("Duplicate tenant name: {}", config.name),
            ));
        }
    }

    for config in configs {
        if let Err(mut tenant_errors) = validate_tenant(config) {
            errors.append(&mut tenant_errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a tenant and convert failures into a single configuration error
pub fn validate_tenant_result(config: &TenantConfig) -> crate::Result<()> {
    validate_tenant(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        SyncFlowError::Config(format!(
            "Configuration validation failed:\n  {}",
            messages.join("\n  ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rules::{Direction, RuleActions, RuleConditions};

    fn valid_config() -> TenantConfig {
        TenantConfig::new("acme", "https://acme.atlassian.net", "USR", "DEV")
            .with_credentials("bot@acme.io", "token")
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_tenant(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_fields() {
        let mut config = valid_config();
        config.jira.api_token = "  ".to_string();
        config.jira.email = None;
        config.target_project_key = String::new();

        let errors = validate_tenant(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"jira.apiToken"));
        assert!(fields.contains(&"jira.email"));
        assert!(fields.contains(&"targetProjectKey"));
        assert!(errors.iter().all(|e| e.context.as_deref() == Some("acme")));
    }

    #[test]
    fn test_token_auth_needs_no_email() {
        let mut config = valid_config();
        config.jira.email = None;
        config.jira.auth_type = AuthMode::Token;
        assert!(validate_tenant(&config).is_ok());
    }

    #[test]
    fn test_invalid_url() {
        let mut config = valid_config();
        config.jira.base_url = "acme.atlassian.net".to_string();
        let errors = validate_tenant(&config).unwrap_err();
        assert!(errors[0].message.contains("http"));
    }

    #[test]
    fn test_rule_checks() {
        let create_requiring_mapping = Rule::new(
            "bad-create",
            "Will Do",
            Direction::SourceToTarget,
            ProjectRole::Target,
        )
        .with_actions(RuleActions {
            create_issue: true,
            ..Default::default()
        });

        let comment_without_template =
            Rule::new("no-template", "Closed", Direction::Both, ProjectRole::Source)
                .with_conditions(RuleConditions::default())
                .with_actions(RuleActions {
                    add_comment: true,
                    ..Default::default()
                });

        let duplicate = Rule::new("no-template", "Open", Direction::Both, ProjectRole::Source);

        let config =
            valid_config().with_rules(vec![create_requiring_mapping, comment_without_template, duplicate]);
        let errors = validate_tenant(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"rules[0].conditions.requireMapping"));
        assert!(fields.contains(&"rules[1].actions.commentTemplate"));
        assert!(fields.contains(&"rules[2].id"));
    }

    #[test]
    fn test_one_way_rule_must_act_on_other_project() {
        let backwards = Rule::new("back", "Open", Direction::SourceToTarget, ProjectRole::Source)
            .with_actions(RuleActions {
                sync_status: true,
                ..Default::default()
            });
        let errors = validate_tenant(&valid_config().with_rules(vec![backwards])).unwrap_err();
        assert_eq!(errors[0].field, "rules[0].targetProject");

        let both = Rule::new("both", "Open", Direction::Both, ProjectRole::Source).with_actions(
            RuleActions {
                sync_status: true,
                ..Default::default()
            },
        );
        assert!(validate_tenant(&valid_config().with_rules(vec![both])).is_ok());
    }

    #[test]
    fn test_duplicate_tenants() {
        let errors = validate_tenants(&[valid_config(), valid_config()]).unwrap_err();
        assert!(errors[0].message.contains("Duplicate tenant name"));
    }

    #[test]
    fn test_result_message() {
        let mut config = valid_config();
        config.name = String::new();
        let err = validate_tenant_result(&config).unwrap_err();
        assert!(err.to_string().contains("name is required"));
    }
}
