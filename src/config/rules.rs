//! Sync rule definitions
//!
//! Rules are a flat list. Each one names the status that triggers it, the
//! direction it applies to and the actions it authorizes. Field names accept
//! both the current spelling and the legacy user/dev one.

use crate::model::ProjectRole;
use serde::{Deserialize, Serialize};

/// Source status that matches every status
pub const WILDCARD_STATUS: &str = "*";

/// Which status changes a rule reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Changes observed on the source project
    #[serde(
        rename = "source_to_target",
        alias = "sourceToTarget",
        alias = "user_to_dev"
    )]
    SourceToTarget,

    /// Changes observed on the target project
    #[serde(
        rename = "target_to_source",
        alias = "targetToSource",
        alias = "dev_to_user"
    )]
    TargetToSource,

    /// Changes observed on either project
    #[serde(rename = "both")]
    Both,
}

impl Direction {
    /// Whether a change on `role` is covered by this direction
    pub fn applies_to(self, role: ProjectRole) -> bool {
        matches!(
            (self, role),
            (Direction::Both, _)
                | (Direction::SourceToTarget, ProjectRole::Source)
                | (Direction::TargetToSource, ProjectRole::Target)
        )
    }
}

/// Preconditions checked by the orchestrator before executing a rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConditions {
    /// Only fire when a mapping already exists (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_mapping: Option<bool>,

    /// Only fire on a real status transition (default from the tenant)
    #[serde(
        default,
        alias = "onStatusChange",
        skip_serializing_if = "Option::is_none"
    )]
    pub only_on_change: Option<bool>,
}

impl RuleConditions {
    pub fn requires_mapping(&self) -> bool {
        self.require_mapping.unwrap_or(true)
    }
}

/// Side effects a rule authorizes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleActions {
    #[serde(default)]
    pub create_issue: bool,
    #[serde(default)]
    pub sync_status: bool,
    #[serde(default)]
    pub sync_attachments: bool,
    #[serde(default)]
    pub add_comment: bool,
    #[serde(default)]
    pub add_cross_link: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_template: Option<String>,
    /// Destination status; may reference `${sourceKey}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_status: Option<String>,
}

/// A declarative status-change rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,

    /// Status that triggers the rule, or `*`
    pub source_status: String,

    /// Project the rule acts upon
    #[serde(alias = "targetProjectRole")]
    pub target_project: ProjectRole,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_status: Option<String>,

    #[serde(alias = "syncDirection")]
    pub direction: Direction,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub conditions: RuleConditions,

    #[serde(default)]
    pub actions: RuleActions,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Create an enabled rule with no actions
    pub fn new(
        id: impl Into<String>,
        source_status: impl Into<String>,
        direction: Direction,
        target_project: ProjectRole,
    ) -> Self {
        Self {
            id: id.into(),
            source_status: source_status.into(),
            target_project,
            target_status: None,
            direction,
            enabled: true,
            priority: 0,
            conditions: RuleConditions::default(),
            actions: RuleActions::default(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_actions(mut self, actions: RuleActions) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_conditions(mut self, conditions: RuleConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_target_status(mut self, status: impl Into<String>) -> Self {
        self.target_status = Some(status.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.source_status.trim() == WILDCARD_STATUS
    }

    /// Exact, case-sensitive comparison after trimming both sides
    pub fn matches_status(&self, status: &str) -> bool {
        self.is_wildcard() || self.source_status.trim() == status.trim()
    }

    /// True when the rule does anything at all
    pub fn has_actions(&self) -> bool {
        let a = &self.actions;
        a.create_issue || a.sync_status || a.add_comment || a.add_cross_link || a.sync_attachments
    }
}
