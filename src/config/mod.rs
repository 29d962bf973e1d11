//! Configuration system
//!
//! Per-tenant sync configuration. Each tenant document holds:
//! - Jira connection and credentials (basic or token auth)
//! - The source/target project pair
//! - The ordered rule list
//! - Default behaviors and the poll interval

mod loader;
pub mod rules;
mod tenant;
pub mod validation;

pub use loader::{default_config_dir, load_tenants, tenant_files, LoadReport, TenantEntry};
pub use rules::{Direction, Rule, RuleActions, RuleConditions, WILDCARD_STATUS};
pub use tenant::{
    AuthMode, DefaultBehavior, FallbackBehavior, IntermediateStatuses, JiraConnection,
    TenantConfig,
};
pub use validation::{validate_tenant, validate_tenant_result, validate_tenants, ValidationError};
