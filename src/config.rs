//! Namespaced key-value configuration store (SPEC_FULL §B.3).
//!
//! Backed by `serde` + `toml`, matching the teacher crate's own choice
//! of configuration stack. Holds the persisted state spec §6 lists
//! outside the change logs: per-space/group/node/file-system settings,
//! the global path-remap table, and access rules (stall/redirect/bans).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MgmError, MgmResult};

/// One entry of the global path-remap table (spec §6).
///
/// `source` must start and end with `/`, must not contain `..`, `//`,
/// or whitespace; `target` must satisfy the same.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRemap {
    pub source: String,
    pub target: String,
}

impl PathRemap {
    pub fn validate(&self) -> MgmResult<()> {
        validate_remap_component(&self.source)?;
        validate_remap_component(&self.target)?;
        Ok(())
    }
}

fn validate_remap_component(s: &str) -> MgmResult<()> {
    if !s.starts_with('/') || !s.ends_with('/') {
        return Err(MgmError::invalid(format!("path-remap component `{s}` must start and end with `/`")));
    }
    if s.contains("..") || s.contains("//") || s.chars().any(char::is_whitespace) {
        return Err(MgmError::invalid(format!(
            "path-remap component `{s}` must not contain `..`, `//`, or whitespace"
        )));
    }
    Ok(())
}

/// A stall rule: requests matching `target` are told to retry after
/// `seconds` with `message` (spec §4.6 step 2, §7 ServiceBusy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StallRule {
    pub target: String,
    pub seconds: u32,
    pub message: String,
}

/// A redirect rule: requests matching `target` are redirected to
/// `host:port` unconditionally (spec §4.6 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectRule {
    pub target: String,
    pub host: String,
    pub port: u16,
}

/// Banned/allowed principal lists (spec §6 "access-rules file").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessRules {
    #[serde(default)]
    pub banned_users: Vec<String>,
    #[serde(default)]
    pub banned_groups: Vec<String>,
    #[serde(default)]
    pub banned_hosts: Vec<String>,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub allowed_groups: Vec<String>,
    #[serde(default)]
    pub stall_rules: Vec<StallRule>,
    #[serde(default)]
    pub redirect_rules: Vec<RedirectRule>,
}

impl AccessRules {
    pub fn is_user_banned(&self, uid_name: &str) -> bool {
        self.banned_users.iter().any(|u| u == uid_name)
    }

    /// First matching global stall rule, if any (spec §4.6 step 2).
    pub fn matching_stall(&self, path: &str) -> Option<&StallRule> {
        self.stall_rules.iter().find(|rule| path.starts_with(&rule.target))
    }

    /// First matching global redirect rule, if any (spec §4.6 step 3).
    pub fn matching_redirect(&self, path: &str) -> Option<&RedirectRule> {
        self.redirect_rules.iter().find(|rule| path.starts_with(&rule.target))
    }
}

/// Admin group membership and `sss` daemon uid for `/proc/admin/`
/// authorization (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcAuth {
    #[serde(default)]
    pub admin_groups: Vec<String>,
    #[serde(default)]
    pub sss_daemon_uid: Option<u32>,
}

/// Top-level configuration document, loaded once at `init(config)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub path_remap: Vec<PathRemap>,
    #[serde(default)]
    pub access_rules: AccessRules,
    #[serde(default)]
    pub proc_auth: ProcAuth,
    /// Opaque per-space/group/node/file-system settings, addressed as
    /// `"<namespace>.<key>"` (spec §6: "namespaced key-value pairs").
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

impl Config {
    pub fn load(path: &Path) -> MgmResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| MgmError::invalid(format!("reading config {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> MgmResult<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| MgmError::invalid(format!("parsing config: {e}")))?;
        for remap in &config.path_remap {
            remap.validate()?;
        }
        Ok(config)
    }

    /// Resolves a path through the global path-remap table (spec §6).
    /// The first matching `source` prefix is rewritten to `target`.
    pub fn remap_path(&self, path: &str) -> String {
        for remap in &self.path_remap {
            if let Some(suffix) = path.strip_prefix(remap.source.trim_end_matches('/')) {
                if suffix.is_empty() || suffix.starts_with('/') {
                    return format!("{}{}", remap.target.trim_end_matches('/'), suffix);
                }
            }
        }
        path.to_string()
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remap_rejects_missing_slashes() {
        let remap = PathRemap { source: "eos".into(), target: "/eos/".into() };
        assert!(remap.validate().is_err());
    }

    #[test]
    fn remap_rejects_dotdot() {
        let remap = PathRemap { source: "/a/../".into(), target: "/b/".into() };
        assert!(remap.validate().is_err());
    }

    #[test]
    fn remap_rewrites_matching_prefix() {
        let mut cfg = Config::default();
        cfg.path_remap.push(PathRemap { source: "/old/".into(), target: "/new/".into() });
        assert_eq!(cfg.remap_path("/old/sub/file"), "/new/sub/file");
        assert_eq!(cfg.remap_path("/other/file"), "/other/file");
    }

    #[test]
    fn stall_rule_matches_by_prefix() {
        let mut rules = AccessRules::default();
        rules.stall_rules.push(StallRule { target: "/eos/banned".into(), seconds: 30, message: "busy".into() });
        assert!(rules.matching_stall("/eos/banned/x").is_some());
        assert!(rules.matching_stall("/eos/ok").is_none());
    }

    #[test]
    fn parses_toml_document() {
        let text = r#"
            [access_rules]
            banned_users = ["evil"]

            [[path_remap]]
            source = "/old/"
            target = "/new/"
        "#;
        let cfg = Config::parse(text).unwrap();
        assert!(cfg.access_rules.is_user_banned("evil"));
        assert_eq!(cfg.path_remap.len(), 1);
    }
}
