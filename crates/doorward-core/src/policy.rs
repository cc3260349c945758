//! Per-environment access policies.
//!
//! Policies are read from TOML (`[environments.<id>]` tables). A set of
//! presets is embedded at compile time from `presets/environments.toml`;
//! a site file is layered over them. Unknown environments get
//! [`EnvironmentPolicy::fallback`].

use crate::attire::{AttireCheck, AttireItem, AttirePolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

pub const DEFAULT_FACE_THRESHOLD: f32 = 0.6;
pub const DEFAULT_UNIFORM_THRESHOLD: f32 = 0.4;
pub const DEFAULT_BONUS_CAP: f32 = 0.6;

const BUILTIN_PRESETS: &str = include_str!("../presets/environments.toml");

static BUILTIN: OnceLock<BTreeMap<String, EnvironmentPolicy>> = OnceLock::new();

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid policy TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{environment}: face_threshold must be in (0, 1], got {value}")]
    FaceThreshold { environment: String, value: f32 },
    #[error("{environment}: uniform_threshold must be in [0, 1], got {value}")]
    UniformThreshold { environment: String, value: f32 },
    #[error("{environment}: bonus_cap must be in [0, 1], got {value}")]
    BonusCap { environment: String, value: f32 },
    #[error("{environment}: weight of {check} must be in [0, 1], got {value}")]
    Weight {
        environment: String,
        check: AttireCheck,
        value: f32,
    },
    #[error("{environment}: passing_score {passing} is below the required total {required}")]
    PassingScore {
        environment: String,
        passing: f32,
        required: f32,
    },
}

/// Access rules for one site. Read-only during a decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentPolicy {
    pub environment: String,
    pub name: String,
    pub uniform_enabled: bool,
    pub attire: AttirePolicy,
    /// Minimum match confidence, in (0, 1].
    pub face_threshold: f32,
    /// Minimum attire score, in [0, 1].
    pub uniform_threshold: f32,
}

impl EnvironmentPolicy {
    /// Defaults used when no site policy exists: face 0.6, uniform 0.4,
    /// uniform checking on with the reference attire policy.
    pub fn fallback(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            name: environment.to_string(),
            uniform_enabled: true,
            attire: AttirePolicy::reference(),
            face_threshold: DEFAULT_FACE_THRESHOLD,
            uniform_threshold: DEFAULT_UNIFORM_THRESHOLD,
        }
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        let environment = || self.environment.clone();
        if !(self.face_threshold > 0.0 && self.face_threshold <= 1.0) {
            return Err(PolicyError::FaceThreshold {
                environment: environment(),
                value: self.face_threshold,
            });
        }
        if !(0.0..=1.0).contains(&self.uniform_threshold) {
            return Err(PolicyError::UniformThreshold {
                environment: environment(),
                value: self.uniform_threshold,
            });
        }
        if !(0.0..=1.0).contains(&self.attire.bonus_cap) {
            return Err(PolicyError::BonusCap {
                environment: environment(),
                value: self.attire.bonus_cap,
            });
        }
        for item in self.attire.required.iter().chain(&self.attire.optional) {
            if !(0.0..=1.0).contains(&item.weight) {
                return Err(PolicyError::Weight {
                    environment: environment(),
                    check: item.check,
                    value: item.weight,
                });
            }
        }
        let required = self.attire.required_total();
        if self.attire.passing_score + 1e-6 < required {
            return Err(PolicyError::PassingScore {
                environment: environment(),
                passing: self.attire.passing_score,
                required,
            });
        }
        Ok(())
    }
}

/// Source of the policy for an environment. Never fails: unknown
/// environments get defaults.
pub trait PolicyProvider: Send + Sync {
    fn policy(&self, environment: &str) -> EnvironmentPolicy;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    #[serde(default)]
    environments: BTreeMap<String, EnvironmentSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnvironmentSpec {
    name: Option<String>,
    #[serde(default = "default_uniform_enabled")]
    uniform_enabled: bool,
    #[serde(default = "default_face_threshold")]
    face_threshold: f32,
    #[serde(default = "default_uniform_threshold")]
    uniform_threshold: f32,
    passing_score: Option<f32>,
    #[serde(default = "default_bonus_cap")]
    bonus_cap: f32,
    required_items: Option<Vec<ItemSpec>>,
    optional_items: Option<Vec<ItemSpec>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ItemSpec {
    check: AttireCheck,
    weight: Option<f32>,
}

fn default_uniform_enabled() -> bool {
    true
}

fn default_face_threshold() -> f32 {
    DEFAULT_FACE_THRESHOLD
}

fn default_uniform_threshold() -> f32 {
    DEFAULT_UNIFORM_THRESHOLD
}

fn default_bonus_cap() -> f32 {
    DEFAULT_BONUS_CAP
}

impl ItemSpec {
    fn resolve(&self) -> AttireItem {
        AttireItem {
            check: self.check,
            weight: self.weight.unwrap_or_else(|| self.check.default_weight()),
        }
    }
}

impl EnvironmentSpec {
    fn into_policy(self, environment: &str) -> EnvironmentPolicy {
        let attire = match (self.required_items, self.optional_items) {
            (None, None) if self.uniform_enabled => {
                let mut reference = AttirePolicy::reference();
                reference.bonus_cap = self.bonus_cap;
                reference
            }
            (None, None) => AttirePolicy::empty(),
            (required, optional) => {
                let required: Vec<AttireItem> =
                    required.unwrap_or_default().iter().map(ItemSpec::resolve).collect();
                let optional: Vec<AttireItem> =
                    optional.unwrap_or_default().iter().map(ItemSpec::resolve).collect();
                AttirePolicy::with_items(required, optional, self.bonus_cap)
            }
        };
        let attire = match self.passing_score {
            Some(passing_score) => AttirePolicy { passing_score, ..attire },
            None => attire,
        };

        EnvironmentPolicy {
            environment: environment.to_string(),
            name: self.name.unwrap_or_else(|| environment.to_string()),
            uniform_enabled: self.uniform_enabled,
            attire,
            face_threshold: self.face_threshold,
            uniform_threshold: self.uniform_threshold,
        }
    }
}

fn parse_policies(src: &str) -> Result<BTreeMap<String, EnvironmentPolicy>, PolicyError> {
    let file: PolicyFile = toml::from_str(src)?;
    let mut out = BTreeMap::new();
    for (environment, spec) in file.environments {
        let policy = spec.into_policy(&environment);
        policy.validate()?;
        out.insert(environment, policy);
    }
    Ok(out)
}

fn builtin() -> &'static BTreeMap<String, EnvironmentPolicy> {
    BUILTIN.get_or_init(|| match parse_policies(BUILTIN_PRESETS) {
        Ok(policies) => policies,
        Err(e) => {
            tracing::error!(error = %e, "built-in policy presets are invalid");
            BTreeMap::new()
        }
    })
}

/// Policies keyed by environment id.
#[derive(Debug, Clone, Default)]
pub struct PolicyBook {
    policies: BTreeMap<String, EnvironmentPolicy>,
}

impl PolicyBook {
    /// No policies: every environment resolves to the fallback.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The embedded presets (`school_college`, `hospital`, `hotel`, `office`).
    pub fn builtin() -> Self {
        Self {
            policies: builtin().clone(),
        }
    }

    pub fn from_toml_str(src: &str) -> Result<Self, PolicyError> {
        Ok(Self {
            policies: parse_policies(src)?,
        })
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let src = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    /// Built-in presets, overlaid with `path` when given.
    ///
    /// A file that cannot be read, parsed or validated is reported and
    /// ignored; the presets stay in effect.
    pub fn load_or_builtin(path: Option<&Path>) -> Self {
        let mut book = Self::builtin();
        if let Some(path) = path {
            match Self::load(path) {
                Ok(site) => {
                    tracing::info!(
                        path = %path.display(),
                        environments = site.policies.len(),
                        "loaded site policy file"
                    );
                    book.policies.extend(site.policies);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "ignoring site policy file; using built-in presets"
                    );
                }
            }
        }
        book
    }

    /// Add or replace one environment's policy.
    pub fn with_policy(mut self, policy: EnvironmentPolicy) -> Self {
        self.policies.insert(policy.environment.clone(), policy);
        self
    }

    pub fn get(&self, environment: &str) -> Option<&EnvironmentPolicy> {
        self.policies.get(environment)
    }

    pub fn environments(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }
}

impl PolicyProvider for PolicyBook {
    fn policy(&self, environment: &str) -> EnvironmentPolicy {
        match self.get(environment) {
            Some(policy) => policy.clone(),
            None => {
                tracing::warn!(environment, "no policy for environment; using defaults");
                EnvironmentPolicy::fallback(environment)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_presets_parse() {
        let book = PolicyBook::builtin();
        let envs: Vec<&str> = book.environments().collect();
        assert_eq!(envs, vec!["hospital", "hotel", "office", "school_college"]);

        let school = book.get("school_college").unwrap();
        assert!(school.uniform_enabled);
        assert_eq!(school.attire, AttirePolicy::reference());
        assert!((school.attire.passing_score - 0.4).abs() < 1e-6);

        let hotel = book.get("hotel").unwrap();
        assert!(!hotel.uniform_enabled);
        assert!((hotel.face_threshold - 0.7).abs() < 1e-6);
        assert!(hotel.attire.required.is_empty());
    }

    #[test]
    fn test_hospital_preset() {
        let book = PolicyBook::builtin();
        let hospital = book.get("hospital").unwrap();
        assert!(hospital.uniform_enabled);
        assert!((hospital.face_threshold - 0.7).abs() < 1e-6);
        assert!((hospital.uniform_threshold - 0.5).abs() < 1e-6);
        assert!((hospital.attire.passing_score - 0.5).abs() < 1e-6);
        assert!((hospital.attire.bonus_cap - 0.5).abs() < 1e-6);
        let required: Vec<AttireCheck> = hospital.attire.required.iter().map(|i| i.check).collect();
        assert_eq!(required, vec![AttireCheck::IdCard, AttireCheck::Shirt]);
        assert!(hospital.validate().is_ok());
    }

    #[test]
    fn test_unknown_environment_falls_back() {
        let policy = PolicyBook::builtin().policy("warehouse");
        assert_eq!(policy.environment, "warehouse");
        assert!(policy.uniform_enabled);
        assert!((policy.face_threshold - 0.6).abs() < 1e-6);
        assert!((policy.uniform_threshold - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_weights_and_passing_score_from_toml() {
        let book = PolicyBook::from_toml_str(
            r#"
            [environments.lab]
            uniform_threshold = 0.5
            required_items = [{ check = "shirt", weight = 0.3 }, { check = "id_card" }]
            optional_items = [{ check = "shoes" }]
            bonus_cap = 0.2
            "#,
        )
        .unwrap();
        let lab = book.get("lab").unwrap();
        assert_eq!(lab.name, "lab");
        assert_eq!(lab.attire.required[0], AttireItem { check: AttireCheck::Shirt, weight: 0.3 });
        assert_eq!(lab.attire.required[1].weight, 0.2);
        assert!((lab.attire.passing_score - 0.5).abs() < 1e-6);
        assert_eq!(lab.attire.bonus_cap, 0.2);
    }

    #[test]
    fn test_unknown_check_rejected() {
        let err = PolicyBook::from_toml_str(
            r#"
            [environments.factory]
            required_items = [{ check = "safety_helmet" }]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::Parse(_)));
    }

    #[test]
    fn test_threshold_validation() {
        let err = PolicyBook::from_toml_str("[environments.x]\nface_threshold = 0.0\n").unwrap_err();
        assert!(matches!(err, PolicyError::FaceThreshold { .. }));
        let err = PolicyBook::from_toml_str("[environments.x]\nuniform_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, PolicyError::UniformThreshold { .. }));
    }

    #[test]
    fn test_passing_score_below_required_rejected() {
        let err = PolicyBook::from_toml_str(
            r#"
            [environments.x]
            passing_score = 0.1
            required_items = [{ check = "id_card" }, { check = "shirt" }]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::PassingScore { .. }));
    }

    #[test]
    fn test_site_file_overrides_presets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.toml");
        std::fs::write(&path, "[environments.hotel]\nuniform_enabled = false\nface_threshold = 0.9\n").unwrap();

        let book = PolicyBook::load_or_builtin(Some(&path));
        assert!((book.get("hotel").unwrap().face_threshold - 0.9).abs() < 1e-6);
        assert!(book.get("school_college").is_some());

        std::fs::write(&path, "this is not toml [").unwrap();
        let book = PolicyBook::load_or_builtin(Some(&path));
        assert!((book.get("hotel").unwrap().face_threshold - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_fallback_is_valid() {
        assert!(EnvironmentPolicy::fallback("any").validate().is_ok());
    }
}
