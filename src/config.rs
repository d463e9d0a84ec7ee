use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::models::InterventionKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCopy {
    pub description: String,
    pub suggested_action: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionCopyOverride {
    description: Option<String>,
    suggested_action: Option<String>,
}

/// Domain copy attached to every intervention, keyed by intervention type.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCatalog {
    entries: HashMap<InterventionKind, ActionCopy>,
}

fn builtin_copy(kind: InterventionKind) -> ActionCopy {
    let (description, suggested_action) = match kind {
        InterventionKind::IntensiveRecovery => (
            "Overall average below the passing threshold",
            "Enroll in an intensive recovery plan with weekly tutoring and an individual study schedule",
        ),
        InterventionKind::ActiveSearch => (
            "Attendance below the minimum required",
            "Contact the family, investigate the causes of absence and agree on a return plan",
        ),
        InterventionKind::IntegralFollowUp => (
            "Borderline average combined with irregular attendance",
            "Schedule a meeting with the family and the coordination team to build an integrated support plan",
        ),
        InterventionKind::PedagogicalReinforcement => (
            "Average close to the passing threshold",
            "Offer reinforcement classes and extra practice in the weakest subjects",
        ),
        InterventionKind::AttendanceMonitoring => (
            "Attendance close to the minimum required",
            "Track weekly attendance and talk with the student about the impact of absences",
        ),
        InterventionKind::StimulusForDevelopment => (
            "Satisfactory performance with room to grow",
            "Propose enrichment activities and challenges that encourage further progress",
        ),
        InterventionKind::PerformanceDrop => (
            "Significant grade drop between terms",
            "Talk with the student to understand the drop and review the content of the affected term",
        ),
    };
    ActionCopy {
        description: description.to_string(),
        suggested_action: suggested_action.to_string(),
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self {
            entries: InterventionKind::ALL
                .into_iter()
                .map(|kind| (kind, builtin_copy(kind)))
                .collect(),
        }
    }
}

impl ActionCatalog {
    /// Built-in copy, with any entries from the JSON file at `path` layered on top.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut catalog = Self::default();
        let Some(path) = path else {
            return Ok(catalog);
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read action catalog {}", path.display()))?;
        let overrides: HashMap<InterventionKind, ActionCopyOverride> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid action catalog {}", path.display()))?;

        tracing::debug!(entries = overrides.len(), path = %path.display(), "loaded action catalog");
        catalog.apply(overrides);
        Ok(catalog)
    }

    fn apply(&mut self, overrides: HashMap<InterventionKind, ActionCopyOverride>) {
        for (kind, update) in overrides {
            let entry = self.entries.entry(kind).or_insert_with(|| builtin_copy(kind));
            if let Some(description) = update.description {
                entry.description = description;
            }
            if let Some(suggested_action) = update.suggested_action {
                entry.suggested_action = suggested_action;
            }
        }
    }

    pub fn copy(&self, kind: InterventionKind) -> ActionCopy {
        self.entries
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| builtin_copy(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_catalog_covers_every_kind() {
        let catalog = ActionCatalog::default();
        for kind in InterventionKind::ALL {
            let copy = catalog.copy(kind);
            assert!(!copy.description.is_empty());
            assert!(!copy.suggested_action.is_empty());
        }
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{ "active-search": {{ "suggestedAction": "Call home the same day" }} }}"#
        )
        .expect("write catalog");

        let catalog = ActionCatalog::load(Some(file.path())).expect("load catalog");
        let copy = catalog.copy(InterventionKind::ActiveSearch);
        assert_eq!(copy.suggested_action, "Call home the same day");
        assert_eq!(
            copy.description,
            builtin_copy(InterventionKind::ActiveSearch).description
        );
        assert_eq!(
            catalog.copy(InterventionKind::PerformanceDrop),
            builtin_copy(InterventionKind::PerformanceDrop)
        );
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "detention": {{ "description": "x" }} }}"#).expect("write catalog");
        assert!(ActionCatalog::load(Some(file.path())).is_err());
    }

    #[test]
    fn missing_path_uses_builtin_copy() {
        let catalog = ActionCatalog::load(None).expect("defaults");
        assert_eq!(catalog, ActionCatalog::default());
    }
}
