//! Domain-Conflict stage: availability, interaction and dosage checks over the
//! medications an artifact references.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapters::{AvailabilityLookup, DeclaredAvailability};
use crate::core::runtime::Stage;
use crate::domain::{AuditResult, Medication, StageKind};

/// Known substitutes, keyed by item name (matched case-insensitively)
const ALTERNATIVES: &[(&str, &[&str])] = &[
    (
        "testosterone cypionate",
        &["Testosterone Enanthate", "Testosterone Undecanoate"],
    ),
    (
        "estradiol valerate",
        &["Estradiol Benzoate", "Estradiol Cypionate"],
    ),
    ("hcg", &["Gonadorelin"]),
];

/// Interacting ingredient pairs (order-insensitive) and the effect
const INTERACTIONS: &[(&str, &str, &str)] = &[
    ("warfarin", "aspirin", "increased bleeding risk"),
    ("warfarin", "ibuprofen", "increased bleeding risk"),
    ("sildenafil", "nitroglycerin", "severe hypotension"),
    ("simvastatin", "clarithromycin", "myopathy from raised statin levels"),
    ("spironolactone", "potassium chloride", "hyperkalemia"),
];

/// What the caller wants from the check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    Validate,
    CheckStock,
    /// Also list alternatives for items that are available
    FindAlternatives,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCheck {
    pub medications: Vec<Medication>,
    pub action: ConflictAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    /// No warnings and no conflicts
    pub valid: bool,

    /// Item name → available
    pub availability: BTreeMap<String, bool>,

    /// Item name → substitutes
    pub alternatives: BTreeMap<String, Vec<String>>,

    pub warnings: Vec<String>,
    pub conflicts: Vec<String>,
}

pub struct DomainConflictStage {
    availability: Arc<dyn AvailabilityLookup>,
}

impl Default for DomainConflictStage {
    fn default() -> Self {
        Self::new(Arc::new(DeclaredAvailability))
    }
}

impl DomainConflictStage {
    pub fn new(availability: Arc<dyn AvailabilityLookup>) -> Self {
        Self { availability }
    }

    async fn is_available(&self, medication: &Medication) -> bool {
        match self.availability.is_available(medication).await {
            Ok(available) => available,
            Err(e) => {
                warn!(item = %medication.name, error = %e, "Availability lookup failed, using declared flag");
                medication.in_stock
            }
        }
    }
}

#[async_trait]
impl Stage for DomainConflictStage {
    type Input = ConflictCheck;
    type Output = ConflictReport;

    fn kind(&self) -> StageKind {
        StageKind::DomainConflict
    }

    fn validate(&self, input: &ConflictCheck) -> bool {
        input.medications.iter().all(|m| !m.name.trim().is_empty())
    }

    async fn execute(&self, input: &ConflictCheck, cancel: CancellationToken) -> Result<ConflictReport> {
        let mut report = ConflictReport::default();

        for medication in &input.medications {
            if cancel.is_cancelled() {
                anyhow::bail!("Conflict check cancelled");
            }

            let available = self.is_available(medication).await;
            report.availability.insert(medication.name.clone(), available);

            if !available {
                report.warnings.push(format!("{} is out of stock", medication.name));
            }
            if !available || input.action == ConflictAction::FindAlternatives {
                let substitutes = alternatives_for(&medication.name);
                if !substitutes.is_empty() {
                    report.alternatives.insert(medication.name.clone(), substitutes);
                }
            }
        }

        if input.medications.len() > 1 {
            report.conflicts = find_interactions(&input.medications);
        }

        report.warnings.extend(dosage_warnings(&input.medications));
        report.valid = report.warnings.is_empty() && report.conflicts.is_empty();

        debug!(
            items = input.medications.len(),
            warnings = report.warnings.len(),
            conflicts = report.conflicts.len(),
            "Conflict check finished"
        );
        Ok(report)
    }

    fn audit_result(&self, output: &ConflictReport) -> AuditResult {
        if output.valid {
            AuditResult::Success
        } else {
            AuditResult::Warning
        }
    }
}

pub fn alternatives_for(name: &str) -> Vec<String> {
    let key = name.trim().to_lowercase();
    ALTERNATIVES
        .iter()
        .find(|(item, _)| *item == key)
        .map(|(_, subs)| subs.iter().map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

fn interaction(a: &str, b: &str) -> Option<&'static str> {
    INTERACTIONS
        .iter()
        .find(|(x, y, _)| (*x == a && *y == b) || (*x == b && *y == a))
        .map(|(_, _, effect)| *effect)
}

/// One message per interacting ingredient pair, naming both items
pub fn find_interactions(medications: &[Medication]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut conflicts = Vec::new();

    for (i, first) in medications.iter().enumerate() {
        for second in &medications[i + 1..] {
            let a = first.normalized_ingredient();
            let b = second.normalized_ingredient();
            if a == b {
                continue;
            }

            let Some(effect) = interaction(&a, &b) else {
                continue;
            };
            let pair = if a < b { (a, b) } else { (b, a) };
            if seen.insert(pair) {
                conflicts.push(format!("{} + {}: {}", first.name, second.name, effect));
            }
        }
    }

    conflicts
}

/// Structural checks on each item's dosing fields
pub fn dosage_warnings(medications: &[Medication]) -> Vec<String> {
    let mut warnings = Vec::new();

    for medication in medications {
        let dosage: String = medication
            .dosage
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        if dosage.contains("1000mg") && medication.frequency.trim().eq_ignore_ascii_case("daily") {
            warnings.push(format!("{}: high dosage, verify the prescription", medication.name));
        }
        if dosage.is_empty() {
            warnings.push(format!("{}: dosage not specified", medication.name));
        }
        if medication.frequency.trim().is_empty() {
            warnings.push(format!("{}: frequency not specified", medication.name));
        }
        if medication.route.is_none() {
            warnings.push(format!("{}: administration route not specified", medication.name));
        }
        if medication.duration.trim().is_empty() {
            warnings.push(format!("{}: treatment duration not specified", medication.name));
        }
    }

    warnings
}
