//! Schema normalizer: raw rows to typed entities
//!
//! Two steps per entity spec:
//! 1. `canonicalize` resolves source aliases to canonical fields and
//!    applies the absent-field rule (reject, null, or synthesize).
//! 2. `build_entity` coerces the canonical values into the typed record.
//!
//! A malformed numeric cell becomes `None`; only a missing required field
//! or an unusable date rejects the row.

use crate::datasets::{DefaultValue, EntitySpec, FieldRule};
use crate::entities::{
    BetosCode, BetosMetric, Claim, Entity, EntityKind, Provider, TaxonomyEntry,
};
use crate::source::{RawRow, RawValue};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// A row dropped by the normalizer. Not fatal to the run.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRejection {
    pub row_index: usize,
    pub entity: EntityKind,
    pub reason: String,
}

/// Raw values keyed by canonical field, restricted to the declared fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRow {
    pub index: usize,
    values: BTreeMap<&'static str, RawValue>,
}

static EMPTY: RawValue = RawValue::Empty;

impl CanonicalRow {
    pub fn get(&self, field: &str) -> &RawValue {
        self.values.get(field).unwrap_or(&EMPTY)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.values.len()
    }

    fn text(&self, field: &str) -> Option<String> {
        match self.get(field) {
            RawValue::Empty => None,
            RawValue::Text(s) => Some(s.clone()),
            RawValue::Number(n) => Some(format_number(*n)),
        }
    }

    fn required_text(&self, field: &str) -> Result<String, String> {
        self.text(field)
            .ok_or_else(|| format!("missing required field '{}'", field))
    }

    fn number(&self, field: &str) -> Option<f64> {
        match self.get(field) {
            RawValue::Empty => None,
            RawValue::Number(n) if n.is_finite() => Some(*n),
            RawValue::Number(_) => None,
            RawValue::Text(s) => {
                let parsed = parse_number(s);
                if parsed.is_none() {
                    tracing::debug!(row = self.index, field, value = %s, "non-numeric value stored as null");
                }
                parsed
            }
        }
    }

    fn date(&self, field: &str) -> Result<NaiveDate, String> {
        match self.get(field) {
            RawValue::Text(s) => {
                parse_date(s).ok_or_else(|| format!("unparsable date '{}' in '{}'", s, field))
            }
            other => Err(format!("'{}' is not a date: {:?}", field, other)),
        }
    }
}

/// Resolve aliases and apply absent-field rules for one entity spec.
pub fn canonicalize(row: &RawRow, spec: &EntitySpec) -> Result<CanonicalRow, RowRejection> {
    let mut values = BTreeMap::new();

    for field in &spec.fields {
        let found = field
            .sources
            .iter()
            .filter_map(|source| row.get(source))
            .find(|v| !v.is_empty())
            .cloned();

        let value = match (found, field.rule) {
            (Some(v), _) => v,
            (None, FieldRule::Required) => {
                return Err(RowRejection {
                    row_index: row.index,
                    entity: spec.kind,
                    reason: format!("missing required field '{}'", field.canonical),
                });
            }
            (None, FieldRule::Optional) => RawValue::Empty,
            (None, FieldRule::Defaulted(default)) => synthesize(default, row.index),
        };
        values.insert(field.canonical, value);
    }

    Ok(CanonicalRow {
        index: row.index,
        values,
    })
}

fn synthesize(default: DefaultValue, row_index: usize) -> RawValue {
    match default {
        DefaultValue::Text(s) => RawValue::Text(s.to_string()),
        DefaultValue::Number(n) => RawValue::Number(n),
        DefaultValue::FromRowIndex(generate) => RawValue::Text(generate(row_index)),
    }
}

/// Coerce a canonical row into the typed entity for `kind`.
pub fn build_entity(row: &CanonicalRow, kind: EntityKind) -> Result<Entity, String> {
    let entity = match kind {
        EntityKind::Provider => Entity::Provider(Provider {
            provider_id: row.required_text("provider_id")?,
            specialty: row.text("specialty"),
        }),
        EntityKind::Claim => Entity::Claim(Claim {
            claim_id: row.required_text("claim_id")?,
            provider_id: row.required_text("provider_id")?,
            patient_id: row.required_text("patient_id")?,
            cpt_code: row.required_text("cpt_code")?,
            icd_code: row.required_text("icd_code")?,
            service_date: row.date("service_date")?,
            claim_amount: row.number("claim_amount"),
            place_of_service: row.text("place_of_service"),
        }),
        EntityKind::Taxonomy => Entity::Taxonomy(TaxonomyEntry {
            hcpcs_cd: row.required_text("hcpcs_cd")?,
            rbcs_id: row.text("rbcs_id"),
            rbcs_cat: row.text("rbcs_cat"),
            rbcs_cat_desc: row.text("rbcs_cat_desc"),
            rbcs_subcat: row.text("rbcs_subcat"),
            rbcs_subcat_desc: row.text("rbcs_subcat_desc"),
            rbcs_family_desc: row.text("rbcs_family_desc"),
            rbcs_major_ind: row.text("rbcs_major_ind"),
        }),
        EntityKind::BetosMetric => Entity::BetosMetric(BetosMetric {
            betos_group: row.required_text("betos_group")?,
            allowed_services: row.number("allowed_services"),
            allowed_charges: row.number("allowed_charges"),
            payment_amt: row.number("payment_amt"),
        }),
        EntityKind::BetosCode => Entity::BetosCode(BetosCode {
            betos_group: row.required_text("betos_group")?,
            betos_description: row.text("betos_description"),
        }),
    };
    Ok(entity)
}

/// Full normalization of one raw row for one entity spec.
pub fn normalize_row(row: &RawRow, spec: &EntitySpec) -> Result<Entity, RowRejection> {
    let canonical = canonicalize(row, spec)?;
    build_entity(&canonical, spec.kind).map_err(|reason| RowRejection {
        row_index: row.index,
        entity: spec.kind,
        reason,
    })
}

/// Lenient numeric parse: trims, drops a leading `$` and thousands
/// separators. Non-finite results count as failures.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    const FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];
    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Whole numbers print without a fractional part, so spreadsheet ids such
/// as NPIs stay stable text keys.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
