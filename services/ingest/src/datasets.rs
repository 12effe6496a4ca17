//! Per-dataset ingestion records
//!
//! Each dataset declares, for every entity it produces, the canonical
//! fields, the source headers they may come from (first alias present
//! wins), and what happens when a field is absent.

use crate::entities::EntityKind;
use serde::Serialize;
use std::fmt;

pub const DEFAULT_SERVICE_DATE: &str = "2024-01-01";
/// Placeholder diagnosis. The Part B extract carries no ICD codes.
pub const PLACEHOLDER_ICD_CODE: &str = "Z00.00";
pub const UNKNOWN_PLACE_OF_SERVICE: &str = "UNK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    /// Medicare Part B provider/service extract (providers + claims)
    Claims,
    /// BETOS cost workbook (betos_metrics)
    Betos,
    /// BETOS description lookup (betos_codes)
    BetosCodes,
    /// RBCS taxonomy table (rbcs_taxonomy)
    Taxonomy,
}

impl DatasetKind {
    pub const DEFAULT_SET: [DatasetKind; 3] =
        [DatasetKind::Claims, DatasetKind::Betos, DatasetKind::Taxonomy];

    pub fn name(self) -> &'static str {
        match self {
            DatasetKind::Claims => "claims",
            DatasetKind::Betos => "betos",
            DatasetKind::BetosCodes => "betos-codes",
            DatasetKind::Taxonomy => "taxonomy",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Delimited,
    Spreadsheet,
}

#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
    Text(&'static str),
    Number(f64),
    FromRowIndex(fn(usize) -> String),
}

#[derive(Debug, Clone, Copy)]
pub enum FieldRule {
    /// Absent or empty rejects the row.
    Required,
    /// Absent or empty becomes null.
    Optional,
    /// Absent or empty is synthesized.
    Defaulted(DefaultValue),
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub canonical: &'static str,
    pub sources: &'static [&'static str],
    pub rule: FieldRule,
}

const fn field(
    canonical: &'static str,
    sources: &'static [&'static str],
    rule: FieldRule,
) -> FieldSpec {
    FieldSpec {
        canonical,
        sources,
        rule,
    }
}

#[derive(Debug, Clone)]
pub struct EntitySpec {
    pub kind: EntityKind,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub kind: DatasetKind,
    pub format: SourceFormat,
    /// Write order. Referenced entities come first.
    pub entities: Vec<EntitySpec>,
}

impl DatasetSpec {
    pub fn for_kind(kind: DatasetKind) -> Self {
        match kind {
            DatasetKind::Claims => claims(),
            DatasetKind::Betos => betos_metrics(),
            DatasetKind::BetosCodes => betos_codes(),
            DatasetKind::Taxonomy => rbcs_taxonomy(),
        }
    }

    /// Required fields whose source header must exist in the file, with the
    /// aliases that would satisfy each.
    pub fn required_columns(&self) -> Vec<(&'static str, &'static [&'static str])> {
        let mut out: Vec<(&'static str, &'static [&'static str])> = Vec::new();
        for spec in &self.entities {
            for f in &spec.fields {
                if matches!(f.rule, FieldRule::Required) && !out.iter().any(|(c, _)| *c == f.canonical) {
                    out.push((f.canonical, f.sources));
                }
            }
        }
        out
    }
}

fn synthetic_claim_id(row_index: usize) -> String {
    row_index.to_string()
}

fn synthetic_patient_id(row_index: usize) -> String {
    format!("PAT{}", row_index % 1000)
}

use FieldRule::{Defaulted, Optional, Required};

fn claims() -> DatasetSpec {
    DatasetSpec {
        kind: DatasetKind::Claims,
        format: SourceFormat::Delimited,
        entities: vec![
            EntitySpec {
                kind: EntityKind::Provider,
                fields: vec![
                    field("provider_id", &["Rndrng_NPI", "provider_id"], Required),
                    field("specialty", &["Rndrng_Prvdr_Type", "specialty"], Optional),
                ],
            },
            EntitySpec {
                kind: EntityKind::Claim,
                fields: vec![
                    field(
                        "claim_id",
                        &["claim_id"],
                        Defaulted(DefaultValue::FromRowIndex(synthetic_claim_id)),
                    ),
                    field("provider_id", &["Rndrng_NPI", "provider_id"], Required),
                    field(
                        "patient_id",
                        &["patient_id"],
                        Defaulted(DefaultValue::FromRowIndex(synthetic_patient_id)),
                    ),
                    field("cpt_code", &["HCPCS_Cd", "cpt_code"], Required),
                    field(
                        "icd_code",
                        &["icd_code"],
                        Defaulted(DefaultValue::Text(PLACEHOLDER_ICD_CODE)),
                    ),
                    field(
                        "service_date",
                        &["service_date"],
                        Defaulted(DefaultValue::Text(DEFAULT_SERVICE_DATE)),
                    ),
                    field(
                        "claim_amount",
                        &["Avg_Sbmtd_Chrg_Amt", "claim_amount"],
                        Defaulted(DefaultValue::Number(0.0)),
                    ),
                    field(
                        "place_of_service",
                        &["Place_Of_Srvc", "place_of_service"],
                        Defaulted(DefaultValue::Text(UNKNOWN_PLACE_OF_SERVICE)),
                    ),
                ],
            },
        ],
    }
}

fn betos_metrics() -> DatasetSpec {
    DatasetSpec {
        kind: DatasetKind::Betos,
        format: SourceFormat::Spreadsheet,
        entities: vec![EntitySpec {
            kind: EntityKind::BetosMetric,
            fields: vec![
                field("betos_group", &["BETOS", "betos_group"], Required),
                field("allowed_services", &["Allowed Services"], Optional),
                field("allowed_charges", &["Allowed Charges"], Optional),
                field("payment_amt", &["Payment Amt"], Optional),
            ],
        }],
    }
}

fn betos_codes() -> DatasetSpec {
    DatasetSpec {
        kind: DatasetKind::BetosCodes,
        format: SourceFormat::Spreadsheet,
        entities: vec![EntitySpec {
            kind: EntityKind::BetosCode,
            fields: vec![
                field("betos_group", &["BETOS", "betos_group"], Required),
                field(
                    "betos_description",
                    &["BETOS Description", "Description", "betos_description"],
                    Optional,
                ),
            ],
        }],
    }
}

fn rbcs_taxonomy() -> DatasetSpec {
    DatasetSpec {
        kind: DatasetKind::Taxonomy,
        format: SourceFormat::Delimited,
        entities: vec![EntitySpec {
            kind: EntityKind::Taxonomy,
            fields: vec![
                field("hcpcs_cd", &["hcpcs_cd"], Required),
                field("rbcs_id", &["rbcs_id"], Optional),
                field("rbcs_cat", &["rbcs_cat"], Optional),
                field("rbcs_cat_desc", &["rbcs_cat_desc"], Optional),
                field("rbcs_subcat", &["rbcs_subcat", "rbcs_cat_subcat"], Optional),
                field("rbcs_subcat_desc", &["rbcs_subcat_desc"], Optional),
                field("rbcs_family_desc", &["rbcs_family_desc"], Optional),
                field("rbcs_major_ind", &["rbcs_major_ind"], Optional),
            ],
        }],
    }
}
