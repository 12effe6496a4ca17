//! Canonical entities and the tables they land in

use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provider {
    pub provider_id: String,
    pub specialty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Claim {
    pub claim_id: String,
    pub provider_id: String,
    pub patient_id: String,
    pub cpt_code: String,
    pub icd_code: String,
    pub service_date: NaiveDate,
    pub claim_amount: Option<f64>,
    pub place_of_service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonomyEntry {
    pub hcpcs_cd: String,
    pub rbcs_id: Option<String>,
    pub rbcs_cat: Option<String>,
    pub rbcs_cat_desc: Option<String>,
    pub rbcs_subcat: Option<String>,
    pub rbcs_subcat_desc: Option<String>,
    pub rbcs_family_desc: Option<String>,
    pub rbcs_major_ind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BetosMetric {
    pub betos_group: String,
    pub allowed_services: Option<f64>,
    pub allowed_charges: Option<f64>,
    pub payment_amt: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BetosCode {
    pub betos_group: String,
    pub betos_description: Option<String>,
}

/// A normalized record, tagged by entity type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Provider(Provider),
    Claim(Claim),
    Taxonomy(TaxonomyEntry),
    BetosMetric(BetosMetric),
    BetosCode(BetosCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Provider,
    Claim,
    Taxonomy,
    BetosMetric,
    BetosCode,
}

/// Bindable column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Float(Option<f64>),
    Date(NaiveDate),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Text(None) | SqlValue::Float(None))
    }
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Provider(_) => EntityKind::Provider,
            Entity::Claim(_) => EntityKind::Claim,
            Entity::Taxonomy(_) => EntityKind::Taxonomy,
            Entity::BetosMetric(_) => EntityKind::BetosMetric,
            Entity::BetosCode(_) => EntityKind::BetosCode,
        }
    }

    pub fn natural_key(&self) -> &str {
        match self {
            Entity::Provider(p) => &p.provider_id,
            Entity::Claim(c) => &c.claim_id,
            Entity::Taxonomy(t) => &t.hcpcs_cd,
            Entity::BetosMetric(b) => &b.betos_group,
            Entity::BetosCode(b) => &b.betos_group,
        }
    }

    /// Column values in `TableSpec::columns` order.
    pub fn values(&self) -> Vec<SqlValue> {
        use SqlValue::{Date, Float, Text};
        match self {
            Entity::Provider(p) => vec![
                Text(Some(p.provider_id.clone())),
                Text(p.specialty.clone()),
            ],
            Entity::Claim(c) => vec![
                Text(Some(c.claim_id.clone())),
                Text(Some(c.provider_id.clone())),
                Text(Some(c.patient_id.clone())),
                Text(Some(c.cpt_code.clone())),
                Text(Some(c.icd_code.clone())),
                Date(c.service_date),
                Float(c.claim_amount),
                Text(c.place_of_service.clone()),
            ],
            Entity::Taxonomy(t) => vec![
                Text(Some(t.hcpcs_cd.clone())),
                Text(t.rbcs_id.clone()),
                Text(t.rbcs_cat.clone()),
                Text(t.rbcs_cat_desc.clone()),
                Text(t.rbcs_subcat.clone()),
                Text(t.rbcs_subcat_desc.clone()),
                Text(t.rbcs_family_desc.clone()),
                Text(t.rbcs_major_ind.clone()),
            ],
            Entity::BetosMetric(b) => vec![
                Text(Some(b.betos_group.clone())),
                Float(b.allowed_services),
                Float(b.allowed_charges),
                Float(b.payment_amt),
            ],
            Entity::BetosCode(b) => vec![
                Text(Some(b.betos_group.clone())),
                Text(b.betos_description.clone()),
            ],
        }
    }

    /// Foreign key value, for entities that reference another table.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Entity::Claim(c) => Some(&c.provider_id),
            _ => None,
        }
    }
}

// =============================================================================
// TABLE DEFINITIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub nullable: bool,
}

const fn col(name: &'static str, nullable: bool) -> ColumnSpec {
    ColumnSpec { name, nullable }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub table: &'static str,
}

/// Target table with its natural-key unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub key: &'static str,
    pub columns: &'static [ColumnSpec],
    pub references: Option<ForeignKey>,
}

impl TableSpec {
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub const PROVIDERS: TableSpec = TableSpec {
    name: "providers",
    key: "provider_id",
    columns: &[col("provider_id", false), col("specialty", true)],
    references: None,
};

pub const CLAIMS: TableSpec = TableSpec {
    name: "claims",
    key: "claim_id",
    columns: &[
        col("claim_id", false),
        col("provider_id", false),
        col("patient_id", false),
        col("cpt_code", false),
        col("icd_code", false),
        col("service_date", false),
        col("claim_amount", true),
        col("place_of_service", true),
    ],
    references: Some(ForeignKey {
        column: "provider_id",
        table: "providers",
    }),
};

pub const RBCS_TAXONOMY: TableSpec = TableSpec {
    name: "rbcs_taxonomy",
    key: "hcpcs_cd",
    columns: &[
        col("hcpcs_cd", false),
        col("rbcs_id", true),
        col("rbcs_cat", true),
        col("rbcs_cat_desc", true),
        col("rbcs_subcat", true),
        col("rbcs_subcat_desc", true),
        col("rbcs_family_desc", true),
        col("rbcs_major_ind", true),
    ],
    references: None,
};

pub const BETOS_METRICS: TableSpec = TableSpec {
    name: "betos_metrics",
    key: "betos_group",
    columns: &[
        col("betos_group", false),
        col("allowed_services", true),
        col("allowed_charges", true),
        col("payment_amt", true),
    ],
    references: None,
};

pub const BETOS_CODES: TableSpec = TableSpec {
    name: "betos_codes",
    key: "betos_group",
    columns: &[col("betos_group", false), col("betos_description", true)],
    references: None,
};

impl EntityKind {
    pub fn table(self) -> &'static TableSpec {
        match self {
            EntityKind::Provider => &PROVIDERS,
            EntityKind::Claim => &CLAIMS,
            EntityKind::Taxonomy => &RBCS_TAXONOMY,
            EntityKind::BetosMetric => &BETOS_METRICS,
            EntityKind::BetosCode => &BETOS_CODES,
        }
    }
}
