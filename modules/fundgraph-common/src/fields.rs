//! Lockable field identifiers.
//!
//! A lock protects one attribute of a Company or InvestorOrg from automated
//! writes (LLM merge, enrichment). Only members of these enums can be locked;
//! the graph stores them as a list of property names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FundgraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    Investor,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Company => write!(f, "company"),
            EntityKind::Investor => write!(f, "investor"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = FundgraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "company" => Ok(EntityKind::Company),
            "investor" | "investororg" | "investor_org" => Ok(EntityKind::Investor),
            other => Err(FundgraphError::InvalidInput(format!(
                "unknown entity type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyField {
    Country,
    Description,
    Website,
    FoundedYear,
    EmployeeRange,
    LinkedinUrl,
    LogoUrl,
    TotalFundingUsd,
    Status,
}

impl CompanyField {
    pub const ALL: [CompanyField; 9] = [
        CompanyField::Country,
        CompanyField::Description,
        CompanyField::Website,
        CompanyField::FoundedYear,
        CompanyField::EmployeeRange,
        CompanyField::LinkedinUrl,
        CompanyField::LogoUrl,
        CompanyField::TotalFundingUsd,
        CompanyField::Status,
    ];

    /// Graph property name.
    pub fn property(self) -> &'static str {
        match self {
            CompanyField::Country => "country",
            CompanyField::Description => "description",
            CompanyField::Website => "website",
            CompanyField::FoundedYear => "founded_year",
            CompanyField::EmployeeRange => "employee_range",
            CompanyField::LinkedinUrl => "linkedin_url",
            CompanyField::LogoUrl => "logo_url",
            CompanyField::TotalFundingUsd => "total_funding_usd",
            CompanyField::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestorField {
    InvestorType,
    Website,
    LinkedinUrl,
    FoundedYear,
    LogoUrl,
    Aum,
    Hq,
    StageFocus,
    SectorFocus,
    GeoFocus,
    CheckSizeMinUsd,
    CheckSizeMaxUsd,
}

impl InvestorField {
    pub const ALL: [InvestorField; 12] = [
        InvestorField::InvestorType,
        InvestorField::Website,
        InvestorField::LinkedinUrl,
        InvestorField::FoundedYear,
        InvestorField::LogoUrl,
        InvestorField::Aum,
        InvestorField::Hq,
        InvestorField::StageFocus,
        InvestorField::SectorFocus,
        InvestorField::GeoFocus,
        InvestorField::CheckSizeMinUsd,
        InvestorField::CheckSizeMaxUsd,
    ];

    pub fn property(self) -> &'static str {
        match self {
            InvestorField::InvestorType => "investor_type",
            InvestorField::Website => "website",
            InvestorField::LinkedinUrl => "linkedin_url",
            InvestorField::FoundedYear => "founded_year",
            InvestorField::LogoUrl => "logo_url",
            InvestorField::Aum => "aum",
            InvestorField::Hq => "hq",
            InvestorField::StageFocus => "stage_focus",
            InvestorField::SectorFocus => "sector_focus",
            InvestorField::GeoFocus => "geo_focus",
            InvestorField::CheckSizeMinUsd => "check_size_min_usd",
            InvestorField::CheckSizeMaxUsd => "check_size_max_usd",
        }
    }
}

/// Loose comparison so `foundedYear`, `founded_year` and `Founded Year` all match.
fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl FromStr for CompanyField {
    type Err = FundgraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = squash(s);
        CompanyField::ALL
            .into_iter()
            .find(|f| squash(f.property()) == wanted)
            .ok_or_else(|| FundgraphError::UnknownField {
                kind: EntityKind::Company,
                field: s.to_string(),
            })
    }
}

impl FromStr for InvestorField {
    type Err = FundgraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = squash(s);
        // "type" is what the UI calls investor_type
        if wanted == "type" {
            return Ok(InvestorField::InvestorType);
        }
        InvestorField::ALL
            .into_iter()
            .find(|f| squash(f.property()) == wanted)
            .ok_or_else(|| FundgraphError::UnknownField {
                kind: EntityKind::Investor,
                field: s.to_string(),
            })
    }
}

/// A lockable field, tagged with the entity type it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldLock {
    Company(CompanyField),
    Investor(InvestorField),
}

impl FieldLock {
    pub fn parse(kind: EntityKind, field: &str) -> Result<Self, FundgraphError> {
        match kind {
            EntityKind::Company => field.parse().map(FieldLock::Company),
            EntityKind::Investor => field.parse().map(FieldLock::Investor),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            FieldLock::Company(_) => EntityKind::Company,
            FieldLock::Investor(_) => EntityKind::Investor,
        }
    }

    pub fn property(&self) -> &'static str {
        match self {
            FieldLock::Company(f) => f.property(),
            FieldLock::Investor(f) => f.property(),
        }
    }
}
