//! Locked-field merge policy for Company and InvestorOrg writes.
//!
//! Rules, applied per field:
//! - an incoming `None` (or empty list) never overwrites anything;
//! - a locked field is never written, whether or not it currently holds a value;
//! - otherwise the incoming value wins.
//!
//! The Neo4j writer expresses the same rules in Cypher so that lock state is
//! read in the same statement that writes. In-memory stores call these
//! functions directly.

use crate::fields::{CompanyField, InvestorField};
use crate::normalize::normalize_company_key;
use crate::types::{Company, CompanyPatch, InvestorOrg, InvestorPatch};

fn merge_opt<T: Clone + PartialEq>(current: &mut Option<T>, incoming: &Option<T>, locked: bool) -> bool {
    match incoming {
        Some(v) if !locked && current.as_ref() != Some(v) => {
            *current = Some(v.clone());
            true
        }
        _ => false,
    }
}

fn merge_list(current: &mut Vec<String>, incoming: &[String], locked: bool) -> bool {
    if locked || incoming.is_empty() || current.as_slice() == incoming {
        return false;
    }
    *current = incoming.to_vec();
    true
}

/// Apply a patch to an existing company, or build a new one. Returns the
/// resulting entity and whether any stored field changed.
pub fn apply_company_patch(existing: Option<&Company>, patch: &CompanyPatch) -> (Company, bool) {
    let mut company = match existing {
        Some(c) => c.clone(),
        None => Company {
            name: patch.name.trim().to_string(),
            name_key: normalize_company_key(&patch.name),
            ..Default::default()
        },
    };
    let locked = |f: CompanyField| company.locked_fields.contains(&f);
    let l_country = locked(CompanyField::Country);
    let l_description = locked(CompanyField::Description);
    let l_website = locked(CompanyField::Website);
    let l_founded = locked(CompanyField::FoundedYear);
    let l_employees = locked(CompanyField::EmployeeRange);
    let l_linkedin = locked(CompanyField::LinkedinUrl);
    let l_logo = locked(CompanyField::LogoUrl);
    let l_total = locked(CompanyField::TotalFundingUsd);
    let l_status = locked(CompanyField::Status);

    let mut changed = existing.is_none();
    changed |= merge_opt(&mut company.country, &patch.country, l_country);
    changed |= merge_opt(&mut company.description, &patch.description, l_description);
    changed |= merge_opt(&mut company.website, &patch.website, l_website);
    changed |= merge_opt(&mut company.founded_year, &patch.founded_year, l_founded);
    changed |= merge_opt(&mut company.employee_range, &patch.employee_range, l_employees);
    changed |= merge_opt(&mut company.linkedin_url, &patch.linkedin_url, l_linkedin);
    changed |= merge_opt(&mut company.logo_url, &patch.logo_url, l_logo);
    changed |= merge_opt(&mut company.total_funding_usd, &patch.total_funding_usd, l_total);
    changed |= merge_opt(&mut company.status, &patch.status, l_status);
    (company, changed)
}

pub fn apply_investor_patch(existing: Option<&InvestorOrg>, patch: &InvestorPatch) -> (InvestorOrg, bool) {
    let mut investor = match existing {
        Some(i) => i.clone(),
        None => InvestorOrg {
            name: patch.name.trim().to_string(),
            name_key: normalize_company_key(&patch.name),
            ..Default::default()
        },
    };
    let locked = |f: InvestorField| investor.locked_fields.contains(&f);
    let l_type = locked(InvestorField::InvestorType);
    let l_website = locked(InvestorField::Website);
    let l_linkedin = locked(InvestorField::LinkedinUrl);
    let l_founded = locked(InvestorField::FoundedYear);
    let l_logo = locked(InvestorField::LogoUrl);
    let l_aum = locked(InvestorField::Aum);
    let l_hq = locked(InvestorField::Hq);
    let l_stage = locked(InvestorField::StageFocus);
    let l_sector = locked(InvestorField::SectorFocus);
    let l_geo = locked(InvestorField::GeoFocus);
    let l_min = locked(InvestorField::CheckSizeMinUsd);
    let l_max = locked(InvestorField::CheckSizeMaxUsd);

    let mut changed = existing.is_none();
    changed |= merge_opt(&mut investor.investor_type, &patch.investor_type, l_type);
    changed |= merge_opt(&mut investor.website, &patch.website, l_website);
    changed |= merge_opt(&mut investor.linkedin_url, &patch.linkedin_url, l_linkedin);
    changed |= merge_opt(&mut investor.founded_year, &patch.founded_year, l_founded);
    changed |= merge_opt(&mut investor.logo_url, &patch.logo_url, l_logo);
    changed |= merge_opt(&mut investor.aum, &patch.aum, l_aum);
    changed |= merge_opt(&mut investor.hq, &patch.hq, l_hq);
    changed |= merge_list(&mut investor.stage_focus, &patch.stage_focus, l_stage);
    changed |= merge_list(&mut investor.sector_focus, &patch.sector_focus, l_sector);
    changed |= merge_list(&mut investor.geo_focus, &patch.geo_focus, l_geo);
    changed |= merge_opt(&mut investor.check_size_min_usd, &patch.check_size_min_usd, l_min);
    changed |= merge_opt(&mut investor.check_size_max_usd, &patch.check_size_max_usd, l_max);
    (investor, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> Company {
        let (c, _) = apply_company_patch(
            None,
            &CompanyPatch {
                description: Some("Rockets".into()),
                country: Some("US".into()),
                ..CompanyPatch::named("Acme, Inc.")
            },
        );
        c
    }

    #[test]
    fn create_sets_identity_and_fields() {
        let c = acme();
        assert_eq!(c.name, "Acme, Inc.");
        assert_eq!(c.name_key, "acmeinc");
        assert_eq!(c.description.as_deref(), Some("Rockets"));
    }

    #[test]
    fn none_never_downgrades_existing_value() {
        let (c, changed) = apply_company_patch(Some(&acme()), &CompanyPatch::named("acme inc"));
        assert!(!changed);
        assert_eq!(c.description.as_deref(), Some("Rockets"));
        assert_eq!(c.name, "Acme, Inc.", "display name stays as first stored");
    }

    #[test]
    fn unlocked_field_takes_incoming_value() {
        let patch = CompanyPatch {
            description: Some("Anvils".into()),
            ..CompanyPatch::named("Acme")
        };
        let (c, changed) = apply_company_patch(Some(&acme()), &patch);
        assert!(changed);
        assert_eq!(c.description.as_deref(), Some("Anvils"));
    }

    #[test]
    fn locked_field_is_never_written() {
        let mut existing = acme();
        existing.locked_fields.insert(CompanyField::Description);
        existing.locked_fields.insert(CompanyField::Website);
        let patch = CompanyPatch {
            description: Some("Anvils".into()),
            website: Some("https://acme.test".into()),
            ..CompanyPatch::named("Acme")
        };
        let (c, changed) = apply_company_patch(Some(&existing), &patch);
        assert!(!changed);
        assert_eq!(c.description.as_deref(), Some("Rockets"));
        assert_eq!(c.website, None, "locked-but-empty fields stay empty");
    }

    #[test]
    fn investor_lists_merge_only_when_non_empty() {
        let (inv, _) = apply_investor_patch(
            None,
            &InvestorPatch {
                stage_focus: vec!["seed".into()],
                ..InvestorPatch::named("Foo Ventures")
            },
        );
        let (inv, changed) = apply_investor_patch(Some(&inv), &InvestorPatch::named("Foo Ventures"));
        assert!(!changed);
        assert_eq!(inv.stage_focus, vec!["seed".to_string()]);

        let mut locked = inv.clone();
        locked.locked_fields.insert(InvestorField::StageFocus);
        let (inv, changed) = apply_investor_patch(
            Some(&locked),
            &InvestorPatch {
                stage_focus: vec!["growth".into()],
                ..InvestorPatch::named("Foo Ventures")
            },
        );
        assert!(!changed);
        assert_eq!(inv.stage_focus, vec!["seed".to_string()]);
    }
}
