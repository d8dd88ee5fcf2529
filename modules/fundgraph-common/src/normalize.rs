//! Matching keys for company names and funding stages.
//!
//! Keys are for comparison and grouping only. Display values are always kept
//! in their original form alongside the key.

/// Stage key used when a mention carries no stage at all.
pub const UNKNOWN_STAGE: &str = "unknown";

/// Lowercase and drop every non-alphanumeric character.
///
/// `"Acme, Inc."` and `"acme inc"` both become `"acmeinc"`.
pub fn normalize_company_key(name: &str) -> String {
    name.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Lowercase and keep only alphanumerics and `+`. Missing or blank stages
/// (including ones that normalize to nothing) map to [`UNKNOWN_STAGE`].
pub fn normalize_stage_key(stage: Option<&str>) -> String {
    let key: String = stage
        .unwrap_or_default()
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric() || *c == '+')
        .collect();
    if key.is_empty() {
        UNKNOWN_STAGE.to_string()
    } else {
        key
    }
}

/// Human-readable form of a stage key. Unrecognised keys pass through unchanged.
pub fn display_stage(stage_key: &str) -> String {
    let known = match stage_key {
        "preseed" => "Pre-Seed",
        "seed" => "Seed",
        "seriesa" => "Series A",
        "seriesb" => "Series B",
        "seriesc" => "Series C",
        "seriesd" => "Series D",
        "seriese" => "Series E",
        "seriesb+" | "seriesbplus" => "Series B+",
        "bridge" => "Bridge",
        "growth" => "Growth",
        "debt" => "Debt",
        "grant" => "Grant",
        "ipo" => "IPO",
        UNKNOWN_STAGE => "Unknown",
        _ => return stage_key.to_string(),
    };
    known.to_string()
}

/// Stage value to store: well-known stages in their display form, anything
/// else trimmed as given. Blank stages are `None`.
///
/// `"series a"`, `"Series-A"` and `"SERIES A"` all store as `"Series A"`.
pub fn canonical_stage(stage: Option<&str>) -> Option<String> {
    let raw = stage.map(str::trim).filter(|s| !s.is_empty())?;
    let key = normalize_stage_key(Some(raw));
    if key == UNKNOWN_STAGE {
        return None;
    }
    let display = display_stage(&key);
    Some(if display == key { raw.to_string() } else { display })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_key_ignores_case_and_punctuation() {
        assert_eq!(normalize_company_key("Acme, Inc."), normalize_company_key("acme inc"));
        assert_eq!(normalize_company_key("Acme, Inc."), "acmeinc");
        assert_eq!(normalize_company_key("  O'Neil & Sons "), "oneilsons");
    }

    #[test]
    fn company_key_is_idempotent() {
        for name in ["Acme, Inc.", "Zoë.ai", "Foo-Bar 2.0", "", "北京科技"] {
            let once = normalize_company_key(name);
            assert_eq!(normalize_company_key(&once), once, "not idempotent for {name:?}");
        }
    }

    #[test]
    fn company_key_keeps_non_latin_alphanumerics() {
        assert_eq!(normalize_company_key("北京科技"), "北京科技");
        assert_eq!(normalize_company_key("Zoë.ai"), "zoëai");
    }

    #[test]
    fn stage_key_keeps_plus_and_maps_empty_to_unknown() {
        assert_eq!(normalize_stage_key(Some("Series A")), "seriesa");
        assert_eq!(normalize_stage_key(Some("series-a")), "seriesa");
        assert_eq!(normalize_stage_key(Some("Series B+")), "seriesb+");
        assert_eq!(normalize_stage_key(None), UNKNOWN_STAGE);
        assert_eq!(normalize_stage_key(Some("")), UNKNOWN_STAGE);
        assert_eq!(normalize_stage_key(Some("  - ")), UNKNOWN_STAGE);
    }

    #[test]
    fn stage_key_is_idempotent_and_case_insensitive() {
        for stage in ["Series A", "SERIES a", "Pre-Seed", "Series C+", "unknown"] {
            let once = normalize_stage_key(Some(stage));
            assert_eq!(normalize_stage_key(Some(&once)), once);
        }
        assert_eq!(normalize_stage_key(Some("SEED")), normalize_stage_key(Some("seed")));
    }

    #[test]
    fn display_stage_round_trips_common_keys() {
        assert_eq!(display_stage(&normalize_stage_key(Some("series a"))), "Series A");
        assert_eq!(display_stage(&normalize_stage_key(Some("Pre-Seed"))), "Pre-Seed");
        assert_eq!(display_stage("angel"), "angel");
    }

    #[test]
    fn canonical_stage_merges_spellings() {
        for raw in ["series a", "Series-A", " SERIES A "] {
            assert_eq!(canonical_stage(Some(raw)).as_deref(), Some("Series A"));
        }
        assert_eq!(canonical_stage(Some(" Angel ")).as_deref(), Some("Angel"));
        assert_eq!(canonical_stage(Some("  ")), None);
        assert_eq!(canonical_stage(Some("???")), None);
        assert_eq!(canonical_stage(None), None);
    }
}
