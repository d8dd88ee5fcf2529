use tracing::warn;

/// Fixed conversion table: units of USD per one unit of the currency.
/// Updated by hand; precision is not a goal, ranking and totals are.
const USD_RATES: &[(&str, f64)] = &[
    ("USD", 1.0),
    ("EUR", 1.08),
    ("GBP", 1.27),
    ("INR", 0.012),
    ("CAD", 0.73),
    ("AUD", 0.65),
    ("JPY", 0.0067),
    ("CNY", 0.14),
    ("SGD", 0.74),
    ("CHF", 1.12),
    ("SEK", 0.095),
    ("BRL", 0.18),
    ("ILS", 0.27),
    ("KRW", 0.00074),
    ("HKD", 0.128),
    ("AED", 0.272),
    ("NGN", 0.00065),
    ("ZAR", 0.054),
    ("MXN", 0.058),
    ("NZD", 0.60),
];

/// Rate for a currency code, case-insensitive. `None` for codes not in the table.
pub fn usd_rate(code: &str) -> Option<f64> {
    let code = code.trim();
    USD_RATES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, rate)| *rate)
}

/// Convert an amount to USD. A missing code is treated as USD. Unknown codes
/// fall back to 1:1 and log a warning.
pub fn to_usd(amount: f64, currency: Option<&str>) -> f64 {
    let code = currency.map(str::trim).filter(|c| !c.is_empty()).unwrap_or("USD");
    match usd_rate(code) {
        Some(rate) => amount * rate,
        None => {
            warn!(currency = code, amount, "Unknown currency, assuming 1:1 with USD");
            amount
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_known_currencies() {
        assert_eq!(to_usd(10_000_000.0, Some("USD")), 10_000_000.0);
        assert!((to_usd(1_000_000.0, Some("eur")) - 1_080_000.0).abs() < 1e-6);
    }

    #[test]
    fn missing_code_is_usd() {
        assert_eq!(to_usd(5.0, None), 5.0);
        assert_eq!(to_usd(5.0, Some("  ")), 5.0);
    }

    #[test]
    fn unknown_code_falls_back_to_one_to_one() {
        assert_eq!(usd_rate("XYZ"), None);
        assert_eq!(to_usd(42.0, Some("XYZ")), 42.0);
    }
}
