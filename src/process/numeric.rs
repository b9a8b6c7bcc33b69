/// Parse a Brazilian-formatted decimal ("1.234,56") into `f64`.
///
/// Dots are thousands separators and are dropped; the comma becomes the decimal
/// point. Anything that still fails to parse, or parses to a non-finite number,
/// is `None`.
pub fn parse_br_decimal(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().replace('.', "").replace(',', ".");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Render an optional value for a dot-decimal artifact; missing is an empty field.
pub fn format_decimal(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Read back a value written by [`format_decimal`].
pub fn parse_dot_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}
