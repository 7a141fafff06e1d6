//! Display formatting for on-chain amounts.

const ETHER_DECIMALS: usize = 18;

/// Renders a decimal wei string as ether, keeping at least one fractional digit.
///
/// Input that is not a plain non-negative integer is returned unchanged.
pub fn format_ether(wei: &str) -> String {
    let digits = wei.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return wei.to_string();
    }

    let digits = digits.trim_start_matches('0');
    let padded = format!("{digits:0>width$}", width = ETHER_DECIMALS + 1);
    let (whole, fraction) = padded.split_at(padded.len() - ETHER_DECIMALS);
    let fraction = fraction.trim_end_matches('0');
    let fraction = if fraction.is_empty() { "0" } else { fraction };
    format!("{whole}.{fraction}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_whole_and_fractional_amounts() {
        assert_eq!(format_ether("0"), "0.0");
        assert_eq!(format_ether("1000"), "0.000000000000001");
        assert_eq!(format_ether("1000000000000000000"), "1.0");
        assert_eq!(format_ether("2500000000000000000"), "2.5");
        assert_eq!(format_ether("12345000000000000000000"), "12345.0");
    }

    #[test]
    fn leaves_non_numeric_input_untouched() {
        assert_eq!(format_ether("-5"), "-5");
        assert_eq!(format_ether(""), "");
    }
}
