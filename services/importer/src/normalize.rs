//! Identifier normalization shared by every stage.

/// Derive a facility code from a composite unit code
/// (municipality prefix + facility suffix) by keeping its last
/// `facility_code_width` characters.
///
/// Codes shorter than the width are returned whole.
pub fn normalize_unit_code(raw_code: &str, facility_code_width: usize) -> String {
    let len = raw_code.chars().count();
    raw_code
        .chars()
        .skip(len.saturating_sub(facility_code_width))
        .collect()
}

/// Truncate a municipality code to the canonical width
/// (e.g. 7-digit census codes carry a trailing check digit).
pub fn normalize_municipality_code(code: &str, municipality_code_width: usize) -> String {
    code.trim().chars().take(municipality_code_width).collect()
}

/// Undo numeric-to-string coercion on identifiers: `"76800000.0"` becomes
/// `"76800000"`. Anything that is not digits followed by an all-zero
/// fraction is returned unchanged.
pub fn strip_float_suffix(value: &str) -> &str {
    let Some((integer, fraction)) = value.split_once('.') else {
        return value;
    };
    if !integer.is_empty()
        && integer.bytes().all(|b| b.is_ascii_digit())
        && !fraction.is_empty()
        && fraction.bytes().all(|b| b == b'0')
    {
        integer
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // UNIT CODE
    // -------------------------------------------------------------------------

    #[test]
    fn unit_code_keeps_facility_suffix() {
        assert_eq!(normalize_unit_code("1100012369958", 7), "2369958");
    }

    #[test]
    fn unit_code_shorter_than_width_is_kept_whole() {
        assert_eq!(normalize_unit_code("12345", 7), "12345");
        assert_eq!(normalize_unit_code("", 7), "");
    }

    #[test]
    fn unit_code_exact_width_is_unchanged() {
        assert_eq!(normalize_unit_code("0023914", 7), "0023914");
    }

    #[test]
    fn unit_code_with_alphanumeric_suffix() {
        assert_eq!(normalize_unit_code("110001A1", 2), "A1");
    }

    // -------------------------------------------------------------------------
    // MUNICIPALITY CODE
    // -------------------------------------------------------------------------

    #[test]
    fn municipality_code_drops_check_digit() {
        assert_eq!(normalize_municipality_code("1100015", 6), "110001");
    }

    #[test]
    fn municipality_code_already_canonical() {
        assert_eq!(normalize_municipality_code("110001", 6), "110001");
        assert_eq!(normalize_municipality_code(" 110001 ", 6), "110001");
    }

    // -------------------------------------------------------------------------
    // NUMERIC ARTIFACTS
    // -------------------------------------------------------------------------

    #[test]
    fn float_suffix_is_stripped_from_digit_strings() {
        assert_eq!(strip_float_suffix("76800000.0"), "76800000");
        assert_eq!(strip_float_suffix("76800000.00"), "76800000");
    }

    #[test]
    fn non_artifacts_are_left_alone() {
        assert_eq!(strip_float_suffix("76800000"), "76800000");
        assert_eq!(strip_float_suffix("-8.76"), "-8.76");
        assert_eq!(strip_float_suffix("12.05"), "12.05");
        assert_eq!(strip_float_suffix(".0"), ".0");
        assert_eq!(strip_float_suffix("AB.0"), "AB.0");
        assert_eq!(strip_float_suffix("10.0.0"), "10.0.0");
    }
}
