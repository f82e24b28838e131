use serde_json::Value;

use crate::gateway::error::ValidationError;

const MAX_ID_LEN: usize = 64;

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn validate_identifier(field: &str, raw: &str, min_len: usize) -> Result<String, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::new(field, "cannot be empty"));
    }
    let len = raw.chars().count();
    if len > MAX_ID_LEN {
        return Err(ValidationError::new(
            field,
            format!("too long: {len} chars (max {MAX_ID_LEN})"),
        ));
    }
    if len < min_len {
        return Err(ValidationError::new(
            field,
            format!("too short: {len} chars (min {min_len})"),
        ));
    }
    if !raw.chars().all(is_id_char) {
        return Err(ValidationError::new(field, "contains invalid characters"));
    }
    Ok(raw.to_string())
}

pub fn validate_site_id(raw: &str) -> Result<String, ValidationError> {
    validate_identifier("site_id", raw, 1)
}

/// Device ids are usually 24-char hex object ids; anything 8..=64 is accepted.
pub fn validate_device_id(raw: &str) -> Result<String, ValidationError> {
    validate_identifier("device_id", raw, 8)
}

pub fn validate_door_id(raw: &str) -> Result<String, ValidationError> {
    validate_identifier("door_id", raw, 1)
}

pub fn validate_camera_id(raw: &str) -> Result<String, ValidationError> {
    validate_identifier("camera_id", raw, 1)
}

pub fn validate_wlan_id(raw: &str) -> Result<String, ValidationError> {
    validate_identifier("wlan_id", raw, 1)
}

/// Accepts `:`, `-`, `.` or no separators and returns `aa:bb:cc:dd:ee:ff`.
pub fn validate_mac(raw: &str) -> Result<String, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::new("mac", "cannot be empty"));
    }
    let hex: String = raw.chars().filter(|c| !matches!(c, ':' | '-' | '.')).collect();
    if hex.chars().count() != 12 {
        return Err(ValidationError::new("mac", "invalid MAC address length"));
    }
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::new("mac", "invalid MAC address format"));
    }
    let lower = hex.to_ascii_lowercase();
    let octets: Vec<&str> = (0..6).map(|i| &lower[i * 2..i * 2 + 2]).collect();
    Ok(octets.join(":"))
}

/// Integer seconds (or a numeric string) bounded to `[min, max]`.
pub fn validate_duration(raw: &Value, min: u64, max: u64) -> Result<u64, ValidationError> {
    let parsed: i64 = match raw {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| ValidationError::new("duration", "must be an integer"))?,
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| ValidationError::new("duration", "must be an integer"))?,
        _ => return Err(ValidationError::new("duration", "must be an integer")),
    };
    if parsed < min as i64 {
        return Err(ValidationError::new(
            "duration",
            format!("too short: {parsed}s (minimum {min}s)"),
        ));
    }
    if parsed > max as i64 {
        return Err(ValidationError::new(
            "duration",
            format!("too long: {parsed}s (maximum {max}s)"),
        ));
    }
    Ok(parsed as u64)
}

pub fn validate_boolean(raw: &Value, field: &str) -> Result<bool, ValidationError> {
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(i != 0),
            None => Err(ValidationError::new(field, "must be boolean")),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ValidationError::new(field, format!("must be boolean, got '{s}'"))),
        },
        _ => Err(ValidationError::new(field, "must be boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mac_forms_normalize_to_the_same_value() {
        let a = validate_mac("AA-BB-CC-DD-EE-FF").unwrap();
        let b = validate_mac("aa:bb:cc:dd:ee:ff").unwrap();
        let c = validate_mac("aabb.ccdd.eeff").unwrap();
        let d = validate_mac("AABBCCDDEEFF").unwrap();
        assert_eq!(a, "aa:bb:cc:dd:ee:ff");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a, d);
    }

    #[test]
    fn mac_rejects_bad_length_and_chars() {
        assert!(validate_mac("").is_err());
        assert!(validate_mac("aa:bb:cc:dd:ee").is_err());
        assert!(validate_mac("aa:bb:cc:dd:ee:ff:00").is_err());
        let err = validate_mac("gg:hh:ii:jj:kk:ll").unwrap_err();
        assert_eq!(err.field, "mac");
        assert!(err.reason.contains("format"));
    }

    #[test]
    fn site_id_rules() {
        for ok in ["default", "site-1", "site_2", "ABC123"] {
            assert_eq!(validate_site_id(ok).unwrap(), ok);
        }
        assert!(validate_site_id("").is_err());
        assert!(validate_site_id(&"a".repeat(65)).unwrap_err().reason.contains("too long"));
        for bad in ["../etc", "site;drop", "a b", "<script>", "site\0x", "sïte"] {
            assert!(validate_site_id(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn device_id_requires_eight_chars() {
        assert!(validate_device_id("5f1a2b3c4d5e6f7a8b9c0d1e").is_ok());
        assert!(validate_device_id("short").is_err());
        assert!(validate_device_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn other_ids_share_the_alphabet() {
        assert!(validate_door_id("door-1").is_ok());
        assert!(validate_camera_id("cam_1").is_ok());
        assert!(validate_wlan_id("wlan/1").is_err());
        assert_eq!(validate_camera_id("").unwrap_err().field, "camera_id");
    }

    #[test]
    fn duration_bounds_and_coercion() {
        assert_eq!(validate_duration(&json!(1), 1, 300).unwrap(), 1);
        assert_eq!(validate_duration(&json!(300), 1, 300).unwrap(), 300);
        assert_eq!(validate_duration(&json!("30"), 1, 300).unwrap(), 30);
        assert!(validate_duration(&json!(0), 1, 300).unwrap_err().reason.contains("too short"));
        assert!(validate_duration(&json!(301), 1, 300).unwrap_err().reason.contains("too long"));
        assert!(validate_duration(&json!(-5), 1, 300).is_err());
        assert!(validate_duration(&json!("soon"), 1, 300).is_err());
        assert!(validate_duration(&json!(1.5), 1, 300).is_err());
        assert!(validate_duration(&json!(null), 1, 300).is_err());
    }

    #[test]
    fn boolean_coercion() {
        assert!(validate_boolean(&json!(true), "enabled").unwrap());
        for t in ["true", "TRUE", "1", "yes", "on"] {
            assert!(validate_boolean(&json!(t), "enabled").unwrap());
        }
        for f in ["false", "0", "No", "off"] {
            assert!(!validate_boolean(&json!(f), "enabled").unwrap());
        }
        assert!(validate_boolean(&json!(42), "enabled").unwrap());
        assert!(!validate_boolean(&json!(0), "enabled").unwrap());
        let err = validate_boolean(&json!("maybe"), "enabled").unwrap_err();
        assert_eq!(err.field, "enabled");
        assert!(validate_boolean(&json!([true]), "enabled").is_err());
    }
}
