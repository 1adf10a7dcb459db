// src/utils/formatters.rs
//! Display helpers shared by services and API responses.

/// Masks a national id (CCCD) so only the last four characters remain.
/// At least four mask characters are always emitted.
pub fn mask_cccd(value: &str) -> String {
    let safe: Vec<char> = value.trim().chars().collect();
    let tail_start = safe.len().saturating_sub(4);
    let tail: String = safe[tail_start..].iter().collect();
    let mask_len = safe.len().saturating_sub(4).max(4);
    format!("{}{}", "*".repeat(mask_len), tail)
}

/// `abcdef…wxyz` for ids longer than ten characters.
pub fn mask_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 10 {
        return id.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

/// Badge variant for a free-form status string.
pub fn status_variant(status: &str) -> &'static str {
    let normalized = status.to_lowercase();
    if normalized.contains("revoked") || normalized.contains("rejected") {
        "danger"
    } else if normalized.contains("pending") || normalized.contains("locked") {
        "warning"
    } else if normalized.contains("active")
        || normalized.contains("verified")
        || normalized.contains("valid")
    {
        "success"
    } else {
        "default"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_cccd() {
        assert_eq!(mask_cccd("079123456789"), "********6789");
        assert_eq!(mask_cccd("12"), "****12");
        assert_eq!(mask_cccd(""), "****");
    }

    #[test]
    fn test_mask_id() {
        assert_eq!(mask_id("REC-1234"), "REC-1234");
        assert_eq!(mask_id("0x91ab23cc98ddee"), "0x91ab…ddee");
    }

    #[test]
    fn test_status_variant() {
        assert_eq!(status_variant("REVOKED"), "danger");
        assert_eq!(status_variant("unlocked"), "warning");
        assert_eq!(status_variant("verified"), "success");
        assert_eq!(status_variant("issued"), "default");
    }
}
