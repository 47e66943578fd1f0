/// Unit tests for enrichment helpers
/// Tests email validation, phone normalization, domain extraction and identity keys
use rust_lead_harvester::enrichment::{extract_domain, is_valid_email, normalize_phone};
use rust_lead_harvester::models::BusinessRecord;

#[cfg(test)]
mod email_validation_tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("test.user@example.com"));
        assert!(is_valid_email("user+tag@example.co.uk"));
        assert!(is_valid_email("user_name@example-domain.com"));
        assert!(is_valid_email("customerservice@acme.com"));
    }

    #[test]
    fn test_invalid_emails_basic() {
        // Missing @ or .
        assert!(!is_valid_email("userexample.com"));
        assert!(!is_valid_email("user@examplecom"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@"));

        // Too short
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_placeholder_addresses_rejected() {
        assert!(!is_valid_email("999999@acme.com"));
        assert!(!is_valid_email("123456789@acme.com"));
        assert!(!is_valid_email("000000@acme.com"));
    }
}

#[cfg(test)]
mod phone_normalization_tests {
    use super::*;

    #[test]
    fn test_formatting_variants_share_a_key() {
        let expected = Some("+12127365000".to_string());
        assert_eq!(normalize_phone("(212) 736-5000", "US"), expected);
        assert_eq!(normalize_phone("212.736.5000", "US"), expected);
        assert_eq!(normalize_phone("+1 212 736 5000", "US"), expected);
    }

    #[test]
    fn test_explicit_country_code_wins_over_region() {
        assert_eq!(
            normalize_phone("+1 212 736 5000", "GB"),
            Some("+12127365000".to_string())
        );
    }

    #[test]
    fn test_too_short_is_not_a_key() {
        assert_eq!(normalize_phone("12345", "US"), None);
        assert_eq!(normalize_phone("", "US"), None);
        assert_eq!(normalize_phone("call us", "US"), None);
    }
}

#[cfg(test)]
mod domain_tests {
    use super::*;

    #[test]
    fn test_domain_from_website() {
        assert_eq!(extract_domain("https://www.Acme.com/contact"), Some("acme.com".to_string()));
        assert_eq!(extract_domain("acme.com"), Some("acme.com".to_string()));
        assert_eq!(extract_domain("http://shop.acme.co.uk"), Some("shop.acme.co.uk".to_string()));
    }

    #[test]
    fn test_no_domain() {
        assert_eq!(extract_domain(""), None);
        assert_eq!(extract_domain("localhost"), None);
    }
}

#[cfg(test)]
mod identity_tests {
    use super::*;

    #[test]
    fn test_listing_url_is_the_storage_key() {
        let mut record = BusinessRecord::new("Acme", Some("https://maps.example.com/p/1".to_string()));
        record.phone = Some("(212) 736-5000".to_string());
        let keys = record.identity_keys("US");
        assert_eq!(keys.storage_key().as_deref(), Some("url:https://maps.example.com/p/1"));
        assert_eq!(keys.fallback_key.as_deref(), Some("+12127365000"));
    }

    #[test]
    fn test_phone_is_the_fallback_key() {
        let mut record = BusinessRecord::new("Acme", None);
        record.phone = Some("212-736-5000".to_string());
        assert_eq!(
            record.identity_keys("US").storage_key().as_deref(),
            Some("phone:+12127365000")
        );
    }

    #[test]
    fn test_no_key_without_url_or_phone() {
        let record = BusinessRecord::new("Acme", None);
        assert_eq!(record.identity_keys("US").storage_key(), None);
    }
}
