//! Token identifier derivation
//!
//! Exports do not always carry a token column. It can be recovered from the
//! structured pair string (`LEG1_TOKEN/QUOTE->LEG2...`) or from a compound
//! currency id (`1_bnb_2`).

/// Token of the first leg of a pair string, lower-cased.
///
/// `"ARB_ETH/USDT->X"` → `"eth"`
pub fn extract_token(pair: &str) -> Option<String> {
    if pair.is_empty() {
        return None;
    }
    let first_leg = pair.split("->").next().unwrap_or(pair);
    let mut token_part = first_leg.rsplit('_').next().unwrap_or(first_leg);
    if let Some((token, _quote)) = token_part.split_once('/') {
        token_part = token;
    }
    let token = token_part.trim().to_lowercase();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Second segment of a currency id, lower-cased; ids without separator are used whole.
///
/// `"1_bnb_2"` → `"bnb"`
pub fn token_from_cur_id(cur_id: &str) -> Option<String> {
    if cur_id.is_empty() {
        return None;
    }
    let segments: Vec<&str> = cur_id.split('_').collect();
    let token = if segments.len() >= 2 {
        segments[1].trim().to_lowercase()
    } else {
        cur_id.trim().to_lowercase()
    };
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token_from_pair() {
        assert_eq!(extract_token("ARB_ETH/USDT->X"), Some("eth".to_string()));
        assert_eq!(extract_token("BSC_BNB/USDT->MEXC_BNB/USDT"), Some("bnb".to_string()));
        assert_eq!(extract_token("  sol "), Some("sol".to_string()));
    }

    #[test]
    fn test_extract_token_without_quote() {
        assert_eq!(extract_token("ARB_WBTC->X"), Some("wbtc".to_string()));
    }

    #[test]
    fn test_extract_token_empty() {
        assert_eq!(extract_token(""), None);
        assert_eq!(extract_token("ARB_/USDT->X"), None);
    }

    #[test]
    fn test_token_from_cur_id() {
        assert_eq!(token_from_cur_id("1_bnb_2"), Some("bnb".to_string()));
        assert_eq!(token_from_cur_id("7_ ETH "), Some("eth".to_string()));
        assert_eq!(token_from_cur_id("PEPE"), Some("pepe".to_string()));
        assert_eq!(token_from_cur_id("1__2"), None);
        assert_eq!(token_from_cur_id(""), None);
    }
}
