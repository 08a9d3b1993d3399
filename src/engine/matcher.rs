use regex::Regex;

use crate::errors::AppError;
use crate::models::rule::Rule;

/// Scan `rules` in matching priority order and return the first whose
/// pattern matches `command_text`. First match wins; there is no scoring or
/// specificity ranking. A stored pattern that no longer compiles is skipped
/// with a warning rather than failing the scan. No match means the command
/// is denied by default.
pub fn evaluate<'a>(rules: &'a [Rule], command_text: &str) -> Option<&'a Rule> {
    for rule in rules {
        match Regex::new(&rule.pattern) {
            Ok(re) => {
                if re.is_match(command_text) {
                    return Some(rule);
                }
            }
            Err(e) => {
                tracing::warn!(
                    rule_id = %rule.id,
                    pattern = %rule.pattern,
                    error = %e,
                    "skipping rule with invalid pattern"
                );
            }
        }
    }
    None
}

/// Stored patterns are untrusted input; reject ones that do not compile
/// before they enter the rule set.
pub fn validate_pattern(pattern: &str) -> Result<(), AppError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| AppError::Validation(format!("invalid pattern '{}': {}", pattern, e)))
}

/// Pattern that matches exactly `command_text` and nothing else. Used when an
/// approved request is materialized into an auto-accept rule.
pub fn exact_match_pattern(command_text: &str) -> String {
    format!("^{}$", regex::escape(command_text))
}

// ── Tests ───────────────────────────────────────────────────────
