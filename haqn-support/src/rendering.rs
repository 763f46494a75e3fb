//! Text rendering utilities for human-friendly diagnostics.
//!
//! Used by the container's error types to show which scopes a worker has
//! entered and which registered features look like the one that was
//! requested.

/// Renders the scopes currently entered on a worker, oldest first.
///
/// # Examples
/// ```
/// use haqn_support::rendering::render_scope_stack;
///
/// let stack = vec!["Worker", "Process", "Request"];
/// assert_eq!(render_scope_stack(&stack), "Worker → Process → Request");
/// assert_eq!(render_scope_stack::<&str>(&[]), "(none)");
/// ```
pub fn render_scope_stack<S: AsRef<str>>(scopes: &[S]) -> String {
    if scopes.is_empty() {
        return "(none)".to_string();
    }
    scopes
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Renders a list of feature labels as an indented bullet list.
///
/// Every line starts with a newline so the result can be appended
/// directly after a header line.
pub fn render_bullets<S: AsRef<str>>(items: &[S]) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str("\n    - ");
        out.push_str(item.as_ref());
    }
    out
}

/// Shortens a fully qualified type name for display.
///
/// ```
/// use haqn_support::rendering::shorten_type_name;
///
/// let short = shorten_type_name("my_app::mail::SmtpMailer");
/// assert_eq!(short, "SmtpMailer");
///
/// let short = shorten_type_name("alloc::sync::Arc<dyn my_app::mail::Mailer>");
/// assert_eq!(short, "Arc<dyn Mailer>");
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut result = String::with_capacity(full_name.len());
    let mut chars = full_name.chars().peekable();
    let mut segment = String::new();

    while let Some(ch) = chars.next() {
        match ch {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                segment.clear();
            }
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                result.push_str(&segment);
                result.push(ch);
                segment.clear();
            }
            _ => segment.push(ch),
        }
    }

    result.push_str(&segment);
    result
}

/// Picks the registered feature labels that look like `requested`.
///
/// Scoring, highest first: case-insensitive substring match in either
/// direction, then a match on shortened type names, then a common prefix
/// of at least three characters. Ties keep the order of `available`.
pub fn suggest_similar(requested: &str, available: &[&str], max_suggestions: usize) -> Vec<String> {
    if max_suggestions == 0 || requested.is_empty() {
        return Vec::new();
    }

    let requested_lower = requested.to_lowercase();
    let requested_short = shorten_type_name(requested).to_lowercase();

    let mut scored: Vec<(&str, usize)> = available
        .iter()
        .filter(|&&name| name != requested)
        .filter_map(|&name| {
            let name_lower = name.to_lowercase();
            let name_short = shorten_type_name(name).to_lowercase();

            if name_lower.contains(&requested_lower) || requested_lower.contains(&name_lower) {
                return Some((name, 100));
            }

            if !name_short.is_empty()
                && (name_short.contains(&requested_short) || requested_short.contains(&name_short))
            {
                return Some((name, 80));
            }

            let common = name_short
                .chars()
                .zip(requested_short.chars())
                .take_while(|(a, b)| a == b)
                .count();

            (common >= 3).then_some((name, common * 10))
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(name, _)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_stack_in_entry_order() {
        let stack = vec!["Worker", "Process", "Session", "Request"];
        assert_eq!(
            render_scope_stack(&stack),
            "Worker → Process → Session → Request"
        );
    }

    #[test]
    fn render_single_scope() {
        assert_eq!(render_scope_stack(&["Worker"]), "Worker");
    }

    #[test]
    fn render_bullets_prefixes_each_line() {
        let rendered = render_bullets(&["IMailer", "IMailQueue"]);
        assert_eq!(rendered, "\n    - IMailer\n    - IMailQueue");
        assert_eq!(render_bullets::<&str>(&[]), "");
    }

    #[test]
    fn shorten_plain_name_is_untouched() {
        assert_eq!(shorten_type_name("IService"), "IService");
    }

    #[test]
    fn shorten_nested_generics() {
        assert_eq!(
            shorten_type_name("core::option::Option<alloc::vec::Vec<my_app::Job>>"),
            "Option<Vec<Job>>"
        );
    }

    #[test]
    fn suggest_misspelled_feature() {
        let available = vec!["IMailer", "IMailQueue", "IClock", "IDatabase"];
        let suggestions = suggest_similar("IMaler", &available, 3);
        assert!(!suggestions.is_empty());
        assert!(suggestions.iter().any(|s| s == "IMailer"));
    }

    #[test]
    fn suggest_substring_ranks_first() {
        let available = vec!["my_app::Clock", "my_app::ClockSkew"];
        let suggestions = suggest_similar("ClockSkew", &available, 1);
        assert_eq!(suggestions, vec!["my_app::ClockSkew".to_string()]);
    }

    #[test]
    fn suggest_nothing_for_unrelated_name() {
        let available = vec!["IDatabase"];
        assert!(suggest_similar("XyzAbc", &available, 3).is_empty());
    }

    #[test]
    fn suggest_respects_zero_limit() {
        let available = vec!["IMailer"];
        assert!(suggest_similar("IMailer2", &available, 0).is_empty());
    }
}
