//! Text rendering utilities for human-friendly container diagnostics.
//!
//! Provides helpers to format bean-name chains, teardown reports,
//! and helpful suggestions in error output.

use std::fmt::Write as _;

/// Renders a creation chain as a readable string.
///
/// # Examples
/// ```
/// use granary_support::rendering::render_chain;
///
/// let chain = vec!["orderService", "paymentGateway", "orderService"];
/// let rendered = render_chain(&chain);
/// assert_eq!(rendered, "orderService → paymentGateway → orderService");
/// ```
pub fn render_chain(chain: &[impl AsRef<str>]) -> String {
    chain
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// An entry in a teardown report.
#[derive(Debug)]
pub struct TeardownEntry {
    /// The bean name being destroyed
    pub bean_name: String,
    /// A bean this one depends on, when that dependency constrains the
    /// teardown order; `None` for plain reverse registration order
    pub triggered_by: Option<String>,
}

/// Renders the order in which singletons will be torn down.
///
/// ```text
/// auditLog
///    ↓
/// orderService  (dependent of: paymentGateway)
///    ↓
/// paymentGateway
/// ```
pub fn render_teardown(entries: &[TeardownEntry]) -> String {
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push_str("   ↓\n");
        }
        out.push_str(&entry.bean_name);
        if let Some(ref trigger) = entry.triggered_by {
            let _ = write!(out, "  (dependent of: {trigger})");
        }
        out.push('\n');
    }
    out
}

/// Shortens a fully qualified Rust type name for display.
///
/// ```
/// use granary_support::rendering::shorten_type_name;
///
/// assert_eq!(
///     shorten_type_name("my_app::billing::PaymentGateway"),
///     "PaymentGateway"
/// );
/// assert_eq!(
///     shorten_type_name("alloc::sync::Arc<dyn my_app::ports::Gateway>"),
///     "Arc<dyn Gateway>"
/// );
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut result = String::with_capacity(full_name.len());
    let mut segment_start = 0;

    for (idx, ch) in full_name.char_indices() {
        match ch {
            ':' => {
                // Either half of a `::` separator: discard the path prefix
                segment_start = idx + 1;
            }
            '<' | '>' | ',' | ' ' | '(' | ')' => {
                result.push_str(&full_name[segment_start..idx]);
                result.push(ch);
                segment_start = idx + 1;
            }
            _ => {}
        }
    }

    result.push_str(&full_name[segment_start..]);
    result
}

/// Generates "did you mean?" suggestions for an unknown bean name.
///
/// Compares the requested name against the registered names and returns
/// close matches, best first.
pub fn suggest_similar(
    requested: &str,
    available: &[impl AsRef<str>],
    max_suggestions: usize,
) -> Vec<String> {
    let requested_lower = requested.to_lowercase();

    let mut scored: Vec<(&str, usize)> = available
        .iter()
        .map(|n| n.as_ref())
        .filter_map(|name| {
            let name_lower = name.to_lowercase();

            // Exact substring match first
            if name_lower.contains(&requested_lower) || requested_lower.contains(&name_lower) {
                return Some((name, 100));
            }

            // Shared prefix
            let common = name_lower
                .chars()
                .zip(requested_lower.chars())
                .take_while(|(a, b)| a == b)
                .count();
            if common >= 3 {
                return Some((name, common * 10));
            }

            None
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
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
    fn render_simple_chain() {
        let chain = vec!["a", "b", "c", "a"];
        assert_eq!(render_chain(&chain), "a → b → c → a");
    }

    #[test]
    fn render_single_element_chain() {
        let chain = vec!["a"];
        assert_eq!(render_chain(&chain), "a");
    }

    #[test]
    fn render_empty_chain() {
        let chain: Vec<&str> = vec![];
        assert_eq!(render_chain(&chain), "");
    }

    #[test]
    fn shorten_simple_path() {
        assert_eq!(
            shorten_type_name("my_app::services::OrderService"),
            "OrderService"
        );
    }

    #[test]
    fn shorten_with_generics() {
        assert_eq!(
            shorten_type_name("alloc::sync::Arc<dyn my_app::ports::Gateway>"),
            "Arc<dyn Gateway>"
        );
    }

    #[test]
    fn shorten_no_path() {
        assert_eq!(shorten_type_name("OrderService"), "OrderService");
    }

    #[test]
    fn suggest_close_names() {
        let available = vec!["orderService", "orderRepository", "auditLog"];
        let suggestions = suggest_similar("orderSer", &available, 3);
        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0], "orderService");
    }

    #[test]
    fn suggest_no_match() {
        let available = vec!["auditLog"];
        let suggestions = suggest_similar("zzz", &available, 3);
        assert!(suggestions.is_empty());
    }

    #[test]
    fn teardown_report() {
        let entries = vec![
            TeardownEntry {
                bean_name: "auditLog".to_string(),
                triggered_by: None,
            },
            TeardownEntry {
                bean_name: "orderService".to_string(),
                triggered_by: Some("paymentGateway".to_string()),
            },
            TeardownEntry {
                bean_name: "paymentGateway".to_string(),
                triggered_by: None,
            },
        ];

        let rendered = render_teardown(&entries);
        assert!(rendered.contains("auditLog"));
        assert!(rendered.contains("↓"));
        assert!(rendered.contains("(dependent of: paymentGateway)"));
    }
}
