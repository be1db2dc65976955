/// Usage extraction: derive (used, limit) from a page's rendered text.
///
/// Strategies run from most to least specific and the first hit wins:
/// - `X of Y messages`
/// - `X / Y messages`
/// - the first usage-looking element's first two numbers
use crate::dom::Node;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Quota numbers found on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(rename = "messagesUsed")]
    pub used: u64,
    #[serde(rename = "messagesLimit")]
    pub limit: u64,
}

/// A single extraction attempt over the page text and tree.
pub type Strategy = fn(&str, &Node) -> Option<ExtractionResult>;

/// Extraction strategies in priority order.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("of_phrase", of_phrase),
    ("slash_phrase", slash_phrase),
    ("usage_section", usage_section),
];

static OF_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([0-9]+)\s+of\s+([0-9]+)\s+messages").unwrap());

static SLASH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([0-9]+)\s*/\s*([0-9]+)\s+messages").unwrap());

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

/// Loose phrases logged when nothing matched, to help tune the patterns.
static HINT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)messages?\s*used[:\s]*([0-9]+)").unwrap(),
        Regex::new(r"(?i)([0-9]+)\s*messages?\s*used").unwrap(),
        Regex::new(r"(?i)usage[:\s]*([0-9]+)\s*/\s*([0-9]+)").unwrap(),
        Regex::new(r"(?i)limit[:\s]*([0-9]+)").unwrap(),
    ]
});

/// Elements scanned by the usage-section strategy.
const SECTION_TAGS: &[&str] = &["div", "section", "article", "p", "span"];

const SECTION_KEYWORDS: &[&str] = &["usage", "messages", "limit", "monthly"];

/// Run every strategy in order and return the first result.
pub fn extract(page_text: &str, root: &Node) -> Option<ExtractionResult> {
    for (name, strategy) in STRATEGIES {
        if let Some(result) = strategy(page_text, root) {
            tracing::debug!(
                strategy = name,
                used = result.used,
                limit = result.limit,
                "usage extracted"
            );
            return Some(result);
        }
    }

    log_hints(page_text);
    None
}

fn from_pair(used: &str, limit: &str) -> Option<ExtractionResult> {
    let used = used.parse().ok()?;
    let limit = limit.parse().ok()?;
    if limit == 0 {
        return None;
    }
    Some(ExtractionResult { used, limit })
}

fn first_capture_pair(pattern: &Regex, text: &str) -> Option<ExtractionResult> {
    let caps = pattern.captures(text)?;
    from_pair(caps.get(1)?.as_str(), caps.get(2)?.as_str())
}

/// `"45 of 100 messages"`
pub fn of_phrase(page_text: &str, _root: &Node) -> Option<ExtractionResult> {
    first_capture_pair(&OF_PATTERN, page_text)
}

/// `"45/100 messages"`, spaces optional around the slash.
pub fn slash_phrase(page_text: &str, _root: &Node) -> Option<ExtractionResult> {
    first_capture_pair(&SLASH_PATTERN, page_text)
}

/// First two numbers of the first element that reads like a usage section.
pub fn usage_section(_page_text: &str, root: &Node) -> Option<ExtractionResult> {
    let section = find_usage_section(root)?;
    let text = section.text_content();
    let mut numbers = DIGITS.find_iter(&text).map(|m| m.as_str());
    let used = numbers.next()?;
    let limit = numbers.next()?;
    from_pair(used, limit)
}

fn find_usage_section(root: &Node) -> Option<&Node> {
    root.elements().into_iter().find(|el| {
        let Some(tag) = el.tag() else {
            return false;
        };
        if !SECTION_TAGS.contains(&tag) {
            return false;
        }
        let text = el.text_content().to_lowercase();
        SECTION_KEYWORDS.iter().any(|k| text.contains(k)) && text.contains("message")
    })
}

fn log_hints(page_text: &str) {
    for pattern in HINT_PATTERNS.iter() {
        if let Some(m) = pattern.find(page_text) {
            tracing::debug!(pattern = %pattern, found = m.as_str(), "possible usage text");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::PageSnapshot;

    fn run(text: &str) -> Option<ExtractionResult> {
        let snap = PageSnapshot::from_text("", text);
        extract(&snap.page_text(), &snap.root)
    }

    fn result(used: u64, limit: u64) -> Option<ExtractionResult> {
        Some(ExtractionResult { used, limit })
    }

    #[test]
    fn test_of_phrase() {
        assert_eq!(run("You have used 45 of 100 messages this month"), result(45, 100));
    }

    #[test]
    fn test_of_phrase_case_insensitive() {
        assert_eq!(run("7 OF 20 MESSAGES"), result(7, 20));
    }

    #[test]
    fn test_slash_phrase_with_and_without_spaces() {
        assert_eq!(run("Used: 12/50 messages"), result(12, 50));
        assert_eq!(run("Used: 12 / 50 messages"), result(12, 50));
    }

    #[test]
    fn test_of_phrase_beats_slash_phrase() {
        let text = "Today 3 / 9 messages. Month: 30 of 90 messages";
        assert_eq!(run(text), result(30, 90));
    }

    #[test]
    fn test_first_of_phrase_in_text_order_wins() {
        assert_eq!(run("1 of 2 messages, then 3 of 4 messages"), result(1, 2));
    }

    #[test]
    fn test_usage_section_fallback() {
        assert_eq!(
            run("Monthly usage: messages 42 100 remaining"),
            result(42, 100)
        );
    }

    #[test]
    fn test_usage_section_needs_message_word() {
        // "usage" alone is not enough without "message".
        assert_eq!(run("Storage usage 10 20"), None);
    }

    #[test]
    fn test_usage_section_needs_two_numbers() {
        assert_eq!(run("Monthly messages remaining: 5"), None);
    }

    #[test]
    fn test_usage_section_picks_first_matching_element() {
        let root = Node::element(
            "body",
            vec![
                Node::element("nav", vec![Node::text("Home 1 2")]),
                Node::element(
                    "section",
                    vec![
                        Node::element("h2", vec![Node::text("Usage")]),
                        Node::element("p", vec![Node::text("Messages: 8 used, 25 allowed")]),
                    ],
                ),
                Node::element("p", vec![Node::text("Messages limit 99 999")]),
            ],
        );
        assert_eq!(usage_section("", &root), result(8, 25));
    }

    #[test]
    fn test_usage_section_ignores_non_scanned_tags() {
        let root = Node::element(
            "body",
            vec![Node::element("li", vec![Node::text("usage messages 1 2")])],
        );
        assert_eq!(usage_section("", &root), None);
    }

    #[test]
    fn test_no_keywords_no_digits() {
        assert_eq!(run("Welcome back! Start a new chat."), None);
    }

    #[test]
    fn test_non_ascii_digits_ignored() {
        assert_eq!(run("٤ of ١٠ messages"), None);
    }

    #[test]
    fn test_absurd_values_accepted() {
        assert_eq!(run("999999999 of 1000 messages"), result(999_999_999, 1000));
    }

    #[test]
    fn test_zero_limit_falls_through() {
        assert_eq!(run("5 of 0 messages, 5/10 messages"), result(5, 10));
    }

    #[test]
    fn test_overflowing_number_misses() {
        assert_eq!(of_phrase("1 of 99999999999999999999999 messages", &Node::text("")), None);
    }

    #[test]
    fn test_strategies_order() {
        let names: Vec<_> = STRATEGIES.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["of_phrase", "slash_phrase", "usage_section"]);
    }

    #[test]
    fn test_extraction_result_wire_names() {
        let json = serde_json::to_value(ExtractionResult { used: 1, limit: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"messagesUsed": 1, "messagesLimit": 2}));
    }
}
