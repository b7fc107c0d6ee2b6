use serde_json::Value;

/// The structured result a helper printed: the last line that parses as JSON,
/// scanning backwards so progress chatter before it is ignored.
///
/// Helpers that pretty-print a single document over many lines have no such
/// line; for those the whole output is tried as one document.
pub fn last_json_line(output: &str) -> Option<Value> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(|line| serde_json::from_str(line).ok())
        .or_else(|| serde_json::from_str(output.trim()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn picks_last_parseable_line() {
        let out = "fetching...\n{\"first\":1}\nresolving 3 packages\n{\"daily\":[]}\ndone\n";
        assert_eq!(last_json_line(out), Some(json!({"daily": []})));
    }

    #[test]
    fn skips_trailing_noise_and_blank_lines() {
        let out = "[1,2]\n\n   \nnpm notice: update available\n";
        assert_eq!(last_json_line(out), Some(json!([1, 2])));
    }

    #[test]
    fn accepts_pretty_printed_document() {
        let out = "{\n  \"totals\": {\n    \"cost\": 1.5\n  }\n}\n";
        assert_eq!(last_json_line(out), Some(json!({"totals": {"cost": 1.5}})));
    }

    #[test]
    fn none_when_nothing_parses() {
        assert_eq!(last_json_line("hello\nworld"), None);
        assert_eq!(last_json_line(""), None);
    }
}
