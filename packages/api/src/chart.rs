// ABOUTME: Extracts base64 chart images printed on sentinel lines of run output
// ABOUTME: Removes every sentinel line so the visible output stays readable

/// Prefix a snippet prints before a base64-encoded PNG
pub const CHART_SENTINEL: &str = "CHART_IMAGE:";

/// Split run output into visible text and the first chart payload
pub fn extract_chart(output: &str) -> (String, Option<String>) {
    if !output.contains(CHART_SENTINEL) {
        return (output.to_string(), None);
    }

    let mut chart = None;
    let mut visible = Vec::new();
    for line in output.lines() {
        match line.strip_prefix(CHART_SENTINEL) {
            Some(payload) => {
                if chart.is_none() {
                    chart = Some(payload.trim().to_string());
                }
            }
            None => visible.push(line),
        }
    }

    (visible.join("\n"), chart)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_without_sentinel_is_untouched() {
        let (output, chart) = extract_chart("total: 15\n");
        assert_eq!(output, "total: 15\n");
        assert!(chart.is_none());
    }

    #[test]
    fn test_first_chart_wins_and_all_sentinels_are_removed() {
        let raw = "Plotting\nCHART_IMAGE:aGVsbG8=\nCHART_IMAGE:d29ybGQ=\ndone";
        let (output, chart) = extract_chart(raw);
        assert_eq!(output, "Plotting\ndone");
        assert_eq!(chart.as_deref(), Some("aGVsbG8="));
    }

    #[test]
    fn test_indented_sentinel_is_not_a_chart() {
        let (output, chart) = extract_chart("  CHART_IMAGE:abc");
        assert_eq!(output, "  CHART_IMAGE:abc");
        assert!(chart.is_none());
    }
}
