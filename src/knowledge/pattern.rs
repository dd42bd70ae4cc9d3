//! Error message generalization.

use std::sync::LazyLock;

use regex::Regex;

use crate::util::truncate_chars;

pub const MAX_PATTERN_CHARS: usize = 2000;

/// Substitutions, applied in order. Each placeholder contains no character any
/// rule matches, so a second pass is a no-op.
static SUBSTITUTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\d+", "<NUM>"),
        (
            r"[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}",
            "<UUID>",
        ),
        (r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}", "<TIMESTAMP>"),
        (r"0x[a-fA-F0-9]+", "<ADDR>"),
        (r"/[\w/.-]+", "<PATH>"),
    ]
    .into_iter()
    .filter_map(|(pattern, placeholder)| match Regex::new(pattern) {
        Ok(re) => Some((re, placeholder)),
        Err(e) => {
            tracing::error!(pattern, "Invalid generalization pattern: {}", e);
            None
        }
    })
    .collect()
});

/// Replace volatile tokens in an error message with placeholders and cap the length.
pub fn generalize_error_pattern(error_message: &str) -> String {
    let mut pattern = error_message.to_string();
    for (re, placeholder) in SUBSTITUTIONS.iter() {
        pattern = re.replace_all(&pattern, *placeholder).into_owned();
    }
    truncate_chars(&pattern, MAX_PATTERN_CHARS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_replaced() {
        assert_eq!(
            generalize_error_pattern("Checkpoint 42 expired after 600000 ms"),
            "Checkpoint <NUM> expired after <NUM> ms"
        );
    }

    #[test]
    fn paths_are_replaced() {
        assert_eq!(
            generalize_error_pattern("Dumping heap to /tmp/heapdump.hprof"),
            "Dumping heap to <PATH>"
        );
    }

    #[test]
    fn digit_free_uuid_is_replaced() {
        assert_eq!(
            generalize_error_pattern("id abcdefab-abcd-abcd-abcd-abcdefabcdef gone"),
            "id <UUID> gone"
        );
    }

    #[test]
    fn output_is_capped() {
        let long = "a".repeat(5000);
        assert_eq!(generalize_error_pattern(&long).chars().count(), MAX_PATTERN_CHARS);
    }

    #[test]
    fn generalization_is_idempotent() {
        let samples = [
            "java.lang.OutOfMemoryError: Java heap space. Dumping heap to /tmp/heapdump.hprof",
            "Heartbeat of TaskManager with id container_123 timed out at 2024-01-15T10:30:00",
            "task 550e8400-e29b-41d4-a716-446655440000 at 0x7fff5fbff8c8 failed",
            "Partition xx not found. See /opt/flink/log/ and a/5 b/ c",
            "Checkpoint expired before completing.",
            "",
        ];
        for sample in samples {
            let once = generalize_error_pattern(sample);
            let twice = generalize_error_pattern(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", sample);
        }
    }
}
