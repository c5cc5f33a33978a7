//! Output comparison.

use crate::model::ComparisonMode;

/// Compare a program's raw output against the expected output.
pub fn outputs_match(actual: &[u8], expected: &str, mode: ComparisonMode) -> bool {
    match mode {
        ComparisonMode::Exact => actual == expected.as_bytes(),
        ComparisonMode::TrimTrailing => {
            normalized_eq(&String::from_utf8_lossy(actual), expected)
        }
    }
}

fn normalized_eq(actual: &str, expected: &str) -> bool {
    let normalize = |s: &str| -> Vec<String> {
        let mut lines: Vec<String> = s.lines().map(|line| line.trim_end().to_string()).collect();

        while let Some(last) = lines.last() {
            if last.is_empty() {
                lines.pop();
            } else {
                break;
            }
        }

        lines
    };

    normalize(actual) == normalize(expected)
}
