//! Plain-text report formatting for the log files
//!
//! Stats and connectivity reports are written for humans reading the log
//! files, so they are padded into banners and `key : value` tables.

use chrono::{DateTime, SecondsFormat, Utc};

#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

pub const DEFAULT_IDEAL_LENGTH: usize = 70;
const REPORT_WIDTH: usize = 90;
const EMPTY_VALUE: &str = "empty/no data";
pub const NO_CONTENT_PROVIDED: &str = "NO_CONTENT_PROVIDED";
const NO_TITLE_PROVIDED: &str = "NO_TITLE_PROVIDED";

/// Pad `line` up to `ideal_len` characters with the prefix and/or suffix fill.
///
/// With both fills the padding is split evenly, the odd character going to
/// the suffix. Lines longer than `ideal_len` are returned untouched.
pub fn beautify_line(
    line: &str,
    prefix: &str,
    suffix: &str,
    ideal_len: usize,
    newline: bool,
) -> String {
    let line = if line.is_empty() { EMPTY_VALUE } else { line };
    let len = line.chars().count();

    let mut out = if len > ideal_len {
        line.to_string()
    } else {
        let remaining = ideal_len - len;
        let prefix_count = remaining / 2;
        let suffix_count = remaining - prefix_count;
        match (prefix.is_empty(), suffix.is_empty()) {
            (false, false) => format!(
                "{} {} {}",
                prefix.repeat(prefix_count),
                line,
                suffix.repeat(suffix_count)
            ),
            (false, true) => format!("{} {}", prefix.repeat(remaining), line),
            (true, false) => format!("{} {}", line, suffix.repeat(remaining)),
            (true, true) => line.to_string(),
        }
    };

    if newline {
        out.push_str(LINE_ENDING);
    }
    out
}

fn iso(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Wrap `content` in a banner carrying its title and timing
pub fn header_and_footer(
    content: &str,
    title: &str,
    generated_at: DateTime<Utc>,
    start_time: DateTime<Utc>,
) -> String {
    if content.is_empty() {
        return NO_CONTENT_PROVIDED.to_string();
    }
    let title = if title.is_empty() { NO_TITLE_PROVIDED } else { title };
    let rule = beautify_line("=", "*", "*", REPORT_WIDTH, true);

    let mut out = String::from(LINE_ENDING);
    out.push_str(&rule);
    out.push_str(&beautify_line(&format!("Title: {}", title), "", "=", REPORT_WIDTH, true));
    out.push_str(&beautify_line(
        &format!("Start Time: {}", iso(&start_time)),
        "",
        "=",
        REPORT_WIDTH,
        true,
    ));
    out.push_str(&beautify_line(
        &format!("Generated At: {}", iso(&generated_at)),
        "",
        "=",
        REPORT_WIDTH,
        true,
    ));
    out.push_str(&rule);
    out.push_str(content);
    out.push_str(LINE_ENDING);
    out.push_str(&rule);
    out
}

fn longest<'a>(values: impl Iterator<Item = &'a str>) -> usize {
    values
        .map(|v| if v.is_empty() { EMPTY_VALUE } else { v })
        .map(|v| v.chars().count())
        .max()
        .unwrap_or(0)
}

fn render_block(
    entries: &[(String, String)],
    key_title: &str,
    value_title: &str,
    key_width: usize,
    value_width: usize,
) -> String {
    let key_width = key_width.max(key_title.chars().count());
    let value_width = value_width.max(value_title.chars().count());

    let mut out = String::from(LINE_ENDING);
    out.push_str(&beautify_line(key_title, " ", " ", key_width, false));
    out.push_str(" : ");
    out.push_str(&beautify_line(value_title, " ", " ", value_width, true));
    out.push_str(&beautify_line("-", "-", "", key_width + value_width, true));

    for (key, value) in entries {
        out.push_str(&beautify_line(key, " ", " ", key_width, false));
        out.push_str(" : ");
        out.push_str(&beautify_line(value, " ", " ", value_width, true));
    }

    out.push_str(LINE_ENDING);
    out
}

/// Render one `key : value` table
pub fn beautify_table(entries: &[(String, String)], key_title: &str, value_title: &str) -> String {
    let key_width = longest(entries.iter().map(|(k, _)| k.as_str()));
    let value_width = longest(entries.iter().map(|(_, v)| v.as_str()));
    render_block(entries, key_title, value_title, key_width, value_width)
}

/// Render several tables sharing the same column widths, in the given order
pub fn beautify_tables(
    blocks: &[Vec<(String, String)>],
    key_title: &str,
    value_title: &str,
) -> String {
    let key_width = longest(blocks.iter().flatten().map(|(k, _)| k.as_str()));
    let value_width = longest(blocks.iter().flatten().map(|(_, v)| v.as_str()));

    let mut out = String::from(LINE_ENDING);
    for block in blocks {
        out.push_str(&render_block(block, key_title, value_title, key_width, value_width));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const LINE: &str = "Hello, This is Requests Debugger Tool";

    #[test]
    fn test_pads_both_sides_with_extra_on_suffix() {
        assert_eq!(
            beautify_line(LINE, "=", "=", 60, false),
            "=========== Hello, This is Requests Debugger Tool ============"
        );
    }

    #[test]
    fn test_pads_prefix_only() {
        assert_eq!(
            beautify_line(LINE, "=", "", 60, false),
            "======================= Hello, This is Requests Debugger Tool"
        );
    }

    #[test]
    fn test_pads_suffix_only_with_newline() {
        assert_eq!(
            beautify_line(LINE, "", "=", 60, true),
            format!("Hello, This is Requests Debugger Tool ======================={}", LINE_ENDING)
        );
    }

    #[test]
    fn test_keeps_long_lines_untouched() {
        assert_eq!(beautify_line(LINE, "", "=", 10, false), LINE);
        assert_eq!(
            beautify_line(LINE, "=", "=", DEFAULT_IDEAL_LENGTH, false),
            "================ Hello, This is Requests Debugger Tool ================="
        );
    }

    #[test]
    fn test_header_and_footer_frames_content() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let generated = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();
        let out = header_and_footer("content", "CPU", generated, start);

        assert!(out.starts_with(LINE_ENDING));
        assert!(out.contains("Title: CPU"));
        assert!(out.contains("Start Time: 2024-01-01T00:00:00.000Z"));
        assert!(out.contains("Generated At: 2024-01-01T00:00:05.000Z"));
        assert!(out.contains(&format!("content{}", LINE_ENDING)));
    }

    #[test]
    fn test_header_and_footer_without_content() {
        let now = Utc::now();
        assert_eq!(header_and_footer("", "CPU", now, now), NO_CONTENT_PROVIDED);
    }

    #[test]
    fn test_table_aligns_keys_and_values() {
        let entries = vec![
            ("total".to_string(), "100".to_string()),
            ("free".to_string(), "25".to_string()),
        ];
        let out = beautify_table(&entries, "Memory", "Bytes");
        let lines: Vec<&str> = out.lines().filter(|l| !l.is_empty()).collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("Memory") && lines[0].contains(" : "));
        assert!(lines[1].chars().all(|c| c == '-' || c == ' '));
        assert!(lines[2].contains("total") && lines[2].contains("100"));
        // every row places the separator at the same column
        let column = lines[0].find(" : ").unwrap();
        assert_eq!(lines[2].find(" : ").unwrap(), column);
        assert_eq!(lines[3].find(" : ").unwrap(), column);
    }

    #[test]
    fn test_tables_keep_block_order() {
        let blocks = vec![
            vec![("description".to_string(), "first".to_string())],
            vec![("description".to_string(), "second".to_string())],
        ];
        let out = beautify_tables(&blocks, "Result Key", "Result Value");
        assert!(out.find("first").unwrap() < out.find("second").unwrap());
    }
}
