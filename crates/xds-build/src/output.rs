use chrono::{DateTime, TimeZone};

/// Aggregated output of every invocation, in arrival order.
///
/// Grows without bound until [`OutputBuffer::reset`].
#[derive(Clone, Debug, Default)]
pub struct OutputBuffer {
    text: String,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub fn reset(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Separator written before each build request.
pub fn output_header<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("--- {} ---\n", now.format("%a %b %d %Y %H:%M:%S GMT%z"))
}

pub fn exit_footer(code: i32) -> String {
    format!("--- Command exited with code {code} ---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn append_concatenates_and_reset_empties() {
        let mut buf = OutputBuffer::new();
        buf.append("a");
        buf.append("b\n");
        assert_eq!(buf.as_str(), "ab\n");
        assert_eq!(buf.len(), 3);

        buf.reset();
        assert!(buf.is_empty());

        buf.append("after\n");
        assert_eq!(buf.as_str(), "after\n");
    }

    #[test]
    fn header_is_delimited_and_newline_terminated() {
        let at = FixedOffset::east_opt(2 * 3600)
            .expect("offset")
            .with_ymd_and_hms(2026, 10, 17, 9, 5, 3)
            .single()
            .expect("date");
        assert_eq!(
            output_header(&at),
            "--- Sat Oct 17 2026 09:05:03 GMT+0200 ---\n"
        );
        assert!(output_header(&Utc::now()).starts_with("--- "));
    }

    #[test]
    fn footer_carries_exit_code_and_blank_line() {
        assert_eq!(exit_footer(2), "--- Command exited with code 2 ---\n\n");
    }
}
