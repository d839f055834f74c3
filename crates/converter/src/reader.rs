/// Fatal converter messages, checked in order. Matching is case-sensitive.
pub const LIBRARY_ERRORS: &[&str] = &[
    "Unknown encoder",
    "Unknown decoder",
    "Unrecognized option",
    "Invalid argument",
    "Error opening filters",
    "Invalid data found when processing input",
    "Conversion failed!",
];

/// Parses the most recent chunk of converter output.
///
/// Only the last chunk passed to [`OutputReader::update_read`] is kept; every
/// query is recomputed from it.
#[derive(Debug, Clone, Default)]
pub struct OutputReader {
    last_read: String,
}

impl OutputReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the chunk used by the next queries
    pub fn update_read(&mut self, text: impl Into<String>) {
        self.last_read = text.into();
    }

    pub fn last_read(&self) -> &str {
        &self.last_read
    }

    /// First known fatal phrase present in the chunk
    pub fn catch_library_error(&self) -> Option<&'static str> {
        LIBRARY_ERRORS
            .iter()
            .copied()
            .find(|phrase| self.last_read.contains(phrase))
    }

    /// Last `time=HH:MM:SS.xx` marker of the chunk, in seconds
    pub fn encoded_time(&self) -> Option<f64> {
        self.last_value("time=").and_then(parse_timestamp)
    }

    /// Last `speed=N.NNx` marker of the chunk
    pub fn speed(&self) -> Option<f64> {
        self.last_value("speed=")
            .and_then(|v| v.trim_end_matches('x').parse::<f64>().ok())
    }

    fn last_value(&self, key: &str) -> Option<&str> {
        let start = self.last_read.rfind(key)? + key.len();
        let rest = self.last_read[start..].trim_start();
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        Some(&rest[..end])
    }
}

/// Parse `HH:MM:SS.xx` (hours optional) into seconds
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.starts_with('-') {
        return None;
    }

    let mut seconds = 0.0;
    for part in value.split(':') {
        let n = part.parse::<f64>().ok()?;
        seconds = seconds * 60.0 + n;
    }
    Some(seconds)
}
