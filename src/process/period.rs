use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};

static PERIOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^0-9])([1-4])T(\d{4})(?:[^0-9]|$)").expect("period regex"));

/// A reporting quarter, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: u16,
    pub quarter: u8,
}

impl Period {
    pub fn year_str(&self) -> String {
        format!("{:04}", self.year)
    }

    pub fn quarter_str(&self) -> String {
        self.quarter.to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{:04}", self.quarter, self.year)
    }
}

/// Extract the `<quarter>T<year>` token from a file name or URL path segment.
pub fn parse_period(name: &str) -> Option<Period> {
    let file_name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);
    let caps = PERIOD_RE.captures(file_name)?;
    Some(Period {
        quarter: caps[1].parse().ok()?,
        year: caps[2].parse().ok()?,
    })
}
