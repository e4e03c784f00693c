use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Queue priority band. 0 is served first, 4 last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(0);
    pub const LOWEST: Priority = Priority(4);

    /// Number of distinct bands (0..=4).
    pub const BANDS: usize = 5;

    /// Builds a priority, clamping anything past the lowest band.
    pub fn new(value: u8) -> Self {
        Priority(value.min(Self::LOWEST.0))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::LOWEST
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription tier of the owner at submission time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tier {
    Admin,
    Ultra,
    Premium,
    Free,
    #[default]
    Basic,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Admin => "admin",
            Tier::Ultra => "ultra",
            Tier::Premium => "premium",
            Tier::Free => "free",
            Tier::Basic => "basic",
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Tier::Admin => Priority(0),
            Tier::Ultra => Priority(1),
            Tier::Premium => Priority(2),
            Tier::Free => Priority(3),
            Tier::Basic => Priority(4),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Tier::Admin),
            "ultra" => Ok(Tier::Ultra),
            "premium" => Ok(Tier::Premium),
            "free" => Ok(Tier::Free),
            "basic" => Ok(Tier::Basic),
            _ => Err(format!("Unknown tier: {}", s)),
        }
    }
}

/// Maps a raw tier name to its queue priority. Unknown names get the lowest band.
pub fn priority_of(tier: &str) -> Priority {
    Tier::from_str(tier).map(|t| t.priority()).unwrap_or(Priority::LOWEST)
}

/// Kind of uploaded content; part of the buffer key and of every job payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Photo,
    File,
    Video,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [ContentType::Photo, ContentType::File, ContentType::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Photo => "photo",
            ContentType::File => "file",
            ContentType::Video => "video",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(ContentType::Photo),
            "file" => Ok(ContentType::File),
            "video" => Ok(ContentType::Video),
            _ => Err(format!("Unknown content type: {}", s)),
        }
    }
}

// rusqlite FromSql: read content type from DB text column
impl rusqlite::types::FromSql for ContentType {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let s = value.as_str()?;
        ContentType::from_str(s).map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(std::io::Error::other(e))))
    }
}

// rusqlite ToSql: write content type as text to DB
impl rusqlite::types::ToSql for ContentType {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(rusqlite::types::ToSqlOutput::Borrowed(rusqlite::types::ValueRef::Text(
            self.as_str().as_bytes(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_follows_tiers() {
        assert_eq!(priority_of("admin").value(), 0);
        assert_eq!(priority_of("ultra").value(), 1);
        assert_eq!(priority_of("premium").value(), 2);
        assert_eq!(priority_of("free").value(), 3);
        assert_eq!(priority_of("basic").value(), 4);
    }

    #[test]
    fn test_unknown_tier_gets_lowest_priority() {
        assert_eq!(priority_of("enterprise"), Priority::LOWEST);
        assert_eq!(priority_of(""), Priority::LOWEST);
    }

    #[test]
    fn test_tier_parse_is_case_insensitive() {
        assert_eq!(Tier::from_str("Premium").unwrap(), Tier::Premium);
        assert_eq!(Tier::from_str(" ADMIN ").unwrap(), Tier::Admin);
        assert!(Tier::from_str("vip").is_err());
    }

    #[test]
    fn test_tier_default_is_basic() {
        assert_eq!(Tier::default(), Tier::Basic);
        assert_eq!(Tier::default().priority(), Priority::LOWEST);
    }

    #[test]
    fn test_priority_clamps() {
        assert_eq!(Priority::new(9), Priority::LOWEST);
        assert!(Priority::HIGHEST < Priority::new(2));
    }

    #[test]
    fn test_content_type_round_trips_through_str() {
        for ct in ContentType::ALL {
            assert_eq!(ContentType::from_str(ct.as_str()).unwrap(), ct);
        }
        assert!(ContentType::from_str("audio").is_err());
    }

    #[test]
    fn test_content_type_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&ContentType::Video).unwrap(), "\"video\"");
    }
}
