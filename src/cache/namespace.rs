use std::fmt;

/// Logical partitions of the cache key space used by the API handlers.
///
/// Each namespace carries its own default TTL (see
/// [`CacheConfig::ttl_for`](super::CacheConfig::ttl_for)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Debate listings and detail lookups.
    Debates,
    /// Stream URLs and extraction status.
    Streaming,
    /// Programme and other slow-moving metadata.
    Metadata,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Self::Debates, Self::Streaming, Self::Metadata];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debates => "debates",
            Self::Streaming => "streaming",
            Self::Metadata => "metadata",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ns| ns.as_str() == value)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_matches_as_str() {
        for ns in Namespace::ALL {
            assert_eq!(Namespace::parse(ns.as_str()), Some(ns));
        }
        assert_eq!(Namespace::parse("unknown"), None);
    }
}
