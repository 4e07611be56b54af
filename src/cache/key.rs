use std::fmt;
use xxhash_rust::xxh3::xxh3_128;

/// Separador entre componentes de una clave compuesta.
///
/// `normalize` nunca deja un carácter de control en un componente, así que
/// `"ab" + "c"` y `"a" + "bc"` no pueden producir el mismo texto.
const COMPONENT_SEPARATOR: char = '\u{1f}';

/// Canonical form of a user-supplied identifier.
///
/// Trims, lower-cases and collapses every run of whitespace into a single
/// space. Control characters are treated as whitespace.
pub fn normalize(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex-encoded 128-bit xxh3 digest of an already normalized string.
pub fn hash(normalized: &str) -> String {
    format!("{:032x}", xxh3_128(normalized.as_bytes()))
}

/// Normalized identifier plus the digest used as its on-disk name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    normalized: String,
    hash: String,
}

impl CacheKey {
    pub fn new(raw: &str) -> Self {
        Self::from_normalized(normalize(raw))
    }

    /// Builds a key from several identifiers (e.g. artist + track title).
    pub fn composite(parts: &[&str]) -> Self {
        let joined = parts
            .iter()
            .map(|part| normalize(part))
            .collect::<Vec<_>>()
            .join(&COMPONENT_SEPARATOR.to_string());
        Self::from_normalized(joined)
    }

    fn from_normalized(normalized: String) -> Self {
        let hash = hash(&normalized);
        Self { normalized, hash }
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.normalized.replace(COMPONENT_SEPARATOR, " / "), &self.hash[..8])
    }
}
