//! Replacement suggestions for packages that are known to be abandoned or superseded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::Ecosystem;
use crate::resolve::pip::normalize_name;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub replacement: String,
    pub reason: String,
}

/// Lookup table of suggested replacements, seeded with well-known cases and
/// extended by callers. Each catalog is an independent value.
#[derive(Debug, Clone, Default)]
pub struct ReplacementCatalog {
    entries: BTreeMap<(Ecosystem, String), Suggestion>,
}

const BUILTIN: &[(Ecosystem, &str, &str, &str)] = &[
    (Ecosystem::Npm, "request", "got", "request is deprecated; got or native fetch cover the same API"),
    (Ecosystem::Npm, "request-promise", "got", "depends on the deprecated request package"),
    (Ecosystem::Npm, "moment", "dayjs", "moment is in maintenance mode; dayjs has a compatible API"),
    (Ecosystem::Npm, "node-sass", "sass", "node-sass is deprecated in favour of Dart Sass"),
    (Ecosystem::Npm, "tslint", "eslint", "tslint is deprecated; use typescript-eslint"),
    (Ecosystem::Npm, "left-pad", "String.prototype.padStart", "built into the language"),
    (Ecosystem::Npm, "querystring", "URLSearchParams", "legacy API; URLSearchParams is built in"),
    (Ecosystem::Npm, "uuid-js", "uuid", "unmaintained; uuid is the maintained implementation"),
    (Ecosystem::Pip, "nose", "pytest", "nose is unmaintained and broken on modern Python"),
    (Ecosystem::Pip, "pycrypto", "pycryptodome", "pycrypto is unmaintained with known vulnerabilities"),
    (Ecosystem::Pip, "mock", "unittest.mock", "part of the standard library since Python 3.3"),
    (Ecosystem::Pip, "six", "(remove)", "Python 2 compatibility shim no longer needed"),
    (Ecosystem::Pip, "futures", "(remove)", "concurrent.futures is in the standard library"),
    (Ecosystem::Go, "github.com/pkg/errors", "errors (stdlib)", "archived; fmt.Errorf with %w wraps errors"),
    (Ecosystem::Go, "github.com/golang/protobuf", "google.golang.org/protobuf", "superseded by the APIv2 module"),
    (Ecosystem::Go, "github.com/dgrijalva/jwt-go", "github.com/golang-jwt/jwt/v5", "unmaintained with an open CVE"),
    (Ecosystem::Go, "github.com/satori/go.uuid", "github.com/google/uuid", "unmaintained"),
];

fn lookup_name(ecosystem: Ecosystem, name: &str) -> String {
    match ecosystem {
        Ecosystem::Pip => normalize_name(name),
        _ => name.to_string(),
    }
}

impl ReplacementCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for (eco, name, replacement, reason) in BUILTIN {
            catalog.insert(*eco, name, replacement, reason);
        }
        catalog
    }

    /// Adds or overrides a suggestion.
    pub fn insert(&mut self, ecosystem: Ecosystem, name: &str, replacement: &str, reason: &str) {
        self.entries.insert(
            (ecosystem, lookup_name(ecosystem, name)),
            Suggestion {
                replacement: replacement.to_string(),
                reason: reason.to_string(),
            },
        );
    }

    pub fn with_suggestion(mut self, ecosystem: Ecosystem, name: &str, replacement: &str, reason: &str) -> Self {
        self.insert(ecosystem, name, replacement, reason);
        self
    }

    pub fn get(&self, ecosystem: Ecosystem, name: &str) -> Option<&Suggestion> {
        self.entries.get(&(ecosystem, lookup_name(ecosystem, name)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_and_custom() {
        let catalog = ReplacementCatalog::builtin().with_suggestion(
            Ecosystem::Npm,
            "internal-logger",
            "pino",
            "team standard",
        );
        assert_eq!(catalog.get(Ecosystem::Npm, "request").unwrap().replacement, "got");
        assert_eq!(catalog.get(Ecosystem::Npm, "internal-logger").unwrap().replacement, "pino");
        // pip names match regardless of spelling.
        assert_eq!(catalog.get(Ecosystem::Pip, "PyCrypto").unwrap().replacement, "pycryptodome");
        assert!(catalog.get(Ecosystem::Go, "request").is_none());
    }

    #[test]
    fn test_catalogs_are_independent() {
        let mut a = ReplacementCatalog::new();
        a.insert(Ecosystem::Pip, "x", "y", "z");
        let b = ReplacementCatalog::new();
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
    }
}
