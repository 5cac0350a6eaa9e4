use std::collections::BTreeSet;

/// Convert a heading or name into a URL-safe slug.
///
/// Lowercases, drops punctuation, and joins words with single hyphens.
///
/// # Examples
///
/// ```
/// use docslice::entry_id::slugify;
///
/// assert_eq!(slugify("Morning Star (Sankawa)"), "morning-star-sankawa");
/// assert_eq!(slugify("  ta.sma  "), "tasma");
/// assert_eq!(slugify("---"), "");
/// ```
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_dash = true;
        }
    }

    slug
}

/// Hands out unique identifiers, resolving collisions deterministically.
///
/// A taken id is first extended with a disambiguator supplied by the
/// caller (the originating file stem), then with an increasing numeric
/// suffix. Identical input sequences always yield identical ids.
#[derive(Debug, Default)]
pub struct IdAllocator {
    taken: BTreeSet<String>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the allocator with ids that are already in use.
    #[cfg(test)]
    pub fn with_taken<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            taken: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.taken.contains(id)
    }

    /// Reserve `base`, or the first free variant of it.
    pub fn allocate(&mut self, base: &str, disambiguator: &str) -> String {
        if self.taken.insert(base.to_string()) {
            return base.to_string();
        }

        let disambiguator = slugify(disambiguator);
        if !disambiguator.is_empty() {
            let candidate = format!("{base}-{disambiguator}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }

        let mut n = 2usize;
        loop {
            let candidate = format!("{base}-{n}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_strips_punctuation() {
        assert_eq!(slugify("Hammer"), "hammer");
        assert_eq!(slugify("Shooting Star!"), "shooting-star");
        assert_eq!(slugify("Dark-Cloud   Cover"), "dark-cloud-cover");
        assert_eq!(slugify("snake_case_name"), "snake-case-name");
    }

    #[test]
    fn slug_keeps_unicode_letters() {
        assert_eq!(slugify("Café Doji"), "café-doji");
    }

    #[test]
    fn allocate_unique_first() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.allocate("patterns/doji", "a"), "patterns/doji");
        assert!(ids.contains("patterns/doji"));
    }

    #[test]
    fn allocate_uses_disambiguator_then_counter() {
        let mut ids = IdAllocator::new();
        ids.allocate("patterns/doji", "one");
        assert_eq!(
            ids.allocate("patterns/doji", "Two File"),
            "patterns/doji-two-file"
        );
        assert_eq!(
            ids.allocate("patterns/doji", "two file"),
            "patterns/doji-2"
        );
        assert_eq!(ids.allocate("patterns/doji", ""), "patterns/doji-3");
    }

    #[test]
    fn allocation_is_deterministic() {
        let run = || {
            let mut ids = IdAllocator::new();
            ["a", "a", "a", "b", "a"]
                .iter()
                .map(|base| ids.allocate(base, "f"))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
        assert_eq!(run(), vec!["a", "a-f", "a-2", "b", "a-3"]);
    }

    #[test]
    fn seeded_allocator_skips_taken() {
        let mut ids = IdAllocator::with_taken(["x"]);
        assert_eq!(ids.allocate("x", ""), "x-2");
    }
}
