//! Title → slug and keyword string → tag list mappers.

use tracing::warn;

use crate::catalog::Tag;

pub const DEFAULT_SLUG_LENGTH: usize = 100;
pub const MAX_TAG_LENGTH: usize = 100;

pub fn slugify(title: &str) -> String {
    slugify_with_length(title, DEFAULT_SLUG_LENGTH)
}

/// Builds an ASCII, lowercase, hyphen-separated slug.
///
/// Slugs longer than `length` keep words from both ends of the title and join
/// the two halves with `--`. The result never exceeds `length + length / 5`.
pub fn slugify_with_length(title: &str, length: usize) -> String {
    if title.is_empty() {
        return String::new();
    }

    let ascii = deunicode::deunicode(title);
    let cleaned = ascii
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect::<String>()
        .trim()
        .to_ascii_lowercase();
    let mut slug = collapse_separators(&cleaned);

    let beginning_chars = length / 5;
    if slug.len() > length {
        slug = truncate_words(&slug, length, beginning_chars);
    }

    let cap = length + beginning_chars;
    if slug.len() > cap {
        // Slug is pure ASCII here, so byte offsets are char offsets.
        slug.truncate(cap);
    }
    slug.trim_end_matches('-').to_string()
}

fn collapse_separators(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_separator = false;
    for c in input.chars() {
        if c == '-' || c.is_whitespace() {
            pending_separator = true;
            continue;
        }
        if pending_separator && !out.is_empty() {
            out.push('-');
        }
        pending_separator = false;
        out.push(c);
    }
    out
}

fn joined_len(words: &[&str]) -> usize {
    if words.is_empty() {
        0
    } else {
        words.iter().map(|w| w.len()).sum::<usize>() + words.len() - 1
    }
}

fn truncate_words(slug: &str, length: usize, beginning_chars: usize) -> String {
    let mut words = slug.split('-').collect::<std::collections::VecDeque<_>>();
    let mut front: Vec<&str> = Vec::new();
    let mut back: Vec<&str> = Vec::new();

    while !words.is_empty() {
        let marker = usize::from(!front.is_empty() && !back.is_empty());
        let combined = joined_len(&front) + joined_len(&back) + marker;
        if combined >= length {
            break;
        }
        if joined_len(&front) <= joined_len(&back) + beginning_chars {
            if let Some(word) = words.pop_front() {
                front.push(word);
            }
        } else if let Some(word) = words.pop_back() {
            back.insert(0, word);
        }
    }

    if back.is_empty() {
        front.join("-")
    } else {
        format!("{}--{}", front.join("-"), back.join("-"))
    }
}

/// Lowercases the first character of capitalised words ("Vilnius" → "vilnius")
/// while leaving acronyms such as "NASA" alone.
pub fn fixcase(value: &str) -> String {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second))
            if first.is_alphabetic()
                && second.is_alphabetic()
                && first.is_uppercase()
                && second.is_lowercase() =>
        {
            let mut out = first.to_lowercase().collect::<String>();
            out.push_str(&value[first.len_utf8()..]);
            out
        }
        _ => value.to_string(),
    }
}

/// Splits on runs of non-word characters and rejoins the words with single spaces.
pub fn tagify(tag: &str) -> String {
    tag.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized tags parsed from a `;`/`,` separated keyword string.
///
/// Iterating twice yields the same tags; nothing is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageTags<'a> {
    raw: &'a str,
}

impl<'a> PackageTags<'a> {
    pub fn iter(&self) -> impl Iterator<Item = Tag> + 'a {
        let raw = self.raw;
        raw.split([';', ','])
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .filter_map(|piece| {
                let name = tagify(&fixcase(piece)).to_lowercase();
                if name.is_empty() {
                    None
                } else if name.chars().count() > MAX_TAG_LENGTH {
                    warn!(tag = piece, "skip very long tag");
                    None
                } else {
                    Some(Tag { name })
                }
            })
    }

    pub fn to_vec(&self) -> Vec<Tag> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for PackageTags<'a> {
    type Item = Tag;
    type IntoIter = Box<dyn Iterator<Item = Tag> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

pub fn get_package_tags(raw: Option<&str>) -> PackageTags<'_> {
    PackageTags {
        raw: raw.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tags: PackageTags<'_>) -> Vec<String> {
        tags.iter().map(|t| t.name).collect()
    }

    #[test]
    fn empty_title_gives_empty_slug() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("   "), "");
    }

    #[test]
    fn transliterates_and_collapses_separators() {
        assert_eq!(
            slugify("Šiaulių miesto savivaldybės administracija"),
            "siauliu-miesto-savivaldybes-administracija"
        );
        assert_eq!(slugify("Open  Data -- 2014 (v2)!"), "open-data-2014-v2");
        assert_eq!(slugify("- Vilnius -"), "vilnius");
    }

    #[test]
    fn short_slugs_are_idempotent_and_unmarked() {
        for title in [
            "Lietuvos Respublikos gyventojų registras",
            "Ąžuolų sąrašas, 2013 m.",
            "KODAS_123 / test",
        ] {
            let slug = slugify(title);
            assert_eq!(slugify(&slug), slug);
            assert!(!slug.contains("--"));
            assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
            assert!(!slug.starts_with('-') && !slug.ends_with('-'));
        }
    }

    #[test]
    fn long_titles_keep_both_ends_with_marker() {
        let title = (1..=40).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let slug = slugify(&title);
        assert!(slug.starts_with("word1-word2-"));
        assert!(slug.ends_with("-word39-word40"));
        assert!(slug.contains("--"));
        assert!(slug.len() <= 120);
        assert_eq!(slugify(&title), slug);
    }

    #[test]
    fn truncation_shape_matches_greedy_fill() {
        // length 20, head allowance 4: alpha, zeta, beta, epsilon, then stop at 23.
        assert_eq!(
            slugify_with_length("Alpha beta gamma delta epsilon zeta", 20),
            "alpha-beta--epsilon-zeta"
        );
        // The hard cap may cut into the back half.
        assert_eq!(slugify_with_length("aaaa bbbb cccc dddd", 10), "aaaa-bbbb--d");
    }

    #[test]
    fn single_huge_word_is_hard_capped() {
        let title = "x".repeat(300);
        assert_eq!(slugify(&title).len(), 120);
    }

    #[test]
    fn fixcase_only_touches_capitalised_words() {
        assert_eq!(fixcase("Vilnius"), "vilnius");
        assert_eq!(fixcase("NASA"), "NASA");
        assert_eq!(fixcase("Šiauliai"), "šiauliai");
        assert_eq!(fixcase("a"), "a");
        assert_eq!(fixcase("1st"), "1st");
    }

    #[test]
    fn tags_are_split_case_fixed_and_lowercased() {
        assert_eq!(
            names(get_package_tags(Some("Vilnius; KODAS, vilnius"))),
            vec!["vilnius", "kodas", "vilnius"]
        );
        assert_eq!(
            names(get_package_tags(Some("žemės ūkis;  oro-kokybė , ;"))),
            vec!["žemės ūkis", "oro kokybė"]
        );
    }

    #[test]
    fn empty_and_missing_keywords_yield_nothing() {
        assert!(names(get_package_tags(Some(""))).is_empty());
        assert!(names(get_package_tags(None)).is_empty());
        assert!(names(get_package_tags(Some("!!!, ;"))).is_empty());
    }

    #[test]
    fn overlong_tags_are_dropped_not_truncated() {
        let long = "a".repeat(101);
        let raw = format!("trumpas, {long}");
        assert_eq!(names(get_package_tags(Some(&raw))), vec!["trumpas"]);
    }

    #[test]
    fn tag_sequence_is_restartable() {
        let tags = get_package_tags(Some("a, b"));
        assert_eq!(tags.to_vec(), tags.to_vec());
        assert_eq!(tags.into_iter().count(), 2);
    }
}
