//! Filter compiler
//!
//! Folds the applicable content filters into one case-insensitive regular
//! expression so a view tests each status once.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};

use crate::data::{ContentCache, Filter, FilterContext, Status};
use crate::error::Result;

/// Compile the filters active at `now` into a single matcher.
///
/// With a `context`, only filters that apply there are used. Returns
/// `None` when no filter applies, meaning nothing is filtered.
pub fn compile(
    filters: &[Filter],
    now: DateTime<Utc>,
    context: Option<FilterContext>,
) -> Result<Option<Regex>> {
    let fragments: Vec<String> = filters
        .iter()
        .filter(|filter| filter.is_active(now))
        .filter(|filter| context.is_none_or(|context| filter.applies_to(context)))
        .filter(|filter| !filter.phrase.is_empty())
        .map(fragment)
        .collect();

    if fragments.is_empty() {
        return Ok(None);
    }

    let regex = RegexBuilder::new(&fragments.join("|"))
        .case_insensitive(true)
        .build()?;

    Ok(Some(regex))
}

/// Literal pattern for one phrase, with word boundaries where they can match.
fn fragment(filter: &Filter) -> String {
    let escaped = regex::escape(&filter.phrase);
    if !filter.whole_word {
        return escaped;
    }

    let starts_with_word = filter.phrase.chars().next().is_some_and(is_word_char);
    let ends_with_word = filter.phrase.chars().next_back().is_some_and(is_word_char);

    format!(
        "{}{}{}",
        if starts_with_word { r"\b" } else { "" },
        escaped,
        if ends_with_word { r"\b" } else { "" }
    )
}

lazy_static! {
    /// The class `\b` tests against, so phrase edges agree with it
    static ref WORD_CHAR: Regex = Regex::new(r"^\w$").expect("word class compiles");
}

fn is_word_char(c: char) -> bool {
    let mut buf = [0; 4];
    WORD_CHAR.is_match(c.encode_utf8(&mut buf))
}

/// Whether a status should be hidden under `matcher`.
pub fn is_filtered(matcher: Option<&Regex>, status: &Status, cache: &ContentCache) -> bool {
    matcher.is_some_and(|regex| regex.is_match(&status.filterable_text(cache)))
}

/// Drop the statuses `matcher` hides, keeping order.
pub fn apply(matcher: Option<&Regex>, statuses: Vec<Status>, cache: &ContentCache) -> Vec<Status> {
    if matcher.is_none() {
        return statuses;
    }

    statuses
        .into_iter()
        .filter(|status| !is_filtered(matcher, status, cache))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures;
    use chrono::Duration;

    #[test]
    fn no_applicable_filter_compiles_to_none() {
        let now = Utc::now();
        assert!(compile(&[], now, None).unwrap().is_none());

        let home_only = fixtures::filter("1", "cat", &[FilterContext::Home], false);
        assert!(
            compile(&[home_only], now, Some(FilterContext::Public))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn whole_word_respects_boundaries() {
        let cat = fixtures::filter("1", "cat", &[FilterContext::Public], true);
        let regex = compile(&[cat], Utc::now(), Some(FilterContext::Public))
            .unwrap()
            .unwrap();

        assert!(regex.is_match("a cat sat"));
        assert!(regex.is_match("CAT!"));
        assert!(!regex.is_match("category"));
        assert!(!regex.is_match("concatenate"));
    }

    #[test]
    fn partial_match_without_whole_word() {
        let cat = fixtures::filter("1", "cat", &[FilterContext::Public], false);
        let regex = compile(&[cat], Utc::now(), None).unwrap().unwrap();
        assert!(regex.is_match("category"));
    }

    #[test]
    fn boundary_only_on_word_edges() {
        let filter = fixtures::filter("1", "#rust", &[FilterContext::Home], true);
        let regex = compile(&[filter], Utc::now(), None).unwrap().unwrap();
        assert!(regex.is_match("learning #rust today"));
        assert!(regex.is_match("x#rust"));
        assert!(!regex.is_match("#rustacean"));
    }

    #[test]
    fn combining_mark_counts_as_word_edge() {
        let filter = fixtures::filter("1", "cafe\u{301}", &[FilterContext::Home], true);
        let regex = compile(&[filter], Utc::now(), None).unwrap().unwrap();
        assert!(regex.is_match("meet at the cafe\u{301} later"));
        assert!(!regex.is_match("two cafe\u{301}s"));

        assert!(is_word_char('\u{301}'));
        assert!(is_word_char('_'));
        assert!(!is_word_char('#'));
    }

    #[test]
    fn phrases_are_literal() {
        let filter = fixtures::filter("1", "a.b", &[FilterContext::Home], false);
        let regex = compile(&[filter], Utc::now(), None).unwrap().unwrap();
        assert!(regex.is_match("a.b"));
        assert!(!regex.is_match("axb"));
    }

    #[test]
    fn expired_filters_are_ignored() {
        let now = Utc::now();
        let mut expired = fixtures::filter("1", "cat", &[FilterContext::Home], false);
        expired.expires_at = Some(now - Duration::seconds(1));
        let mut active = fixtures::filter("2", "dog", &[FilterContext::Home], false);
        active.expires_at = Some(now + Duration::hours(1));

        let regex = compile(&[expired, active], now, None).unwrap().unwrap();
        assert!(!regex.is_match("cat"));
        assert!(regex.is_match("dog"));
    }

    #[test]
    fn spoiler_text_is_matched() {
        let cache = ContentCache::new(16);
        let filter = fixtures::filter("1", "spoiler", &[FilterContext::Public], false);
        let mut status = fixtures::status("1", "a1", 0, "<p>nothing to see</p>");
        status.spoiler_text = "Spoiler: ending".to_string();

        let public = compile(std::slice::from_ref(&filter), Utc::now(), Some(FilterContext::Public))
            .unwrap();
        assert!(is_filtered(public.as_ref(), &status, &cache));

        let home = compile(&[filter], Utc::now(), Some(FilterContext::Home)).unwrap();
        assert!(!is_filtered(home.as_ref(), &status, &cache));
    }
}
