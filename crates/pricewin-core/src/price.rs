//! Currency-marker windowing.
//!
//! Every maximal run of `$` in the text is one match. Each match gets a
//! window of up to 300 characters before and 10 after; the price is the
//! window from its first marker onward and the title, when present, is the
//! text after a `Title` label up to 100 characters before that marker.
//!
//! All positions are character indices, never byte offsets.

use std::iter::FusedIterator;

use crate::models::{OutputPair, Window};

pub const CURRENCY_MARKER: char = '$';
pub const CONTEXT_BEFORE: usize = 300;
pub const CONTEXT_AFTER: usize = 10;
pub const TITLE_LABEL: &str = "Title";

/// Characters skipped after the label start (`"Title:"`).
const TITLE_SKIP: usize = 6;
/// Minimum distance kept between the title end and the first marker.
const TITLE_GAP: usize = 100;

/// Lazily derive one [`OutputPair`] per marker run in `text`.
pub fn extract_pairs(text: &str) -> PricePairs {
    PricePairs {
        chars: text.chars().collect(),
        pos: 0,
    }
}

/// The window of every marker run in `text`, in order.
pub fn windows(text: &str) -> Vec<Window> {
    let chars: Vec<char> = text.chars().collect();
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some((start, end)) = next_run(&chars, pos) {
        found.push(window_around(start, end, chars.len()));
        pos = end;
    }
    found
}

/// Window for the run `[start, end)` in a text of `len` characters.
pub fn window_around(start: usize, end: usize, len: usize) -> Window {
    Window {
        start: start.saturating_sub(CONTEXT_BEFORE),
        end: end.saturating_add(CONTEXT_AFTER).min(len),
    }
}

/// Derive the pair for one window.
pub fn pair_for_window(window: &[char]) -> OutputPair {
    // Unreachable for windows built by `window_around`, which always
    // contain their run. Kept so any slice has a defined result.
    let Some(marker_idx) = window.iter().position(|&c| c == CURRENCY_MARKER) else {
        return OutputPair::default();
    };

    let price = window[marker_idx..].iter().collect();

    let title = marker_idx
        .checked_sub(TITLE_GAP)
        .filter(|&bound| bound > 0)
        .and_then(|bound| {
            let label_idx = find_label(window).filter(|&idx| idx < bound)?;
            let from = (label_idx + TITLE_SKIP).min(bound);
            Some(window[from..bound].iter().collect())
        });

    OutputPair {
        title,
        price: Some(price),
    }
}

/// Iterator returned by [`extract_pairs`].
pub struct PricePairs {
    chars: Vec<char>,
    pos: usize,
}

impl Iterator for PricePairs {
    type Item = OutputPair;

    fn next(&mut self) -> Option<Self::Item> {
        let (start, end) = next_run(&self.chars, self.pos)?;
        self.pos = end;
        let window = window_around(start, end, self.chars.len());
        Some(pair_for_window(&self.chars[window.start..window.end]))
    }
}

impl FusedIterator for PricePairs {}

/// Next maximal marker run at or after `from`.
fn next_run(chars: &[char], from: usize) -> Option<(usize, usize)> {
    let start = from + chars.get(from..)?.iter().position(|&c| c == CURRENCY_MARKER)?;
    let run = chars[start..]
        .iter()
        .take_while(|&&c| c == CURRENCY_MARKER)
        .count();
    Some((start, start + run))
}

fn find_label(window: &[char]) -> Option<usize> {
    let label: Vec<char> = TITLE_LABEL.chars().collect();
    window
        .windows(label.len())
        .position(|candidate| candidate == label.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(text: &str) -> Vec<OutputPair> {
        extract_pairs(text).collect()
    }

    fn char_index(text: &str, needle: &str) -> usize {
        text[..text.find(needle).unwrap()].chars().count()
    }

    #[test]
    fn empty_text_yields_no_pairs() {
        assert!(pairs("").is_empty());
        assert!(windows("").is_empty());
    }

    #[test]
    fn text_without_marker_yields_no_pairs() {
        assert!(pairs("Title: nothing priced here").is_empty());
    }

    #[test]
    fn marker_run_counts_once() {
        let found = pairs("Buy now $$$ 50% off");
        assert_eq!(
            found,
            vec![OutputPair {
                title: None,
                price: Some("$$$ 50% off".into()),
            }]
        );
    }

    #[test]
    fn window_matches_definition() {
        let text = format!("{}$42.00 and then some more text", "a".repeat(500));
        let start = 500;
        let found = windows(&text);
        assert_eq!(found, vec![Window { start: start - 300, end: start + 1 + 10 }]);

        let window = found[0].slice(&text);
        assert_eq!(window, format!("{}$42.00 and ", "a".repeat(300)));
        assert_eq!(pairs(&text)[0].price.as_deref(), Some("$42.00 and "));
    }

    #[test]
    fn window_is_clamped_at_both_ends() {
        let found = windows("$5");
        assert_eq!(found, vec![Window { start: 0, end: 2 }]);
        assert_eq!(pairs("$5")[0].price.as_deref(), Some("$5"));
    }

    #[test]
    fn price_starts_at_first_marker_of_window() {
        // The second run's window reaches back over the first run.
        let text = "$1 then $2 later";
        let found = pairs(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].price.as_deref(), Some("$1 then $2 "));
        assert_eq!(found[1].price.as_deref(), Some("$1 then $2 later"));
    }

    #[test]
    fn distant_markers_get_independent_windows() {
        let text = format!("first $10 {} second $20 end", "y".repeat(700));
        let found = windows(&text);
        assert_eq!(found.len(), 2);
        assert!(found[0].end <= found[1].start);

        let found = pairs(&text);
        assert_eq!(found[0].price.as_deref(), Some("$10 yyyyyyy"));
        assert_eq!(found[1].price.as_deref(), Some("$20 end"));
    }

    #[test]
    fn title_between_label_and_gap() {
        let text = format!("Title: Wireless Mouse{}$19.99 great deal", " ".repeat(120));
        let marker = char_index(&text, "$");
        let found = pairs(&text);

        assert_eq!(found.len(), 1);
        let expected: String = text.chars().skip(6).take(marker - 100 - 6).collect();
        assert_eq!(found[0].title.as_deref(), Some(expected.as_str()));
        assert!(expected.starts_with(" Wireless Mouse"));
        assert_eq!(found[0].price.as_deref(), Some("$19.99 grea"));
    }

    #[test]
    fn wireless_mouse_scenario() {
        let text = format!("... Title: Wireless Mouse {} $19.99 great deal", "x".repeat(80));
        let marker = char_index(&text, "$");
        assert!(marker > 100 && marker - 4 > 100);

        let found = pairs(&text);
        assert_eq!(found.len(), 1);
        assert!(found[0].price.as_deref().unwrap().starts_with("$19.99"));
        // Label skip lands past `marker - 100`, so the title is present but empty.
        assert_eq!(found[0].title.as_deref(), Some(""));
    }

    #[test]
    fn no_title_when_marker_too_close_to_window_start() {
        let text = format!("Title: Short {}$3", "z".repeat(80));
        assert!(char_index(&text, "$") <= 100);
        assert_eq!(pairs(&text)[0].title, None);
    }

    #[test]
    fn no_title_when_label_after_gap_bound() {
        let text = format!("{}Title: late $7", "q".repeat(150));
        let found = pairs(&text);
        assert_eq!(found[0].title, None);
        assert_eq!(found[0].price.as_deref(), Some("$7"));
    }

    #[test]
    fn title_uses_window_local_indices() {
        // Label sits before the window start, so it is not seen.
        let text = format!("Title: gone {}$8", "w".repeat(400));
        assert_eq!(pairs(&text)[0].title, None);

        // Label inside the window, far enough from the marker.
        let text = format!("{}Title: Desk Lamp{}$8", "w".repeat(400), "-".repeat(150));
        let title = pairs(&text)[0].title.clone().unwrap();
        assert!(title.starts_with(" Desk Lamp"));
        assert_eq!(title.chars().count(), 300 - 100 - (300 - 150 - 16) - 6);
    }

    #[test]
    fn multibyte_text_is_sliced_by_chars() {
        let text = format!("Title: Café crème {}€ or $4,50 — ok", "é".repeat(120));
        let found = pairs(&text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].price.as_deref(), Some("$4,50 — ok"));
        assert!(found[0].title.as_deref().unwrap().starts_with(" Café crème"));
    }

    #[test]
    fn window_without_marker_yields_empty_pair() {
        let window: Vec<char> = "no marker".chars().collect();
        assert_eq!(pair_for_window(&window), OutputPair::default());
        assert_eq!(pair_for_window(&[]), OutputPair::default());
    }

    #[test]
    fn pairs_are_lazy_and_fused() {
        let mut iter = extract_pairs("$1 $2 $3");
        assert!(iter.next().is_some());
        assert_eq!(iter.by_ref().count(), 2);
        assert_eq!(iter.next(), None);
    }
}
