/// Headline filtering for generation prompts.
///
/// A keyword heuristic, not a ranking model: hard-exclude conflict
/// coverage and ad boilerplate, prefer science/culture/economy, keep any
/// single source from dominating the selection.

use crate::news::HeadlineRecord;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

/// Conflict-related terms excluded outright.
const EXCLUDED_KEYWORDS: &[&str] = &[
    "warfare",
    "missile",
    "airstrike",
    "air strike",
    "offensive",
    "troops",
    "frontline",
    "front line",
    "artillery",
    "shelling",
    "invasion",
    "ceasefire",
    "battlefield",
    "battalion",
    "warplane",
    "warship",
    "warhead",
    "military",
    "combat",
    "munitions",
    "mobilization",
    "conscription",
    "armed forces",
    "air defense",
    "casualties",
    "nato",
    "pentagon",
    "sanctions",
];

/// Preferred peaceful topics.
const PREFERRED_KEYWORDS: &[&str] = &[
    "research",
    "scientists",
    "discovery",
    "breakthrough",
    "startup",
    "technology",
    "innovation",
    "space",
    "telescope",
    "laboratory",
    "economy",
    "market",
    "investment",
    "industry",
    "culture",
    "museum",
    "theater",
    "festival",
    "exhibition",
    "literature",
    "film",
    "university",
    "education",
    "health",
    "medicine",
    "vaccine",
    "climate",
    "wildlife",
    "conservation",
    "sport",
    "championship",
    "olympic",
];

/// Ad and sponsorship markers that flag non-headlines.
const BOILERPLATE_MARKERS: &[&str] = &[
    "sponsored",
    "advertisement",
    "partner material",
    "promo",
    "press release",
];

const MIN_TITLE_CHARS: usize = 20;
const MAX_PER_SOURCE: usize = 2;

pub struct HeadlineFilter {
    excluded: Vec<String>,
    preferred: Vec<String>,
    boilerplate: Vec<String>,
}

impl Default for HeadlineFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlineFilter {
    pub fn new() -> Self {
        Self::with_keywords(
            EXCLUDED_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            PREFERRED_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn with_keywords(excluded: Vec<String>, preferred: Vec<String>) -> Self {
        Self {
            excluded: excluded.into_iter().map(|s| s.to_lowercase()).collect(),
            preferred: preferred.into_iter().map(|s| s.to_lowercase()).collect(),
            boilerplate: BOILERPLATE_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Hard exclusion: minimum length, no boilerplate, no excluded keyword.
    /// Applied before any ranking; idempotent.
    pub fn passes_hard_exclusion(&self, title: &str) -> bool {
        let title = title.trim();
        if title.chars().count() < MIN_TITLE_CHARS {
            return false;
        }
        let lower = title.to_lowercase();
        if self.boilerplate.iter().any(|m| lower.contains(m)) {
            return false;
        }
        !self.excluded.iter().any(|k| lower.contains(k))
    }

    fn is_preferred(&self, title: &str) -> bool {
        let lower = title.to_lowercase();
        self.preferred.iter().any(|k| lower.contains(k))
    }

    /// The survivors of the hard-exclusion step, input order preserved.
    pub fn hard_filter(&self, items: &[HeadlineRecord]) -> Vec<HeadlineRecord> {
        items
            .iter()
            .filter(|item| self.passes_hard_exclusion(&item.title))
            .cloned()
            .collect()
    }

    /// Select up to `limit` headlines for a prompt: preferred topics first,
    /// at most two items per source, cap relaxed when it would leave the
    /// selection short.
    pub fn select(&self, items: &[HeadlineRecord], limit: usize) -> Vec<HeadlineRecord> {
        self.select_with(items, limit, &mut rand::thread_rng())
    }

    fn select_with<R: Rng + ?Sized>(
        &self,
        items: &[HeadlineRecord],
        limit: usize,
        rng: &mut R,
    ) -> Vec<HeadlineRecord> {
        let survivors = self.hard_filter(items);
        let excluded_count = items.len() - survivors.len();
        if excluded_count > 0 {
            log::info!("Filtered out {} headlines", excluded_count);
        }

        let (mut preferred, mut neutral): (Vec<HeadlineRecord>, Vec<HeadlineRecord>) = survivors
            .iter()
            .cloned()
            .partition(|item| self.is_preferred(&item.title));

        log::info!(
            "{} preferred and {} neutral headlines after filtering",
            preferred.len(),
            neutral.len()
        );

        if survivors.len() <= limit {
            preferred.extend(neutral);
            return preferred;
        }

        preferred.shuffle(rng);
        neutral.shuffle(rng);

        let mut selected: Vec<HeadlineRecord> = Vec::with_capacity(limit);
        let mut per_source: HashMap<String, usize> = HashMap::new();

        for item in preferred.iter().chain(neutral.iter()) {
            if selected.len() >= limit {
                break;
            }
            let count = per_source.entry(item.source.clone()).or_insert(0);
            if *count < MAX_PER_SOURCE {
                *count += 1;
                selected.push(item.clone());
            }
        }

        // Source cap left the selection short: relax it and fill from the rest
        if selected.len() < limit {
            let mut remaining: Vec<HeadlineRecord> = survivors
                .iter()
                .filter(|item| !selected.iter().any(|s| s.link == item.link && s.title == item.title))
                .cloned()
                .collect();
            remaining.shuffle(rng);
            let needed = limit - selected.len();
            selected.extend(remaining.into_iter().take(needed));
        }

        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn headline(title: &str, source: &str) -> HeadlineRecord {
        HeadlineRecord {
            title: title.to_string(),
            summary: String::new(),
            link: format!("http://example.com/{}", title.len()),
            published: Utc::now(),
            source: source.to_string(),
        }
    }

    #[test]
    fn excluded_keywords_never_survive() {
        let filter = HeadlineFilter::new();
        let items = vec![
            headline("Missile production expands near the border region", "a"),
            headline("Scientists report a breakthrough in battery research", "a"),
            headline("Artillery exercises announced for the coming weekend", "b"),
            headline("New museum exhibition opens downtown this spring", "b"),
        ];

        let selected = filter.select(&items, 4);
        assert_eq!(selected.len(), 2);
        for item in &selected {
            assert!(filter.passes_hard_exclusion(&item.title));
        }
    }

    #[test]
    fn hard_exclusion_is_idempotent() {
        let filter = HeadlineFilter::new();
        let items = vec![
            headline("Short title", "a"),
            headline("Sponsored: the gadget your desk deserves today", "a"),
            headline("University opens a research laboratory for students", "b"),
            headline("Quiet afternoon reported in the municipal archives", "b"),
        ];

        let once = filter.hard_filter(&items);
        let twice = filter.hard_filter(&once);
        assert_eq!(once.len(), 2);
        assert_eq!(
            once.iter().map(|i| i.title.clone()).collect::<Vec<_>>(),
            twice.iter().map(|i| i.title.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn short_and_boilerplate_titles_are_dropped() {
        let filter = HeadlineFilter::new();
        assert!(!filter.passes_hard_exclusion("Too short"));
        assert!(!filter.passes_hard_exclusion("Advertisement: a very long promotional headline"));
        assert!(filter.passes_hard_exclusion("A perfectly ordinary story about city gardens"));
    }

    #[test]
    fn small_survivor_set_is_returned_whole_preferred_first() {
        let filter = HeadlineFilter::new();
        let items = vec![
            headline("City council debates a new tram line downtown", "a"),
            headline("Scientists map coral reefs with new research drones", "b"),
        ];

        let selected = filter.select(&items, 5);
        assert_eq!(selected.len(), 2);
        assert!(filter.is_preferred(&selected[0].title));
    }

    #[test]
    fn per_source_cap_limits_single_source_domination() {
        let filter = HeadlineFilter::new();
        let mut items = Vec::new();
        for i in 0..4 {
            items.push(headline(
                &format!("Research team publishes study number {} today", i),
                "loud",
            ));
        }
        for i in 0..4 {
            items.push(headline(
                &format!("University expands its education program {} abroad", i),
                "quiet",
            ));
        }

        let selected = filter.select(&items, 4);
        assert_eq!(selected.len(), 4);
        let from_loud = selected.iter().filter(|i| i.source == "loud").count();
        assert!(from_loud <= 2);
    }

    #[test]
    fn source_cap_relaxes_when_it_would_leave_selection_short() {
        let filter = HeadlineFilter::new();
        let mut items = Vec::new();
        for i in 0..5 {
            items.push(headline(
                &format!("Museum announces a new exhibition wing part {}", i),
                "only",
            ));
        }

        let selected = filter.select(&items, 4);
        assert_eq!(selected.len(), 4);
    }
}
