/// Content tables for post generation and the recency history used to
/// steer random selection away from recent repeats.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, VecDeque};

/// Themes the channel writes about.
pub const POST_THEMES: &[&str] = &[
    "Memory as an editor: do recollections survive on the strength of their dramaturgy?",
    "Consciousness without an observer: can there be an \"I\" if nobody registers it?",
    "The neuroeconomics of belief: why is it profitable for the brain to believe the unprofitable?",
    "Algorithms of identity: who are we when described through behavioral patterns?",
    "The function of boredom in an age of constant stimulation",
    "Digital shame: why do we feel guilt for what the algorithms see?",
    "Informational homeopathy: can a microdose of meaning treat chaos?",
    "The illusion of choosing between illusions: the UX of thinking about reality",
    "The paradox of inner monetization: what remains of the self after the personal brand?",
    "Cognitive synesthesia: how the smell of news changes the taste of reality",
    "Digital enlightenment and permanent-update syndrome",
    "Neuroplasticity as a philosophical verdict: there is no stable self",
    "Psychological background noise: how the internet changed silence",
    "The sense of time after a like: when the moment stops being the present",
    "Archaeology of the future: what of us will remain in machine memory?",
    "The sacralization of chaos: how the cult of uncertainty became the norm",
    "Psychoanalysis in story format: a self-examination in fifteen seconds",
    "Self-identification as a terms-of-service agreement",
    "Is authenticity possible in an age of synthetic sincerity?",
    "Cognitive burnout as a cultural ritual of post-irony",
];

/// Rhetorical formats a post can take.
pub const POST_FORMATS: &[&str] = &[
    "a cognitive revelation in the style of a tweet",
    "a pseudo-scientific explanation of an inner conflict",
    "a quiet manifesto of existential unease",
    "a philosophical question compared to a household situation",
    "a cultural neuro-fact with an uninvited conclusion",
    "the inner monologue of a digital shaman",
    "a miniature scene with a dystopian aftertaste",
    "a poetic decomposition of an absurd idea",
    "a utopian forecast that reads like satire",
    "a brief survival manual for a mental simulation",
    "a dialogue between archetypes",
    "an illusion dismantled through an everyday example",
    "a dispatch from a future where everything went wrong",
    "an address from an algorithm to its user",
    "a sensory description of an abstract concept",
    "a thought experiment with a catastrophic result",
    "an ironic correspondence with the subconscious",
    "a meaningless instruction in which meaning surfaces",
    "human behavior compared to a bug in production",
    "a cynical aphorism in a pseudo-coaching tone",
];

/// How a post should end. No calls to comment: comments are disabled.
pub const POST_ENDINGS: &[&str] = &[
    "end with a sense of something left unsaid",
    "end on an inner paradox, without commentary",
    "end with an unexpected change of tone",
    "end as if it had all been a dream",
    "end with a phrase the reader will not be able to forget",
    "end with fake confidence in an absurd truth",
    "end with a quotation nobody will ever find",
    "end with pathos on the edge of awkwardness",
    "end as if this were a teaser for a sequel",
    "end by pointing at a banality that makes one want to cry",
    "end with the illusion of deep meaning",
    "end like the last line of a letter to one's past self",
    "end by cutting the thought off at peak tension",
    "end ultra-laconically, as if one word said everything",
    "end with the feeling that the reader missed something",
    "end as if the text were about something else entirely",
    "end with a hint at a concept that does not exist",
    "end as if the text was never meant to be published",
    "end in a whisper that is only audible inside the head",
    "end with a meta-comment that breaks the fourth wall",
];

/// Topical keywords for the keyword generation mode.
pub const KEYWORD_POOL: &[&str] = &[
    "attention economy",
    "digital memory",
    "slow thinking",
    "context collapse",
    "ambient anxiety",
    "synthetic nostalgia",
    "infinite scroll",
    "quiet quitting of the self",
    "algorithmic taste",
    "borrowed opinions",
    "productivity theater",
    "the archive of unsent messages",
    "parasocial silence",
    "decision fatigue",
    "the half-life of outrage",
    "curated spontaneity",
];

/// One completed generation: the selection that produced it, the text,
/// and when it happened.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub theme: String,
    pub format: String,
    pub ending: String,
    pub post_text: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded FIFO of recent generations with theme/format frequency
/// counters. Evicting the oldest record decrements its counters.
#[derive(Debug)]
pub struct GenerationHistory {
    max_len: usize,
    records: VecDeque<GenerationRecord>,
    theme_frequency: HashMap<String, u32>,
    format_frequency: HashMap<String, u32>,
}

impl GenerationHistory {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            records: VecDeque::with_capacity(max_len),
            theme_frequency: HashMap::new(),
            format_frequency: HashMap::new(),
        }
    }

    pub fn record(&mut self, record: GenerationRecord) {
        if self.records.len() == self.max_len {
            if let Some(old) = self.records.pop_front() {
                decrement(&mut self.theme_frequency, &old.theme);
                decrement(&mut self.format_frequency, &old.format);
            }
        }

        *self.theme_frequency.entry(record.theme.clone()).or_insert(0) += 1;
        *self
            .format_frequency
            .entry(record.format.clone())
            .or_insert(0) += 1;
        self.records.push_back(record);
    }

    /// The themes of the last `n` generations, most recent last.
    pub fn recent_themes(&self, n: usize) -> Vec<String> {
        self.records
            .iter()
            .rev()
            .take(n)
            .map(|r| r.theme.clone())
            .collect()
    }

    /// The formats of the last `n` generations, most recent last.
    pub fn recent_formats(&self, n: usize) -> Vec<String> {
        self.records
            .iter()
            .rev()
            .take(n)
            .map(|r| r.format.clone())
            .collect()
    }

    /// The endings of the last `n` generations, most recent last.
    pub fn recent_endings(&self, n: usize) -> Vec<String> {
        self.records
            .iter()
            .rev()
            .take(n)
            .map(|r| r.ending.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn theme_count(&self, theme: &str) -> u32 {
        self.theme_frequency.get(theme).copied().unwrap_or(0)
    }

    pub fn format_count(&self, format: &str) -> u32 {
        self.format_frequency.get(format).copied().unwrap_or(0)
    }
}

fn decrement(map: &mut HashMap<String, u32>, key: &str) {
    if let Some(count) = map.get_mut(key) {
        *count -= 1;
        if *count == 0 {
            map.remove(key);
        }
    }
}

/// Pick a random entry from `pool`, avoiding `recent` entries when any
/// alternative exists.
pub fn pick_avoiding<'a, R: Rng + ?Sized>(
    pool: &[&'a str],
    recent: &[String],
    rng: &mut R,
) -> &'a str {
    let fresh: Vec<&str> = pool
        .iter()
        .copied()
        .filter(|candidate| !recent.iter().any(|r| r == candidate))
        .collect();

    if fresh.is_empty() {
        pool.choose(rng).copied().unwrap_or("")
    } else {
        fresh.choose(rng).copied().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(theme: &str, format: &str) -> GenerationRecord {
        GenerationRecord {
            theme: theme.to_string(),
            format: format.to_string(),
            ending: "end".to_string(),
            post_text: "text".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn eviction_decrements_frequency_counters() {
        let mut history = GenerationHistory::new(2);
        history.record(record("a", "x"));
        history.record(record("a", "y"));
        assert_eq!(history.theme_count("a"), 2);

        // Third insert evicts the first "a"/"x" record
        history.record(record("b", "x"));
        assert_eq!(history.len(), 2);
        assert_eq!(history.theme_count("a"), 1);
        assert_eq!(history.theme_count("b"), 1);
        assert_eq!(history.format_count("x"), 1);
    }

    #[test]
    fn recent_themes_returns_latest_first() {
        let mut history = GenerationHistory::new(10);
        for theme in ["a", "b", "c", "d"] {
            history.record(record(theme, "f"));
        }
        assert_eq!(history.recent_themes(3), vec!["d", "c", "b"]);
    }

    #[test]
    fn pick_avoids_recent_when_alternatives_exist() {
        let pool = ["a", "b", "c", "d"];
        let recent = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            assert_eq!(pick_avoiding(&pool, &recent, &mut rng), "d");
        }
    }

    #[test]
    fn pick_falls_back_when_everything_is_recent() {
        let pool = ["a", "b"];
        let recent = vec!["a".to_string(), "b".to_string()];
        let mut rng = rand::thread_rng();
        let picked = pick_avoiding(&pool, &recent, &mut rng);
        assert!(pool.contains(&picked));
    }
}
