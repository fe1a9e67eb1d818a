//! Deterministic keyword scoring.
//!
//! Each keyword adds 3 points when it occurs in the title and 1 point when it
//! occurs anywhere in title + body, so a title hit counts twice. The raw score
//! is normalised against the best attainable score (`keywords * 4`), scaled by
//! 2.5 and capped at [`MAX_CONFIDENCE`].

use serde::Serialize;

/// No classifier output is ever stored as certain.
pub const MAX_CONFIDENCE: f64 = 0.98;

/// Minimum confidence for a category assignment.
pub const MIN_CATEGORY_CONFIDENCE: f64 = 0.25;

const TITLE_POINTS: u32 = 3;
const TEXT_POINTS: u32 = 1;
const SCALE: f64 = 2.5;

/// Keywords for one category, lower-cased on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordRule {
    pub category: String,
    pub keywords: Vec<String>,
}

/// Immutable category name -> keyword list mapping. Built once at startup and
/// shared by reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordTable {
    rules: Vec<KeywordRule>,
}

impl KeywordTable {
    pub fn new<I, S, K>(rules: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<K>)>,
        S: Into<String>,
        K: AsRef<str>,
    {
        let rules = rules
            .into_iter()
            .map(|(category, keywords)| KeywordRule {
                category: category.into(),
                keywords: keywords
                    .iter()
                    .map(|k| k.as_ref().trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
            })
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn keywords_for(&self, category: &str) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|r| r.category == category)
            .map(|r| r.keywords.as_slice())
    }
}

/// A category that cleared the keyword threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordMatch {
    pub category: String,
    pub score: u32,
    pub confidence: f64,
}

/// Raw integer score for one keyword list.
pub fn raw_score(title_lower: &str, text_lower: &str, keywords: &[String]) -> u32 {
    keywords.iter().fold(0, |acc, keyword| {
        let mut points = acc;
        if title_lower.contains(keyword.as_str()) {
            points += TITLE_POINTS;
        }
        if text_lower.contains(keyword.as_str()) {
            points += TEXT_POINTS;
        }
        points
    })
}

/// `min(score / (keyword_count * 4) * 2.5, 0.98)`; zero for an empty list.
pub fn confidence_for(score: u32, keyword_count: usize) -> f64 {
    if keyword_count == 0 {
        return 0.0;
    }
    let max_score = (keyword_count as u32 * (TITLE_POINTS + TEXT_POINTS)) as f64;
    (score as f64 / max_score * SCALE).min(MAX_CONFIDENCE)
}

/// Score a post against every rule in the table.
///
/// Results are ordered by confidence descending, then by table order, so equal
/// inputs always produce an identical list.
pub fn score_post(title: &str, body: &str, table: &KeywordTable) -> Vec<KeywordMatch> {
    let title_lower = title.to_lowercase();
    let text_lower = format!("{} {}", title, body).to_lowercase();

    let mut matches: Vec<(usize, KeywordMatch)> = table
        .rules
        .iter()
        .enumerate()
        .filter_map(|(idx, rule)| {
            let score = raw_score(&title_lower, &text_lower, &rule.keywords);
            if score == 0 {
                return None;
            }
            let confidence = confidence_for(score, rule.keywords.len());
            (confidence >= MIN_CATEGORY_CONFIDENCE).then(|| {
                (
                    idx,
                    KeywordMatch {
                        category: rule.category.clone(),
                        score,
                        confidence,
                    },
                )
            })
        })
        .collect();

    matches.sort_by(|(ia, a), (ib, b)| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| ia.cmp(ib))
    });

    matches.into_iter().map(|(_, m)| m).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn knowledge_table() -> KeywordTable {
        KeywordTable::new(vec![("Knowledge", vec!["sharepoint", "rag"])])
    }

    #[test]
    fn test_title_hits_count_twice_and_cap() {
        let matches = score_post("SharePoint RAG setup help", "", &knowledge_table());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].category, "Knowledge");
        assert_eq!(matches[0].score, 8);
        assert_eq!(matches[0].confidence, 0.98);
    }

    #[test]
    fn test_no_keyword_no_match() {
        let matches = score_post("random question", "random question", &knowledge_table());
        assert!(matches.is_empty());
    }

    #[test]
    fn test_body_only_hit_below_threshold_is_dropped() {
        // one body hit out of 14 keywords: 1 / 56 * 2.5 ~= 0.045
        let table = KeywordTable::new(vec![(
            "Knowledge",
            vec![
                "knowledge", "knowledge source", "knowledge base", "documents", "files",
                "upload", "sharepoint", "onedrive", "semantic", "search", "rag", "retrieval",
                "grounding", "citation",
            ],
        )]);
        let matches = score_post("Question", "we keep our files somewhere", &table);
        assert!(matches.is_empty());
    }

    #[test]
    fn test_body_hit_on_short_list_passes_threshold() {
        // 1 / (1 * 4) * 2.5 = 0.625
        let table = KeywordTable::new(vec![("Licensing", vec!["license"])]);
        let matches = score_post("Question", "which license do I need?", &table);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].score, 1);
        assert!((matches[0].confidence - 0.625).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_exactly_at_threshold_is_included() {
        // one title hit out of ten keywords: 4 / 40 * 2.5 = 0.25
        let keywords: Vec<String> = (0..10).map(|i| format!("kw{}", i)).collect();
        let table = KeywordTable::new(vec![("Ten", keywords)]);
        let matches = score_post("kw1 here", "", &table);
        assert_eq!(matches.len(), 1);
        assert!((matches[0].confidence - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_empty_keyword_list_never_matches() {
        let table = KeywordTable::new(vec![("General", Vec::<String>::new())]);
        assert!(score_post("General chatter", "anything", &table).is_empty());
        assert_eq!(confidence_for(10, 0), 0.0);
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let table = KeywordTable::new(vec![("Flows", vec!["Power Automate"])]);
        let matches = score_post("POWER AUTOMATE broke", "", &table);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].score, 4);
    }

    #[test]
    fn test_ordering_is_by_confidence_then_table_order() {
        let table = KeywordTable::new(vec![
            ("A", vec!["alpha", "unused"]),
            ("B", vec!["beta"]),
            ("C", vec!["gamma"]),
        ]);
        let matches = score_post("beta gamma alpha", "", &table);
        let names: Vec<&str> = matches.iter().map(|m| m.category.as_str()).collect();
        // all three cap at 0.98, so table order decides
        assert_eq!(names, vec!["A", "B", "C"]);

        let again = score_post("beta gamma alpha", "", &table);
        assert_eq!(matches, again);
    }
}
