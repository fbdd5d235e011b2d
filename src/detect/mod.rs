//! Sentence-level finding detection.
//!
//! Text is cut into sentences on `.`, `!` or `?` followed by whitespace. Each
//! sentence is checked against a domain's [`RuleSet`] in a fixed order:
//! inclusion, then exclusion (negation and anatomical context), then the
//! domain's context requirement. Exclusion always short-circuits before
//! context is looked at.

pub mod rules;

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::header::HeaderMetadata;
use crate::measure::NOT_INFORMED;
pub use rules::RuleSet;

pub const HIGHLIGHT_OPEN: &str = "<mark>";
pub const HIGHLIGHT_CLOSE: &str = "</mark>";

static BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]\s+").unwrap());
static MEASUREMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:,\d+)? ?(?:cm|mm)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    #[value(name = "renal")]
    RenalCalculus,
    #[value(name = "pulmonary")]
    PulmonaryNodule,
}

impl Domain {
    pub fn rules(self) -> &'static RuleSet {
        match self {
            Domain::RenalCalculus => &rules::RENAL_CALCULUS,
            Domain::PulmonaryNodule => &rules::PULMONARY_NODULE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::RenalCalculus => "renal_calculus",
            Domain::PulmonaryNodule => "pulmonary_nodule",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one sentence against one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    RejectedNoInclusion,
    RejectedExcluded,
    RejectedMissingContext,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFinding {
    pub domain: Domain,
    /// First core-term match, as written in the report.
    pub matched_term: String,
    /// Sentence with every core-term occurrence wrapped in highlight markers.
    pub highlighted: String,
    /// Plain sentence text.
    pub sentence: String,
    /// First size mention, or [`NOT_INFORMED`].
    pub measurement: String,
    pub header: HeaderMetadata,
    pub source_document: String,
}

/// Split on terminal punctuation followed by whitespace. Whitespace runs inside
/// a sentence (PDF line breaks) collapse to a single space.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in BOUNDARY_RE.find_iter(text) {
        push_sentence(&mut sentences, &text[start..m.start() + 1]);
        start = m.end();
    }
    push_sentence(&mut sentences, &text[start..]);
    sentences
}

fn push_sentence(out: &mut Vec<String>, raw: &str) {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.is_empty() {
        out.push(collapsed);
    }
}

pub fn verdict(sentence: &str, rules: &RuleSet) -> Verdict {
    if !rules.inclusion.is_match(sentence) {
        return Verdict::RejectedNoInclusion;
    }
    let excluded = rules
        .negations
        .iter()
        .chain(&rules.anatomical_exclusions)
        .any(|re| re.is_match(sentence));
    if excluded {
        return Verdict::RejectedExcluded;
    }
    if !rules.context.is_empty() && !rules.context.iter().any(|re| re.is_match(sentence)) {
        return Verdict::RejectedMissingContext;
    }
    Verdict::Accepted
}

pub fn extract_measurement(sentence: &str) -> String {
    MEASUREMENT_RE
        .find(sentence)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| NOT_INFORMED.to_string())
}

pub fn highlight(sentence: &str, rules: &RuleSet) -> String {
    rules
        .inclusion
        .replace_all(sentence, |caps: &regex::Captures| {
            format!("{HIGHLIGHT_OPEN}{}{HIGHLIGHT_CLOSE}", &caps[0])
        })
        .into_owned()
}

pub fn strip_highlight(text: &str) -> String {
    text.replace(HIGHLIGHT_OPEN, "").replace(HIGHLIGHT_CLOSE, "")
}

/// Evaluate one sentence for one domain.
pub fn evaluate(
    sentence: &str,
    domain: Domain,
    header: &HeaderMetadata,
    source_document: &str,
) -> Option<CandidateFinding> {
    let rules = domain.rules();
    if verdict(sentence, rules) != Verdict::Accepted {
        return None;
    }
    let matched_term = rules.inclusion.find(sentence)?.as_str().to_string();
    Some(CandidateFinding {
        domain,
        matched_term,
        highlighted: highlight(sentence, rules),
        sentence: sentence.to_string(),
        measurement: extract_measurement(sentence),
        header: header.clone(),
        source_document: source_document.to_string(),
    })
}

/// All findings in a document's text, in sentence order. A repeated sentence
/// yields one finding per domain.
pub fn detect_findings(
    text: &str,
    domains: &[Domain],
    header: &HeaderMetadata,
    source_document: &str,
) -> Vec<CandidateFinding> {
    let mut seen: HashSet<(Domain, String)> = HashSet::new();
    let mut findings = Vec::new();
    for sentence in split_sentences(text) {
        for &domain in domains {
            if let Some(f) = evaluate(&sentence, domain, header, source_document) {
                if seen.insert((domain, f.sentence.clone())) {
                    findings.push(f);
                }
            }
        }
    }
    findings
}
