//! Declarative rule sets, one per finding domain.
//!
//! Patterns are written for Portuguese radiology reports and tolerate missing
//! or OCR-mangled accents on the core terms.

use std::sync::LazyLock;

use regex::Regex;

pub struct RuleSet {
    /// Core term; a sentence must match it to be considered at all.
    pub inclusion: Regex,
    /// Negation cues. Any match discards the sentence.
    pub negations: Vec<Regex>,
    /// Organ contexts that make the core term a false positive.
    pub anatomical_exclusions: Vec<Regex>,
    /// At least one must match. Empty means no context requirement.
    pub context: Vec<Regex>,
    /// Default size above which a finding is significant.
    pub significance_threshold_mm: f64,
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

fn negations() -> Vec<Regex> {
    vec![
        re(r"(?i)\bsem\b"),
        re(r"(?i)\bn[aã]o\s+(?:h[aá]|apresenta|possui)\b"),
        re(r"(?i)\bnenhum[a]?\b"),
        re(r"(?i)\baus[eê]ncia\b"),
    ]
}

pub static RENAL_CALCULUS: LazyLock<RuleSet> = LazyLock::new(|| RuleSet {
    inclusion: re(r"(?i)\bc[aáàâã]lculos?\b"),
    negations: negations(),
    anatomical_exclusions: vec![
        re(r"(?i)\bves[ií]cula\s+biliar\b"),
        re(r"(?i)\bbiliar(?:es)?\b"),
        re(r"(?i)\bcol[eé]doco\b"),
        re(r"(?i)\bcolelit[ií]ase\b"),
    ],
    context: vec![re(
        r"(?i)\b(?:rena(?:l|is)|calicina(?:l|is)|pielocalicina(?:l|is)|ureter(?:al|ais|es)?|ureteropi[eé]lic[oa]|pi[eé]lic[oa]s?|nefrolit[ií]ase)\b",
    )],
    significance_threshold_mm: 6.0,
});

pub static PULMONARY_NODULE: LazyLock<RuleSet> = LazyLock::new(|| RuleSet {
    inclusion: re(r"(?i)\b(?:n[oóô]dulos?|massas?)\b"),
    negations: negations(),
    anatomical_exclusions: vec![
        re(r"(?i)\b(?:hep[aá]tic[oa]s?|f[ií]gado)\b"),
        re(r"(?i)\b(?:rena(?:l|is)|rim|rins|adrena(?:l|is)|suprarrena(?:l|is))\b"),
        re(r"(?i)\b(?:tire[oó]ide|tireoidian[oa]s?)\b"),
        re(r"(?i)\b(?:mamas?|mam[aá]ri[oa]s?)\b"),
        re(r"(?i)\b(?:p[aâ]ncreas|pancre[aá]tic[oa]s?|ba[cç]o|espl[eê]nic[oa]s?)\b"),
        re(r"(?i)\b(?:linfonod\w*|subcut[aâ]ne[oa]s?|cut[aâ]ne[oa]s?)\b"),
    ],
    context: vec![
        re(r"(?i)\bcontornos?\b"),
        re(r"(?i)\b(?:irregular(?:es)?|espiculad[oa]s?|lobulad[oa]s?)\b"),
    ],
    significance_threshold_mm: 6.0,
});
