use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Sentinel for a header field whose pattern did not match.
pub const NOT_AVAILABLE: &str = "N/D";

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:nome(?:\s+do\s+paciente)?|paciente)[ \t]*[:\-][ \t]*(.+?)[ \t]*(?:[ \t]{2,}|\bidade\b|\bsame\b|\bdata\b|\r?$)",
    )
    .unwrap()
});
static AGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bidade\s*[:\-]?\s*(\d{1,3}(?:\s*anos?)?)").unwrap());
static RECORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:same|prontu[aá]rio)\b\s*(?:n[º°o]\.?)?\s*[:\-#]?\s*(\d+)").unwrap()
});
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:data(?:\s+d[oa]\s+(?:exame|realiza[cç][aã]o))?|realizado\s+em)\s*[:\-]?\s*(\d{1,2}/\d{1,2}/\d{4})",
    )
    .unwrap()
});

/// Structured header fields of one report. Absent fields hold [`NOT_AVAILABLE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMetadata {
    pub patient_name: String,
    pub age: String,
    pub record_id: String,
    pub exam_date: String,
}

impl Default for HeaderMetadata {
    fn default() -> Self {
        HeaderMetadata {
            patient_name: NOT_AVAILABLE.to_string(),
            age: NOT_AVAILABLE.to_string(),
            record_id: NOT_AVAILABLE.to_string(),
            exam_date: NOT_AVAILABLE.to_string(),
        }
    }
}

/// Run each field pattern independently over the full text. Never fails.
pub fn parse_header(text: &str) -> HeaderMetadata {
    HeaderMetadata {
        patient_name: first_capture(&NAME_RE, text)
            .map(|n| n.trim_end_matches([',', ';', '.']).to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        age: first_capture(&AGE_RE, text).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        record_id: first_capture(&RECORD_RE, text).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        exam_date: first_capture(&DATE_RE, text).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixture_header() {
        let text = std::fs::read_to_string("tests/fixtures/laudo_renal.txt").unwrap();
        let h = parse_header(&text);
        assert_eq!(h.patient_name, "MARIA APARECIDA DOS SANTOS");
        assert_eq!(h.age, "54 anos");
        assert_eq!(h.record_id, "1234567");
        assert_eq!(h.exam_date, "12/03/2024");
    }

    #[test]
    fn fields_on_one_line() {
        let h = parse_header("Paciente: João da Silva Idade: 61 anos SAME: 998877\nData do exame: 01/02/2023");
        assert_eq!(h.patient_name, "João da Silva");
        assert_eq!(h.age, "61 anos");
        assert_eq!(h.record_id, "998877");
        assert_eq!(h.exam_date, "01/02/2023");
    }

    #[test]
    fn case_and_whitespace_tolerant() {
        let h = parse_header("  PACIENTE :   ana lima  \n  idade:40\n same nº 55\n DATA: 5/6/2022");
        assert_eq!(h.patient_name, "ana lima");
        assert_eq!(h.age, "40");
        assert_eq!(h.record_id, "55");
        assert_eq!(h.exam_date, "5/6/2022");
    }

    #[test]
    fn birth_date_is_not_exam_date() {
        let h = parse_header("Data de nascimento: 01/01/1960\nRealizado em 20/10/2024");
        assert_eq!(h.exam_date, "20/10/2024");
    }

    #[test]
    fn missing_fields_are_sentinel() {
        let h = parse_header("Exame sem cabeçalho.");
        assert_eq!(h, HeaderMetadata::default());
        assert_eq!(h.patient_name, NOT_AVAILABLE);
    }
}
