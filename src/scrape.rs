//! The question payload produced by the browser results-page scraper, and a
//! server-side version of the same row heuristics for rendered row text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

static QUESTION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*[-–]\s*(\d{5,})").expect("question id pattern"));
static PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)%").expect("percent pattern"));
static TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*sec").expect("time pattern"));
static SYSTEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(Pregnancy|Female|Male|Cardiovascular|Respiratory|Gastrointestinal|Renal|Endocrine|Hematology|Musculoskeletal|Nervous|Skin|Immune)[^,\t]*",
    )
    .expect("system pattern")
});
static CATEGORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(Disorders of|Diseases of|Infections|Tumors|Trauma|Congenital|Normal)[^,\t]*")
        .expect("category pattern")
});
static TOPIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Z][a-z]+(?:\s+[a-z]+)*)\s+\d+%").expect("topic pattern")
});

const SUBJECT_VOCABULARY: [&str; 8] = [
    "OBGYN",
    "Surgery",
    "Medicine",
    "Pediatrics",
    "Psychiatry",
    "Neurology",
    "Family Medicine",
    "Emergency Medicine",
];
const CHECK_GLYPHS: [char; 2] = ['✓', '✔'];
const CROSS_GLYPHS: [char; 3] = ['×', '✗', '✘'];

fn unknown() -> String {
    "Unknown".to_string()
}

/// One question as submitted by the scraper. Scraped input is loosely
/// structured, so every field has a fallback.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedQuestion {
    #[serde(default)]
    pub question_id: String,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default = "unknown")]
    pub subject: String,
    #[serde(default = "unknown")]
    pub system: String,
    #[serde(default = "unknown")]
    pub category: String,
    #[serde(default = "unknown")]
    pub topic: String,
    #[serde(default)]
    pub percent_others: i64,
    /// Seconds.
    #[serde(default)]
    pub time_spent: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJsonBody {
    #[serde(default)]
    pub test_name: String,
    #[serde(default)]
    pub test_id: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub questions: Vec<ScrapedQuestion>,
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).map(|c| c[0].trim().to_string())
}

fn extract_row(text: &str) -> Option<ScrapedQuestion> {
    if text.contains("SUBJECTS") || text.contains("SYSTEMS") || text.contains("ID") {
        return None;
    }
    let question_id = QUESTION_ID.captures(text)?[2].to_string();

    let has_check = text.contains(CHECK_GLYPHS);
    let has_cross = text.contains(CROSS_GLYPHS);

    let percent_others = PERCENT
        .captures(text)
        .and_then(|c| c[1].parse::<i64>().ok())
        .unwrap_or(0);
    let time_spent = TIME
        .captures(text)
        .and_then(|c| c[1].parse::<i64>().ok())
        .unwrap_or(0);

    let subject = SUBJECT_VOCABULARY
        .iter()
        .find(|s| text.contains(**s))
        .map(|s| s.to_string())
        .unwrap_or_else(unknown);
    let topic = TOPIC
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(unknown);

    Some(ScrapedQuestion {
        question_id,
        is_correct: has_check && !has_cross,
        subject,
        system: first_capture(&SYSTEM, text).unwrap_or_else(unknown),
        category: first_capture(&CATEGORY, text).unwrap_or_else(unknown),
        topic,
        percent_others,
        time_spent,
    })
}

/// Builds an import payload from rendered result rows. Rows without a
/// question id are ignored; repeated ids keep the first row.
pub fn extract_rows<S: AsRef<str>>(test_name: &str, test_id: &str, rows: &[S]) -> ImportJsonBody {
    let mut seen = HashSet::new();
    let mut questions = Vec::new();
    for row in rows {
        let Some(q) = extract_row(row.as_ref()) else {
            continue;
        };
        if seen.insert(q.question_id.clone()) {
            questions.push(q);
        }
    }

    let score = if questions.is_empty() {
        None
    } else {
        let correct = questions.iter().filter(|q| q.is_correct).count();
        Some(crate::calc::percent(correct as i64, questions.len() as i64) as f64)
    };

    ImportJsonBody {
        test_name: test_name.to_string(),
        test_id: test_id.to_string(),
        score,
        questions,
    }
}
