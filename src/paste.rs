use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static ROW_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*[-–]\s*(\d+)").expect("row id pattern"));
static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("digits pattern"));

static TEST_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)TestId\s*:\s*(.+)").expect("test id pattern"));
static TOTAL_CORRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Total Correct\s+(\d+)").expect("correct pattern"));
static TOTAL_INCORRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Total Incorrect\s+(\d+)").expect("incorrect pattern"));
static TOTAL_OMITTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Total Omitted\s+(\d+)").expect("omitted pattern"));
static SUBJECTS_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)Subjects\s+(.+?)(?:Systems|Answer Changes|$)").expect("section pattern")
});
// name  total  correct (p%)  incorrect (p%)  omitted (p%)
static SUBJECT_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^([A-Za-z,\s&-]+?)\s+(\d+)\s+(\d+)\s+\((\d+)%\)\s+(\d+)\s+\((\d+)%\)\s+(\d+)\s+\((\d+)%\)",
    )
    .expect("subject row pattern")
});

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedQuestion {
    pub question_id: String,
    pub subject: String,
    pub system: String,
    pub category: String,
    pub topic: String,
    pub percent_others: i64,
    pub time_spent: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedTable {
    pub questions: Vec<ParsedQuestion>,
    /// Lines that were neither blank, a header, nor a parseable row.
    pub rows_dropped: usize,
}

fn is_header_line(line: &str) -> bool {
    line.contains("SUBJECTS")
        || line.contains("SYSTEMS")
        || (line.contains("ID") && line.contains("TOPICS"))
}

fn first_number(cell: Option<&String>) -> i64 {
    cell.and_then(|c| DIGITS.find(c))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .unwrap_or(0)
}

fn cell_or_unknown(parts: &[String], idx: usize) -> String {
    match parts.get(idx) {
        Some(v) if !v.is_empty() => v.clone(),
        _ => UNKNOWN.to_string(),
    }
}

/// Parses the question table copied out of a UWorld results page.
///
/// Rows look like `1 - 118154<TAB>Subject<TAB>System<TAB>Category<TAB>Topic<TAB>45%<TAB>90 sec`.
/// Malformed rows are skipped and counted; this never fails.
pub fn parse_question_table(text: &str) -> ParsedTable {
    let mut out = ParsedTable::default();

    for line in text.lines() {
        if line.trim().is_empty() || is_header_line(line) {
            continue;
        }

        let parts: Vec<String> = line.split('\t').map(|p| p.trim().to_string()).collect();
        if parts.len() < 5 {
            out.rows_dropped += 1;
            continue;
        }

        let Some(caps) = ROW_ID.captures(&parts[0]) else {
            out.rows_dropped += 1;
            continue;
        };
        let question_id = caps[2].to_string();

        out.questions.push(ParsedQuestion {
            question_id,
            subject: cell_or_unknown(&parts, 1),
            system: cell_or_unknown(&parts, 2),
            category: cell_or_unknown(&parts, 3),
            topic: cell_or_unknown(&parts, 4),
            percent_others: first_number(parts.get(5)),
            time_spent: first_number(parts.get(6)),
        });
    }

    out
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("could not find \"Total Correct\" and \"Total Incorrect\" in the report")]
    MissingTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSubjectRow {
    pub name: String,
    pub category: String,
    pub total: i64,
    pub correct: i64,
    pub incorrect: i64,
    pub omitted: i64,
    pub percent: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerformanceReport {
    /// A single test's report, identified by its `TestId:` line.
    Test {
        test_name: String,
        correct: i64,
        incorrect: i64,
        omitted: i64,
        subjects: Vec<ReportSubjectRow>,
    },
    /// Cumulative progress across the whole question bank.
    Overall { correct: i64, incorrect: i64 },
}

fn capture_number(re: &Regex, text: &str) -> Option<i64> {
    re.captures(text).and_then(|c| c[1].parse::<i64>().ok())
}

fn infer_category(subject_name: &str) -> &'static str {
    if subject_name.contains("OBGYN")
        || subject_name.contains("Reproductive")
        || subject_name.contains("Pregnancy")
    {
        "OBGYN"
    } else if subject_name.contains("Surgery") {
        "Surgery"
    } else if subject_name.contains("Pediatrics") {
        "Pediatrics"
    } else if subject_name.contains("Psychiatry") {
        "Psychiatry"
    } else {
        "Medicine"
    }
}

fn parse_subject_rows(text: &str) -> Vec<ReportSubjectRow> {
    let Some(section) = SUBJECTS_SECTION.captures(text) else {
        return Vec::new();
    };
    let body = section.get(1).map(|m| m.as_str()).unwrap_or("");

    let mut rows = Vec::new();
    for caps in SUBJECT_ROW.captures_iter(body) {
        let name = caps[1].trim().to_string();
        // Category headers repeat the totals of their children.
        if matches!(name.as_str(), "Medicine" | "OBGYN" | "Surgery") {
            continue;
        }
        let num = |i: usize| caps[i].parse::<i64>().unwrap_or(0);
        rows.push(ReportSubjectRow {
            category: infer_category(&name).to_string(),
            total: num(2),
            correct: num(3),
            percent: num(4),
            incorrect: num(5),
            omitted: num(7),
            name,
        });
    }
    rows
}

/// Parses text extracted from a UWorld performance report.
pub fn parse_performance_report(text: &str) -> Result<PerformanceReport, ReportError> {
    let correct = capture_number(&TOTAL_CORRECT, text);
    let incorrect = capture_number(&TOTAL_INCORRECT, text);
    let (Some(correct), Some(incorrect)) = (correct, incorrect) else {
        return Err(ReportError::MissingTotals);
    };

    if let Some(caps) = TEST_ID.captures(text) {
        return Ok(PerformanceReport::Test {
            test_name: caps[1].trim().to_string(),
            correct,
            incorrect,
            omitted: capture_number(&TOTAL_OMITTED, text).unwrap_or(0),
            subjects: parse_subject_rows(text),
        });
    }

    Ok(PerformanceReport::Overall { correct, incorrect })
}
