use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const WEAK_TOPICS_LIMIT: usize = 10;
pub const WEAK_SYSTEMS_LIMIT: usize = 5;
pub const RECENT_INCORRECTS_LIMIT: usize = 20;

/// `Math.round`-style half-up rounding of a percentage.
pub fn percent(part: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    round_half_up(part as f64 / total as f64 * 100.0)
}

pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

#[derive(Debug, Clone, Default)]
pub struct QuestionOutcome {
    pub subject: String,
    pub system: String,
    pub category: String,
    pub topic: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownRow {
    pub name: String,
    pub total: i64,
    pub correct: i64,
    pub incorrect: i64,
    pub percentage: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakdown {
    pub question_count: usize,
    pub by_subject: Vec<BreakdownRow>,
    pub by_system: Vec<BreakdownRow>,
    pub by_category: Vec<BreakdownRow>,
    pub by_topic: Vec<BreakdownRow>,
}

fn group_by<'a, F>(rows: &'a [QuestionOutcome], key: F) -> Vec<BreakdownRow>
where
    F: Fn(&'a QuestionOutcome) -> &'a str,
{
    let mut tally: HashMap<&str, (i64, i64)> = HashMap::new();
    for row in rows {
        let k = key(row);
        if k.is_empty() {
            continue;
        }
        let entry = tally.entry(k).or_insert((0, 0));
        entry.0 += 1;
        if row.is_correct {
            entry.1 += 1;
        }
    }

    let mut out: Vec<BreakdownRow> = tally
        .into_iter()
        .map(|(name, (total, correct))| BreakdownRow {
            name: name.to_string(),
            total,
            correct,
            incorrect: total - correct,
            percentage: percent(correct, total),
        })
        .collect();
    out.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));
    out
}

pub fn compute_breakdown(rows: &[QuestionOutcome]) -> Breakdown {
    Breakdown {
        question_count: rows.len(),
        by_subject: group_by(rows, |r| r.subject.as_str()),
        by_system: group_by(rows, |r| r.system.as_str()),
        by_category: group_by(rows, |r| r.category.as_str()),
        by_topic: group_by(rows, |r| r.topic.as_str()),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncorrectRow {
    pub id: String,
    pub question_id: String,
    pub topic: String,
    pub system: Option<String>,
    pub subject: Option<String>,
    pub category: Option<String>,
    pub percent_others: i64,
    pub status: String,
    pub test_name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeakTopic {
    pub topic: String,
    pub count: i64,
    pub system: Option<String>,
    pub subject: Option<String>,
    pub avg_percent_others: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeakSystem {
    pub system: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeakSubject {
    pub subject: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeakAreas {
    pub weak_areas: Vec<WeakTopic>,
    pub weak_systems: Vec<WeakSystem>,
    pub weak_subjects: Vec<WeakSubject>,
    pub recent_incorrects: Vec<IncorrectRow>,
    pub total_incorrects: usize,
}

/// Counts non-empty values in first-seen order, then stable-sorts by count.
fn ranked_counts<'a, I>(values: I) -> Vec<(String, i64)>
where
    I: Iterator<Item = Option<&'a str>>,
{
    let mut order: Vec<(String, i64)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for v in values.flatten() {
        if v.is_empty() {
            continue;
        }
        match index.get(v) {
            Some(&i) => order[i].1 += 1,
            None => {
                index.insert(v.to_string(), order.len());
                order.push((v.to_string(), 1));
            }
        }
    }
    order.sort_by(|a, b| b.1.cmp(&a.1));
    order
}

/// `incorrects` must be ordered newest first.
pub fn compute_weak_areas(incorrects: Vec<IncorrectRow>) -> WeakAreas {
    struct TopicTally {
        topic: String,
        count: i64,
        system: Option<String>,
        subject: Option<String>,
        percent_sum: i64,
    }

    let mut topics: Vec<TopicTally> = Vec::new();
    let mut topic_index: HashMap<&str, usize> = HashMap::new();
    for q in &incorrects {
        match topic_index.get(q.topic.as_str()) {
            Some(&i) => {
                topics[i].count += 1;
                topics[i].percent_sum = topics[i].percent_sum.saturating_add(q.percent_others);
            }
            None => {
                topic_index.insert(q.topic.as_str(), topics.len());
                topics.push(TopicTally {
                    topic: q.topic.clone(),
                    count: 1,
                    system: q.system.clone(),
                    subject: q.subject.clone(),
                    percent_sum: q.percent_others,
                });
            }
        }
    }
    topics.sort_by(|a, b| b.count.cmp(&a.count));

    let weak_areas = topics
        .into_iter()
        .take(WEAK_TOPICS_LIMIT)
        .map(|t| WeakTopic {
            avg_percent_others: round_half_up(t.percent_sum as f64 / t.count as f64),
            topic: t.topic,
            count: t.count,
            system: t.system,
            subject: t.subject,
        })
        .collect();

    let weak_systems = ranked_counts(incorrects.iter().map(|q| q.system.as_deref()))
        .into_iter()
        .take(WEAK_SYSTEMS_LIMIT)
        .map(|(system, count)| WeakSystem { system, count })
        .collect();
    let weak_subjects = ranked_counts(incorrects.iter().map(|q| q.subject.as_deref()))
        .into_iter()
        .map(|(subject, count)| WeakSubject { subject, count })
        .collect();

    let total_incorrects = incorrects.len();
    let recent_incorrects = incorrects
        .into_iter()
        .take(RECENT_INCORRECTS_LIMIT)
        .collect();

    WeakAreas {
        weak_areas,
        weak_systems,
        weak_subjects,
        recent_incorrects,
        total_incorrects,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupTally {
    pub total: i64,
    pub correct: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub total_questions: i64,
    pub total_correct: i64,
    pub percentage: i64,
    pub system_stats: BTreeMap<String, GroupTally>,
}

/// Totals over session logs. Every tag on a log is credited with the log's
/// full question counts.
pub fn compute_log_stats<'a, I>(logs: I) -> LogStats
where
    I: IntoIterator<Item = (i64, i64, &'a [String])>,
{
    let mut stats = LogStats::default();
    for (total, correct, tags) in logs {
        stats.total_questions = stats.total_questions.saturating_add(total);
        stats.total_correct = stats.total_correct.saturating_add(correct);
        for tag in tags {
            let entry = stats.system_stats.entry(tag.clone()).or_default();
            entry.total = entry.total.saturating_add(total);
            entry.correct = entry.correct.saturating_add(correct);
        }
    }
    stats.percentage = percent(stats.total_correct, stats.total_questions);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(subject: &str, system: &str, topic: &str, is_correct: bool) -> QuestionOutcome {
        QuestionOutcome {
            subject: subject.into(),
            system: system.into(),
            category: String::new(),
            topic: topic.into(),
            is_correct,
        }
    }

    fn incorrect(topic: &str, system: Option<&str>, subject: Option<&str>, pct: i64) -> IncorrectRow {
        IncorrectRow {
            id: format!("id-{topic}-{pct}"),
            question_id: format!("{pct}"),
            topic: topic.into(),
            system: system.map(str::to_string),
            subject: subject.map(str::to_string),
            category: None,
            percent_others: pct,
            status: "needs_review".into(),
            test_name: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn percent_rounds_half_up_and_guards_zero() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(1, 8), 13);
        assert_eq!(percent(5, 0), 0);
    }

    #[test]
    fn breakdown_groups_are_consistent() {
        let rows = vec![
            outcome("OBGYN", "Pregnancy", "Preeclampsia", true),
            outcome("OBGYN", "Pregnancy", "Preeclampsia", false),
            outcome("OBGYN", "", "Placenta previa", true),
            outcome("Surgery", "GI", "Appendicitis", false),
        ];
        let b = compute_breakdown(&rows);

        assert_eq!(b.by_subject[0].name, "OBGYN");
        assert_eq!(b.by_subject[0].total, 3);
        assert_eq!(b.by_subject[0].percentage, 67);
        assert!(b.by_category.is_empty());

        // The empty system is not a group.
        let system_total: i64 = b.by_system.iter().map(|g| g.total).sum();
        assert_eq!(system_total, 3);

        for dim in [&b.by_subject, &b.by_system, &b.by_topic] {
            for g in dim {
                assert!(g.total > 0);
                assert_eq!(g.correct + g.incorrect, g.total);
                assert_eq!(g.percentage, percent(g.correct, g.total));
            }
            assert!(dim.windows(2).all(|w| w[0].total >= w[1].total));
        }
    }

    #[test]
    fn weak_areas_rank_topics_and_average_difficulty() {
        let rows = vec![
            incorrect("Preeclampsia", Some("Pregnancy"), Some("OBGYN"), 60),
            incorrect("Appendicitis", Some("GI"), Some("Surgery"), 80),
            incorrect("Preeclampsia", Some("Renal"), Some("OBGYN"), 45),
            incorrect("Asthma", None, None, 10),
        ];
        let w = compute_weak_areas(rows);

        assert_eq!(w.total_incorrects, 4);
        assert_eq!(w.weak_areas[0].topic, "Preeclampsia");
        assert_eq!(w.weak_areas[0].count, 2);
        // Newest row wins for the topic's classification.
        assert_eq!(w.weak_areas[0].system.as_deref(), Some("Pregnancy"));
        assert_eq!(w.weak_areas[0].avg_percent_others, 53);
        // Ties keep first-seen order.
        assert_eq!(w.weak_areas[1].topic, "Appendicitis");

        assert_eq!(w.weak_systems.len(), 3);
        assert_eq!(
            w.weak_subjects,
            vec![
                WeakSubject { subject: "OBGYN".into(), count: 2 },
                WeakSubject { subject: "Surgery".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn weak_area_average_saturates_on_huge_percentages() {
        let rows = vec![
            incorrect("Shock", Some("Cardio"), Some("Surgery"), i64::MAX),
            incorrect("Shock", Some("Cardio"), Some("Surgery"), i64::MAX),
        ];
        let weak = compute_weak_areas(rows);
        assert_eq!(weak.weak_areas[0].count, 2);
        assert!(weak.weak_areas[0].avg_percent_others > 0);
    }

    #[test]
    fn weak_area_limits_are_fixed() {
        let rows: Vec<IncorrectRow> = (0..30)
            .map(|i| {
                let system = format!("sys{i}");
                incorrect(&format!("topic{i}"), Some(system.as_str()), Some("S"), i)
            })
            .collect();
        let w = compute_weak_areas(rows);
        assert_eq!(w.weak_areas.len(), WEAK_TOPICS_LIMIT);
        assert_eq!(w.weak_systems.len(), WEAK_SYSTEMS_LIMIT);
        assert_eq!(w.weak_subjects.len(), 1);
        assert_eq!(w.recent_incorrects.len(), RECENT_INCORRECTS_LIMIT);
        assert_eq!(w.recent_incorrects[0].topic, "topic0");
    }

    #[test]
    fn log_stats_saturate_on_huge_sessions() {
        let tags = vec!["OBGYN".to_string()];
        let stats = compute_log_stats([
            (i64::MAX, i64::MAX, tags.as_slice()),
            (i64::MAX, 1, tags.as_slice()),
        ]);
        assert_eq!(stats.total_questions, i64::MAX);
        assert_eq!(stats.system_stats["OBGYN"].total, i64::MAX);
        assert_eq!(stats.percentage, 100);
    }

    #[test]
    fn log_stats_credit_every_tag() {
        let a = vec!["OBGYN".to_string()];
        let b = vec!["OBGYN".to_string(), "Surgery".to_string()];
        let stats = compute_log_stats([(40, 30, a.as_slice()), (10, 5, b.as_slice())]);
        assert_eq!(stats.total_questions, 50);
        assert_eq!(stats.total_correct, 35);
        assert_eq!(stats.percentage, 70);
        assert_eq!(
            stats.system_stats.get("OBGYN"),
            Some(&GroupTally { total: 50, correct: 35 })
        );
        assert_eq!(
            stats.system_stats.get("Surgery"),
            Some(&GroupTally { total: 10, correct: 5 })
        );
    }
}
