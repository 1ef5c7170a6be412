pub struct QuickLinkDefault {
    pub name: &'static str,
    pub url: &'static str,
    pub order: i64,
}

/// Seeded into a user's quick links the first time they are listed.
pub const DEFAULT_QUICK_LINKS: [QuickLinkDefault; 5] = [
    QuickLinkDefault {
        name: "NewInnovations",
        url: "https://www.new-innov.com/login/Login.aspx",
        order: 0,
    },
    QuickLinkDefault {
        name: "VSLO",
        url: "https://www.aamc.org/services/vslo",
        order: 1,
    },
    QuickLinkDefault {
        name: "ERAS",
        url: "https://www.aamc.org/services/eras",
        order: 2,
    },
    QuickLinkDefault {
        name: "MyNBME",
        url: "https://www.nbme.org",
        order: 3,
    },
    QuickLinkDefault {
        name: "UWorld",
        url: "https://www.uworld.com",
        order: 4,
    },
];

/// Question bank size per shelf subject. Internal Medicine includes the
/// ambulatory and neurology banks.
pub const UWORLD_QUESTION_TOTALS: [(&str, i64); 7] = [
    ("Emergency Medicine", 403),
    ("Family Medicine", 460),
    ("Internal Medicine", 1921),
    ("OBGYN", 535),
    ("Pediatrics", 637),
    ("Psychiatry", 362),
    ("Surgery", 638),
];

const UWORLD_SUBJECT_MAPPING: [(&str, &str); 21] = [
    ("medicine", "Internal Medicine"),
    ("internal medicine", "Internal Medicine"),
    ("obgyn", "OBGYN"),
    ("ob/gyn", "OBGYN"),
    ("obstetrics", "OBGYN"),
    ("gynecology", "OBGYN"),
    ("pediatrics", "Pediatrics"),
    ("peds", "Pediatrics"),
    ("psychiatry", "Psychiatry"),
    ("psych", "Psychiatry"),
    ("surgery", "Surgery"),
    ("general surgery", "Surgery"),
    ("emergency medicine", "Emergency Medicine"),
    ("emergency", "Emergency Medicine"),
    ("family medicine", "Family Medicine"),
    ("family", "Family Medicine"),
    ("ambulatory medicine", "Internal Medicine"),
    ("ambulatory", "Internal Medicine"),
    ("clinical neurology", "Internal Medicine"),
    ("neurology", "Internal Medicine"),
    ("neuro", "Internal Medicine"),
];

pub const STATUS_NEEDS_REVIEW: &str = "needs_review";
pub const INCORRECT_STATUSES: [&str; 3] = [STATUS_NEEDS_REVIEW, "reviewed", "mastered"];

pub fn is_shelf_subject(name: &str) -> bool {
    UWORLD_QUESTION_TOTALS.iter().any(|(s, _)| *s == name)
}

/// Maps a free-form subject name onto its shelf subject. Unknown names pass
/// through trimmed.
pub fn normalize_shelf_subject(raw: &str) -> String {
    let trimmed = raw.trim();
    let key = trimmed.to_ascii_lowercase();
    UWORLD_SUBJECT_MAPPING
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, shelf)| shelf.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}
