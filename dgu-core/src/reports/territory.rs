use std::sync::OnceLock;

use regex::Regex;

/// How a territory selects its datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerritoryFilter {
    /// Bounding box handed verbatim to the spatial search.
    BoundingBox(&'static str),
    /// Every active dataset, no search involved.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Territory {
    pub name: &'static str,
    pub filter: TerritoryFilter,
}

impl Territory {
    pub fn slug(&self) -> String {
        slugify(self.name)
    }
}

pub const TERRITORIES: [Territory; 4] = [
    Territory {
        name: "UK & Territorial Waters",
        filter: TerritoryFilter::BoundingBox("20.48,48.79,3.11,62.66"),
    },
    Territory {
        name: "UK, Territorial Waters and Continental Shelf",
        filter: TerritoryFilter::BoundingBox("63.887067,-23.956667,48.166667,3.398547"),
    },
    Territory {
        name: "Gibraltar",
        filter: TerritoryFilter::BoundingBox("36.158625,-5.407807,36.084108,-5.291815"),
    },
    Territory {
        name: "All",
        filter: TerritoryFilter::All,
    },
];

fn punctuation() -> &'static Regex {
    static PUNCT: OnceLock<Regex> = OnceLock::new();
    PUNCT.get_or_init(|| {
        Regex::new(r##"[\t !"#$%&'()*\-/<=>?@\[\\\]^_`{|},.]+"##).expect("static regex is valid")
    })
}

/// Lower-case `name` and join the words between punctuation runs with `_`.
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    punctuation()
        .split(&lowered)
        .collect::<Vec<_>>()
        .join("_")
}

/// One of the six UKLP management-information reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReportKind {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl ReportKind {
    /// Order in which reports are produced. The summaries come last because they
    /// append history snapshots.
    pub const RUN_ORDER: [ReportKind; 6] = [
        ReportKind::A,
        ReportKind::B,
        ReportKind::D,
        ReportKind::F,
        ReportKind::C,
        ReportKind::E,
    ];

    pub fn letter(self) -> char {
        match self {
            ReportKind::A => 'A',
            ReportKind::B => 'B',
            ReportKind::C => 'C',
            ReportKind::D => 'D',
            ReportKind::E => 'E',
            ReportKind::F => 'F',
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReportKind::A => "Datasets",
            ReportKind::B => "Services",
            ReportKind::C => "Org-Summary",
            ReportKind::D => "Series",
            ReportKind::E => "Responsible-Party-Summary",
            ReportKind::F => "Other",
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'A' => Some(ReportKind::A),
            'B' => Some(ReportKind::B),
            'C' => Some(ReportKind::C),
            'D' => Some(ReportKind::D),
            'E' => Some(ReportKind::E),
            'F' => Some(ReportKind::F),
            _ => None,
        }
    }

    /// File name for this report, e.g. `2024-01-31-Report-A-DGUK-Datasets_all.csv`.
    pub fn file_name(self, prefix: &str, report_date: &str, territory: &Territory) -> String {
        format!(
            "{prefix}{report_date}-Report-{}-DGUK-{}_{}.csv",
            self.letter(),
            self.label(),
            territory.slug()
        )
    }
}

/// Parse a letter selection such as `"ACE"`; duplicates collapse, order follows [`ReportKind::RUN_ORDER`].
pub fn parse_letters(letters: &str) -> Result<Vec<ReportKind>, String> {
    let mut selected = Vec::new();
    for c in letters.chars().filter(|c| !c.is_whitespace()) {
        let kind = ReportKind::from_letter(c)
            .ok_or_else(|| format!("unknown report letter {c:?}, expected A-F"))?;
        selected.push(kind);
    }
    if selected.is_empty() {
        return Err("no report letters given".to_string());
    }
    Ok(ReportKind::RUN_ORDER
        .into_iter()
        .filter(|k| selected.contains(k))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_for_known_territories() {
        let slugs: Vec<String> = TERRITORIES.iter().map(Territory::slug).collect();
        assert_eq!(
            slugs,
            vec![
                "uk_territorial_waters",
                "uk_territorial_waters_and_continental_shelf",
                "gibraltar",
                "all",
            ]
        );
    }

    #[test]
    fn slug_keeps_trailing_separator_like_a_split() {
        assert_eq!(slugify("Isle of Man."), "isle_of_man_");
    }

    #[test]
    fn letters_follow_run_order() {
        assert_eq!(
            parse_letters("ecA").unwrap(),
            vec![ReportKind::A, ReportKind::C, ReportKind::E]
        );
        assert_eq!(parse_letters("ABCDEF").unwrap(), ReportKind::RUN_ORDER.to_vec());
        assert_eq!(parse_letters("AA").unwrap(), vec![ReportKind::A]);
    }

    #[test]
    fn rejects_unknown_letters() {
        assert!(parse_letters("AG").is_err());
        assert!(parse_letters("").is_err());
    }

    #[test]
    fn file_names() {
        let all = TERRITORIES[3];
        assert_eq!(
            ReportKind::E.file_name("", "2024-01-31", &all),
            "2024-01-31-Report-E-DGUK-Responsible-Party-Summary_all.csv"
        );
        assert_eq!(
            ReportKind::A.file_name("test-", "2024-01-31", &TERRITORIES[0]),
            "test-2024-01-31-Report-A-DGUK-Datasets_uk_territorial_waters.csv"
        );
    }
}
