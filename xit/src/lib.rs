//! xit! task-list library.
//! The core is pure: `parse` folds text into groups of status-tracked items and
//! `serialize` renders the model back. Reading and writing files is left to the host
//! (see the `xit` binary).

pub mod core {
    use chrono::{NaiveDate, Weekday};
    use serde::{Deserialize, Serialize};
    use std::{fmt, str::FromStr};

    /* ------------------------------ Aggregate ------------------------------ */

    /// Aggregate root: a single xit! file as an ordered list of groups.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Document {
        #[serde(default)]
        pub groups: Vec<Group>,
    }

    impl Document {
        pub fn new(groups: Vec<Group>) -> Self {
            Self { groups }
        }

        /// Content of a freshly created file.
        pub fn starter() -> Self {
            Self::new(vec![Group::new(
                Some("My Tasks".into()),
                vec![Item::new(Status::Open, "Your first task")],
            )])
        }

        /// All items in document order.
        pub fn items(&self) -> impl Iterator<Item = &Item> {
            self.groups.iter().flat_map(|g| g.items.iter())
        }
    }

    /// A titled or untitled run of items, separated from its neighbours by blank lines.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Group {
        pub title: Option<String>,
        #[serde(default)]
        pub items: Vec<Item>,
    }

    impl Group {
        pub fn new(title: Option<String>, items: Vec<Item>) -> Self {
            Self { title, items }
        }
    }

    /* ------------------------------- Entities ------------------------------- */

    /// One task entry.
    ///
    /// `tags` and `due_date` are derived from `description` and only change through
    /// [`Item::set_description`].
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(from = "ItemFields")]
    pub struct Item {
        pub status: Status,
        /// Number of `!` in the priority token; 0 when absent.
        pub priority: usize,
        description: String,
        /// Physical lines following the first one, with the 4-space indent removed.
        pub continuation_lines: Vec<String>,
        tags: Vec<Tag>,
        due_date: Option<DueDate>,
    }

    /// Deserialized shape of an item; derived fields are recomputed on load.
    #[derive(Deserialize)]
    struct ItemFields {
        status: Status,
        #[serde(default)]
        priority: usize,
        #[serde(default)]
        description: String,
        #[serde(default)]
        continuation_lines: Vec<String>,
    }

    impl From<ItemFields> for Item {
        fn from(fields: ItemFields) -> Self {
            let mut item = Item::new(fields.status, fields.description);
            item.priority = fields.priority;
            item.continuation_lines = fields.continuation_lines;
            item
        }
    }

    impl Item {
        pub fn new(status: Status, description: impl Into<String>) -> Self {
            let mut item = Self {
                status,
                priority: 0,
                description: String::new(),
                continuation_lines: vec![],
                tags: vec![],
                due_date: None,
            };
            item.set_description(description);
            item
        }

        pub fn description(&self) -> &str {
            &self.description
        }

        /// Replaces the description and re-derives tags and due date from it.
        pub fn set_description(&mut self, description: impl Into<String>) {
            self.description = description.into();
            self.tags = crate::grammar::extract_tags(&self.description);
            self.due_date = crate::grammar::find_due_date(&self.description);
        }

        pub fn tags(&self) -> &[Tag] {
            &self.tags
        }

        pub fn due_date(&self) -> Option<&DueDate> {
            self.due_date.as_ref()
        }

        /// Description plus continuation lines, re-indented the way they are written.
        pub fn full_description(&self) -> String {
            let mut out = self.description.clone();
            for line in &self.continuation_lines {
                out.push('\n');
                out.push_str(crate::grammar::CONTINUATION_INDENT);
                out.push_str(line);
            }
            out
        }

        pub fn is_overdue(&self, today: NaiveDate) -> bool {
            self.due_date
                .as_ref()
                .is_some_and(|due| due.is_overdue(today))
        }
    }

    /* ---------------------------- Value Objects ---------------------------- */

    /// Checkbox state of an item.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum Status {
        Open,
        Checked,
        Ongoing,
        Obsolete,
        InQuestion,
    }

    impl Status {
        pub const ALL: [Status; 5] = [
            Status::Open,
            Status::Checked,
            Status::Ongoing,
            Status::Obsolete,
            Status::InQuestion,
        ];

        /// The character written between the checkbox brackets.
        pub fn symbol(self) -> char {
            match self {
                Status::Open => ' ',
                Status::Checked => 'x',
                Status::Ongoing => '@',
                Status::Obsolete => '~',
                Status::InQuestion => '?',
            }
        }

        pub fn from_symbol(symbol: char) -> Result<Self, DomainError> {
            Status::ALL
                .into_iter()
                .find(|status| status.symbol() == symbol)
                .ok_or(DomainError::UnknownStatus(symbol))
        }

        pub fn checkbox(self) -> &'static str {
            match self {
                Status::Open => "[ ]",
                Status::Checked => "[x]",
                Status::Ongoing => "[@]",
                Status::Obsolete => "[~]",
                Status::InQuestion => "[?]",
            }
        }

        pub fn display_name(self) -> &'static str {
            match self {
                Status::Open => "Open",
                Status::Checked => "Done",
                Status::Ongoing => "Ongoing",
                Status::Obsolete => "Obsolete",
                Status::InQuestion => "In Question",
            }
        }

        /// Successor when the checkbox is clicked.
        pub fn cycle(self) -> Self {
            match self {
                Status::Open => Status::Checked,
                Status::Checked => Status::Open,
                Status::Ongoing => Status::Checked,
                Status::Obsolete => Status::Open,
                Status::InQuestion => Status::Open,
            }
        }
    }

    impl TryFrom<char> for Status {
        type Error = DomainError;

        fn try_from(symbol: char) -> Result<Self, Self::Error> {
            Status::from_symbol(symbol)
        }
    }

    /// Inline `#name` or `#name=value` annotation.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Tag {
        pub name: String,
        pub value: Option<String>,
    }

    impl Tag {
        pub fn new(name: impl Into<String>, value: Option<&str>) -> Self {
            Self {
                name: name.into(),
                value: value.map(str::to_string),
            }
        }
    }

    impl fmt::Display for Tag {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match &self.value {
                Some(value) => write!(f, "#{}={}", self.name, value),
                None => write!(f, "#{}", self.name),
            }
        }
    }

    /// Calendar span a due date covers. Fixed when the token is classified.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(tag = "granularity", rename_all = "lowercase")]
    pub enum DueDateKind {
        Day { date: NaiveDate },
        Month { year: i32, month: u32 },
        /// ISO week-numbering year and week.
        Week { year: i32, week: u32 },
        Quarter { year: i32, quarter: u32 },
        Year { year: i32 },
    }

    /// An inline `-> <date>` annotation.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DueDate {
        pub kind: DueDateKind,
        /// Token as written (`2024/03`, `2024-W12`, ...).
        pub raw: String,
    }

    impl DueDate {
        /// Last calendar day covered by the due date. Week spans end on Saturday.
        pub fn last_day(&self) -> Option<NaiveDate> {
            match self.kind {
                DueDateKind::Day { date } => Some(date),
                DueDateKind::Month { year, month } => last_day_of_month(year, month),
                DueDateKind::Quarter { year, quarter } => {
                    last_day_of_month(year, quarter.checked_mul(3)?)
                }
                DueDateKind::Year { year } => NaiveDate::from_ymd_opt(year, 12, 31),
                DueDateKind::Week { year, week } => {
                    NaiveDate::from_isoywd_opt(year, week, Weekday::Sat)
                }
            }
        }

        /// Whether the covered span ended before `today`.
        pub fn is_overdue(&self, today: NaiveDate) -> bool {
            self.last_day().is_some_and(|last| last < today)
        }

        pub fn is_overdue_with(&self, clock: &dyn crate::clock::Clock) -> bool {
            self.is_overdue(clock.today())
        }
    }

    fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
        if !(1..=12).contains(&month) {
            return None;
        }
        let (next_year, next_month) = if month == 12 {
            (year.checked_add(1)?, 1)
        } else {
            (year, month + 1)
        };
        NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
    }

    /// Strict parse of a bare date token such as `2024-Q2`.
    impl FromStr for DueDate {
        type Err = DomainError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            crate::grammar::classify_due_date(s)
                .ok_or_else(|| DomainError::InvalidDueDate(s.to_string()))
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    /// Failures of the strict conversions. Parsing itself never fails.
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum DomainError {
        #[error("unknown status symbol {0:?}")]
        UnknownStatus(char),
        #[error("invalid due date {0:?}")]
        InvalidDueDate(String),
    }

}

pub mod clock {
    //! Source of "today" for overdue checks.

    use chrono::{Local, NaiveDate};

    pub trait Clock {
        fn today(&self) -> NaiveDate;
    }

    /// Local calendar date of the running process.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn today(&self) -> NaiveDate {
            Local::now().date_naive()
        }
    }

    /// Pinned date, for tests and `--today`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FixedClock(pub NaiveDate);

    impl Clock for FixedClock {
        fn today(&self) -> NaiveDate {
            self.0
        }
    }
}

pub mod grammar {
    //! Line-level grammar of the xit! format.
    //!
    //! - Anchored shapes (checkbox, priority token) are `nom` parsers.
    //! - Unanchored scans over a description (tags, due date) are regexes compiled once
    //!   per process and shared read-only.

    use crate::core::{DueDate, DueDateKind, Item, Status, Tag};
    use chrono::{NaiveDate, Weekday};
    use nom::{
        IResult,
        bytes::complete::{take_while, take_while1},
        character::complete::{anychar, char},
        combinator::{all_consuming, map_res},
        error::VerboseError,
        sequence::{delimited, tuple},
    };
    use once_cell::sync::Lazy;
    use regex::Regex;

    /// Indent that marks a continuation line.
    pub const CONTINUATION_INDENT: &str = "    ";

    static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"#([A-Za-z0-9_-]+)(?:=(?:"([^"]+)"|'([^']+)'|([A-Za-z0-9_-]+)))?"#)
            .expect("tag pattern compiles")
    });

    // Week/quarter first: the plain year alternative would otherwise stop at `2024`.
    static DUE_DATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"->\s*([0-9]{4}[-/][WQ][0-9]{1,2}|[0-9]{4}(?:[-/][0-9]{2}(?:[-/][0-9]{2})?)?)")
            .expect("due date pattern compiles")
    });

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /* --------------------------- Line classifier --------------------------- */

    /// A physical line classified against whether an item is currently open.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Line<'a> {
        Blank,
        /// Text after the 4-space indent.
        Continuation(&'a str),
        /// Line opened by a valid checkbox; `rest` follows the closing bracket.
        ItemCandidate { status: Status, rest: &'a str },
        /// Anything else, unmodified.
        Title(&'a str),
    }

    pub fn classify_line(line: &str, item_open: bool) -> Line<'_> {
        if line.trim().is_empty() {
            return Line::Blank;
        }
        if item_open {
            if let Some(text) = line.strip_prefix(CONTINUATION_INDENT) {
                return Line::Continuation(text);
            }
        }
        match checkbox(line) {
            Ok((rest, status)) => Line::ItemCandidate { status, rest },
            Err(_) => Line::Title(line),
        }
    }

    /* ----------------------------- Item grammar ----------------------------- */

    fn checkbox(i: &str) -> PResult<'_, Status> {
        delimited(char('['), map_res(anychar, Status::from_symbol), char(']'))(i)
    }

    fn dots(i: &str) -> PResult<'_, &str> {
        take_while(|c: char| c == '.')(i)
    }

    fn priority_marker(i: &str) -> PResult<'_, usize> {
        let (i, (_, bangs, _)) = tuple((dots, take_while1(|c: char| c == '!'), dots))(i)?;
        Ok((i, bangs.len()))
    }

    /// Priority encoded by a whole word such as `!!`, `..!` or `!..`; `None` otherwise.
    pub fn parse_priority(word: &str) -> Option<usize> {
        all_consuming(priority_marker)(word)
            .ok()
            .map(|(_, level)| level)
    }

    /// Builds an item from the text following its checkbox.
    pub fn build_item(status: Status, rest: &str) -> Item {
        let remainder = rest.trim();
        let (first_word, tail) = match remainder.find(char::is_whitespace) {
            Some(at) => (&remainder[..at], remainder[at..].trim_start()),
            None => (remainder, ""),
        };
        let (priority, description) = match parse_priority(first_word) {
            Some(level) => (level, tail),
            None => (0, remainder),
        };
        let mut item = Item::new(status, description);
        item.priority = priority;
        item
    }

    /// Parses one line as an item; `None` when it does not open with a checkbox.
    pub fn parse_item(line: &str) -> Option<Item> {
        let (rest, status) = checkbox(line).ok()?;
        Some(build_item(status, rest))
    }

    /* -------------------------- Inline extractors -------------------------- */

    /// All `#name[=value]` tags in `text`, left to right, duplicates kept.
    pub fn extract_tags(text: &str) -> Vec<Tag> {
        TAG_PATTERN
            .captures_iter(text)
            .map(|caps| Tag {
                name: caps[1].to_string(),
                value: (2..=4)
                    .find_map(|group| caps.get(group))
                    .map(|m| m.as_str().to_string()),
            })
            .collect()
    }

    /// The first `-> <date>` annotation in `text`. Later ones are ignored even when the
    /// first is not a valid date.
    pub fn find_due_date(text: &str) -> Option<DueDate> {
        let token = DUE_DATE_PATTERN.captures(text)?.get(1)?.as_str();
        let due = classify_due_date(token);
        if due.is_none() {
            log::trace!("ignoring due date token {token:?}");
        }
        due
    }

    /// Classifies a bare date token (`2024`, `2024-03`, `2024/03/15`, `2024-W12`, `2024-Q2`).
    pub fn classify_due_date(token: &str) -> Option<DueDate> {
        let token = token.trim();
        let normalized = token.replace('/', "-");

        let kind = if let Some((year, week)) = normalized.split_once("-W") {
            let (year, week): (i32, u32) = (year.parse().ok()?, week.parse().ok()?);
            NaiveDate::from_isoywd_opt(year, week, Weekday::Sat)?;
            DueDateKind::Week { year, week }
        } else if let Some((year, quarter)) = normalized.split_once("-Q") {
            let (year, quarter): (i32, u32) = (year.parse().ok()?, quarter.parse().ok()?);
            if !(1..=4).contains(&quarter) {
                return None;
            }
            DueDateKind::Quarter { year, quarter }
        } else {
            let parts: Vec<&str> = normalized.split('-').collect();
            match parts.as_slice() {
                [year] => DueDateKind::Year {
                    year: year.parse().ok()?,
                },
                [year, month] => {
                    let (year, month): (i32, u32) = (year.parse().ok()?, month.parse().ok()?);
                    if !(1..=12).contains(&month) {
                        return None;
                    }
                    DueDateKind::Month { year, month }
                }
                [year, month, day] => DueDateKind::Day {
                    date: NaiveDate::from_ymd_opt(
                        year.parse().ok()?,
                        month.parse().ok()?,
                        day.parse().ok()?,
                    )?,
                },
                _ => return None,
            }
        };

        Some(DueDate {
            kind,
            raw: token.to_string(),
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn kind_of(text: &str) -> Option<DueDateKind> {
            find_due_date(text).map(|due| due.kind)
        }

        #[test]
        fn classifier_rules_in_order() {
            assert_eq!(classify_line("", true), Line::Blank);
            assert_eq!(classify_line(" \t ", true), Line::Blank);
            assert_eq!(
                classify_line("    more", true),
                Line::Continuation("more")
            );
            assert_eq!(
                classify_line("      deeper", true),
                Line::Continuation("  deeper")
            );
            assert_eq!(classify_line("    more", false), Line::Title("    more"));
            assert_eq!(classify_line("   three", true), Line::Title("   three"));
            assert_eq!(
                classify_line("[@] doing", true),
                Line::ItemCandidate {
                    status: Status::Ongoing,
                    rest: " doing"
                }
            );
            assert_eq!(classify_line("[X] nope", false), Line::Title("[X] nope"));
            assert_eq!(classify_line("[] nope", false), Line::Title("[] nope"));
        }

        #[test]
        fn indented_checkbox_is_a_continuation_while_item_open() {
            assert_eq!(
                classify_line("    [ ] nested", true),
                Line::Continuation("[ ] nested")
            );
        }

        #[test]
        fn each_symbol_maps_to_its_status() {
            for status in Status::ALL {
                let line = format!("[{}] x", status.symbol());
                let item = parse_item(&line).expect("item");
                assert_eq!(item.status, status);
                assert_eq!(item.description(), "x");
            }
        }

        #[test]
        fn priority_tokens() {
            let item = parse_item("[ ] !!! buy milk").unwrap();
            assert_eq!((item.priority, item.description()), (3, "buy milk"));

            let item = parse_item("[ ] ..!.. buy milk").unwrap();
            assert_eq!((item.priority, item.description()), (1, "buy milk"));

            let item = parse_item("[ ] !a buy milk").unwrap();
            assert_eq!((item.priority, item.description()), (0, "!a buy milk"));

            let item = parse_item("[x] !.! mixed").unwrap();
            assert_eq!((item.priority, item.description()), (0, "!.! mixed"));

            let item = parse_item("[ ] !!").unwrap();
            assert_eq!((item.priority, item.description()), (2, ""));

            assert_eq!(parse_priority("...!!"), Some(2));
            assert_eq!(parse_priority("..."), None);
            assert_eq!(parse_priority(""), None);
        }

        #[test]
        fn description_is_trimmed_and_whitespace_run_consumed() {
            let item = parse_item("[ ]   !!   spaced   out  ").unwrap();
            assert_eq!(item.priority, 2);
            assert_eq!(item.description(), "spaced   out");

            let item = parse_item("[x]tight").unwrap();
            assert_eq!(item.description(), "tight");
        }

        #[test]
        fn non_checkbox_lines_are_not_items() {
            assert!(parse_item("just text").is_none());
            assert!(parse_item(" [ ] leading space").is_none());
            assert!(parse_item("[x").is_none());
        }

        #[test]
        fn tag_forms() {
            assert_eq!(extract_tags("#work"), vec![Tag::new("work", None)]);
            assert_eq!(
                extract_tags(r#"plan #due="next week""#),
                vec![Tag::new("due", Some("next week"))]
            );
            assert_eq!(extract_tags("#x=5"), vec![Tag::new("x", Some("5"))]);
            assert_eq!(
                extract_tags("#who='Ann Lee' and #x_y-z=a-b"),
                vec![
                    Tag::new("who", Some("Ann Lee")),
                    Tag::new("x_y-z", Some("a-b"))
                ]
            );
        }

        #[test]
        fn tags_keep_order_and_duplicates() {
            let tags = extract_tags("#a #b #a=2");
            let names: Vec<_> = tags.iter().map(|t| t.name.as_str()).collect();
            assert_eq!(names, ["a", "b", "a"]);
            assert_eq!(tags[2].value.as_deref(), Some("2"));
        }

        #[test]
        fn malformed_values_fall_back_to_name_only() {
            assert_eq!(extract_tags("#x="), vec![Tag::new("x", None)]);
            assert_eq!(
                extract_tags(r#"#x="unterminated"#),
                vec![Tag::new("x", None)]
            );
            assert_eq!(extract_tags(r#"#x="""#), vec![Tag::new("x", None)]);
            assert!(extract_tags("# nothing").is_empty());
        }

        #[test]
        fn due_date_granularities() {
            assert_eq!(
                kind_of("-> 2024-03-15"),
                Some(DueDateKind::Day {
                    date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
                })
            );
            assert_eq!(
                kind_of("-> 2024-03"),
                Some(DueDateKind::Month {
                    year: 2024,
                    month: 3
                })
            );
            assert_eq!(kind_of("-> 2024"), Some(DueDateKind::Year { year: 2024 }));
            assert_eq!(
                kind_of("-> 2024-W12"),
                Some(DueDateKind::Week {
                    year: 2024,
                    week: 12
                })
            );
            assert_eq!(
                kind_of("-> 2024-Q2"),
                Some(DueDateKind::Quarter {
                    year: 2024,
                    quarter: 2
                })
            );
        }

        #[test]
        fn slash_separators_and_raw_token() {
            let due = find_due_date("ship it ->2024/03/15 please").expect("due date");
            assert_eq!(
                due.kind,
                DueDateKind::Day {
                    date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
                }
            );
            assert_eq!(due.raw, "2024/03/15");

            let due = find_due_date("-> 2025/Q4").expect("quarter");
            assert_eq!(
                due.kind,
                DueDateKind::Quarter {
                    year: 2025,
                    quarter: 4
                }
            );
        }

        #[test]
        fn invalid_dates_are_silently_dropped() {
            assert_eq!(kind_of("-> 2024-02-30"), None);
            assert_eq!(kind_of("-> 2024-13"), None);
            assert_eq!(kind_of("-> 2024-Q5"), None);
            assert_eq!(kind_of("-> 2024-W60"), None);
            assert_eq!(kind_of("-> 24-01-01"), None);
            assert_eq!(kind_of("no arrow 2024-01-01"), None);
            assert_eq!(classify_due_date("next week"), None);
        }

        #[test]
        fn only_the_first_due_date_counts() {
            assert_eq!(
                kind_of("-> 2024 then -> 2025-01"),
                Some(DueDateKind::Year { year: 2024 })
            );
            assert_eq!(kind_of("-> 2024-13 then -> 2025-01"), None);
        }

        #[test]
        fn annotations_do_not_alter_description() {
            let item = parse_item("[ ] ! call #home -> 2024-05-01").unwrap();
            assert_eq!(item.description(), "call #home -> 2024-05-01");
            assert_eq!(item.tags(), &[Tag::new("home", None)]);
            assert_eq!(
                item.due_date().map(|d| d.raw.as_str()),
                Some("2024-05-01")
            );
        }
    }
}

pub mod parser {
    //! Folds a whole text into a [`Document`].
    //!
    //! Each line is classified against the assembler state and then fed to a single
    //! transition, [`Assembler::advance`]. Groups are only materialised once they hold
    //! an item, so a title followed by a blank line never produces a group.

    use crate::core::{Document, Group, Item};
    use crate::grammar::{CONTINUATION_INDENT, Line, build_item, classify_line};

    /// Parse a xit! document. Accepts `\n`, `\r\n` and lone `\r` line endings; never fails.
    pub fn parse(text: &str) -> Document {
        let mut assembler = Assembler::new();
        for line in split_lines(text) {
            assembler.feed(line);
        }
        assembler.finalize()
    }

    /// Physical lines of `text`. A lone `\r` also ends a line, so no line carries one.
    pub fn split_lines(text: &str) -> impl Iterator<Item = &str> {
        let mut rest = Some(text);
        std::iter::from_fn(move || {
            let current = rest?;
            match current.find(['\n', '\r']) {
                Some(at) => {
                    let width = if current[at..].starts_with("\r\n") { 2 } else { 1 };
                    rest = Some(&current[at + width..]);
                    Some(&current[..at])
                }
                None => {
                    rest = None;
                    Some(current)
                }
            }
        })
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Assembly {
        /// No item is open; `title` waits for the first item of the next group.
        Between { title: Option<String> },
        /// A group is being built. `current` still accepts continuation lines.
        InGroup {
            title: Option<String>,
            items: Vec<Item>,
            current: Item,
        },
    }

    impl Default for Assembly {
        fn default() -> Self {
            Assembly::Between { title: None }
        }
    }

    /// Incremental document builder.
    #[derive(Debug, Default)]
    pub struct Assembler {
        groups: Vec<Group>,
        state: Assembly,
    }

    impl Assembler {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn item_open(&self) -> bool {
            matches!(self.state, Assembly::InGroup { .. })
        }

        /// Classify a raw line against the current state and advance.
        pub fn feed(&mut self, raw: &str) {
            let line = classify_line(raw, self.item_open());
            self.advance(line);
        }

        pub fn advance(&mut self, line: Line<'_>) {
            let state = std::mem::take(&mut self.state);
            self.state = match (state, line) {
                (state, Line::Blank) => {
                    self.close(state);
                    Assembly::default()
                }
                (
                    Assembly::InGroup {
                        title,
                        items,
                        mut current,
                    },
                    Line::Continuation(text),
                ) => {
                    current.continuation_lines.push(text.to_string());
                    Assembly::InGroup {
                        title,
                        items,
                        current,
                    }
                }
                // Nothing to continue: read the line back as title text.
                (Assembly::Between { title }, Line::Continuation(text)) => {
                    pending_title(title, format!("{CONTINUATION_INDENT}{text}"))
                }
                (Assembly::Between { title }, Line::ItemCandidate { status, rest }) => {
                    Assembly::InGroup {
                        title,
                        items: vec![],
                        current: build_item(status, rest),
                    }
                }
                (
                    Assembly::InGroup {
                        title,
                        mut items,
                        current,
                    },
                    Line::ItemCandidate { status, rest },
                ) => {
                    items.push(current);
                    Assembly::InGroup {
                        title,
                        items,
                        current: build_item(status, rest),
                    }
                }
                (Assembly::Between { title }, Line::Title(text)) => {
                    pending_title(title, text.to_string())
                }
                (state @ Assembly::InGroup { .. }, Line::Title(text)) => {
                    self.close(state);
                    Assembly::Between {
                        title: Some(text.to_string()),
                    }
                }
            };
        }

        /// Close whatever is still open and return the document.
        pub fn finalize(mut self) -> Document {
            let state = std::mem::take(&mut self.state);
            self.close(state);
            Document::new(self.groups)
        }

        fn close(&mut self, state: Assembly) {
            match state {
                Assembly::InGroup {
                    title,
                    mut items,
                    current,
                } => {
                    items.push(current);
                    self.groups.push(Group::new(title, items));
                }
                Assembly::Between { title: Some(title) } => {
                    log::debug!("dropping title {title:?}: no item follows it");
                }
                Assembly::Between { title: None } => {}
            }
        }
    }

    /// The last title before an item wins.
    fn pending_title(previous: Option<String>, title: String) -> Assembly {
        if let Some(previous) = previous {
            log::debug!("title {previous:?} replaced by {title:?} before any item");
        }
        Assembly::Between { title: Some(title) }
    }

}

pub mod format {
    //! Renders a [`Document`] back to xit! text.
    //!
    //! Output is normalised rather than byte-preserving: checkbox spacing is canonical,
    //! groups are separated by exactly one blank line and titles without items are gone.
    //! Re-parsing the output yields the same model.

    use crate::core::{Document, Group, Item};
    use crate::grammar::CONTINUATION_INDENT;

    pub fn serialize(doc: &Document) -> String {
        doc.groups
            .iter()
            .map(render_group)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn render_group(group: &Group) -> String {
        let mut lines = Vec::with_capacity(group.items.len() + 1);
        if let Some(title) = &group.title {
            lines.push(title.clone());
        }
        lines.extend(group.items.iter().map(render_item));
        lines.join("\n")
    }

    pub fn render_item(item: &Item) -> String {
        let mut buf = String::from(item.status.checkbox());
        if item.priority > 0 {
            buf.push(' ');
            buf.push_str(&"!".repeat(item.priority));
        }
        if !item.description().is_empty() {
            buf.push(' ');
            buf.push_str(item.description());
        }
        for line in &item.continuation_lines {
            buf.push('\n');
            buf.push_str(CONTINUATION_INDENT);
            buf.push_str(line);
        }
        buf
    }

}

pub mod summary {
    //! Read-model projections for host views: status tallies, status filters and
    //! overdue listings. Items are referenced by structural position, not identity.

    use crate::clock::Clock;
    use crate::core::{Document, DueDate, Group, Item, Status};
    use indexmap::IndexMap;
    use serde::Serialize;

    /// Item count per status, in [`Status::ALL`] order.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(transparent)]
    pub struct StatusCounts {
        counts: IndexMap<Status, usize>,
    }

    impl StatusCounts {
        pub fn tally<'a>(items: impl IntoIterator<Item = &'a Item>) -> Self {
            let mut counts: IndexMap<Status, usize> =
                Status::ALL.into_iter().map(|status| (status, 0)).collect();
            for item in items {
                *counts.entry(item.status).or_default() += 1;
            }
            Self { counts }
        }

        pub fn get(&self, status: Status) -> usize {
            self.counts.get(&status).copied().unwrap_or(0)
        }

        pub fn total(&self) -> usize {
            self.counts.values().sum()
        }

        pub fn iter(&self) -> impl Iterator<Item = (Status, usize)> + '_ {
            self.counts.iter().map(|(status, n)| (*status, *n))
        }
    }

    impl Group {
        pub fn status_counts(&self) -> StatusCounts {
            StatusCounts::tally(&self.items)
        }
    }

    impl Document {
        pub fn status_counts(&self) -> StatusCounts {
            StatusCounts::tally(self.items())
        }
    }

    /// Position of an item inside a document.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
    pub struct ItemRef {
        pub group: usize,
        pub item: usize,
    }

    impl Document {
        pub fn item(&self, at: ItemRef) -> Option<&Item> {
            self.groups.get(at.group)?.items.get(at.item)
        }
    }

    /// Indices of the items in `group` with the given status.
    pub fn items_with_status(group: &Group, status: Status) -> Vec<usize> {
        group
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status == status)
            .map(|(idx, _)| idx)
            .collect()
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct OverdueItem<'a> {
        pub at: ItemRef,
        pub group_title: Option<&'a str>,
        pub item: &'a Item,
        pub due: &'a DueDate,
    }

    /// Items whose due date ended before the clock's today, in document order.
    pub fn overdue_items<'a>(doc: &'a Document, clock: &dyn Clock) -> Vec<OverdueItem<'a>> {
        let mut out = Vec::new();
        for (group_idx, group) in doc.groups.iter().enumerate() {
            for (item_idx, item) in group.items.iter().enumerate() {
                let Some(due) = item.due_date() else {
                    continue;
                };
                if due.is_overdue_with(clock) {
                    out.push(OverdueItem {
                        at: ItemRef {
                            group: group_idx,
                            item: item_idx,
                        },
                        group_title: group.title.as_deref(),
                        item,
                        due,
                    });
                }
            }
        }
        out
    }

}

pub use clock::{Clock, FixedClock, SystemClock};
pub use crate::core::{Document, DueDate, DueDateKind, Group, Item, Status, Tag};
pub use format::serialize;
pub use grammar::{classify_due_date, extract_tags};
pub use parser::parse;
