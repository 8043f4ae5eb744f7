//! Quick-entry short syntax for a personal task manager.
//! A single text field becomes a structured changeset: durations (`10m/1h`),
//! due dates (`@friday 4pm`), a project (`+Work`) and tags (`#urgent`).
//! The `slots` module answers the scheduling question that follows: when is
//! the next free stretch long enough for the task.

pub use slots::{DEFAULT_MAX_DAYS_TO_CHECK, find_next_available_start, find_next_available_start_in};
pub use syntax::{short_syntax, short_syntax_local, short_syntax_with_engine};

pub mod core {
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;
    use uuid::Uuid;

    /* ------------------------------- IDs ------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TagId(pub String);

    impl TagId {
        pub fn new() -> Self {
            Self(Uuid::new_v4().to_string())
        }
    }

    impl From<&str> for TagId {
        fn from(s: &str) -> Self {
            Self(s.to_string())
        }
    }

    impl fmt::Display for TagId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ProjectId(pub String);

    impl ProjectId {
        pub fn new() -> Self {
            Self(Uuid::new_v4().to_string())
        }
    }

    impl From<&str> for ProjectId {
        fn from(s: &str) -> Self {
            Self(s.to_string())
        }
    }

    impl fmt::Display for ProjectId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    /* ----------------------------- Candidates ----------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Tag {
        pub id: TagId,
        pub title: String,
    }

    impl Tag {
        pub fn new(id: impl Into<TagId>, title: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                title: title.into(),
            }
        }
    }

    impl From<String> for TagId {
        fn from(s: String) -> Self {
            Self(s)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Project {
        pub id: ProjectId,
        pub title: String,
        #[serde(default)]
        pub is_archived: bool,
        #[serde(default)]
        pub is_hidden_from_menu: bool,
    }

    impl Project {
        pub fn new(id: impl Into<ProjectId>, title: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                title: title.into(),
                is_archived: false,
                is_hidden_from_menu: false,
            }
        }

        /// Archived and hidden projects never take part in `+` matching.
        pub fn is_selectable(&self) -> bool {
            !self.is_archived && !self.is_hidden_from_menu
        }
    }

    impl From<String> for ProjectId {
        fn from(s: String) -> Self {
            Self(s)
        }
    }

    /* ------------------------------ Task input ------------------------------ */

    /// Milliseconds tracked per local calendar day (`YYYY-MM-DD`).
    pub type TimeSpentOnDay = IndexMap<String, u64>;

    /// The task as the entry field currently sees it.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TaskDraft {
        pub title: String,
        #[serde(default)]
        pub tag_ids: Vec<TagId>,
        #[serde(default)]
        pub time_spent_on_day: TimeSpentOnDay,
    }

    impl TaskDraft {
        pub fn new(title: impl Into<String>) -> Self {
            Self {
                title: title.into(),
                ..Self::default()
            }
        }

        pub fn with_tag_ids<I, T>(mut self, ids: I) -> Self
        where
            I: IntoIterator<Item = T>,
            T: Into<TagId>,
        {
            self.tag_ids = ids.into_iter().map(Into::into).collect();
            self
        }

        /// Returns a new draft with `changes` folded in. Fields that do not
        /// live on the draft (estimate, due date) are ignored.
        pub fn apply(&self, changes: &TaskChanges) -> TaskDraft {
            TaskDraft {
                title: changes.title.clone().unwrap_or_else(|| self.title.clone()),
                tag_ids: changes
                    .tag_ids
                    .clone()
                    .unwrap_or_else(|| self.tag_ids.clone()),
                time_spent_on_day: changes
                    .time_spent_on_day
                    .clone()
                    .unwrap_or_else(|| self.time_spent_on_day.clone()),
            }
        }
    }

    /// Feature flags gating the `@`, `+` and `#` extractors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct ParseConfig {
        pub is_enable_due: bool,
        pub is_enable_project: bool,
        pub is_enable_tag: bool,
    }

    impl Default for ParseConfig {
        fn default() -> Self {
            Self {
                is_enable_due: true,
                is_enable_project: true,
                is_enable_tag: true,
            }
        }
    }

    impl ParseConfig {
        pub fn disabled() -> Self {
            Self {
                is_enable_due: false,
                is_enable_project: false,
                is_enable_tag: false,
            }
        }

        pub fn any_enabled(&self) -> bool {
            self.is_enable_due || self.is_enable_project || self.is_enable_tag
        }
    }

    /* ------------------------------ Changesets ------------------------------ */

    /// Partial task update. Absent fields are left as the caller has them.
    #[serde_with::skip_serializing_none]
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TaskChanges {
        pub title: Option<String>,
        pub time_estimate: Option<u64>,
        pub time_spent_on_day: Option<TimeSpentOnDay>,
        /// Epoch milliseconds.
        pub due_with_time: Option<i64>,
        /// `Some(false)` marks a due date without a committed clock time.
        pub has_planned_time: Option<bool>,
        pub tag_ids: Option<Vec<TagId>>,
    }

    impl TaskChanges {
        /// Shallow merge; fields set on `later` win.
        pub fn merge(&mut self, later: TaskChanges) {
            self.title = later.title.or(self.title.take());
            self.time_estimate = later.time_estimate.or(self.time_estimate);
            self.time_spent_on_day = later.time_spent_on_day.or(self.time_spent_on_day.take());
            self.due_with_time = later.due_with_time.or(self.due_with_time);
            self.has_planned_time = later.has_planned_time.or(self.has_planned_time);
            self.tag_ids = later.tag_ids.or(self.tag_ids.take());
        }

        pub fn is_empty(&self) -> bool {
            *self == TaskChanges::default()
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ParseResult {
        pub task_changes: TaskChanges,
        pub new_tag_titles: Vec<String>,
        /// Reserved for reminders; always `None`.
        pub remind_at: Option<i64>,
        pub project_id: Option<ProjectId>,
    }

    /* ---------------------------- Blocked time ---------------------------- */

    /// Half-open busy interval in epoch milliseconds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BlockedBlock {
        pub start: i64,
        pub end: i64,
    }

    impl BlockedBlock {
        pub fn new(start: i64, end: i64) -> Self {
            Self { start, end }
        }
    }

    /// Busy intervals keyed by local calendar day (`YYYY-MM-DD`).
    pub type BlockedBlocksByDay = IndexMap<String, Vec<BlockedBlock>>;

    pub fn day_key(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    /* ------------------------------- Errors ------------------------------- */

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum DomainError {
        #[error("duplicate tag id {0}")]
        DuplicateTagId(TagId),
        #[error("duplicate project id {0}")]
        DuplicateProjectId(ProjectId),
        #[error("{kind} {id} has a blank title")]
        BlankTitle { kind: &'static str, id: String },
        #[error("blocked interval ends before it starts: {start}..{end}")]
        InvertedBlock { start: i64, end: i64 },
    }

}

/// Helpers shared by the `+`, `#` and `@` extractors.
mod tokens {
    /// A marker only opens a token at the start of the title or after whitespace.
    pub(crate) fn has_boundary_before(title: &str, idx: usize) -> bool {
        title[..idx].chars().next_back().is_none_or(char::is_whitespace)
    }

    /// Cuts `title[start..end]`, dropping one of the two whitespace runs that
    /// would otherwise meet in the middle.
    pub(crate) fn remove_span(title: &str, start: usize, end: usize) -> String {
        let head = &title[..start];
        let tail = &title[end..];
        match tail.chars().next() {
            Some(c) if c.is_whitespace() && head.ends_with(char::is_whitespace) => {
                format!("{head}{}", &tail[c.len_utf8()..])
            }
            _ => format!("{head}{tail}"),
        }
    }

}

pub mod catalog {
    //! Candidate tags and projects plus the parse flags, as kept in a JSON file.

    use super::core::*;
    use anyhow::{Context, Result};
    use serde::{Deserialize, Serialize};
    use std::{collections::HashSet, fs, path::Path};

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Catalog {
        pub config: ParseConfig,
        pub tags: Vec<Tag>,
        pub projects: Vec<Project>,
    }

    impl Catalog {
        pub fn from_json_str(input: &str) -> Result<Self> {
            let catalog: Catalog = serde_json::from_str(input).context("parsing catalog json")?;
            catalog.validate()?;
            Ok(catalog)
        }

        pub fn load(path: &Path) -> Result<Self> {
            let text =
                fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
            Self::from_json_str(&text).with_context(|| format!("loading catalog {:?}", path))
        }

        pub fn save(&self, path: &Path) -> Result<()> {
            let text = serde_json::to_string_pretty(self).context("serializing catalog")?;
            fs::write(path, text + "\n").with_context(|| format!("writing {:?}", path))
        }

        pub fn validate(&self) -> Result<(), DomainError> {
            let mut seen = HashSet::new();
            for tag in &self.tags {
                if !seen.insert(&tag.id) {
                    return Err(DomainError::DuplicateTagId(tag.id.clone()));
                }
                if tag.title.trim().is_empty() {
                    return Err(DomainError::BlankTitle {
                        kind: "tag",
                        id: tag.id.to_string(),
                    });
                }
            }
            let mut seen = HashSet::new();
            for project in &self.projects {
                if !seen.insert(&project.id) {
                    return Err(DomainError::DuplicateProjectId(project.id.clone()));
                }
                if project.title.trim().is_empty() {
                    return Err(DomainError::BlankTitle {
                        kind: "project",
                        id: project.id.to_string(),
                    });
                }
            }
            Ok(())
        }

        pub fn active_projects(&self) -> Vec<Project> {
            self.projects
                .iter()
                .filter(|p| p.is_selectable())
                .cloned()
                .collect()
        }

        pub fn tag_by_id(&self, id: &TagId) -> Option<&Tag> {
            self.tags.iter().find(|t| &t.id == id)
        }

        pub fn project_by_id(&self, id: &ProjectId) -> Option<&Project> {
            self.projects.iter().find(|p| &p.id == id)
        }

        /// Mints tags for titles reported as new by the parser. Titles that
        /// already exist (case-insensitively) or are blank are skipped.
        pub fn create_tags(&mut self, titles: &[String]) -> Vec<Tag> {
            let mut created = Vec::new();
            for title in titles {
                let title = title.trim();
                if title.is_empty() {
                    continue;
                }
                let lower = title.to_lowercase();
                if self.tags.iter().any(|t| t.title.to_lowercase() == lower) {
                    continue;
                }
                let tag = Tag::new(TagId::new(), title);
                log::debug!("created tag {:?} as {}", tag.title, tag.id);
                self.tags.push(tag.clone());
                created.push(tag);
            }
            created
        }
    }

}

pub mod duration {
    //! `10m/1h` style tokens: optional time spent today, then the estimate.

    use super::core::{TaskChanges, TimeSpentOnDay};
    use super::tokens::remove_span;
    use regex::Regex;
    use std::sync::OnceLock;

    const MINUTE_MS: f64 = 60_000.0;
    const HOUR_MS: f64 = 3_600_000.0;
    const DAY_MS: f64 = 86_400_000.0;

    fn token_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(
                r"(?i)\st?(?:((?:[0-9]+(?:\.[0-9]+)?[mhd])+)\s*/\s*)?((?:[0-9]+(?:\.[0-9]+)?[mhd])+)",
            )
            .unwrap()
        })
    }

    fn part_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"(?i)([0-9]+(?:\.[0-9]+)?)([mhd])").unwrap())
    }

    /// `"1h30m"` -> 5_400_000. The whole input must be duration parts.
    pub fn parse_duration_ms(input: &str) -> Option<u64> {
        let input = input.trim();
        let mut pos = 0;
        let mut total = 0.0;
        for caps in part_re().captures_iter(input) {
            let whole = caps.get(0)?;
            if whole.start() != pos {
                return None;
            }
            pos = whole.end();
            let value: f64 = caps[1].parse().ok()?;
            let unit = match caps[2].to_ascii_lowercase().as_str() {
                "m" => MINUTE_MS,
                "h" => HOUR_MS,
                _ => DAY_MS,
            };
            total += value * unit;
        }
        (pos > 0 && pos == input.len()).then_some(total as u64)
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TimeToken {
        pub start: usize,
        pub end: usize,
        pub time_spent: Option<u64>,
        pub time_estimate: u64,
    }

    /// Last duration token that only has whitespace after it. Duration tokens
    /// directly before it belong to the same span; only the last one counts.
    pub fn find_time_token(title: &str) -> Option<TimeToken> {
        let all: Vec<_> = token_re().captures_iter(title).collect();
        let (caps, earlier) = all.split_last()?;
        let whole = caps.get(0)?;
        if !title[whole.end()..].trim().is_empty() {
            return None;
        }
        let mut start = whole.start();
        for prev in earlier.iter().rev().filter_map(|c| c.get(0)) {
            if !title[prev.end()..start].trim().is_empty() {
                break;
            }
            start = prev.start();
        }
        let time_spent = match caps.get(1) {
            Some(m) => Some(parse_duration_ms(m.as_str())?),
            None => None,
        };
        let time_estimate = parse_duration_ms(caps.get(2)?.as_str())?;
        Some(TimeToken {
            start,
            end: whole.end(),
            time_spent,
            time_estimate,
        })
    }

    /// Strips the duration token and reports estimate and time spent.
    /// Time spent is booked on `today` on top of the existing per-day map.
    pub fn parse_time_spent_changes(
        title: &str,
        time_spent_on_day: &TimeSpentOnDay,
        today: &str,
    ) -> TaskChanges {
        let Some(token) = find_time_token(title) else {
            return TaskChanges::default();
        };
        log::trace!("duration token {:?}", &title[token.start..token.end]);
        let time_spent_on_day = token.time_spent.map(|spent| {
            let mut days = time_spent_on_day.clone();
            days.insert(today.to_string(), spent);
            days
        });
        TaskChanges {
            title: Some(remove_span(title, token.start, token.end)),
            time_estimate: Some(token.time_estimate),
            time_spent_on_day,
            ..TaskChanges::default()
        }
    }

}

pub mod dates {
    //! Casual date/time expressions (`friday 4pm`, `tomorrow`, `in 2 hours`).
    //! The schedule extractor only relies on the [`DateEngine`] trait.

    use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Weekday};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while},
        character::complete::{char, digit1, satisfy, space0, space1},
        combinator::{map, map_opt, map_res, not, opt, recognize, value},
        error::{VerboseError, VerboseErrorKind},
        sequence::{pair, preceded, terminated, tuple},
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Component {
        Day,
        Hour,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DateParseOptions {
        /// Resolve ambiguous expressions to the future.
        pub forward_date: bool,
    }

    impl Default for DateParseOptions {
        fn default() -> Self {
            Self { forward_date: true }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ParsedComponents {
        pub date_time: NaiveDateTime,
        certain_day: bool,
        certain_hour: bool,
    }

    impl ParsedComponents {
        pub fn new(date_time: NaiveDateTime, certain_day: bool, certain_hour: bool) -> Self {
            Self {
                date_time,
                certain_day,
                certain_hour,
            }
        }

        /// Whether `component` was spelled out rather than implied.
        pub fn is_certain(&self, component: Component) -> bool {
            match component {
                Component::Day => self.certain_day,
                Component::Hour => self.certain_hour,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ParsedDate {
        /// Byte offset of the match in the parsed text.
        pub index: usize,
        /// Matched text as written.
        pub text: String,
        pub start: ParsedComponents,
    }

    pub trait DateEngine {
        fn parse(
            &self,
            text: &str,
            reference: NaiveDateTime,
            options: DateParseOptions,
        ) -> Vec<ParsedDate>;
    }

    /// Small English grammar; scans every word start and keeps the matches.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct CasualDateEngine;

    impl DateEngine for CasualDateEngine {
        fn parse(
            &self,
            text: &str,
            reference: NaiveDateTime,
            options: DateParseOptions,
        ) -> Vec<ParsedDate> {
            // ASCII lowercasing keeps byte offsets valid for `text`.
            let lower = text.to_ascii_lowercase();
            let mut found = Vec::new();
            let mut skip_until = 0;
            for (idx, c) in lower.char_indices() {
                if idx < skip_until || !c.is_alphanumeric() {
                    continue;
                }
                if lower[..idx]
                    .chars()
                    .next_back()
                    .is_some_and(char::is_alphanumeric)
                {
                    continue;
                }
                let Ok((rest, expr)) = expression(&lower[idx..]) else {
                    continue;
                };
                let end = lower.len() - rest.len();
                let Some(start) = resolve(&expr, reference, options) else {
                    continue;
                };
                found.push(ParsedDate {
                    index: idx,
                    text: text[idx..end].to_string(),
                    start,
                });
                skip_until = end;
            }
            found
        }
    }

    /* ------------------------------- Grammar ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Unit {
        Minute,
        Hour,
        Day,
        Week,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum DayExpr {
        Today,
        Tomorrow,
        Yesterday,
        Weekday { day: Weekday, next: bool },
        Date(NaiveDate),
        MonthDay { month: u32, day: u32 },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Expr {
        Now,
        Relative { amount: i64, unit: Unit },
        Moment {
            day: Option<DayExpr>,
            time: Option<NaiveTime>,
        },
    }

    const WEEKDAYS: &[(&str, Weekday)] = &[
        ("monday", Weekday::Mon),
        ("mon", Weekday::Mon),
        ("tuesday", Weekday::Tue),
        ("tues", Weekday::Tue),
        ("tue", Weekday::Tue),
        ("wednesday", Weekday::Wed),
        ("wed", Weekday::Wed),
        ("thursday", Weekday::Thu),
        ("thurs", Weekday::Thu),
        ("thur", Weekday::Thu),
        ("thu", Weekday::Thu),
        ("friday", Weekday::Fri),
        ("fri", Weekday::Fri),
        ("saturday", Weekday::Sat),
        ("sat", Weekday::Sat),
        ("sunday", Weekday::Sun),
        ("sun", Weekday::Sun),
    ];

    const MONTHS: &[(&str, u32)] = &[
        ("january", 1),
        ("jan", 1),
        ("february", 2),
        ("feb", 2),
        ("march", 3),
        ("mar", 3),
        ("april", 4),
        ("apr", 4),
        ("may", 5),
        ("june", 6),
        ("jun", 6),
        ("july", 7),
        ("jul", 7),
        ("august", 8),
        ("aug", 8),
        ("september", 9),
        ("sept", 9),
        ("sep", 9),
        ("october", 10),
        ("oct", 10),
        ("november", 11),
        ("nov", 11),
        ("december", 12),
        ("dec", 12),
    ];

    const UNITS: &[(&str, Unit)] = &[
        ("minutes", Unit::Minute),
        ("minute", Unit::Minute),
        ("mins", Unit::Minute),
        ("min", Unit::Minute),
        ("hours", Unit::Hour),
        ("hour", Unit::Hour),
        ("hrs", Unit::Hour),
        ("hr", Unit::Hour),
        ("days", Unit::Day),
        ("day", Unit::Day),
        ("weeks", Unit::Week),
        ("week", Unit::Week),
    ];

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    fn expression(i: &str) -> PResult<'_, Expr> {
        preceded(
            opt(pair(alt((word("at"), word("on"))), space1)),
            alt((relative, value(Expr::Now, word("now")), day_first, time_first)),
        )(i)
    }

    fn relative(i: &str) -> PResult<'_, Expr> {
        map(
            tuple((
                word("in"),
                space1,
                alt((
                    map_res(digit1, |s: &str| s.parse::<i64>()),
                    value(1, alt((word("an"), word("a")))),
                )),
                space1,
                lookup(UNITS, "unit"),
            )),
            |(_, _, amount, _, unit)| Expr::Relative { amount, unit },
        )(i)
    }

    fn day_first(i: &str) -> PResult<'_, Expr> {
        map(
            pair(day_expr, opt(preceded(separator, time_expr))),
            |(day, time)| Expr::Moment {
                day: Some(day),
                time,
            },
        )(i)
    }

    fn time_first(i: &str) -> PResult<'_, Expr> {
        map(
            pair(time_expr, opt(preceded(separator, day_expr))),
            |(time, day)| Expr::Moment {
                day,
                time: Some(time),
            },
        )(i)
    }

    fn separator(i: &str) -> PResult<'_, &str> {
        alt((
            recognize(tuple((space0, char(','), space0))),
            recognize(tuple((space1, alt((word("at"), word("on"))), space1))),
            space1,
        ))(i)
    }

    fn day_expr(i: &str) -> PResult<'_, DayExpr> {
        alt((
            value(DayExpr::Today, word("today")),
            value(
                DayExpr::Tomorrow,
                alt((word("tomorrow"), word("tmrw"), word("tmr"))),
            ),
            value(DayExpr::Yesterday, word("yesterday")),
            map(
                preceded(pair(word("next"), space1), lookup(WEEKDAYS, "weekday")),
                |day| DayExpr::Weekday { day, next: true },
            ),
            map(lookup(WEEKDAYS, "weekday"), |day| DayExpr::Weekday {
                day,
                next: false,
            }),
            map(terminated(parse_date, boundary), DayExpr::Date),
            map(
                tuple((lookup(MONTHS, "month"), space1, day_of_month)),
                |(month, _, day)| DayExpr::MonthDay { month, day },
            ),
            map(
                tuple((day_of_month, space1, lookup(MONTHS, "month"))),
                |(day, _, month)| DayExpr::MonthDay { month, day },
            ),
        ))(i)
    }

    fn day_of_month(i: &str) -> PResult<'_, u32> {
        terminated(
            map_opt(take_while_m_n(1, 2, char_is_digit), |s: &str| {
                s.parse::<u32>().ok().filter(|d| (1..=31).contains(d))
            }),
            pair(
                opt(alt((tag("st"), tag("nd"), tag("rd"), tag("th")))),
                boundary,
            ),
        )(i)
    }

    fn time_expr(i: &str) -> PResult<'_, NaiveTime> {
        alt((
            map_opt(word("noon"), |_| NaiveTime::from_hms_opt(12, 0, 0)),
            value(NaiveTime::MIN, word("midnight")),
            meridiem_time,
            terminated(parse_time, boundary),
        ))(i)
    }

    fn meridiem_time(i: &str) -> PResult<'_, NaiveTime> {
        map_opt(
            tuple((
                take_while_m_n(1, 2, char_is_digit),
                opt(preceded(char(':'), take_while_m_n(2, 2, char_is_digit))),
                space0,
                alt((tag("am"), tag("pm"), tag("a.m."), tag("p.m."))),
                boundary,
            )),
            |(h, m, _, meridiem, _): (&str, Option<&str>, &str, &str, ())| {
                let h: u32 = h.parse().ok().filter(|h| (1..=12).contains(h))?;
                let m: u32 = m.map_or(Some(0), |m| m.parse().ok())?;
                let h = match (meridiem.starts_with('p'), h) {
                    (true, 12) => 12,
                    (true, h) => h + 12,
                    (false, 12) => 0,
                    (false, h) => h,
                };
                NaiveTime::from_hms_opt(h, m, 0)
            },
        )(i)
    }

    fn parse_date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((
                map_res(take_while_m_n(4, 4, char_is_digit), |s: &str| {
                    s.parse::<i32>()
                }),
                char('-'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| {
                    s.parse::<u32>()
                }),
                char('-'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| {
                    s.parse::<u32>()
                }),
            )),
            |(y, _, m, _, d)| NaiveDate::from_ymd_opt(y, m, d).ok_or("invalid date"),
        )(i)
    }

    fn parse_time(i: &str) -> PResult<'_, NaiveTime> {
        map_res(
            tuple((
                map_res(take_while_m_n(1, 2, char_is_digit), |s: &str| {
                    s.parse::<u32>()
                }),
                char(':'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| {
                    s.parse::<u32>()
                }),
            )),
            |(h, _, m)| NaiveTime::from_hms_opt(h, m, 0).ok_or("invalid time"),
        )(i)
    }

    /// Keyword that must not run into further letters or digits.
    fn word<'a>(w: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
        terminated(tag(w), boundary)
    }

    fn boundary(i: &str) -> PResult<'_, ()> {
        not(satisfy(|c| c.is_alphanumeric()))(i)
    }

    fn lookup<'a, T: Copy>(
        table: &'static [(&'static str, T)],
        label: &'static str,
    ) -> impl Fn(&'a str) -> PResult<'a, T> {
        move |i: &'a str| {
            for &(name, found) in table {
                if let Ok((rest, _)) = word(name)(i) {
                    return Ok((rest, found));
                }
            }
            Err(nom::Err::Error(VerboseError {
                errors: vec![(i, VerboseErrorKind::Context(label))],
            }))
        }
    }

    fn take_while_m_n<F>(m: usize, n: usize, cond: F) -> impl Fn(&str) -> PResult<'_, &str>
    where
        F: Fn(char) -> bool + Copy,
    {
        move |i: &str| {
            let (i, out) = take_while(cond)(i)?;
            if out.len() < m || out.len() > n {
                Err(nom::Err::Error(VerboseError {
                    errors: vec![(i, VerboseErrorKind::Context("m_n"))],
                }))
            } else {
                Ok((i, out))
            }
        }
    }

    fn char_is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

    /* ------------------------------ Resolution ------------------------------ */

    fn resolve(
        expr: &Expr,
        reference: NaiveDateTime,
        options: DateParseOptions,
    ) -> Option<ParsedComponents> {
        match *expr {
            Expr::Now => Some(ParsedComponents::new(reference, true, true)),
            Expr::Relative { amount, unit } => {
                let (delta, certain_hour) = match unit {
                    Unit::Minute => (TimeDelta::try_minutes(amount)?, true),
                    Unit::Hour => (TimeDelta::try_hours(amount)?, true),
                    Unit::Day => (TimeDelta::try_days(amount)?, false),
                    Unit::Week => (TimeDelta::try_weeks(amount)?, false),
                };
                let at = reference.checked_add_signed(delta)?;
                Some(ParsedComponents::new(at, true, certain_hour))
            }
            Expr::Moment { day, time } => {
                let today = reference.date();
                let date = match day {
                    Some(d) => resolve_day(d, today)?,
                    None => today,
                };
                let implied_noon = NaiveTime::from_hms_opt(12, 0, 0)?;
                let mut at = date.and_time(time.unwrap_or(implied_noon));
                if options.forward_date && at < reference {
                    at = match day {
                        None => at.checked_add_days(Days::new(1))?,
                        Some(DayExpr::Weekday { .. }) => at.checked_add_days(Days::new(7))?,
                        Some(DayExpr::MonthDay { month, day }) => {
                            NaiveDate::from_ymd_opt(date.year() + 1, month, day)?
                                .and_time(at.time())
                        }
                        Some(_) => at,
                    };
                }
                Some(ParsedComponents::new(at, day.is_some(), time.is_some()))
            }
        }
    }

    fn resolve_day(day: DayExpr, today: NaiveDate) -> Option<NaiveDate> {
        match day {
            DayExpr::Today => Some(today),
            DayExpr::Tomorrow => today.succ_opt(),
            DayExpr::Yesterday => today.pred_opt(),
            DayExpr::Date(d) => Some(d),
            DayExpr::Weekday { day, next } => {
                let diff = (i64::from(day.num_days_from_monday())
                    - i64::from(today.weekday().num_days_from_monday()))
                .rem_euclid(7);
                let diff = if next && diff == 0 { 7 } else { diff };
                today.checked_add_days(Days::new(diff.unsigned_abs()))
            }
            DayExpr::MonthDay { month, day } => NaiveDate::from_ymd_opt(today.year(), month, day),
        }
    }

}

pub mod schedule {
    //! `@friday 4pm`, `@tomorrow`, `@16`.

    use super::dates::{Component, DateEngine, DateParseOptions};
    use super::tokens::{has_boundary_before, remove_span};
    use chrono::{NaiveDateTime, NaiveTime};
    use regex::Regex;
    use std::sync::OnceLock;

    fn token_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"@[^+#@]+").unwrap())
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ScheduleMatch {
        pub title: String,
        /// Wall-clock time in the caller's zone.
        pub due: NaiveDateTime,
        /// False when only the day was given.
        pub has_time: bool,
    }

    /// Uses the first `@` token. Further `@` tokens that also name a date are
    /// dropped from the title so the result does not parse again.
    pub fn parse_scheduled_date(
        title: &str,
        now: NaiveDateTime,
        engine: &dyn DateEngine,
    ) -> Option<ScheduleMatch> {
        let token = token_re()
            .find_iter(title)
            .find(|m| has_boundary_before(title, m.start()))?;
        let at = token.start();
        let (len, due, has_time) = resolve_token(&token.as_str()[1..], now, engine)?;
        let mut title = remove_span(title, at, at + 1 + len);

        loop {
            let extra = token_re()
                .find_iter(&title)
                .filter(|m| m.start() >= at && has_boundary_before(&title, m.start()))
                .find_map(|m| {
                    let (len, _, _) = resolve_token(&m.as_str()[1..], now, engine)?;
                    Some((m.start(), m.start() + 1 + len))
                });
            let Some((start, end)) = extra else {
                break;
            };
            log::trace!("dropping extra date {:?}", &title[start..end]);
            title = remove_span(&title, start, end);
        }

        Some(ScheduleMatch {
            title,
            due,
            has_time,
        })
    }

    /// Length of the date text right after `@`, the date and whether a time
    /// of day was given.
    fn resolve_token(
        text: &str,
        now: NaiveDateTime,
        engine: &dyn DateEngine,
    ) -> Option<(usize, NaiveDateTime, bool)> {
        let parsed = engine
            .parse(text, now, DateParseOptions { forward_date: true })
            .into_iter()
            .find(|p| p.index == 0);
        if let Some(parsed) = parsed {
            log::trace!("date {:?} -> {}", parsed.text, parsed.start.date_time);
            return Some((
                parsed.text.len(),
                parsed.start.date_time,
                parsed.start.is_certain(Component::Hour),
            ));
        }
        let word = text.split(char::is_whitespace).next()?;
        let due = bare_hour(word, now)?;
        Some((word.len(), due, true))
    }

    /// `16` is today at 16:00, even if that already passed. `24` is the
    /// midnight that ends today.
    fn bare_hour(word: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if word.is_empty() || !word.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let hour: u32 = word.parse().ok()?;
        let today = now.date();
        match hour {
            0..=23 => Some(today.and_time(NaiveTime::from_hms_opt(hour, 0, 0)?)),
            24 => Some(today.succ_opt()?.and_time(NaiveTime::MIN)),
            _ => None,
        }
    }

}

pub mod project {
    //! `+Project` tokens, matched by title prefix.

    use super::core::{Project, ProjectId};
    use super::tokens::{has_boundary_before, remove_span};
    use regex::Regex;
    use std::sync::OnceLock;

    fn token_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"\+[^+#@]+").unwrap())
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ProjectMatch {
        pub title: String,
        pub project_id: ProjectId,
    }

    /// Only the first `+` token is considered. When the whole token matches
    /// nothing, its first word is tried on its own.
    pub fn parse_project_changes(title: &str, projects: &[Project]) -> Option<ProjectMatch> {
        if projects.is_empty() {
            return None;
        }
        let token = token_re().find(title)?;
        if !has_boundary_before(title, token.start()) {
            return None;
        }
        let typed = &token.as_str()[1..];
        if typed.starts_with(char::is_whitespace) {
            return None;
        }
        let typed = typed.trim_end();

        let mut by_length: Vec<&Project> = projects.iter().collect();
        by_length.sort_by_key(|p| p.title.chars().count());

        let (project, matched) = match find_by_prefix(&by_length, typed) {
            Some(project) => (project, typed),
            None => {
                let first_word = typed.split_whitespace().next()?;
                (find_by_prefix(&by_length, first_word)?, first_word)
            }
        };
        log::trace!("project {:?} matched {:?}", matched, project.title);
        let start = token.start();
        Some(ProjectMatch {
            title: remove_span(title, start, start + 1 + matched.len()),
            project_id: project.id.clone(),
        })
    }

    fn find_by_prefix<'a>(candidates: &[&'a Project], typed: &str) -> Option<&'a Project> {
        let typed = normalize(typed);
        candidates
            .iter()
            .copied()
            .find(|p| normalize(&p.title).starts_with(&typed))
    }

    fn normalize(s: &str) -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn projects(titles: &[&str]) -> Vec<Project> {
            titles
                .iter()
                .map(|t| Project::new(format!("{t}_id"), *t))
                .collect()
        }

        #[test]
        fn shortest_title_wins() {
            let all = projects(&["printer", "imprints", "print", "printable"]);
            let m = parse_project_changes("Task +print", &all).unwrap();
            assert_eq!(m.project_id, ProjectId::from("print_id"));
            assert_eq!(m.title, "Task ");
            let m = parse_project_changes("Task +prin", &all).unwrap();
            assert_eq!(m.project_id, ProjectId::from("print_id"));
        }

        #[test]
        fn case_and_whitespace_insensitive() {
            let all = projects(&["Side Project"]);
            let m = parse_project_changes("Paint +sideproject", &all).unwrap();
            assert_eq!(m.project_id, ProjectId::from("Side Project_id"));
            let m = parse_project_changes("Paint +Side Project", &all).unwrap();
            assert_eq!(m.title, "Paint ");
        }

        #[test]
        fn falls_back_to_first_word() {
            let all = projects(&["Work"]);
            let m = parse_project_changes("Fix +Work stuff", &all).unwrap();
            assert_eq!(m.title, "Fix stuff");
            assert_eq!(m.project_id, ProjectId::from("Work_id"));
        }

        #[test]
        fn glued_plus_is_not_a_token() {
            let all = projects(&["foo"]);
            assert!(parse_project_changes("title+foo", &all).is_none());
            assert!(parse_project_changes("one + foo", &all).is_none());
        }

        #[test]
        fn unmatched_or_no_candidates() {
            assert!(parse_project_changes("Task +nope", &projects(&["Work"])).is_none());
            assert!(parse_project_changes("Task +Work", &[]).is_none());
        }
    }
}

pub mod tag {
    //! `#tag` tokens.

    use super::core::{Tag, TagId, TaskChanges};
    use super::tokens::{has_boundary_before, remove_span};
    use regex::Regex;
    use std::sync::OnceLock;

    /// Unknown all-digit tokens this close to the start read as issue numbers.
    pub const ISSUE_NUMBER_WINDOW: usize = 4;

    fn token_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"#[^\s+#@]+").unwrap())
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TagChanges {
        pub task_changes: TaskChanges,
        pub new_tag_titles: Vec<String>,
    }

    pub fn parse_tag_changes(
        title: &str,
        tag_ids: &[TagId],
        all_tags: &[Tag],
    ) -> Option<TagChanges> {
        let lead = title.len() - title.trim_start().len();
        let mut spans = Vec::new();
        let mut added: Vec<TagId> = Vec::new();
        let mut new_tag_titles: Vec<String> = Vec::new();

        for m in token_re().find_iter(title) {
            if !has_boundary_before(title, m.start()) {
                continue;
            }
            let text = &m.as_str()[1..];
            let lower = text.to_lowercase();
            match all_tags.iter().find(|t| t.title.to_lowercase() == lower) {
                Some(tag) => {
                    if !tag_ids.contains(&tag.id) && !added.contains(&tag.id) {
                        added.push(tag.id.clone());
                    }
                }
                None if is_issue_number(text, m.start() - lead) => continue,
                None => {
                    if !new_tag_titles.iter().any(|t| t.to_lowercase() == lower) {
                        new_tag_titles.push(text.to_string());
                    }
                }
            }
            spans.push((m.start(), m.end()));
        }

        if added.is_empty() && new_tag_titles.is_empty() {
            return None;
        }
        let mut cleaned = title.to_string();
        for &(start, end) in spans.iter().rev() {
            cleaned = remove_span(&cleaned, start, end);
        }
        let tag_ids = (!added.is_empty()).then(|| tag_ids.iter().cloned().chain(added).collect());
        Some(TagChanges {
            task_changes: TaskChanges {
                title: Some(cleaned),
                tag_ids,
                ..TaskChanges::default()
            },
            new_tag_titles,
        })
    }

    fn is_issue_number(text: &str, offset: usize) -> bool {
        offset < ISSUE_NUMBER_WINDOW && text.chars().all(|c| c.is_ascii_digit())
    }

}

pub mod syntax {
    //! Runs the extractors over a task title in a fixed order.
    //!
    //! Each stage sees the title left by the previous one. Duration runs twice:
    //! stripping `+project`/`#tag`/`@date` can leave a duration token at the end
    //! that the first pass had to skip.

    use super::core::*;
    use super::dates::{CasualDateEngine, DateEngine};
    use super::{duration, project, schedule, tag};
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

    struct StageContext<'a> {
        all_tags: Option<&'a [Tag]>,
        projects: Vec<Project>,
        today: String,
        now: NaiveDateTime,
        engine: &'a dyn DateEngine,
        to_epoch_ms: &'a dyn Fn(NaiveDateTime) -> Option<i64>,
    }

    #[derive(Debug, Default)]
    struct Accumulator {
        title: String,
        tag_ids: Vec<TagId>,
        time_spent_on_day: TimeSpentOnDay,
        changes: TaskChanges,
        new_tag_titles: Vec<String>,
        project_id: Option<ProjectId>,
        duration_taken: bool,
    }

    impl Accumulator {
        fn absorb(&mut self, changes: TaskChanges) {
            if let Some(title) = &changes.title {
                self.title.clone_from(title);
            }
            if let Some(ids) = &changes.tag_ids {
                self.tag_ids.clone_from(ids);
            }
            if let Some(days) = &changes.time_spent_on_day {
                self.time_spent_on_day.clone_from(days);
            }
            self.changes.merge(changes);
        }
    }

    struct Stage {
        name: &'static str,
        enabled: fn(&ParseConfig) -> bool,
        /// Returns whether the stage changed anything.
        run: fn(&StageContext<'_>, &mut Accumulator) -> bool,
    }

    const PIPELINE: [Stage; 5] = [
        Stage {
            name: "duration",
            enabled: ParseConfig::any_enabled,
            run: duration_stage,
        },
        Stage {
            name: "project",
            enabled: project_enabled,
            run: project_stage,
        },
        Stage {
            name: "tag",
            enabled: tag_enabled,
            run: tag_stage,
        },
        Stage {
            name: "schedule",
            enabled: due_enabled,
            run: schedule_stage,
        },
        Stage {
            name: "duration",
            enabled: ParseConfig::any_enabled,
            run: duration_stage,
        },
    ];

    fn project_enabled(config: &ParseConfig) -> bool {
        config.is_enable_project
    }

    fn tag_enabled(config: &ParseConfig) -> bool {
        config.is_enable_tag
    }

    fn due_enabled(config: &ParseConfig) -> bool {
        config.is_enable_due
    }

    /// Values come from the first pass that matches. A later pass only strips
    /// duration tokens the other stages left at the end of the title.
    fn duration_stage(ctx: &StageContext<'_>, acc: &mut Accumulator) -> bool {
        let changes =
            duration::parse_time_spent_changes(&acc.title, &acc.time_spent_on_day, &ctx.today);
        if changes.is_empty() {
            return false;
        }
        if acc.duration_taken {
            acc.absorb(TaskChanges {
                title: changes.title,
                ..TaskChanges::default()
            });
        } else {
            acc.duration_taken = true;
            acc.absorb(changes);
        }
        true
    }

    fn project_stage(ctx: &StageContext<'_>, acc: &mut Accumulator) -> bool {
        let Some(found) = project::parse_project_changes(&acc.title, &ctx.projects) else {
            return false;
        };
        acc.project_id = Some(found.project_id);
        acc.absorb(TaskChanges {
            title: Some(found.title),
            ..TaskChanges::default()
        });
        true
    }

    fn tag_stage(ctx: &StageContext<'_>, acc: &mut Accumulator) -> bool {
        let Some(all_tags) = ctx.all_tags else {
            return false;
        };
        let Some(found) = tag::parse_tag_changes(&acc.title, &acc.tag_ids, all_tags) else {
            return false;
        };
        acc.new_tag_titles.extend(found.new_tag_titles);
        acc.absorb(found.task_changes);
        true
    }

    fn schedule_stage(ctx: &StageContext<'_>, acc: &mut Accumulator) -> bool {
        let Some(found) = schedule::parse_scheduled_date(&acc.title, ctx.now, ctx.engine) else {
            return false;
        };
        let Some(due) = (ctx.to_epoch_ms)(found.due) else {
            log::debug!("{} does not exist in the local zone, ignoring", found.due);
            return false;
        };
        acc.absorb(TaskChanges {
            title: Some(found.title),
            due_with_time: Some(due),
            has_planned_time: (!found.has_time).then_some(false),
            ..TaskChanges::default()
        });
        true
    }

    /// Parses `task.title` with the built-in date grammar.
    ///
    /// Returns `None` when nothing was recognized. `all_tags: None` skips tag
    /// parsing entirely, while an empty slice reports every `#token` as new.
    /// Archived and hidden projects are ignored.
    pub fn short_syntax<Tz: TimeZone>(
        task: &TaskDraft,
        config: &ParseConfig,
        all_tags: Option<&[Tag]>,
        all_projects: &[Project],
        now: &DateTime<Tz>,
    ) -> Option<ParseResult> {
        short_syntax_with_engine(task, config, all_tags, all_projects, now, &CasualDateEngine)
    }

    pub fn short_syntax_with_engine<Tz: TimeZone>(
        task: &TaskDraft,
        config: &ParseConfig,
        all_tags: Option<&[Tag]>,
        all_projects: &[Project],
        now: &DateTime<Tz>,
        engine: &dyn DateEngine,
    ) -> Option<ParseResult> {
        if task.title.is_empty() {
            return None;
        }
        let tz = now.timezone();
        let to_epoch_ms = |local: NaiveDateTime| {
            tz.from_local_datetime(&local)
                .earliest()
                .map(|dt| dt.timestamp_millis())
        };
        let local_now = now.naive_local();
        let ctx = StageContext {
            all_tags,
            projects: all_projects
                .iter()
                .filter(|p| p.is_selectable())
                .cloned()
                .collect(),
            today: day_key(local_now.date()),
            now: local_now,
            engine,
            to_epoch_ms: &to_epoch_ms,
        };
        let mut acc = Accumulator {
            title: task.title.clone(),
            tag_ids: task.tag_ids.clone(),
            time_spent_on_day: task.time_spent_on_day.clone(),
            ..Accumulator::default()
        };

        for stage in &PIPELINE {
            if !(stage.enabled)(config) {
                continue;
            }
            if (stage.run)(&ctx, &mut acc) {
                log::debug!("{} stage matched, title now {:?}", stage.name, acc.title);
            }
        }

        if acc.changes.is_empty() {
            return None;
        }
        let mut task_changes = acc.changes;
        if let Some(title) = task_changes.title.as_mut() {
            *title = title.trim().to_string();
        }
        Some(ParseResult {
            task_changes,
            new_tag_titles: acc.new_tag_titles,
            remind_at: None,
            project_id: acc.project_id,
        })
    }

    /// [`short_syntax`] against the system clock and zone.
    pub fn short_syntax_local(
        task: &TaskDraft,
        config: &ParseConfig,
        all_tags: Option<&[Tag]>,
        all_projects: &[Project],
    ) -> Option<ParseResult> {
        short_syntax(task, config, all_tags, all_projects, &Local::now())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::dates::{DateParseOptions, ParsedComponents, ParsedDate};
        use chrono::{FixedOffset, NaiveDate, Utc};

        const TODAY: &str = "2026-10-14";

        // Wednesday 10:00 UTC.
        fn now() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2026, 10, 14, 10, 0, 0).unwrap()
        }

        fn tags() -> Vec<Tag> {
            vec![
                Tag::new("blu_id", "blu"),
                Tag::new("bla_id", "bla"),
                Tag::new("hihi_id", "hihi"),
                Tag::new("urgent_id", "Urgent"),
            ]
        }

        fn projects() -> Vec<Project> {
            vec![
                Project::new("px_id", "ProjectX"),
                Project::new("work_id", "Work"),
                Project {
                    is_archived: true,
                    ..Project::new("old_id", "Oldies")
                },
            ]
        }

        fn parse(title: &str) -> Option<ParseResult> {
            short_syntax(
                &TaskDraft::new(title),
                &ParseConfig::default(),
                Some(tags().as_slice()),
                &projects(),
                &now(),
            )
        }

        fn changes(title: &str) -> TaskChanges {
            parse(title)
                .unwrap_or_else(|| panic!("no syntax found in {title:?}"))
                .task_changes
        }

        #[test]
        fn empty_and_plain_titles() {
            assert!(parse("").is_none());
            assert!(parse("Just a title").is_none());
        }

        #[test]
        fn all_flags_off_finds_nothing() {
            for title in ["Fun title 10m/1h", "Fun #blu", "Fun +Work @16"] {
                let result = short_syntax(
                    &TaskDraft::new(title),
                    &ParseConfig::disabled(),
                    Some(tags().as_slice()),
                    &projects(),
                    &now(),
                );
                assert!(result.is_none(), "{title}");
            }
        }

        #[test]
        fn time_spent_and_estimate() {
            let c = changes("Fun title 10m/1h");
            assert_eq!(c.title.as_deref(), Some("Fun title"));
            assert_eq!(c.time_estimate, Some(3_600_000));
            assert_eq!(c.time_spent_on_day.unwrap()[TODAY], 600_000);
            let c = changes("Fun title 1.5h");
            assert_eq!(c.time_estimate, Some(5_400_000));
            assert!(c.time_spent_on_day.is_none());
        }

        #[test]
        fn tag_and_duration_in_either_order() {
            let a = changes("Fun title #blu 10m/1h");
            let b = changes("Fun title 10m/1h #blu");
            assert_eq!(a, b);
            assert_eq!(a.title.as_deref(), Some("Fun title"));
            assert_eq!(a.tag_ids, Some(vec![TagId::from("blu_id")]));
            assert_eq!(a.time_estimate, Some(3_600_000));
            assert_eq!(a.time_spent_on_day.unwrap()[TODAY], 600_000);
        }

        #[test]
        fn project_then_duration() {
            let r = parse("title +Work 10m/1h").unwrap();
            assert_eq!(r.project_id, Some(ProjectId::from("work_id")));
            assert_eq!(r.task_changes.title.as_deref(), Some("title"));
            assert_eq!(r.task_changes.time_estimate, Some(3_600_000));
            let r = parse("title 10m/1h +Work").unwrap();
            assert_eq!(r.task_changes.title.as_deref(), Some("title"));
            assert_eq!(r.task_changes.time_estimate, Some(3_600_000));
        }

        #[test]
        fn glued_hash_boundary() {
            assert!(parse("Fun title#blu").is_none());
            let c = changes("Fun title#blu #bla");
            assert_eq!(c.title.as_deref(), Some("Fun title#blu"));
            assert_eq!(c.tag_ids, Some(vec![TagId::from("bla_id")]));
        }

        #[test]
        fn issue_number_prefix() {
            let c = changes("#134 Fun title #blu");
            assert_eq!(c.title.as_deref(), Some("#134 Fun title"));
            assert_eq!(c.tag_ids, Some(vec![TagId::from("blu_id")]));
        }

        #[test]
        fn new_then_existing_tag() {
            let draft = TaskDraft::new("asd #asd");
            let r = short_syntax(&draft, &ParseConfig::default(), Some(&[][..]), &[], &now())
                .unwrap();
            assert_eq!(r.new_tag_titles, vec!["asd".to_string()]);
            assert_eq!(r.task_changes.tag_ids, None);
            assert_eq!(r.task_changes.title.as_deref(), Some("asd"));

            let known = [Tag::new("asd_id", "asd")];
            let r = short_syntax(&draft, &ParseConfig::default(), Some(&known[..]), &[], &now())
                .unwrap();
            assert!(r.new_tag_titles.is_empty());
            assert_eq!(r.task_changes.tag_ids, Some(vec![TagId::from("asd_id")]));
        }

        #[test]
        fn tags_skipped_without_candidates() {
            let draft = TaskDraft::new("Fun #blu");
            assert!(short_syntax(&draft, &ParseConfig::default(), None, &[], &now()).is_none());
        }

        #[test]
        fn existing_ids_are_kept_and_case_ignored() {
            let draft = TaskDraft::new("Fun #HIHI #blu").with_tag_ids(["blu_id", "other"]);
            let all = tags();
            let r = short_syntax(&draft, &ParseConfig::default(), Some(&all[..]), &[], &now())
                .unwrap();
            assert_eq!(
                r.task_changes.tag_ids,
                Some(vec![
                    TagId::from("blu_id"),
                    TagId::from("other"),
                    TagId::from("hihi_id")
                ])
            );
            assert_eq!(r.task_changes.title.as_deref(), Some("Fun"));
        }

        #[test]
        fn archived_projects_do_not_match() {
            assert!(parse("Task +Oldies").is_none());
        }

        #[test]
        fn unmatched_project_stays_in_title() {
            let r = parse("Task +Nope #blu").unwrap();
            assert_eq!(r.project_id, None);
            assert_eq!(r.task_changes.title.as_deref(), Some("Task +Nope"));
        }

        #[test]
        fn bare_hour_due_today() {
            let c = changes("Call @16");
            assert_eq!(c.title.as_deref(), Some("Call"));
            let expected = Utc.with_ymd_and_hms(2026, 10, 14, 16, 0, 0).unwrap();
            assert_eq!(c.due_with_time, Some(expected.timestamp_millis()));
            assert_eq!(c.has_planned_time, None);
        }

        #[test]
        fn bare_hour_uses_caller_zone() {
            let tz = FixedOffset::east_opt(2 * 3600).unwrap();
            let now = tz.with_ymd_and_hms(2026, 10, 14, 10, 0, 0).unwrap();
            let r = short_syntax(
                &TaskDraft::new("Call @16"),
                &ParseConfig::default(),
                None,
                &[],
                &now,
            )
            .unwrap();
            let expected = Utc.with_ymd_and_hms(2026, 10, 14, 14, 0, 0).unwrap();
            assert_eq!(r.task_changes.due_with_time, Some(expected.timestamp_millis()));
        }

        #[test]
        fn weekday_without_time_is_unplanned() {
            let c = changes("Review @friday");
            let expected = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
            assert_eq!(c.due_with_time, Some(expected.timestamp_millis()));
            assert_eq!(c.has_planned_time, Some(false));
            assert_eq!(c.title.as_deref(), Some("Review"));
        }

        #[test]
        fn weekday_with_time() {
            let c = changes("Review @friday 4pm");
            let expected = Utc.with_ymd_and_hms(2026, 10, 16, 16, 0, 0).unwrap();
            assert_eq!(c.due_with_time, Some(expected.timestamp_millis()));
            assert_eq!(c.has_planned_time, None);
        }

        #[test]
        fn same_weekday_rolls_after_noon() {
            let run = |hour| {
                let now = Utc.with_ymd_and_hms(2026, 10, 16, hour, 0, 0).unwrap();
                short_syntax(
                    &TaskDraft::new("Review @friday"),
                    &ParseConfig::default(),
                    None,
                    &[],
                    &now,
                )
                .and_then(|r| r.task_changes.due_with_time)
            };
            let this_friday = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
            let next_friday = Utc.with_ymd_and_hms(2026, 10, 23, 12, 0, 0).unwrap();
            assert_eq!(run(9), Some(this_friday.timestamp_millis()));
            assert_eq!(run(13), Some(next_friday.timestamp_millis()));
        }

        #[test]
        fn due_disabled_leaves_at_token() {
            let config = ParseConfig {
                is_enable_due: false,
                ..ParseConfig::default()
            };
            let r = short_syntax(
                &TaskDraft::new("Review @friday #blu"),
                &config,
                Some(tags().as_slice()),
                &[],
                &now(),
            )
            .unwrap();
            assert_eq!(r.task_changes.title.as_deref(), Some("Review @friday"));
            assert_eq!(r.task_changes.due_with_time, None);
        }

        #[test]
        fn project_disabled_leaves_plus_token() {
            let config = ParseConfig {
                is_enable_project: false,
                ..ParseConfig::default()
            };
            let r = short_syntax(
                &TaskDraft::new("Plan +Work 30m"),
                &config,
                Some(tags().as_slice()),
                &projects(),
                &now(),
            )
            .unwrap();
            assert_eq!(r.project_id, None);
            assert_eq!(r.task_changes.title.as_deref(), Some("Plan +Work"));
            assert_eq!(r.task_changes.time_estimate, Some(1_800_000));
        }

        #[test]
        fn tag_disabled_leaves_hash_token() {
            let config = ParseConfig {
                is_enable_tag: false,
                ..ParseConfig::default()
            };
            let r = short_syntax(
                &TaskDraft::new("Plan #blu 30m"),
                &config,
                Some(tags().as_slice()),
                &projects(),
                &now(),
            )
            .unwrap();
            assert_eq!(r.task_changes.tag_ids, None);
            assert!(r.new_tag_titles.is_empty());
            assert_eq!(r.task_changes.title.as_deref(), Some("Plan #blu"));
            assert_eq!(r.task_changes.time_estimate, Some(1_800_000));
        }

        #[test]
        fn last_duration_wins_across_passes() {
            let c = changes("Read chapter 1h 30m");
            assert_eq!(c.title.as_deref(), Some("Read chapter"));
            assert_eq!(c.time_estimate, Some(1_800_000));

            let c = changes("Task 1m 2m 3m");
            assert_eq!(c.title.as_deref(), Some("Task"));
            assert_eq!(c.time_estimate, Some(180_000));

            let c = changes("Task 5m #blu 10m");
            assert_eq!(c.title.as_deref(), Some("Task"));
            assert_eq!(c.time_estimate, Some(600_000));
            assert_eq!(c.tag_ids, Some(vec![TagId::from("blu_id")]));
        }

        #[test]
        fn everything_at_once() {
            let r = parse("Fix bug +ProjectX #urgent @friday 4pm 30m/2h").unwrap();
            let c = &r.task_changes;
            assert_eq!(c.title.as_deref(), Some("Fix bug"));
            assert_eq!(r.project_id, Some(ProjectId::from("px_id")));
            assert_eq!(c.tag_ids, Some(vec![TagId::from("urgent_id")]));
            assert_eq!(c.time_estimate, Some(7_200_000));
            assert_eq!(c.time_spent_on_day.as_ref().unwrap()[TODAY], 1_800_000);
            let expected = Utc.with_ymd_and_hms(2026, 10, 16, 16, 0, 0).unwrap();
            assert_eq!(c.due_with_time, Some(expected.timestamp_millis()));
            assert_eq!(r.remind_at, None);
            assert!(r.new_tag_titles.is_empty());
        }

        #[test]
        fn mail_address_is_not_a_date() {
            assert!(parse("Mail foo@bar.com").is_none());
        }

        #[test]
        fn reparsing_output_finds_nothing() {
            for title in [
                "Fix bug +ProjectX #urgent @friday 4pm 30m/2h",
                "Fun title 10m/1h #blu",
                "asd #asd",
                "#134 Fun title #blu",
                "Task +Nope #blu",
                "Call @16",
                "Task 1m 2m 3m",
                "Read chapter 1h 30m",
                "Task 5m #blu 10m",
                "Call @16 @17",
            ] {
                let draft = TaskDraft::new(title);
                let first = parse(title).unwrap();
                let next = draft.apply(&first.task_changes);
                let again = short_syntax(
                    &next,
                    &ParseConfig::default(),
                    Some(tags().as_slice()),
                    &projects(),
                    &now(),
                );
                assert!(again.is_none(), "{title} -> {:?}", again);
            }
        }

        struct FixedEngine;

        impl DateEngine for FixedEngine {
            fn parse(
                &self,
                text: &str,
                _reference: NaiveDateTime,
                _options: DateParseOptions,
            ) -> Vec<ParsedDate> {
                let at = NaiveDate::from_ymd_opt(2030, 1, 1)
                    .unwrap()
                    .and_hms_opt(8, 0, 0)
                    .unwrap();
                vec![ParsedDate {
                    index: 0,
                    text: text.split_whitespace().next().unwrap_or_default().to_string(),
                    start: ParsedComponents::new(at, true, true),
                }]
            }
        }

        #[test]
        fn custom_date_engine() {
            let r = short_syntax_with_engine(
                &TaskDraft::new("Launch @someday"),
                &ParseConfig::default(),
                None,
                &[],
                &now(),
                &FixedEngine,
            )
            .unwrap();
            let expected = Utc.with_ymd_and_hms(2030, 1, 1, 8, 0, 0).unwrap();
            assert_eq!(r.task_changes.due_with_time, Some(expected.timestamp_millis()));
            assert_eq!(r.task_changes.title.as_deref(), Some("Launch"));
        }
    }
}

pub mod slots {
    //! First-fit search for a free stretch between blocked intervals.

    use super::core::{BlockedBlock, BlockedBlocksByDay, DomainError, day_key};
    use chrono::{Days, Local, NaiveDate, NaiveTime, TimeZone};

    pub const DEFAULT_MAX_DAYS_TO_CHECK: u32 = 14;

    /// [`find_next_available_start_in`] using the system time zone.
    pub fn find_next_available_start(
        blocked: &BlockedBlocksByDay,
        start_from: i64,
        duration_ms: i64,
        max_days: u32,
    ) -> i64 {
        find_next_available_start_in(&Local, blocked, start_from, duration_ms, max_days)
    }

    /// Earliest instant at or after `start_from` with `duration_ms` free inside
    /// a single local day. Days are walked from midnight to midnight in `tz`.
    ///
    /// When nothing fits within `max_days` the last candidate is returned as is;
    /// callers cannot tell that apart from a real slot.
    pub fn find_next_available_start_in<Tz: TimeZone>(
        tz: &Tz,
        blocked: &BlockedBlocksByDay,
        start_from: i64,
        duration_ms: i64,
        max_days: u32,
    ) -> i64 {
        if duration_ms <= 0 {
            return start_from;
        }
        let Some(first_day) = local_date(tz, start_from) else {
            return start_from;
        };

        let mut candidate = start_from;
        for offset in 0..max_days {
            let Some(day) = first_day.checked_add_days(Days::new(offset.into())) else {
                break;
            };
            let (Some(day_start), Some(next_start)) = (
                local_midnight(tz, day),
                day.succ_opt().and_then(|d| local_midnight(tz, d)),
            ) else {
                break;
            };
            let day_end = next_start - 1;

            let mut blocks = blocked.get(&day_key(day)).cloned().unwrap_or_default();
            blocks.sort_by_key(|b| b.start);

            let mut cursor = candidate.max(day_start);
            for block in &blocks {
                if block.end <= cursor {
                    continue;
                }
                if cursor < block.start && block.start.min(day_end) - cursor >= duration_ms {
                    return cursor;
                }
                cursor = block.end;
            }
            if day_end - cursor >= duration_ms {
                return cursor;
            }
            candidate = cursor.max(next_start);
        }
        log::debug!(
            "no {}ms slot within {} days of {}, falling back to {}",
            duration_ms,
            max_days,
            start_from,
            candidate
        );
        candidate
    }

    /// Groups raw intervals per local day, splitting the ones that cross
    /// midnight. Empty intervals are dropped.
    pub fn bucket_by_day<Tz: TimeZone>(
        tz: &Tz,
        blocks: &[BlockedBlock],
    ) -> Result<BlockedBlocksByDay, DomainError> {
        let mut by_day = BlockedBlocksByDay::new();
        for block in blocks {
            if block.end < block.start {
                return Err(DomainError::InvertedBlock {
                    start: block.start,
                    end: block.end,
                });
            }
            let mut cursor = block.start;
            while cursor < block.end {
                let Some(day) = local_date(tz, cursor) else {
                    break;
                };
                let piece_end = day
                    .succ_opt()
                    .and_then(|d| local_midnight(tz, d))
                    .map_or(block.end, |next| next.min(block.end));
                by_day
                    .entry(day_key(day))
                    .or_default()
                    .push(BlockedBlock::new(cursor, piece_end));
                if piece_end <= cursor {
                    break;
                }
                cursor = piece_end;
            }
        }
        Ok(by_day)
    }

    fn local_date<Tz: TimeZone>(tz: &Tz, ms: i64) -> Option<NaiveDate> {
        tz.timestamp_millis_opt(ms)
            .single()
            .map(|dt| dt.naive_local().date())
    }

    /// Start of `date` in `tz`; the first hour after a skipped midnight
    /// when DST jumps over it.
    fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Option<i64> {
        tz.from_local_datetime(&date.and_time(NaiveTime::MIN))
            .earliest()
            .or_else(|| {
                tz.from_local_datetime(&date.and_hms_opt(1, 0, 0)?)
                    .earliest()
            })
            .map(|dt| dt.timestamp_millis())
    }

}
