//! Time of day and repeat patterns

use chrono::{NaiveTime, Weekday};
use std::fmt;
use std::str::FromStr;

use crate::error::ScheduleError;

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Wall-clock `HH:MM` in the configured zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self, ScheduleError> {
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::InvalidTime(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn as_naive(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidTime(s.to_string());

        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || m.len() != 2 || h.len() > 2 {
            return Err(invalid());
        }
        let hour = h.parse::<u32>().map_err(|_| invalid())?;
        let minute = m.parse::<u32>().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Set of weekdays, Monday first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);
    pub const ALL: WeekdaySet = WeekdaySet(0b111_1111);
    pub const WORKWEEK: WeekdaySet = WeekdaySet(0b001_1111);

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> {
        let set = *self;
        WEEK.into_iter().filter(move |day| set.contains(*day))
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = WeekdaySet::EMPTY;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(short_name).collect();
        f.write_str(&names.join(","))
    }
}

/// Normalized repeat pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Repeat {
    Once,
    Daily,
    Weekdays,
    Days(WeekdaySet),
}

impl Repeat {
    /// Normalize a free-form repeat string.
    ///
    /// Accepts `daily`, `weekdays`, day names (`wed`, `wednesday`,
    /// `Wednesdays`) and comma-separated lists of them. Anything else,
    /// including the empty string, means `Once`.
    pub fn parse(raw: &str) -> Repeat {
        let text = raw.trim().to_ascii_lowercase();
        match text.as_str() {
            "" | "once" => return Repeat::Once,
            "daily" => return Repeat::Daily,
            "weekdays" => return Repeat::Weekdays,
            _ => {}
        }

        let mut days = WeekdaySet::EMPTY;
        for token in text.split(',') {
            match parse_day(token.trim()) {
                Some(day) => days.insert(day),
                None => return Repeat::Once,
            }
        }
        Repeat::Days(days)
    }

    /// Normalize the list form; an empty list means `Once`
    pub fn from_list<S: AsRef<str>>(tokens: &[S]) -> Repeat {
        let joined: Vec<&str> = tokens.iter().map(|t| t.as_ref().trim()).collect();
        Repeat::parse(&joined.join(","))
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Repeat::Once)
    }

    /// Days this pattern may fire on
    pub fn weekdays(&self) -> WeekdaySet {
        match self {
            Repeat::Once | Repeat::Daily => WeekdaySet::ALL,
            Repeat::Weekdays => WeekdaySet::WORKWEEK,
            Repeat::Days(days) => *days,
        }
    }
}

impl fmt::Display for Repeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repeat::Once => f.write_str("once"),
            Repeat::Daily => f.write_str("daily"),
            Repeat::Weekdays => f.write_str("weekdays"),
            Repeat::Days(days) => write!(f, "{days}"),
        }
    }
}

fn short_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

/// `wed`, `wednesday` and `wednesdays` all name Wednesday
fn parse_day(token: &str) -> Option<Weekday> {
    WEEK.into_iter().find(|day| {
        let long = long_name(*day);
        token == short_name(*day) || token == long || token.strip_suffix('s') == Some(long)
    })
}

fn long_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}
