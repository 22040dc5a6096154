//! Acquisition year extraction from dataset identifiers.
//!
//! Rules are tried in order and the first match wins:
//!
//! 1. [`YearRule::FourDigit`]: the first standalone 4 digit token between
//!    1990 and 2039, e.g. `CO_Denver_2020_B20` -> 2020.
//! 2. [`YearRule::TwoDigitSuffix`]: a trailing `_<letter><NN>` suffix read as
//!    20NN, e.g. `WI_Statewide_B21` -> 2021.
//!
//! The suffix rule cannot tell a year from a sequence or version number:
//! `NM_SouthCentral_D22` yields 2022 whether or not `D22` means a year.
//! Callers should treat suffix-derived years as unreliable.
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

static FOUR_DIGIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])(199[0-9]|20[0-3][0-9])(?:$|[^0-9])")
        .expect("Regex pattern should always compile")
});

static TWO_DIGIT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_[A-Za-z]([0-9]{2})$").expect("Regex pattern should always compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum YearRule {
    FourDigit,
    TwoDigitSuffix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct YearToken {
    pub year: u16,
    pub rule: YearRule,
}

impl YearToken {
    pub fn is_reliable(&self) -> bool {
        self.rule == YearRule::FourDigit
    }
}

impl fmt::Display for YearToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rule {
            YearRule::FourDigit => write!(f, "{}", self.year),
            YearRule::TwoDigitSuffix => write!(f, "{} (suffix-derived)", self.year),
        }
    }
}

pub fn extract_year(identifier: &str) -> Option<u16> {
    extract_year_token(identifier).map(|t| t.year)
}

pub fn extract_year_token(identifier: &str) -> Option<YearToken> {
    if let Some(captures) = FOUR_DIGIT.captures(identifier) {
        let year = captures[1].parse().ok()?;
        return Some(YearToken {
            year,
            rule: YearRule::FourDigit,
        });
    }
    if let Some(captures) = TWO_DIGIT_SUFFIX.captures(identifier) {
        let short: u16 = captures[1].parse().ok()?;
        return Some(YearToken {
            year: 2000 + short,
            rule: YearRule::TwoDigitSuffix,
        });
    }
    None
}
