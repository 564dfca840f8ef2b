use crate::session::{Category, Outcome, SessionRecord};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const DEGRADED_FAILED_PERCENT: u32 = 25;
const CRITICAL_FAILED_PERCENT: u32 = 50;

/// Per-category counters. Outcome counters tally every session; `failed`
/// counts entities still failed after reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub sessions: u64,
    pub success: u64,
    pub warning: u64,
    pub failed: u64,
    pub running: u64,
    pub pending: u64,
    pub idle: u64,
    pub undefined: u64,
    pub in_progress: u64,
    pub total: u64,
}

impl CategoryStats {
    pub fn tally<'a, I>(category: Category, records: I, persistent_failures: u64) -> Self
    where
        I: IntoIterator<Item = &'a SessionRecord>,
    {
        let mut stats = Self::default();
        for record in records {
            stats.count(record.outcome);
        }
        stats.failed = persistent_failures;
        stats.finalize(category);
        stats
    }

    fn count(&mut self, outcome: Outcome) {
        self.sessions += 1;
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::Warning => self.warning += 1,
            Outcome::Running => self.running += 1,
            Outcome::Pending => self.pending += 1,
            Outcome::Idle => self.idle += 1,
            Outcome::Unhandled => self.undefined += 1,
            // Failures are counted per entity once reconciliation settles.
            Outcome::Failed => {}
        }
    }

    /// Derives `in_progress` and `total` from the raw counters. Idle tape
    /// jobs are waiting on media and count as in progress; idle backup
    /// sessions do not.
    pub fn finalize(&mut self, category: Category) {
        self.in_progress = self.running + self.pending;
        if category == Category::Tape {
            self.in_progress += self.idle;
        }
        self.total = self.success + self.warning + self.failed + self.in_progress;
    }

    fn merge(&mut self, other: &CategoryStats) {
        self.sessions += other.sessions;
        self.success += other.success;
        self.warning += other.warning;
        self.failed += other.failed;
        self.running += other.running;
        self.pending += other.pending;
        self.idle += other.idle;
        self.undefined += other.undefined;
    }

    pub fn percentages(&self) -> Percentages {
        Percentages {
            success: Percentage::of(self.success, self.total),
            warning: Percentage::of(self.warning, self.total),
            failed: Percentage::of(self.failed, self.total),
            in_progress: Percentage::of(self.in_progress, self.total),
        }
    }

    pub fn health(&self) -> Health {
        Health::from_failed_percent(Percentage::floor(self.failed, self.total))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestStats {
    pub backup: CategoryStats,
    pub tape: CategoryStats,
    pub repositories: u64,
}

/// Folds the stats of several servers into one set of counters.
#[derive(Debug, Clone, Default)]
pub struct StatsAccumulator {
    backup: CategoryStats,
    tape: CategoryStats,
    repositories: u64,
    servers: u64,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, stats: &DigestStats) -> Self {
        self.backup.merge(&stats.backup);
        self.tape.merge(&stats.tape);
        self.repositories += stats.repositories;
        self.servers += 1;
        self
    }

    pub fn servers(&self) -> u64 {
        self.servers
    }

    pub fn finish(mut self) -> DigestStats {
        self.backup.finalize(Category::Backup);
        self.tape.finalize(Category::Tape);
        DigestStats {
            backup: self.backup,
            tape: self.tape,
            repositories: self.repositories,
        }
    }
}

/// Share of a total in whole percent. Shares strictly between zero and one
/// percent are kept distinct so a rare outcome never reads as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Percentage {
    Whole(u32),
    LessThanOne,
}

impl Percentage {
    pub fn of(count: u64, total: u64) -> Self {
        if total == 0 || count == 0 {
            return Self::Whole(0);
        }
        let scaled = count as u128 * 100;
        if scaled < total as u128 {
            Self::LessThanOne
        } else {
            Self::Whole((scaled / total as u128) as u32)
        }
    }

    fn floor(count: u64, total: u64) -> u32 {
        match Self::of(count, total) {
            Self::Whole(value) => value,
            Self::LessThanOne => 0,
        }
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole(value) => write!(f, "{value}"),
            Self::LessThanOne => f.write_str("<1"),
        }
    }
}

impl Serialize for Percentage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Whole(value) => serializer.serialize_u32(*value),
            Self::LessThanOne => serializer.serialize_str("<1"),
        }
    }
}

impl<'de> Deserialize<'de> for Percentage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Whole(u32),
            Text(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Whole(value) => Ok(Self::Whole(value)),
            Repr::Text(text) if text == "<1" => Ok(Self::LessThanOne),
            Repr::Text(text) => Err(serde::de::Error::custom(format!("invalid percentage {text}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Percentages {
    pub success: Percentage,
    pub warning: Percentage,
    pub failed: Percentage,
    pub in_progress: Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Good,
    Degraded,
    Critical,
}

impl Health {
    pub fn from_failed_percent(percent: u32) -> Self {
        if percent < DEGRADED_FAILED_PERCENT {
            Self::Good
        } else if percent < CRITICAL_FAILED_PERCENT {
            Self::Degraded
        } else {
            Self::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Good => "&#128578;",
            Self::Degraded => "&#128528;",
            Self::Critical => "&#128544;",
        }
    }

    pub fn css_class(self) -> &'static str {
        match self {
            Self::Good => "bg-success",
            Self::Degraded => "bg-warning",
            Self::Critical => "bg-error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_total_yields_zero_percentages() {
        let stats = CategoryStats::default();
        let percentages = stats.percentages();
        assert_eq!(percentages.success, Percentage::Whole(0));
        assert_eq!(percentages.warning, Percentage::Whole(0));
        assert_eq!(percentages.failed, Percentage::Whole(0));
        assert_eq!(percentages.in_progress, Percentage::Whole(0));
        assert_eq!(stats.health(), Health::Good);
    }

    #[test]
    fn fractions_below_one_percent_are_flagged() {
        assert_eq!(Percentage::of(1, 200), Percentage::LessThanOne);
        assert_eq!(Percentage::of(2, 200), Percentage::Whole(1));
        assert_eq!(Percentage::of(199, 200), Percentage::Whole(99));
        assert_eq!(Percentage::of(200, 200), Percentage::Whole(100));
        assert_eq!(Percentage::LessThanOne.to_string(), "<1");
        assert_eq!(Percentage::Whole(42).to_string(), "42");
    }

    #[test]
    fn percentages_serialize_as_number_or_marker() {
        let json = serde_json::to_string(&[Percentage::Whole(3), Percentage::LessThanOne]).unwrap();
        assert_eq!(json, r#"[3,"<1"]"#);
        let back: Vec<Percentage> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![Percentage::Whole(3), Percentage::LessThanOne]);
    }

    #[test]
    fn tape_idle_counts_as_in_progress_but_backup_idle_does_not() {
        let raw = CategoryStats {
            idle: 2,
            running: 1,
            pending: 1,
            success: 3,
            ..CategoryStats::default()
        };
        let mut tape = raw;
        tape.finalize(Category::Tape);
        assert_eq!(tape.in_progress, 4);
        assert_eq!(tape.total, 7);

        let mut backup = raw;
        backup.finalize(Category::Backup);
        assert_eq!(backup.in_progress, 2);
        assert_eq!(backup.total, 5);
    }

    #[test]
    fn accumulator_sums_servers_and_recomputes_totals() {
        let mut one = CategoryStats {
            sessions: 4,
            success: 2,
            failed: 1,
            running: 1,
            ..CategoryStats::default()
        };
        one.finalize(Category::Backup);
        let mut two = CategoryStats {
            sessions: 3,
            warning: 1,
            pending: 1,
            idle: 1,
            ..CategoryStats::default()
        };
        two.finalize(Category::Backup);

        let accumulator = StatsAccumulator::new()
            .add(&DigestStats {
                backup: one,
                repositories: 2,
                ..DigestStats::default()
            })
            .add(&DigestStats {
                backup: two,
                repositories: 1,
                ..DigestStats::default()
            });
        assert_eq!(accumulator.servers(), 2);
        let merged = accumulator.finish();
        assert_eq!(merged.backup.sessions, 7);
        assert_eq!(merged.backup.in_progress, 2);
        assert_eq!(
            merged.backup.total,
            merged.backup.success + merged.backup.warning + merged.backup.failed + merged.backup.in_progress
        );
        assert_eq!(merged.repositories, 3);
    }

    #[test]
    fn health_bands_follow_failed_share() {
        assert_eq!(Health::from_failed_percent(24), Health::Good);
        assert_eq!(Health::from_failed_percent(25), Health::Degraded);
        assert_eq!(Health::from_failed_percent(49), Health::Degraded);
        assert_eq!(Health::from_failed_percent(50), Health::Critical);
    }
}
