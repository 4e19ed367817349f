use std::collections::BTreeMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Coverage classification of a single line.
///
/// # Examples
///
/// ```
/// use covcompare_core::CoverageType;
///
/// let t: CoverageType = serde_json::from_str("\"partial\"").unwrap();
/// assert_eq!(t, CoverageType::Partial);
/// assert_eq!(t.summary_key(), "partials");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageType {
    Hit,
    Miss,
    Partial,
}

impl CoverageType {
    /// Key used for this type in change summaries and totals.
    pub fn summary_key(self) -> &'static str {
        match self {
            CoverageType::Hit => "hits",
            CoverageType::Miss => "misses",
            CoverageType::Partial => "partials",
        }
    }
}

impl fmt::Display for CoverageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverageType::Hit => write!(f, "hit"),
            CoverageType::Miss => write!(f, "miss"),
            CoverageType::Partial => write!(f, "partial"),
        }
    }
}

/// Branch coverage of a line, serialized as `"covered/total"`.
///
/// # Examples
///
/// ```
/// use covcompare_core::BranchCoverage;
///
/// let b = BranchCoverage::try_from("1/2".to_string()).unwrap();
/// assert_eq!((b.covered, b.total), (1, 2));
/// assert!(BranchCoverage::try_from("1-2".to_string()).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchCoverage {
    pub covered: u32,
    pub total: u32,
}

impl TryFrom<String> for BranchCoverage {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (covered, total) = value
            .split_once('/')
            .ok_or_else(|| format!("invalid branch coverage: {value}"))?;
        let covered = covered
            .trim()
            .parse()
            .map_err(|_| format!("invalid branch coverage: {value}"))?;
        let total = total
            .trim()
            .parse()
            .map_err(|_| format!("invalid branch coverage: {value}"))?;
        Ok(Self { covered, total })
    }
}

impl From<BranchCoverage> for String {
    fn from(value: BranchCoverage) -> Self {
        format!("{}/{}", value.covered, value.total)
    }
}

/// Raw coverage value of a line: a hit count or a branch ratio.
///
/// # Examples
///
/// ```
/// use covcompare_core::{Coverage, CoverageType};
///
/// let hits: Coverage = serde_json::from_str("3").unwrap();
/// assert_eq!(hits.coverage_type(), CoverageType::Hit);
///
/// let branches: Coverage = serde_json::from_str("\"1/2\"").unwrap();
/// assert_eq!(branches.coverage_type(), CoverageType::Partial);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coverage {
    Hits(u64),
    Branches(BranchCoverage),
}

impl Coverage {
    pub fn coverage_type(self) -> CoverageType {
        match self {
            Coverage::Hits(0) => CoverageType::Miss,
            Coverage::Hits(_) => CoverageType::Hit,
            Coverage::Branches(b) if b.covered == 0 => CoverageType::Miss,
            Coverage::Branches(b) if b.covered >= b.total => CoverageType::Hit,
            Coverage::Branches(_) => CoverageType::Partial,
        }
    }

    /// The better of two coverage values for the same line.
    ///
    /// Hit counts add up; branch ratios keep the highest covered count. A
    /// branch ratio wins over a bare miss, a bare hit wins over a partial.
    pub fn merge(self, other: Coverage) -> Coverage {
        match (self, other) {
            (Coverage::Hits(a), Coverage::Hits(b)) => Coverage::Hits(a + b),
            (Coverage::Branches(a), Coverage::Branches(b)) => Coverage::Branches(BranchCoverage {
                covered: a.covered.max(b.covered),
                total: a.total.max(b.total),
            }),
            (Coverage::Hits(h), br @ Coverage::Branches(_))
            | (br @ Coverage::Branches(_), Coverage::Hits(h)) => {
                if h > 0 && br.coverage_type() != CoverageType::Hit {
                    Coverage::Hits(h)
                } else {
                    br
                }
            }
        }
    }

    /// Hit count, when the value is a plain counter.
    pub fn hit_count(self) -> Option<u64> {
        match self {
            Coverage::Hits(n) => Some(n),
            Coverage::Branches(_) => None,
        }
    }
}

/// Coverage of a line as recorded by one upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSession {
    pub id: u32,
    pub coverage: Coverage,
}

/// Coverage record of one line in a report file.
///
/// # Examples
///
/// ```
/// use covcompare_core::{Coverage, CoverageType, LineRecord};
///
/// let record: LineRecord = serde_json::from_str(
///     r#"{"coverage": 0, "sessions": [{"id": 0, "coverage": 0}]}"#,
/// ).unwrap();
/// assert_eq!(record.coverage_type(), CoverageType::Miss);
/// assert_eq!(record.hit_session_count(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    pub coverage: Coverage,
    #[serde(default)]
    pub sessions: Vec<LineSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<u32>,
}

impl LineRecord {
    pub fn new(coverage: Coverage) -> Self {
        Self {
            coverage,
            sessions: Vec::new(),
            complexity: None,
        }
    }

    pub fn coverage_type(&self) -> CoverageType {
        self.coverage.coverage_type()
    }

    /// Number of sessions that executed the line at least partially.
    pub fn hit_session_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.coverage.coverage_type() != CoverageType::Miss)
            .count()
    }
}

/// Aggregate counters of a report, a file, or a patch.
///
/// # Examples
///
/// ```
/// use covcompare_core::{Coverage, LineRecord, ReportTotals};
///
/// let mut totals = ReportTotals::default();
/// totals.add_line(&LineRecord::new(Coverage::Hits(2)));
/// totals.add_line(&LineRecord::new(Coverage::Hits(0)));
/// let totals = totals.finish();
/// assert_eq!(totals.lines, 2);
/// assert_eq!(totals.coverage.as_deref(), Some("50.00000"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTotals {
    pub files: u32,
    pub lines: u32,
    pub hits: u32,
    pub misses: u32,
    pub partials: u32,
    /// Percentage of hit lines with five decimals; `None` when no lines are tracked.
    pub coverage: Option<String>,
    pub branches: u32,
    pub methods: u32,
    pub sessions: u32,
    pub complexity: u32,
    pub complexity_total: u32,
    /// Patch totals carried alongside head totals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Box<ReportTotals>>,
}

impl ReportTotals {
    pub fn add_line(&mut self, record: &LineRecord) {
        self.lines += 1;
        match record.coverage_type() {
            CoverageType::Hit => self.hits += 1,
            CoverageType::Miss => self.misses += 1,
            CoverageType::Partial => self.partials += 1,
        }
        if matches!(record.coverage, Coverage::Branches(_)) {
            self.branches += 1;
        }
        if let Some(c) = record.complexity {
            self.complexity += c;
            self.complexity_total += c.max(1);
        }
    }

    /// Accumulate another set of totals (ignores `diff`).
    pub fn merge(&mut self, other: &ReportTotals) {
        self.files += other.files;
        self.lines += other.lines;
        self.hits += other.hits;
        self.misses += other.misses;
        self.partials += other.partials;
        self.branches += other.branches;
        self.methods += other.methods;
        self.complexity += other.complexity;
        self.complexity_total += other.complexity_total;
    }

    /// Recompute the coverage ratio from the counters.
    pub fn finish(mut self) -> Self {
        self.coverage = if self.lines == 0 {
            None
        } else {
            Some(format!(
                "{:.5}",
                f64::from(self.hits) * 100.0 / f64::from(self.lines)
            ))
        };
        self
    }
}

/// Signed per-coverage-type deltas of unexpected coverage changes.
///
/// A counter appears once it has been touched, even when it later returns to
/// zero. Serializes as `{"hits": 1, "misses": -1}`.
///
/// # Examples
///
/// ```
/// use covcompare_core::{ChangeSummary, CoverageType};
///
/// let mut summary = ChangeSummary::default();
/// assert!(summary.is_empty());
/// summary.record_transition(CoverageType::Miss, CoverageType::Hit);
/// assert_eq!(summary.get(CoverageType::Hit), Some(1));
/// assert_eq!(summary.get(CoverageType::Miss), Some(-1));
/// assert_eq!(summary.get(CoverageType::Partial), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    deltas: BTreeMap<CoverageType, i64>,
}

impl ChangeSummary {
    /// Move one line from the `from` tally to the `to` tally.
    pub fn record_transition(&mut self, from: CoverageType, to: CoverageType) {
        *self.deltas.entry(from).or_insert(0) -= 1;
        *self.deltas.entry(to).or_insert(0) += 1;
    }

    pub fn get(&self, coverage_type: CoverageType) -> Option<i64> {
        self.deltas.get(&coverage_type).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CoverageType, i64)> + '_ {
        self.deltas.iter().map(|(k, v)| (*k, *v))
    }
}

impl Serialize for ChangeSummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.deltas.len()))?;
        for (k, v) in &self.deltas {
            map.serialize_entry(k.summary_key(), v)?;
        }
        map.end()
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .deltas
            .iter()
            .map(|(k, v)| format!("{}: {v:+}", k.summary_key()))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// One rendered line of a file comparison.
///
/// `added` holds exactly when `base_ln` is absent, `removed` exactly when
/// `head_ln` is absent; both are only ever true for diff lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineComparison {
    pub base_ln: Option<u32>,
    pub head_ln: Option<u32>,
    pub base_coverage: Option<CoverageType>,
    pub head_coverage: Option<CoverageType>,
    /// Head hit count, when the head line records a plain counter.
    pub hit_count: Option<u64>,
    /// Head sessions that executed the line.
    pub hit_session_count: Option<usize>,
    pub value: Option<String>,
    pub is_diff: bool,
    pub added: bool,
    pub removed: bool,
}
