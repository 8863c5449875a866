//! `name<op>version[,<op>version...]` dependency specifiers.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use addonkit_core::{AppError, AppResult};

const OPERATOR_CHARS: &[char] = &['>', '<', '=', '!', '~'];

/// Dotted numeric release version, compared segment by segment with
/// missing segments treated as zero (`1.0 == 1.0.0`).
#[derive(Debug, Clone)]
pub struct Version {
    release: Vec<u64>,
}

impl Version {
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// First release segment.
    pub fn major(&self) -> u64 {
        self.release.first().copied().unwrap_or(0)
    }

    fn segment(&self, index: usize) -> u64 {
        self.release.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        if s.is_empty() {
            return Err(AppError::dependency("Empty version"));
        }
        let release = s
            .split('.')
            .map(|segment| {
                segment
                    .parse::<u64>()
                    .map_err(|_| AppError::dependency(format!("Invalid version '{s}'")))
            })
            .collect::<AppResult<Vec<u64>>>()?;
        Ok(Self { release })
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        (0..len)
            .map(|i| self.segment(i).cmp(&other.segment(i)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.release.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// Comparison operator of a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    /// `~=`: at least the version, same major release.
    Compatible,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Compatible => "~=",
        }
    }

    pub fn accepts(self, installed: &Version, required: &Version) -> bool {
        match self {
            Self::Eq => installed == required,
            Self::Ne => installed != required,
            Self::Ge => installed >= required,
            Self::Le => installed <= required,
            Self::Gt => installed > required,
            Self::Lt => installed < required,
            Self::Compatible => installed >= required && installed.major() == required.major(),
        }
    }
}

/// One `<op>version` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub operator: Operator,
    pub version: Version,
}

impl Clause {
    fn parse(clause: &str, spec: &str) -> AppResult<Self> {
        let invalid = || AppError::dependency(format!("Invalid version clause '{clause}' in '{spec}'"));
        let mut chars = clause.chars();
        let first = chars.next().ok_or_else(invalid)?;
        let second = chars.next();

        let (operator, rest) = match (first, second) {
            ('>', Some('=')) => (Operator::Ge, &clause[2..]),
            ('<', Some('=')) => (Operator::Le, &clause[2..]),
            ('>', _) => (Operator::Gt, &clause[1..]),
            ('<', _) => (Operator::Lt, &clause[1..]),
            ('=', Some('=')) => (Operator::Eq, &clause[2..]),
            ('!', Some('=')) => (Operator::Ne, &clause[2..]),
            ('~', Some('=')) => (Operator::Compatible, &clause[2..]),
            _ => return Err(invalid()),
        };
        Ok(Self {
            operator,
            version: rest.parse()?,
        })
    }
}

/// A parsed dependency specifier such as `requests>=2.0,<3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub name: String,
    pub clauses: Vec<Clause>,
}

impl DependencySpec {
    /// Parse a specifier. The name ends at the first operator character and
    /// is lowercased; clauses are comma separated.
    pub fn parse(spec: &str) -> AppResult<Self> {
        let index = spec.find(OPERATOR_CHARS).ok_or_else(|| {
            AppError::dependency(format!(
                "Invalid dependency {spec}: Not found version specification"
            ))
        })?;
        let (name, clauses) = spec.split_at(index);
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return Err(AppError::dependency(format!(
                "Invalid dependency {spec}: Missing library name"
            )));
        }

        let clauses = clauses
            .split(',')
            .map(str::trim)
            .map(|clause| Clause::parse(clause, spec))
            .collect::<AppResult<Vec<Clause>>>()?;
        Ok(Self { name, clauses })
    }

    /// Whether `version` satisfies every clause.
    pub fn is_compatible(&self, version: &str) -> AppResult<bool> {
        let version: Version = version.parse()?;
        Ok(self
            .clauses
            .iter()
            .all(|clause| clause.operator.accepts(&version, &clause.version)))
    }

    /// The version an installer should pick: the first `==`, `>=` or `~=`
    /// clause version.
    pub fn preferred_version(&self) -> Option<&Version> {
        self.clauses
            .iter()
            .find(|clause| {
                matches!(
                    clause.operator,
                    Operator::Eq | Operator::Ge | Operator::Compatible
                )
            })
            .map(|clause| &clause.version)
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self
            .clauses
            .iter()
            .map(|c| format!("{}{}", c.operator.symbol(), c.version))
            .collect();
        write!(f, "{}{}", self.name, clauses.join(","))
    }
}
