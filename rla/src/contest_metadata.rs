// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! Information about the contest being audited : who is in it, how seats are allocated, and how it is to be audited.

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use num::{BigInt, BigRational, One, Zero};
use num::rational::Ratio;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use crate::errors::AuditError;

/// Identifies one audit, typically one election contest.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
#[serde(transparent)]
pub struct ContestId(pub String);

impl fmt::Display for ContestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}

/// A candidate or party, by name. Parties in D'Hondt elections are contestants too.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub String);

impl CandidateId {
    pub fn new(name:&str) -> Self { CandidateId(name.to_string()) }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}
// type alias really, don't want long display
impl fmt::Debug for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}

impl From<&str> for CandidateId {
    fn from(s: &str) -> Self { CandidateId(s.to_string()) }
}

/// A polling table (or batch) of physical ballots.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TableId(pub u32);

/// Accepts a number, or a string as used for JSON object keys (which arrive as strings when buffered inside a tagged enum).
impl <'de> Deserialize<'de> for TableId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error> where D: Deserializer<'de> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NumberOrString { Number(u32), Text(String) }
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(n) => Ok(TableId(n)),
            NumberOrString::Text(s) => s.parse().map_err(|_|serde::de::Error::custom(format!("table {} is not a table number",s))),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}
impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "T{}", self.0) }
}

impl FromStr for TableId {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Ok(TableId(s.trim().parse()?)) }
}

/// A seat column in a divisor method. Columns are counted from 1, so the first seat a party wins is column 1.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
#[serde(transparent)]
pub struct SeatColumn(pub usize);

impl fmt::Display for SeatColumn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}

/// A (party, seat column) pair, treated as a virtual contestant.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct PseudoCandidate {
    pub party : CandidateId,
    pub column : SeatColumn,
}

/// How recounted ballots are compared with the reported count.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    /// Individual ballots are drawn at random and the marks on them tallied.
    BallotPolling,
    /// Whole tables are drawn and their recount compared with the reported table totals.
    Comparison,
}

impl fmt::Display for AuditMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuditMode::BallotPolling => write!(f, "ballot polling"),
            AuditMode::Comparison => write!(f, "comparison"),
        }
    }
}

/// The fraction of the vote a super majority winner must exceed.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Threshold {
    pub numerator : usize,
    pub denominator : usize,
}

impl Default for Threshold {
    fn default() -> Self { Threshold{ numerator: 1, denominator: 2 } }
}

/// A party in a proportional election, with its candidates.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Party {
    pub name : CandidateId,
    pub members : Vec<CandidateId>,
}

/// How the reported count determines who won.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ElectionScheme {
    /// The candidates with the most votes win.
    Plurality,
    /// A single winner, who needs more than the threshold share of the vote.
    SuperMajority {
        #[serde(default)]
        threshold : Threshold,
    },
    /// Seats are given to parties by the D'Hondt method, and within a party to the members with the most votes.
    /// Parties are listed in ballot order, which breaks ties.
    DHondt {
        parties : Vec<Party>,
    },
}

/// Maximum acceptable probability of certifying a wrong outcome. Stored exactly.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RiskLimit(pub BigRational);

impl RiskLimit {
    pub fn new(alpha:BigRational) -> Result<Self,AuditError> {
        if alpha<=BigRational::zero() || alpha>=BigRational::one() { Err(AuditError::InvalidContest(format!("risk limit {} must be strictly between 0 and 1",alpha))) }
        else { Ok(RiskLimit(alpha)) }
    }
    /// Convert via the shortest decimal representation, so 0.05 is exactly 1/20.
    /// ```
    /// use rla::contest_metadata::RiskLimit;
    /// let alpha = RiskLimit::from_f64(0.05).unwrap();
    /// assert_eq!(alpha.threshold().to_string(),"20");
    /// ```
    pub fn from_f64(alpha:f64) -> Result<Self,AuditError> {
        if !alpha.is_finite() { return Err(AuditError::InvalidContest(format!("risk limit {} is not a number",alpha))); }
        Self::new(parse_decimal(&alpha.to_string()).ok_or_else(||AuditError::InvalidContest(format!("risk limit {}",alpha)))?)
    }
    /// The value 1/α every likelihood ratio has to reach.
    pub fn threshold(&self) -> BigRational { self.0.recip() }
}

impl fmt::Display for RiskLimit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Parse "0.05", "12" or "1/20" into an exact rational.
pub fn parse_decimal(s:&str) -> Option<BigRational> {
    let s = s.trim();
    if s.contains('/') { return Ratio::from_str(s).ok(); }
    let negative = s.starts_with('-');
    let unsigned = s.trim_start_matches(['-','+']);
    let (int_part,frac_part) = unsigned.split_once('.').unwrap_or((unsigned,""));
    if int_part.is_empty() && frac_part.is_empty() { return None; }
    let digits = int_part.to_string()+frac_part;
    let numerator : BigInt = digits.parse().ok()?;
    let denominator = num::pow(BigInt::from(10),frac_part.len());
    let res = BigRational::new(numerator,denominator);
    Some(if negative { -res } else { res })
}

impl Serialize for RiskLimit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where S: Serializer {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl <'de> Deserialize<'de> for RiskLimit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error> where D: Deserializer<'de> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NumberOrString { Number(f64), Text(String) }
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(alpha) => RiskLimit::from_f64(alpha).map_err(serde::de::Error::custom),
            NumberOrString::Text(s) => {
                let alpha = parse_decimal(&s).ok_or_else(||serde::de::Error::custom(format!("could not parse risk limit {}",s)))?;
                RiskLimit::new(alpha).map_err(serde::de::Error::custom)
            }
        }
    }
}

/// Everything decided about a contest when it is registered for audit.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Contest {
    pub id : ContestId,
    #[serde(default)]
    pub name : String,
    pub risk_limit : RiskLimit,
    /// Once this many ballots have been polled without validating, a full recount is needed.
    pub max_polls : usize,
    /// Number of winners, or seats for D'Hondt.
    pub winners : usize,
    pub mode : AuditMode,
    pub scheme : ElectionScheme,
    /// When the public random pulse used to shuffle the ballots becomes available.
    pub random_seed_time : DateTime<Utc>,
    /// Comparison audits only : draw tables with probability proportional to their size rather than uniformly.
    #[serde(default)]
    pub weighted_sampling : bool,
}

impl Contest {
    pub fn check(&self) -> Result<(),AuditError> {
        if self.max_polls==0 { return Err(AuditError::InvalidContest("the maximum number of polled ballots must be positive".to_string())); }
        if self.winners==0 { return Err(AuditError::DegenerateAllocation("no winners or seats requested".to_string())); }
        match &self.scheme {
            ElectionScheme::SuperMajority { threshold } => {
                if self.winners!=1 { return Err(AuditError::DegenerateAllocation(format!("a super majority has exactly 1 winner, not {}",self.winners))); }
                if threshold.numerator==0 || threshold.numerator>=threshold.denominator { return Err(AuditError::InvalidContest(format!("super majority threshold {}/{} must be strictly between 0 and 1",threshold.numerator,threshold.denominator))); }
            }
            ElectionScheme::DHondt { parties } => {
                if parties.is_empty() { return Err(AuditError::DegenerateAllocation("no parties".to_string())); }
            }
            ElectionScheme::Plurality => {}
        }
        Ok(())
    }
}
