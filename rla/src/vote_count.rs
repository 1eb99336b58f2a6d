// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! Reported and recounted vote totals.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use crate::contest_metadata::{CandidateId, TableId};

/// Votes per candidate (or party). Remembers the order candidates were first given in, as this
/// order breaks ties when deciding who won.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct VoteCount {
    entries : Vec<(CandidateId,usize)>,
    index : HashMap<CandidateId,usize>,
}

impl VoteCount {
    /// Votes for a candidate, 0 if not mentioned.
    pub fn get(&self,candidate:&CandidateId) -> usize {
        self.index.get(candidate).map(|&i|self.entries[i].1).unwrap_or(0)
    }
    pub fn contains(&self,candidate:&CandidateId) -> bool { self.index.contains_key(candidate) }
    /// Add votes to a candidate, adding the candidate at the end if not already present.
    pub fn add(&mut self,candidate:&CandidateId,votes:usize) {
        match self.index.get(candidate) {
            Some(&i) => self.entries[i].1+=votes,
            None => {
                self.index.insert(candidate.clone(),self.entries.len());
                self.entries.push((candidate.clone(),votes));
            }
        }
    }
    /// Add a new candidate. Returns false (and changes nothing) if it was already present.
    fn insert_new(&mut self,candidate:CandidateId,votes:usize) -> bool {
        if self.index.contains_key(&candidate) { false } else {
            self.index.insert(candidate.clone(),self.entries.len());
            self.entries.push((candidate,votes));
            true
        }
    }
    /// Add every entry of another count to this one.
    pub fn accumulate(&mut self,other:&VoteCount) {
        for (c,v) in other.iter() { self.add(c,v); }
    }
    pub fn iter(&self) -> impl Iterator<Item=(&CandidateId,usize)> { self.entries.iter().map(|(c,v)|(c,*v)) }
    pub fn candidates(&self) -> impl Iterator<Item=&CandidateId> { self.entries.iter().map(|(c,_)|c) }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    /// The total number of votes.
    pub fn total(&self) -> usize { self.entries.iter().map(|(_,v)|*v).sum() }
}

impl FromIterator<(CandidateId,usize)> for VoteCount {
    fn from_iter<T: IntoIterator<Item=(CandidateId, usize)>>(iter: T) -> Self {
        let mut res = VoteCount::default();
        for (c,v) in iter { res.add(&c,v); }
        res
    }
}

impl <'a> FromIterator<(&'a str,usize)> for VoteCount {
    fn from_iter<T: IntoIterator<Item=(&'a str, usize)>>(iter: T) -> Self {
        iter.into_iter().map(|(c,v)|(CandidateId::new(c),v)).collect()
    }
}

impl Serialize for VoteCount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where S: Serializer {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (c,v) in &self.entries { map.serialize_entry(c,v)?; }
        map.end()
    }
}

impl <'de> Deserialize<'de> for VoteCount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error> where D: Deserializer<'de> {
        struct VoteCountVisitor;
        impl <'de> Visitor<'de> for VoteCountVisitor {
            type Value = VoteCount;
            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result { formatter.write_str("a map from candidate to number of votes") }
            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error> where A: MapAccess<'de> {
                let mut res = VoteCount::default();
                while let Some((candidate,votes)) = access.next_entry::<CandidateId,usize>()? {
                    if !res.insert_new(candidate.clone(),votes) { return Err(serde::de::Error::custom(format!("candidate {} listed twice",candidate))); }
                }
                Ok(res)
            }
        }
        deserializer.deserialize_map(VoteCountVisitor)
    }
}

/// The reported count, broken down by table.
#[derive(Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportedTally {
    pub tables : BTreeMap<TableId,VoteCount>,
}

impl ReportedTally {
    /// For contests where the count is not broken down by table, treat everything as coming from table 1.
    pub fn single_table(votes:VoteCount) -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(TableId(1),votes);
        ReportedTally{tables}
    }
    /// Totals over all tables, candidates in order of first appearance.
    pub fn totals(&self) -> VoteCount {
        let mut res = VoteCount::default();
        for votes in self.tables.values() { res.accumulate(votes); }
        res
    }
    /// Number of ballots in a table.
    pub fn table_size(&self,table:TableId) -> usize { self.tables.get(&table).map(|v|v.total()).unwrap_or(0) }
    pub fn largest_table_size(&self) -> usize { self.tables.values().map(|v|v.total()).max().unwrap_or(0) }
    pub fn num_ballots(&self) -> usize { self.tables.values().map(|v|v.total()).sum() }
}
