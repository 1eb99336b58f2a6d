// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! Divisor methods (D'Hondt) : working out which (party, seat column) pseudo-candidates won,
//! and the per-party bounds used by the sequential tests.
//!
//! Seat columns are counted from 1 and the divisor of column s is s. Every computation in this
//! crate that needs a divisor goes through [divisor], so this is the only place the convention lives.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use num::BigRational;
use crate::contest_metadata::{CandidateId, PseudoCandidate, SeatColumn};
use crate::errors::AuditError;
use crate::precision::ratio;
use crate::vote_count::VoteCount;

/// The D'Hondt divisor for a (1 based) seat column.
pub fn divisor(column:SeatColumn) -> usize { column.0 }

/// Reported votes for the party divided by the divisor for the column.
pub fn pseudo_candidate_value(party:&CandidateId,vote_count:&VoteCount,column:SeatColumn) -> BigRational {
    ratio(vote_count.get(party),divisor(column))
}

/// Compare the values of two pseudo candidates exactly, without division.
fn compare_values(a:&PseudoCandidate,b:&PseudoCandidate,vote_count:&VoteCount) -> Ordering {
    let va = vote_count.get(&a.party) as u128 * divisor(b.column) as u128;
    let vb = vote_count.get(&b.party) as u128 * divisor(a.column) as u128;
    va.cmp(&vb)
}

/// The reported winning and losing pseudo candidates, each in decreasing order of value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub winners : Vec<PseudoCandidate>,
    pub losers : Vec<PseudoCandidate>,
}

/// Build every (party, column) pair for columns 1..=total_seats, sort by value (ties keep input order,
/// column major), and take the first total_seats as winners.
///
/// ```
/// use rla::divisor::winners_and_losers;
/// use rla::vote_count::VoteCount;
/// use rla::contest_metadata::{CandidateId, SeatColumn};
/// let votes : VoteCount = [("A",100000),("B",80000),("C",20000)].into_iter().collect();
/// let allocation = winners_and_losers(&votes,3);
/// let won : Vec<(String,usize)> = allocation.winners.iter().map(|p|(p.party.0.clone(),p.column.0)).collect();
/// assert_eq!(won,vec![("A".to_string(),1),("B".to_string(),1),("A".to_string(),2)]);
/// assert_eq!(allocation.weakest_won()[&CandidateId::new("A")],SeatColumn(2));
/// assert_eq!(allocation.strongest_lost()[&CandidateId::new("C")],SeatColumn(1));
/// ```
///
/// If total_seats is 0, or there is only one party, one of the sets is empty. Use [Allocation::check] to guard against that.
pub fn winners_and_losers(party_votes:&VoteCount,total_seats:usize) -> Allocation {
    let mut full_set : Vec<PseudoCandidate> = vec![];
    for column in 1..=total_seats {
        for party in party_votes.candidates() {
            full_set.push(PseudoCandidate{ party: party.clone(), column: SeatColumn(column) });
        }
    }
    full_set.sort_by(|a,b|compare_values(b,a,party_votes)); // stable, descending.
    let losers = full_set.split_off(total_seats.min(full_set.len()));
    Allocation{ winners: full_set, losers }
}

impl Allocation {
    /// A sub-audit needs at least one winner and one loser.
    pub fn check(&self) -> Result<(),AuditError> {
        if self.winners.is_empty() { Err(AuditError::DegenerateAllocation("no seats are won".to_string())) }
        else if self.losers.is_empty() { Err(AuditError::DegenerateAllocation(format!("all {} contestants win, there is no loser to compare against",self.winners.len()))) }
        else { Ok(()) }
    }
    /// Sw : for each party with a seat, the largest column it won (its weakest winning seat).
    pub fn weakest_won(&self) -> BTreeMap<CandidateId,SeatColumn> {
        let mut res : BTreeMap<CandidateId,SeatColumn> = BTreeMap::new();
        for w in &self.winners {
            let e = res.entry(w.party.clone()).or_insert(w.column);
            if w.column > *e { *e=w.column; }
        }
        res
    }
    /// Sl : for each party that missed out on a seat, the smallest column it lost (its strongest losing seat).
    pub fn strongest_lost(&self) -> BTreeMap<CandidateId,SeatColumn> {
        let mut res : BTreeMap<CandidateId,SeatColumn> = BTreeMap::new();
        for l in &self.losers {
            let e = res.entry(l.party.clone()).or_insert(l.column);
            if l.column < *e { *e=l.column; }
        }
        res
    }
    /// Number of seats won by a party.
    pub fn seats_won(&self,party:&CandidateId) -> usize { self.winners.iter().filter(|w|&w.party==party).count() }
}
