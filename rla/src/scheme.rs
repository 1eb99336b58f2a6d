// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! Scheme adapters. Each election scheme says how the reported count is split into sub-audits
//! (null hypothesis sets), and how any count (reported or recounted, whole contest or one table)
//! is transformed into the contestants each sub-audit compares.

use std::collections::HashSet;
use serde::{Deserialize, Serialize};
use crate::contest_metadata::{AuditMode, CandidateId, ElectionScheme, Party, PseudoCandidate, SeatColumn, TableId, Threshold};
use crate::divisor::{winners_and_losers, Allocation};
use crate::errors::AuditError;
use crate::sampling::{build_ballot_population, build_table_population, BallotUnit};
use crate::sequential_test::{per_ballot_bound, SeatBounds};
use crate::vote_count::{ReportedTally, VoteCount};

/// The pseudo contestant standing for every candidate other than the reported winner of a super majority contest.
pub const OTHERS : &str = "<others>";

/// The transform from a raw count (keyed by candidate) to the count seen by one sub-audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum CountScope {
    /// Unchanged.
    Contest,
    /// The winner, and everyone else lumped together.
    Grouped { winner : CandidateId },
    /// Member candidates summed into their parties.
    Parties { parties : Vec<Party> },
    /// Just the given candidates, in the given order.
    Members { members : Vec<CandidateId> },
}

impl CountScope {
    pub fn transform(&self,count:&VoteCount) -> VoteCount {
        match self {
            CountScope::Contest => count.clone(),
            CountScope::Grouped { winner } => {
                let for_winner = count.get(winner);
                [(winner.clone(),for_winner),(CandidateId::new(OTHERS),count.total()-for_winner)].into_iter().collect()
            }
            CountScope::Parties { parties } => parties.iter().map(|p|(p.name.clone(),p.members.iter().map(|m|count.get(m)).sum())).collect(),
            CountScope::Members { members } => members.iter().map(|m|(m.clone(),count.get(m))).collect(),
        }
    }
}

/// What a sub-audit is derived from, before the mode specific test statistic is attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubAuditPlan {
    pub name : String,
    pub scope : CountScope,
    /// The reported count, transformed by scope.
    pub vote_count : VoteCount,
    pub winners : Vec<PseudoCandidate>,
    pub losers : Vec<PseudoCandidate>,
    pub sw : SeatBounds,
    pub sl : SeatBounds,
}

impl SubAuditPlan {
    fn new(name:String,scope:CountScope,vote_count:VoteCount,allocation:Allocation) -> Result<Self,AuditError> {
        allocation.check()?;
        let plan = SubAuditPlan{ name, scope, vote_count, sw: allocation.weakest_won(), sl: allocation.strongest_lost(), winners: allocation.winners, losers: allocation.losers };
        // every tracked winner has to be strictly ahead of every tracked loser.
        per_ballot_bound(&plan.vote_count,&plan.sw,&plan.sl)?;
        Ok(plan)
    }
}

/// The units the shuffled sample is drawn from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PopulationUnits {
    Ballots(Vec<BallotUnit>),
    /// Tables, with their number of ballots.
    Tables(Vec<(TableId,u64)>),
}

pub trait SchemeAdapter {
    /// The candidates a recount may mention. Fails if the reported tally does not fit the scheme.
    fn known_candidates(&self,tally:&ReportedTally) -> Result<Vec<CandidateId>,AuditError>;
    /// The primary sub-audit, followed by any secondary ones.
    fn derive_sub_audits(&self,winners:usize,totals:&VoteCount) -> Result<Vec<SubAuditPlan>,AuditError>;
    /// A raw count as seen by the sub-audit with the given scope.
    fn transform_count(&self,scope:&CountScope,count:&VoteCount) -> VoteCount { scope.transform(count) }
    fn sample_population(&self,mode:AuditMode,tally:&ReportedTally) -> PopulationUnits {
        match mode {
            AuditMode::BallotPolling => PopulationUnits::Ballots(build_ballot_population(tally)),
            AuditMode::Comparison => PopulationUnits::Tables(build_table_population(tally)),
        }
    }
}

/// Plurality : the `winners` candidates with most votes win, ties going to the one listed first. Every seat is column 1.
pub fn plurality_allocation(vote_count:&VoteCount,winners:usize) -> Allocation {
    let mut ordered : Vec<(&CandidateId,usize)> = vote_count.iter().collect();
    ordered.sort_by(|a,b|b.1.cmp(&a.1));
    let mut all : Vec<PseudoCandidate> = ordered.into_iter().map(|(c,_)|PseudoCandidate{ party: c.clone(), column: SeatColumn(1) }).collect();
    let losers = all.split_off(winners.min(all.len()));
    Allocation{ winners: all, losers }
}

fn super_majority_plan(threshold:&Threshold,totals:&VoteCount) -> Result<SubAuditPlan,AuditError> {
    let top = plurality_allocation(totals,1);
    let winner = top.winners.first().map(|w|w.party.clone()).ok_or_else(||AuditError::DegenerateAllocation("no candidates".to_string()))?;
    let (t_w,total) = (totals.get(&winner),totals.total());
    if (t_w as u128)*(threshold.denominator as u128) <= (threshold.numerator as u128)*(total as u128) {
        return Err(AuditError::ArithmeticDomain(format!("{} has {} of {} votes, not more than {}/{}",winner,t_w,total,threshold.numerator,threshold.denominator)));
    }
    let scope = CountScope::Grouped{ winner: winner.clone() };
    let allocation = Allocation{
        winners: vec![PseudoCandidate{ party: winner, column: SeatColumn(threshold.numerator) }],
        losers: vec![PseudoCandidate{ party: CandidateId::new(OTHERS), column: SeatColumn(threshold.denominator-threshold.numerator) }],
    };
    SubAuditPlan::new("contest".to_string(),scope.clone(),scope.transform(totals),allocation)
}

fn dhondt_plans(parties:&[Party],seats:usize,totals:&VoteCount) -> Result<Vec<SubAuditPlan>,AuditError> {
    let scope = CountScope::Parties{ parties: parties.to_vec() };
    let party_votes = scope.transform(totals);
    let allocation = winners_and_losers(&party_votes,seats);
    let mut res = vec![];
    for party in parties {
        let won = allocation.seats_won(&party.name);
        if won>party.members.len() { return Err(AuditError::DegenerateAllocation(format!("party {} won {} seats but has only {} candidates",party.name,won,party.members.len()))); }
        if won==0 || won==party.members.len() { continue; } // nothing to decide inside the party.
        let member_scope = CountScope::Members{ members: party.members.clone() };
        let member_votes = member_scope.transform(totals);
        let member_allocation = plurality_allocation(&member_votes,won);
        res.push(SubAuditPlan::new(party.name.to_string(),member_scope,member_votes,member_allocation)?);
    }
    res.insert(0,SubAuditPlan::new("contest".to_string(),scope,party_votes,allocation)?);
    Ok(res)
}

impl SchemeAdapter for ElectionScheme {
    fn known_candidates(&self,tally:&ReportedTally) -> Result<Vec<CandidateId>,AuditError> {
        let totals = tally.totals();
        match self {
            ElectionScheme::DHondt { parties } => {
                let mut members : Vec<CandidateId> = vec![];
                let mut seen : HashSet<&CandidateId> = HashSet::new();
                for party in parties {
                    for m in &party.members {
                        if !seen.insert(m) { return Err(AuditError::InvalidContest(format!("candidate {} is listed more than once",m))); }
                        members.push(m.clone());
                    }
                }
                if let Some(stray) = totals.candidates().find(|c|!seen.contains(c)) {
                    return Err(AuditError::InvalidContest(format!("candidate {} is not in any party",stray)));
                }
                Ok(members)
            }
            _ => {
                if totals.contains(&CandidateId::new(OTHERS)) { return Err(AuditError::InvalidContest(format!("{} is a reserved name",OTHERS))); }
                Ok(totals.candidates().cloned().collect())
            }
        }
    }

    fn derive_sub_audits(&self,winners:usize,totals:&VoteCount) -> Result<Vec<SubAuditPlan>,AuditError> {
        match self {
            ElectionScheme::Plurality => Ok(vec![SubAuditPlan::new("contest".to_string(),CountScope::Contest,totals.clone(),plurality_allocation(totals,winners))?]),
            ElectionScheme::SuperMajority { threshold } => Ok(vec![super_majority_plan(threshold,totals)?]),
            ElectionScheme::DHondt { parties } => dhondt_plans(parties,winners,totals),
        }
    }
}
