// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.


//! Monte-Carlo experiments : how many ballots a ballot polling audit typically needs if the
//! reported result is exactly right.


use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use crate::audit::{SubAudit, TestStatistic};
use crate::contest_metadata::{CandidateId, RiskLimit};
use crate::errors::AuditError;
use crate::precision::PrecisionContext;
use crate::sequential_test::{max_p_value, sprt, validated};
use crate::vote_count::VoteCount;

/// Draw elements with replacement, each with an integer weight.
#[derive(Clone)]
pub struct SampleWithReplacement<E> {
    elements : Vec<E>,
    /// cumulative[i] is the total weight of elements 0..=i
    cumulative : Vec<u64>,
}

impl <E> Default for SampleWithReplacement<E> {
    fn default() -> Self { SampleWithReplacement{ elements: vec![], cumulative: vec![] } }
}

impl <E:Clone> SampleWithReplacement<E> {
    /// add an element that could be chosen
    pub fn add(&mut self,e:E) {
        self.add_multiple(e,1);
    }

    /// Add an element multiple times. Adding 0 times does nothing.
    pub fn add_multiple(&mut self,e:E,n:u64) {
        if n==0 { return; }
        let total = self.total();
        self.elements.push(e);
        self.cumulative.push(total+n);
    }

    pub fn total(&self) -> u64 { self.cumulative.last().cloned().unwrap_or(0) }

    /// Get a random element. None if nothing has been added.
    pub fn get(&self,rng:&mut impl Rng) -> Option<E> {
        if self.elements.is_empty() { return None; }
        let chosen = rng.random_range(0..self.total());
        let index = self.cumulative.partition_point(|&c|c<=chosen);
        self.elements.get(index).cloned()
    }
}

#[derive(Clone, Debug)]
pub struct SimulationOutcome {
    pub validated : bool,
    pub ballots : usize,
    /// The max p-value after each ballot.
    pub p_value_history : Vec<f64>,
}

/// Run the SPRT for one sub-audit one ballot at a time, drawing ballots in the reported proportions, until it validates or max_ballots is reached.
pub fn simulate_ballot_polling(sub_audit:&SubAudit,risk_limit:&RiskLimit,max_ballots:usize,precision:&PrecisionContext,rng:&mut impl Rng) -> Result<SimulationOutcome,AuditError> {
    let TestStatistic::BallotPolling { likelihoods } = &sub_audit.test else { return Err(AuditError::InvalidState("simulation is only for ballot polling".to_string())) };
    let mut ballots : SampleWithReplacement<CandidateId> = SampleWithReplacement::default();
    for (candidate,votes) in sub_audit.vote_count.iter() { ballots.add_multiple(candidate.clone(),votes as u64); }
    let mut t = likelihoods.clone();
    let mut p_value_history = vec![];
    while p_value_history.len()<max_ballots && !validated(&t,risk_limit) {
        let Some(candidate) = ballots.get(rng) else { break };
        let recount : VoteCount = [(candidate,1)].into_iter().collect();
        t = sprt(&sub_audit.vote_count,&recount,&t,risk_limit,&sub_audit.sw,&sub_audit.sl,precision)?;
        p_value_history.push(max_p_value(&t));
    }
    Ok(SimulationOutcome{ validated: validated(&t,risk_limit), ballots: p_value_history.len(), p_value_history })
}

#[derive(Clone, Debug)]
pub struct SimulationSummary {
    pub repetitions : usize,
    /// Mean ballots used, counting max_ballots for runs that did not validate.
    pub mean_ballots : f64,
    pub validated_fraction : f64,
}

/// Repeat [simulate_ballot_polling], reproducibly from the seed.
pub fn average_sample_number(sub_audit:&SubAudit,risk_limit:&RiskLimit,max_ballots:usize,precision:&PrecisionContext,repetitions:usize,seed:u64) -> Result<SimulationSummary,AuditError> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut total_ballots = 0;
    let mut num_validated = 0;
    for _ in 0..repetitions {
        let outcome = simulate_ballot_polling(sub_audit,risk_limit,max_ballots,precision,&mut rng)?;
        total_ballots+=outcome.ballots;
        if outcome.validated { num_validated+=1; }
    }
    let n = repetitions.max(1) as f64;
    Ok(SimulationSummary{ repetitions, mean_ballots: total_ballots as f64/n, validated_fraction: num_validated as f64/n })
}
