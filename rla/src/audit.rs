// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! The audit of one contest, as a state machine over recount rounds.
//!
//! ```text
//! Created → SamplingReady → AwaitingRecount → (ProcessingRound → AwaitingRecount)* → Validated | Exhausted
//! ```
//!
//! A round is computed on a copy of the audit and only swapped in once it has fully succeeded, so a
//! rejected recount batch leaves everything (likelihoods, polled ballots, the sample) as it was.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use num::{BigRational, One};
use serde::{Deserialize, Serialize};
use crate::beacon::{BeaconConfig, SeedProvider};
use crate::contest_metadata::{AuditMode, CandidateId, Contest, PseudoCandidate, RiskLimit, TableId};
use crate::errors::{AuditError, ValidationFailure};
use crate::precision::{p_value_serde, rational_string, ratio, Likelihood, PrecisionContext};
use crate::sample_size::{asn, comparison_sample_size};
use crate::sampling::{group_by_table, seed_rng, shuffle, shuffle_weighted, to_hex, SampleOrder, Shuffled, ShuffledPopulation};
use crate::scheme::{CountScope, PopulationUnits, SchemeAdapter, SubAuditPlan};
use crate::sequential_test::{comparison_factor, initial_likelihoods, max_p_value, micro, per_ballot_bound, sprt, validated, ComparisonBounds, PairwiseLikelihoods, SeatBounds};
use crate::vote_count::{ReportedTally, VoteCount};

/// Settings for the engine that are not part of any one contest.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub precision : PrecisionContext,
    /// γ, the hedge used in comparison audits.
    #[serde(with = "rational_string")]
    pub hedge : BigRational,
    pub beacon : BeaconConfig,
}

impl Default for EngineConfig {
    fn default() -> Self { EngineConfig{ precision: PrecisionContext::default(), hedge: ratio(19,20), beacon: BeaconConfig::default() } }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPhase {
    Created,
    SamplingReady,
    AwaitingRecount,
    /// Only ever seen on the working copy of an audit while a round is computed.
    ProcessingRound,
    Validated,
    /// The poll cap (or the whole sample) was used up without validating. A full recount is needed.
    Exhausted,
}

impl AuditPhase {
    pub fn is_terminal(self) -> bool { matches!(self,AuditPhase::Validated|AuditPhase::Exhausted) }
}

impl fmt::Display for AuditPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            AuditPhase::Created => "created",
            AuditPhase::SamplingReady => "ready to sample",
            AuditPhase::AwaitingRecount => "awaiting a recount",
            AuditPhase::ProcessingRound => "processing a round",
            AuditPhase::Validated => "validated",
            AuditPhase::Exhausted => "exhausted",
        })
    }
}

/// The evidence accumulated by one sub-audit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TestStatistic {
    BallotPolling { likelihoods : PairwiseLikelihoods },
    Comparison {
        likelihood : Likelihood,
        /// u, the most a single ballot can overstate the tightest margin by, relative to that margin.
        #[serde(with = "rational_string")]
        per_ballot_bound : BigRational,
    },
}

/// One set of null hypotheses : the whole contest, or (for D'Hondt) the race inside one party.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubAudit {
    pub name : String,
    pub scope : CountScope,
    pub vote_count : VoteCount,
    pub winners : Vec<PseudoCandidate>,
    pub losers : Vec<PseudoCandidate>,
    pub sw : SeatBounds,
    pub sl : SeatBounds,
    pub test : TestStatistic,
}

impl SubAudit {
    fn new(plan:SubAuditPlan,mode:AuditMode) -> Result<Self,AuditError> {
        let test = match mode {
            AuditMode::BallotPolling => {
                let likelihoods = initial_likelihoods(&plan.sw,&plan.sl);
                if likelihoods.is_empty() { return Err(AuditError::DegenerateAllocation(format!("{} has no winner/loser pairs to test",plan.name))); }
                TestStatistic::BallotPolling{ likelihoods }
            }
            AuditMode::Comparison => TestStatistic::Comparison{ likelihood: Likelihood::one(), per_ballot_bound: per_ballot_bound(&plan.vote_count,&plan.sw,&plan.sl)? },
        };
        Ok(SubAudit{ name: plan.name, scope: plan.scope, vote_count: plan.vote_count, winners: plan.winners, losers: plan.losers, sw: plan.sw, sl: plan.sl, test })
    }

    /// max over the null hypotheses of 1/T.
    pub fn max_p_value(&self) -> f64 {
        match &self.test {
            TestStatistic::BallotPolling { likelihoods } => max_p_value(likelihoods),
            TestStatistic::Comparison { likelihood, .. } => likelihood.p_value(),
        }
    }

    pub fn validated(&self,risk_limit:&RiskLimit) -> bool {
        match &self.test {
            TestStatistic::BallotPolling { likelihoods } => validated(likelihoods,risk_limit),
            TestStatistic::Comparison { likelihood, .. } => likelihood.reaches(&risk_limit.threshold()),
        }
    }

    /// u_p and U, for comparison audits.
    pub fn comparison_bounds(&self,tally:&ReportedTally,weighted:bool) -> Option<ComparisonBounds> {
        match &self.test {
            TestStatistic::Comparison { per_ballot_bound, .. } => Some(ComparisonBounds::new(per_ballot_bound.clone(),tally,weighted)),
            TestStatistic::BallotPolling { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round : usize,
    /// Ballots recounted this round.
    pub ballots : usize,
    #[serde(with = "p_value_serde")]
    pub max_p_value : f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditState {
    pub phase : AuditPhase,
    pub polled_ballots : usize,
    pub rounds : usize,
    #[serde(with = "p_value_serde")]
    pub max_p_value : f64,
    /// Sum of all recounts so far, by candidate.
    pub accumulated_recount : VoteCount,
    pub history : Vec<RoundRecord>,
}

impl AuditState {
    fn new() -> Self { AuditState{ phase: AuditPhase::Created, polled_ballots: 0, rounds: 0, max_p_value: 1.0, accumulated_recount: VoteCount::default(), history: vec![] } }
}

/// The hand count of one round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RecountBatch {
    /// The next `declared_ballots` ballots of the sample, by candidate.
    BallotPolling { declared_ballots : usize, counts : VoteCount },
    /// Whole tables from the front of the sample, `declared_ballots` being the number of ballots found in them.
    Comparison { declared_ballots : usize, tables : BTreeMap<TableId,VoteCount> },
}

impl RecountBatch {
    fn mode(&self) -> AuditMode {
        match self {
            RecountBatch::BallotPolling { .. } => AuditMode::BallotPolling,
            RecountBatch::Comparison { .. } => AuditMode::Comparison,
        }
    }
}

/// What to recount next.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSelection {
    /// Ballot positions within each table.
    Ballots(BTreeMap<TableId,Vec<u32>>),
    Tables(Vec<TableId>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProposedBatch {
    /// Number of ballots (polling) or tables (comparison).
    pub size : usize,
    pub selection : SampleSelection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Audit {
    pub contest : Contest,
    pub tally : ReportedTally,
    pub precision : PrecisionContext,
    #[serde(with = "rational_string")]
    pub hedge : BigRational,
    /// Candidates a recount may mention.
    pub candidates : Vec<CandidateId>,
    pub sub_audits : Vec<SubAudit>,
    pub population : Option<ShuffledPopulation>,
    pub state : AuditState,
}

impl Audit {
    /// Register a contest with its reported tally, deriving the sub-audits from the reported outcome.
    pub fn new(contest:Contest,tally:ReportedTally,config:&EngineConfig) -> Result<Self,AuditError> {
        contest.check()?;
        if tally.num_ballots()==0 { return Err(AuditError::InvalidContest(format!("contest {} has no reported ballots",contest.id))); }
        let candidates = contest.scheme.known_candidates(&tally)?;
        let plans = contest.scheme.derive_sub_audits(contest.winners,&tally.totals())?;
        let sub_audits = plans.into_iter().map(|p|SubAudit::new(p,contest.mode)).collect::<Result<Vec<_>,_>>()?;
        for sub in &sub_audits {
            if let Some(bounds) = sub.comparison_bounds(&tally,contest.weighted_sampling) {
                if *bounds.contest_bound()<=BigRational::one() { return Err(AuditError::ArithmeticDomain(format!("total error bound {} for {} must exceed 1",bounds.contest_bound(),sub.name))); }
            }
        }
        info!("Created {} audit of {} with {} sub-audit(s) over {} ballots",contest.mode,contest.id,sub_audits.len(),tally.num_ballots());
        Ok(Audit{ contest, tally, precision: config.precision, hedge: config.hedge.clone(), candidates, sub_audits, population: None, state: AuditState::new() })
    }

    pub fn phase(&self) -> AuditPhase { self.state.phase }

    /// The largest p-value over all sub-audits.
    pub fn max_p_value(&self) -> f64 { self.sub_audits.iter().map(|s|s.max_p_value()).fold(0.0,f64::max) }

    /// true iff every sub-audit has reached the risk limit.
    pub fn is_validated(&self) -> bool { self.sub_audits.iter().all(|s|s.validated(&self.contest.risk_limit)) }

    /// Units of the sample not yet recounted.
    pub fn remaining_sample(&self) -> usize { self.population.as_ref().map(|p|p.order.remaining()).unwrap_or(0) }

    /// Move from Created to SamplingReady once the random pulse time has passed.
    pub fn check_schedule(&mut self,now:DateTime<Utc>) -> Result<(),AuditError> {
        if self.state.phase==AuditPhase::Created {
            if now<self.contest.random_seed_time { return Err(AuditError::Scheduling{ scheduled: self.contest.random_seed_time, now }); }
            self.state.phase=AuditPhase::SamplingReady;
        }
        Ok(())
    }

    /// Get the public seed and shuffle the population. Does nothing if already done.
    pub fn prepare_sample(&mut self,provider:&dyn SeedProvider,now:DateTime<Utc>) -> Result<(),AuditError> {
        if self.population.is_some() { return Ok(()); }
        self.check_schedule(now)?;
        if self.state.phase!=AuditPhase::SamplingReady { return Err(AuditError::InvalidState(self.state.phase.to_string())); }
        let seed = provider.seed(self.contest.random_seed_time)?;
        let mut rng = seed_rng(&seed);
        let order = match self.contest.scheme.sample_population(self.contest.mode,&self.tally) {
            PopulationUnits::Ballots(ballots) => SampleOrder::Ballots(Shuffled::new(shuffle(ballots,&mut rng,self.contest.max_polls))),
            PopulationUnits::Tables(tables) => {
                let n = tables.len();
                let order = if self.contest.weighted_sampling { shuffle_weighted(tables,&mut rng,n) } else { shuffle(tables.into_iter().map(|(t,_)|t).collect(),&mut rng,n) };
                SampleOrder::Tables(Shuffled::new(order))
            }
        };
        info!("Shuffled {} units for {} with seed {}",order.remaining(),self.contest.id,to_hex(&seed));
        self.population=Some(ShuffledPopulation{ seed_hex: to_hex(&seed), order });
        self.state.phase=AuditPhase::AwaitingRecount;
        Ok(())
    }

    /// The advisory number of units (ballots or tables) needed in total : the largest over the sub-audits.
    pub fn estimate_sample_size(&self) -> Result<usize,AuditError> {
        let alpha = &self.contest.risk_limit;
        let mut res = 0;
        for sub in &self.sub_audits {
            let n = match sub.comparison_bounds(&self.tally,self.contest.weighted_sampling) {
                Some(bounds) => comparison_sample_size(bounds.contest_bound(),alpha,&self.hedge)?,
                None => {
                    // only a fraction of the sampled ballots are relevant to a party's internal race.
                    let relevant = sub.vote_count.total().max(1);
                    let n = asn(alpha,&sub.vote_count,&sub.sw,&sub.sl)?;
                    ((n as u128*self.tally.num_ballots() as u128).div_ceil(relevant as u128)) as usize
                }
            };
            res=res.max(n);
        }
        Ok(res)
    }

    /// What to recount next. Draws the sample first if needed; consumes nothing.
    pub fn propose_batch(&mut self,provider:&dyn SeedProvider,now:DateTime<Utc>) -> Result<ProposedBatch,AuditError> {
        self.prepare_sample(provider,now)?;
        if self.state.phase.is_terminal() { return Err(AuditError::InvalidState(self.state.phase.to_string())); }
        let estimate = self.estimate_sample_size()?;
        let population = self.population.as_ref().ok_or_else(||AuditError::InvalidState("no sample".to_string()))?;
        let size = estimate.saturating_sub(population.order.consumed()).max(1).min(population.order.remaining());
        debug!("Estimated {} units needed for {}, proposing {}",estimate,self.contest.id,size);
        let selection = match &population.order {
            SampleOrder::Ballots(s) => SampleSelection::Ballots(group_by_table(&s.peek(size))),
            SampleOrder::Tables(s) => SampleSelection::Tables(s.peek(size)),
        };
        Ok(ProposedBatch{ size, selection })
    }

    /// Apply one round. Either the whole round is applied or, on error, nothing changes.
    pub fn apply_recount(&mut self,batch:&RecountBatch) -> Result<AuditPhase,AuditError> {
        if self.state.phase!=AuditPhase::AwaitingRecount { return Err(AuditError::InvalidState(self.state.phase.to_string())); }
        let mut next = self.clone();
        next.state.phase=AuditPhase::ProcessingRound;
        match next.process_round(batch) {
            Ok(()) => {
                *self=next;
                Ok(self.state.phase)
            }
            Err(e) => {
                warn!("Rejected recount for {} : {}",self.contest.id,e);
                Err(e)
            }
        }
    }

    fn check_candidates(&self,count:&VoteCount) -> Result<(),ValidationFailure> {
        let known : HashSet<&CandidateId> = self.candidates.iter().collect();
        match count.candidates().find(|c|!known.contains(c)) {
            Some(c) => Err(ValidationFailure::UnknownCandidate(c.clone())),
            None => Ok(()),
        }
    }

    fn process_round(&mut self,batch:&RecountBatch) -> Result<(),AuditError> {
        if batch.mode()!=self.contest.mode { return Err(ValidationFailure::WrongMode{ expected: self.contest.mode.to_string(), got: batch.mode().to_string() }.into()); }
        match batch {
            RecountBatch::BallotPolling { counts, .. } => self.check_candidates(counts)?,
            RecountBatch::Comparison { tables, .. } => for recount in tables.values() { self.check_candidates(recount)?; },
        }
        let population = self.population.as_mut().ok_or_else(||AuditError::InvalidState("no sample".to_string()))?;
        let ballots = match (batch,&mut population.order) {
            (RecountBatch::BallotPolling { declared_ballots, counts },SampleOrder::Ballots(order)) => {
                let declared = *declared_ballots;
                if declared==0 { return Err(ValidationFailure::EmptyBatch.into()); }
                if declared>order.remaining() { return Err(ValidationFailure::BatchTooLarge{ declared, remaining: order.remaining() }.into()); }
                if counts.total()!=declared { return Err(ValidationFailure::TotalMismatch{ declared, summed: counts.total() }.into()); }
                order.consume_next_batch(declared);
                for sub in self.sub_audits.iter_mut() {
                    if let TestStatistic::BallotPolling { likelihoods } = &mut sub.test {
                        let recount = self.contest.scheme.transform_count(&sub.scope,counts);
                        *likelihoods = sprt(&sub.vote_count,&recount,likelihoods,&self.contest.risk_limit,&sub.sw,&sub.sl,&self.precision)?;
                    }
                }
                self.state.accumulated_recount.accumulate(counts);
                declared
            }
            (RecountBatch::Comparison { declared_ballots, tables },SampleOrder::Tables(order)) => {
                if tables.is_empty() { return Err(ValidationFailure::EmptyBatch.into()); }
                let next : HashSet<TableId> = order.peek(tables.len()).into_iter().collect();
                for &table in tables.keys() {
                    if !self.tally.tables.contains_key(&table) { return Err(ValidationFailure::UnknownTable(table).into()); }
                    if !next.contains(&table) { return Err(ValidationFailure::TableNotNext(table).into()); }
                }
                let summed : usize = tables.values().map(|v|v.total()).sum();
                if summed!=*declared_ballots { return Err(ValidationFailure::TotalMismatch{ declared: *declared_ballots, summed }.into()); }
                order.consume_next_batch(tables.len());
                self.process_comparison_tables(tables)?;
                for recount in tables.values() { self.state.accumulated_recount.accumulate(recount); }
                tables.keys().map(|&t|self.tally.table_size(t)).sum()
            }
            _ => return Err(AuditError::InvalidState("sample does not match the audit mode".to_string())),
        };
        self.state.polled_ballots+=ballots;
        self.state.rounds+=1;
        self.state.max_p_value=self.max_p_value();
        self.state.history.push(RoundRecord{ round: self.state.rounds, ballots, max_p_value: self.state.max_p_value });
        for sub in &self.sub_audits { debug!("{} {} : max p-value {}",self.contest.id,sub.name,sub.max_p_value()); }
        self.state.phase = if self.is_validated() {
            AuditPhase::Validated
        } else if self.state.polled_ballots>=self.contest.max_polls || self.remaining_sample()==0 {
            AuditPhase::Exhausted
        } else { AuditPhase::AwaitingRecount };
        info!("Round {} of {} : {} ballots, {} polled in total, max p-value {}, now {}",self.state.rounds,self.contest.id,ballots,self.state.polled_ballots,self.state.max_p_value,self.state.phase);
        Ok(())
    }

    fn process_comparison_tables(&mut self,tables:&BTreeMap<TableId,VoteCount>) -> Result<(),AuditError> {
        let risk_limit = &self.contest.risk_limit;
        for sub in self.sub_audits.iter_mut() {
            if sub.validated(risk_limit) { continue; }
            let Some(bounds) = sub.comparison_bounds(&self.tally,self.contest.weighted_sampling) else { continue };
            let mut t = match &sub.test {
                TestStatistic::Comparison { likelihood, .. } => likelihood.0.clone(),
                TestStatistic::BallotPolling { .. } => continue,
            };
            for (&table,recount) in tables {
                let reported = self.tally.tables.get(&table).ok_or(ValidationFailure::UnknownTable(table))?;
                let scheme = &self.contest.scheme;
                let overstatement = micro(&sub.vote_count,&scheme.transform_count(&sub.scope,reported),&scheme.transform_count(&sub.scope,recount),&sub.winners,&sub.losers)?;
                let factor = comparison_factor(&overstatement,&bounds.table_bound(table),bounds.contest_bound(),&self.hedge)?;
                t = self.precision.mul(&t,&factor);
            }
            if let TestStatistic::Comparison { likelihood, .. } = &mut sub.test { *likelihood=Likelihood(t); }
        }
        Ok(())
    }
}
