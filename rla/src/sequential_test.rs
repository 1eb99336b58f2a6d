// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! The sequential tests.
//!
//! Ballot polling uses Wald's SPRT, one likelihood ratio T[w][l] per (winner, loser) null hypothesis
//! "w did not really beat l". Comparison audits use a single likelihood ratio per sub-audit, multiplied
//! for each recounted table by a factor derived from that table's maximum relative overstatement (MICRO).
//!
//! All divisor arithmetic is done through [divisor], so plurality contests are just the special case
//! where every seat column is 1.

use std::collections::BTreeMap;
use num::{BigInt, BigRational, One, Signed, Zero};
use crate::contest_metadata::{CandidateId, PseudoCandidate, RiskLimit, SeatColumn, TableId};
use crate::divisor::divisor;
use crate::errors::AuditError;
use crate::precision::{Likelihood, PrecisionContext, rational, ratio};
use crate::vote_count::{ReportedTally, VoteCount};

/// For each party (or candidate), a seat column. Used for both Sw and Sl.
pub type SeatBounds = BTreeMap<CandidateId,SeatColumn>;

/// T[w][l] for ballot polling.
pub type PairwiseLikelihoods = BTreeMap<CandidateId,BTreeMap<CandidateId,Likelihood>>;

/// Every tracked null hypothesis starts at 1 : one per winner in Sw and loser in Sl that are different.
pub fn initial_likelihoods(sw:&SeatBounds,sl:&SeatBounds) -> PairwiseLikelihoods {
    let mut res = PairwiseLikelihoods::new();
    for w in sw.keys() {
        let row : BTreeMap<CandidateId,Likelihood> = sl.keys().filter(|l|*l!=w).map(|l|(l.clone(),Likelihood::one())).collect();
        if !row.is_empty() { res.insert(w.clone(),row); }
    }
    res
}

/// t_p/(t_p+t_q) * (d_p+d_q)/d_p : the likelihood ratio of a ballot for p, when comparing p and q.
pub fn gamma(t_p:usize,t_q:usize,d_p:usize,d_q:usize) -> Result<BigRational,AuditError> {
    if t_p+t_q==0 { return Err(AuditError::ArithmeticDomain("both contestants have no reported votes".to_string())); }
    Ok(ratio(t_p,t_p+t_q)*ratio(d_p+d_q,d_p))
}

fn bound(bounds:&SeatBounds,who:&CandidateId) -> Result<usize,AuditError> {
    bounds.get(who).map(|c|divisor(*c)).ok_or_else(||AuditError::ArithmeticDomain(format!("no seat bound for {}",who)))
}

/// Factor by which a ballot for winner w multiplies T[w][l].
pub fn gamma_pos(w:&CandidateId,l:&CandidateId,sw:&SeatBounds,sl:&SeatBounds,vote_count:&VoteCount) -> Result<BigRational,AuditError> {
    gamma(vote_count.get(w),vote_count.get(l),bound(sw,w)?,bound(sl,l)?)
}

/// Factor by which a ballot for loser l multiplies T[w][l].
pub fn gamma_neg(w:&CandidateId,l:&CandidateId,sw:&SeatBounds,sl:&SeatBounds,vote_count:&VoteCount) -> Result<BigRational,AuditError> {
    gamma(vote_count.get(l),vote_count.get(w),bound(sl,l)?,bound(sw,w)?)
}

/// One round of the SPRT. Returns the new T; hypotheses already rejected are left alone.
pub fn sprt(vote_count:&VoteCount,recount:&VoteCount,t:&PairwiseLikelihoods,risk_limit:&RiskLimit,sw:&SeatBounds,sl:&SeatBounds,precision:&PrecisionContext) -> Result<PairwiseLikelihoods,AuditError> {
    let threshold = risk_limit.threshold();
    let mut res = t.clone();
    for (winner,row) in res.iter_mut() {
        for (loser,likelihood) in row.iter_mut() {
            if !likelihood.reaches(&threshold) {
                let y1 = precision.pow(&gamma_pos(winner,loser,sw,sl,vote_count)?,recount.get(winner));
                let y2 = precision.pow(&gamma_neg(winner,loser,sw,sl,vote_count)?,recount.get(loser));
                *likelihood = Likelihood(precision.mul(&likelihood.0,&precision.mul(&y1,&y2)));
            }
        }
    }
    Ok(res)
}

/// max over tracked hypotheses of 1/T[w][l].
pub fn max_p_value(t:&PairwiseLikelihoods) -> f64 {
    t.values().flat_map(|row|row.values()).map(|l|l.p_value()).fold(0.0,f64::max)
}

/// true iff every T[w][l] ≥ 1/α.
pub fn validated(t:&PairwiseLikelihoods,risk_limit:&RiskLimit) -> bool {
    let threshold = risk_limit.threshold();
    t.values().flat_map(|row|row.values()).all(|l|l.reaches(&threshold))
}

/// u : the largest amount, as a fraction of the relevant margin, one ballot can overstate the
/// winner's lead over a loser. The maximum over pairs w≠l of (d(Sw[w])+d(Sl[l]))/(d(Sl[l])·t(w)−d(Sw[w])·t(l)).
pub fn per_ballot_bound(vote_count:&VoteCount,sw:&SeatBounds,sl:&SeatBounds) -> Result<BigRational,AuditError> {
    let mut res : Option<BigRational> = None;
    for (w,&sw_w) in sw {
        for (l,&sl_l) in sl {
            if w==l { continue; }
            let (dw,dl) = (divisor(sw_w),divisor(sl_l));
            let margin = BigInt::from(dl)*BigInt::from(vote_count.get(w))-BigInt::from(dw)*BigInt::from(vote_count.get(l));
            if margin<=BigInt::zero() { return Err(AuditError::ArithmeticDomain(format!("reported votes for {} and {} leave no margin",w,l))); }
            let u = BigRational::new(BigInt::from(dw+dl),margin);
            if res.as_ref().map(|r|u>*r).unwrap_or(true) { res=Some(u); }
        }
    }
    res.ok_or_else(||AuditError::ArithmeticDomain("no winner/loser pairs to bound".to_string()))
}

/// Maximum In-Contest Relative Overstatement of one table : the largest, over winning seat (p,s_w) and losing seat (q,s_l)
/// with p≠q, of the net overstatement of the reported result in the table relative to the contest margin between those seats.
pub fn micro(vote_count:&VoteCount,reported_table:&VoteCount,recount_table:&VoteCount,winners:&[PseudoCandidate],losers:&[PseudoCandidate]) -> Result<BigRational,AuditError> {
    let error = |c:&CandidateId| BigInt::from(reported_table.get(c))-BigInt::from(recount_table.get(c));
    let mut res : Option<BigRational> = None;
    for w in winners {
        for l in losers {
            if w.party==l.party { continue; }
            let (dw,dl) = (BigInt::from(divisor(w.column)),BigInt::from(divisor(l.column)));
            let x = &dl*error(&w.party)-&dw*error(&l.party);
            let y = &dl*BigInt::from(vote_count.get(&w.party))-&dw*BigInt::from(vote_count.get(&l.party));
            if y<=BigInt::zero() { return Err(AuditError::ArithmeticDomain(format!("reported votes for {} seat {} and {} seat {} leave no margin",w.party,w.column,l.party,l.column))); }
            let v = BigRational::new(x,y);
            if res.as_ref().map(|r|v>*r).unwrap_or(true) { res=Some(v); }
        }
    }
    res.ok_or_else(||AuditError::ArithmeticDomain("no winner/loser pairs for MICRO".to_string()))
}

/// Error bounds for a comparison audit : u_p for each table and their total U.
#[derive(Clone, Debug)]
pub struct ComparisonBounds {
    per_ballot : BigRational,
    /// None means every table gets the bound of the largest table.
    sizes : Option<BTreeMap<TableId,usize>>,
    largest_table : usize,
    contest_bound : BigRational,
}

impl ComparisonBounds {
    /// With uniform sampling every table is bounded by the largest table, U = u·b_max·n_tables;
    /// with weighted sampling each table is bounded by its own size, U = u·Σb_p.
    pub fn new(per_ballot:BigRational,tally:&ReportedTally,weighted:bool) -> Self {
        let largest_table = tally.largest_table_size();
        if weighted {
            let sizes : BTreeMap<TableId,usize> = tally.tables.iter().map(|(&t,v)|(t,v.total())).collect();
            let contest_bound = &per_ballot*rational(tally.num_ballots());
            ComparisonBounds{ per_ballot, sizes: Some(sizes), largest_table, contest_bound }
        } else {
            let contest_bound = &per_ballot*rational(largest_table)*rational(tally.tables.len());
            ComparisonBounds{ per_ballot, sizes: None, largest_table, contest_bound }
        }
    }
    /// u_p
    pub fn table_bound(&self,table:TableId) -> BigRational {
        let size = match &self.sizes {
            Some(sizes) => sizes.get(&table).cloned().unwrap_or(0),
            None => self.largest_table,
        };
        &self.per_ballot*rational(size)
    }
    /// U
    pub fn contest_bound(&self) -> &BigRational { &self.contest_bound }
}

/// γ·(1 − MICRO/u_p)/(1 − 1/U) + (1 − γ), but never negative (a recount can find more ballots than were reported).
pub fn comparison_factor(micro:&BigRational,table_bound:&BigRational,contest_bound:&BigRational,hedge:&BigRational) -> Result<BigRational,AuditError> {
    if *contest_bound<=BigRational::one() { return Err(AuditError::ArithmeticDomain(format!("total error bound {} must exceed 1",contest_bound))); }
    if table_bound.is_zero() { return Err(AuditError::ArithmeticDomain("table has no error bound".to_string())); }
    let taint = micro/table_bound;
    let one = BigRational::one();
    let factor = hedge*(&one-taint)/(&one-contest_bound.recip())+(&one-hedge);
    Ok(if factor.is_negative() { BigRational::zero() } else { factor })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plurality_bounds(names:&[&str]) -> SeatBounds { names.iter().map(|n|(CandidateId::new(n),SeatColumn(1))).collect() }

    fn alpha(a:f64) -> RiskLimit { RiskLimit::from_f64(a).unwrap() }

    #[test]
    fn test_gamma_plurality_is_bravo() {
        let votes : VoteCount = [("X",600),("Y",400)].into_iter().collect();
        let (sw,sl) = (plurality_bounds(&["X"]),plurality_bounds(&["Y"]));
        assert_eq!(gamma_pos(&"X".into(),&"Y".into(),&sw,&sl,&votes).unwrap(),ratio(6,5));
        assert_eq!(gamma_neg(&"X".into(),&"Y".into(),&sw,&sl,&votes).unwrap(),ratio(4,5));
    }

    #[test]
    fn test_gamma_dhondt() {
        // A's weakest won seat is column 2, B's strongest lost seat column 2.
        let votes : VoteCount = [("A",100000),("B",80000)].into_iter().collect();
        let sw : SeatBounds = [(CandidateId::new("A"),SeatColumn(2))].into_iter().collect();
        let sl : SeatBounds = [(CandidateId::new("B"),SeatColumn(2))].into_iter().collect();
        // 100000/180000 * 4/2
        assert_eq!(gamma_pos(&"A".into(),&"B".into(),&sw,&sl,&votes).unwrap(),ratio(10,9));
        // 80000/180000 * 4/2
        assert_eq!(gamma_neg(&"A".into(),&"B".into(),&sw,&sl,&votes).unwrap(),ratio(8,9));
        assert!(gamma(0,0,1,1).is_err());
    }

    #[test]
    fn test_validation_threshold() {
        let (sw,sl) = (plurality_bounds(&["w"]),plurality_bounds(&["l"]));
        let mut t = initial_likelihoods(&sw,&sl);
        let a = alpha(0.05);
        *t.get_mut(&CandidateId::new("w")).unwrap().get_mut(&CandidateId::new("l")).unwrap() = Likelihood(ratio(198,10));
        assert!(!validated(&t,&a));
        *t.get_mut(&CandidateId::new("w")).unwrap().get_mut(&CandidateId::new("l")).unwrap() = Likelihood(rational(20));
        assert!(validated(&t,&a));
        assert!((max_p_value(&t)-0.05).abs()<1e-12);
        assert_eq!(max_p_value(&t),max_p_value(&t));
    }

    #[test]
    fn test_initial_likelihoods_skip_same_party() {
        let sw : SeatBounds = [(CandidateId::new("A"),SeatColumn(2)),(CandidateId::new("B"),SeatColumn(1))].into_iter().collect();
        let sl : SeatBounds = [(CandidateId::new("A"),SeatColumn(3)),(CandidateId::new("B"),SeatColumn(2)),(CandidateId::new("C"),SeatColumn(1))].into_iter().collect();
        let t = initial_likelihoods(&sw,&sl);
        assert_eq!(t[&CandidateId::new("A")].len(),2);
        assert!(!t[&CandidateId::new("A")].contains_key(&CandidateId::new("A")));
        assert_eq!(t[&CandidateId::new("B")].len(),2);
        assert_eq!(max_p_value(&t),1.0);
    }

    #[test]
    fn test_sprt_round() {
        let votes : VoteCount = [("X",600),("Y",400)].into_iter().collect();
        let (sw,sl) = (plurality_bounds(&["X"]),plurality_bounds(&["Y"]));
        let ctx = PrecisionContext::default();
        let t = initial_likelihoods(&sw,&sl);
        let recount : VoteCount = [("X",3),("Y",1)].into_iter().collect();
        let t2 = sprt(&votes,&recount,&t,&alpha(0.1),&sw,&sl,&ctx).unwrap();
        // 1.2^3 * 0.8
        assert_eq!(t2[&CandidateId::new("X")][&CandidateId::new("Y")].0,ratio(1728*4,1000*5));
        assert_eq!(t[&CandidateId::new("X")][&CandidateId::new("Y")],Likelihood::one()); // input untouched
    }

    #[test]
    fn test_sprt_leaves_rejected_hypotheses_alone() {
        let votes : VoteCount = [("X",600),("Y",400)].into_iter().collect();
        let (sw,sl) = (plurality_bounds(&["X"]),plurality_bounds(&["Y"]));
        let mut t = initial_likelihoods(&sw,&sl);
        *t.get_mut(&CandidateId::new("X")).unwrap().get_mut(&CandidateId::new("Y")).unwrap() = Likelihood(rational(11));
        let recount : VoteCount = [("Y",50)].into_iter().collect();
        let t2 = sprt(&votes,&recount,&t,&alpha(0.1),&sw,&sl,&PrecisionContext::default()).unwrap();
        assert_eq!(t2,t);
    }

    #[test]
    fn test_per_ballot_bound() {
        let votes : VoteCount = [("X",600),("Y",400),("Z",100)].into_iter().collect();
        let u = per_ballot_bound(&votes,&plurality_bounds(&["X"]),&plurality_bounds(&["Y","Z"])).unwrap();
        assert_eq!(u,ratio(2,200));
        let tied : VoteCount = [("X",400),("Y",400)].into_iter().collect();
        assert!(matches!(per_ballot_bound(&tied,&plurality_bounds(&["X"]),&plurality_bounds(&["Y"])),Err(AuditError::ArithmeticDomain(_))));
    }

    #[test]
    fn test_micro() {
        let votes : VoteCount = [("X",600),("Y",400)].into_iter().collect();
        let w = vec![PseudoCandidate{party:"X".into(),column:SeatColumn(1)}];
        let l = vec![PseudoCandidate{party:"Y".into(),column:SeatColumn(1)}];
        let reported : VoteCount = [("X",60),("Y",40)].into_iter().collect();
        assert!(micro(&votes,&reported,&reported,&w,&l).unwrap().is_zero());
        // two ballots really for Y were reported for X : overstatement of 4 votes in a 200 vote margin.
        let recount : VoteCount = [("X",58),("Y",42)].into_iter().collect();
        assert_eq!(micro(&votes,&reported,&recount,&w,&l).unwrap(),ratio(4,200));
    }

    #[test]
    fn test_comparison_factor() {
        let hedge = ratio(19,20);
        let u_p = ratio(1,2);
        let big_u = rational(10);
        // no error : γ/(1-1/U) + 1-γ = 0.95/0.9+0.05
        let f = comparison_factor(&BigRational::zero(),&u_p,&big_u,&hedge).unwrap();
        assert_eq!(f,ratio(19,18)+ratio(1,20));
        // maximal overstatement leaves only the hedge.
        let f = comparison_factor(&u_p,&u_p,&big_u,&hedge).unwrap();
        assert_eq!(f,ratio(1,20));
        assert!(comparison_factor(&BigRational::zero(),&u_p,&BigRational::one(),&hedge).is_err());
    }

    #[test]
    fn test_comparison_bounds() {
        let mut tally = ReportedTally::default();
        tally.tables.insert(TableId(1),[("X",60),("Y",40)].into_iter().collect());
        tally.tables.insert(TableId(2),[("X",30),("Y",20)].into_iter().collect());
        let u = ratio(1,50);
        let uniform = ComparisonBounds::new(u.clone(),&tally,false);
        assert_eq!(uniform.table_bound(TableId(2)),rational(2));
        assert_eq!(*uniform.contest_bound(),rational(4));
        let weighted = ComparisonBounds::new(u,&tally,true);
        assert_eq!(weighted.table_bound(TableId(2)),rational(1));
        assert_eq!(*weighted.contest_bound(),rational(3));
    }
}
