// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! Advisory sample sizes. These suggest how many ballots (or tables) to recount next round;
//! they never limit what may be recounted.

use num::{BigRational, One, ToPrimitive};
use crate::contest_metadata::RiskLimit;
use crate::errors::AuditError;
use crate::precision::rational;
use crate::sequential_test::{gamma_neg, gamma_pos, per_ballot_bound, SeatBounds};
use crate::vote_count::VoteCount;

fn to_f64(value:&BigRational,what:&str) -> Result<f64,AuditError> {
    value.to_f64().filter(|v|v.is_finite()).ok_or_else(||AuditError::ArithmeticDomain(format!("{} {} is not representable",what,value)))
}

fn ceil_count(value:f64,what:&str) -> Result<usize,AuditError> {
    if value.is_finite() && value>=0.0 { Ok(value.ceil() as usize) } else { Err(AuditError::ArithmeticDomain(format!("{} sample size is {}",what,value))) }
}

/// Wald's average sample number : the expected number of ballots to reject every null hypothesis
/// if the reported proportions are correct. The maximum over (winner,loser) pairs.
///
/// ```
/// use rla::sample_size::asn;
/// use rla::contest_metadata::{CandidateId, RiskLimit, SeatColumn};
/// use rla::sequential_test::SeatBounds;
/// use rla::vote_count::VoteCount;
/// let votes : VoteCount = [("X",600),("Y",400)].into_iter().collect();
/// let sw : SeatBounds = [(CandidateId::new("X"),SeatColumn(1))].into_iter().collect();
/// let sl : SeatBounds = [(CandidateId::new("Y"),SeatColumn(1))].into_iter().collect();
/// assert_eq!(asn(&RiskLimit::from_f64(0.1).unwrap(),&votes,&sw,&sl).unwrap(),115);
/// ```
pub fn asn(risk_limit:&RiskLimit,vote_count:&VoteCount,sw:&SeatBounds,sl:&SeatBounds) -> Result<usize,AuditError> {
    let total = vote_count.total() as f64;
    let log_threshold = to_f64(&risk_limit.threshold(),"threshold")?.ln();
    let mut res = 0;
    for w in sw.keys() {
        for l in sl.keys() {
            if w==l { continue; }
            let (t_w,t_l) = (vote_count.get(w),vote_count.get(l));
            let mut drift = 0.0;
            if t_w>0 { drift+=(t_w as f64/total)*to_f64(&gamma_pos(w,l,sw,sl,vote_count)?,"γ")?.ln(); }
            if t_l>0 { drift+=(t_l as f64/total)*to_f64(&gamma_neg(w,l,sw,sl,vote_count)?,"γ")?.ln(); }
            if !(drift>0.0) { return Err(AuditError::ArithmeticDomain(format!("no expected progress between {} and {}",w,l))); }
            res=res.max(ceil_count(log_threshold/drift,"average")?);
        }
    }
    Ok(res)
}

/// ceil(ln(1/α)/ln(γ/(1−1/U) + 1 − γ)) : the number of tables to recount with no errors found to reach
/// the risk limit, where U is the total error bound.
pub fn comparison_sample_size(total_error_bound:&BigRational,risk_limit:&RiskLimit,hedge:&BigRational) -> Result<usize,AuditError> {
    if *total_error_bound<=BigRational::one() { return Err(AuditError::ArithmeticDomain(format!("total error bound {} must exceed 1",total_error_bound))); }
    let one = BigRational::one();
    let factor = hedge/(&one-total_error_bound.recip())+(&one-hedge);
    let log_factor = to_f64(&factor,"comparison factor")?.ln();
    if !(log_factor>0.0) { return Err(AuditError::ArithmeticDomain(format!("comparison factor {} gives no progress",factor))); }
    ceil_count(to_f64(&risk_limit.threshold(),"threshold")?.ln()/log_factor,"comparison")
}

/// The comparison sample size for a D'Hondt (or plurality) contest where each of `ballots` ballots may
/// overstate by at most uMax(party_votes,Sw,Sl).
pub fn dhondt_sample_size(ballots:usize,risk_limit:&RiskLimit,party_votes:&VoteCount,sw:&SeatBounds,sl:&SeatBounds,hedge:&BigRational) -> Result<usize,AuditError> {
    let u = per_ballot_bound(party_votes,sw,sl)?;
    comparison_sample_size(&(u*rational(ballots)),risk_limit,hedge)
}
