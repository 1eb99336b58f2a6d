// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! Reproducible random ordering of the ballots (or tables) to be recounted.
//!
//! Everything here is determined by the public seed alone : the seed bytes are hashed with SHA-256 to
//! key a ChaCha20 stream which drives `rand`'s shuffling and weighted sampling, so anyone with the seed
//! (and the same `rand` version) can reproduce the order.

use std::collections::{BTreeMap, VecDeque};
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use crate::contest_metadata::TableId;
use crate::vote_count::ReportedTally;

/// Make the random number generator used for shuffling from the raw public seed.
pub fn seed_rng(seed:&[u8]) -> ChaCha20Rng {
    let mut key = [0u8;32];
    key.copy_from_slice(&Sha256::digest(seed));
    ChaCha20Rng::from_seed(key)
}

/// One physical ballot : the table it is in, and its position in that table's pile (from 1).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct BallotUnit {
    pub table : TableId,
    pub index : u32,
}

/// Every ballot, table by table.
pub fn build_ballot_population(tally:&ReportedTally) -> Vec<BallotUnit> {
    let mut res = Vec::with_capacity(tally.num_ballots());
    for (&table,votes) in &tally.tables {
        for index in 1..=votes.total() as u32 { res.push(BallotUnit{table,index}); }
    }
    res
}

/// Every table, with its number of ballots as the weight used for probability proportional to error bound sampling.
pub fn build_table_population(tally:&ReportedTally) -> Vec<(TableId,u64)> {
    tally.tables.iter().map(|(&table,votes)|(table,votes.total() as u64)).collect()
}

/// A uniformly random ordered sample of `cap` elements (all of them if `cap` is at least the population size).
/// ```
/// use rla::sampling::{seed_rng, shuffle};
/// let a = shuffle((0..100).collect(),&mut seed_rng(b"pulse"),10);
/// let b = shuffle((0..100).collect(),&mut seed_rng(b"pulse"),10);
/// assert_eq!(a,b);
/// assert_eq!(a.len(),10);
/// ```
pub fn shuffle<T,R:Rng + ?Sized>(mut population:Vec<T>,rng:&mut R,cap:usize) -> Vec<T> {
    let keep = cap.min(population.len());
    population.partial_shuffle(rng,keep);
    let start = population.len()-keep; // partial_shuffle leaves the sample at the end.
    population.drain(..start);
    population
}

/// Draw without replacement, each draw with probability proportional to weight among those left, until `cap`
/// elements are drawn or only zero weight elements remain.
pub fn shuffle_weighted<T,R:Rng + ?Sized>(population:Vec<(T,u64)>,rng:&mut R,cap:usize) -> Vec<T> {
    let (units,weights) : (Vec<T>,Vec<u64>) = population.into_iter().unzip();
    let drawable = weights.iter().filter(|&&w|w>0).count();
    let Ok(mut dist) = WeightedIndex::<u64>::new(&weights) else { return vec![] }; // nothing has any weight.
    let mut order = Vec::with_capacity(cap.min(drawable));
    while order.len()<cap.min(drawable) {
        let i = dist.sample(rng);
        order.push(i);
        if order.len()<drawable && dist.update_weights(&[(i,&0)]).is_err() { break; }
    }
    let mut units : Vec<Option<T>> = units.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i|units[i].take()).collect()
}

/// The still unused tail of a shuffled population. Rounds take units off the front.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shuffled<U> {
    remaining : VecDeque<U>,
    consumed : usize,
}

impl <U:Clone> Shuffled<U> {
    pub fn new(units:Vec<U>) -> Self { Shuffled{ remaining: units.into(), consumed: 0 } }
    pub fn remaining(&self) -> usize { self.remaining.len() }
    /// Number of units taken by previous rounds.
    pub fn consumed(&self) -> usize { self.consumed }
    /// The next n units, without consuming them.
    pub fn peek(&self,n:usize) -> Vec<U> { self.remaining.iter().take(n).cloned().collect() }
    /// Take the next batch_size units off the front.
    pub fn consume_next_batch(&mut self,batch_size:usize) -> Vec<U> {
        let n = batch_size.min(self.remaining.len());
        self.consumed+=n;
        self.remaining.drain(..n).collect()
    }
}

/// A shuffled population : ballots for polling audits, tables for comparison audits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOrder {
    Ballots(Shuffled<BallotUnit>),
    Tables(Shuffled<TableId>),
}

impl SampleOrder {
    pub fn remaining(&self) -> usize {
        match self {
            SampleOrder::Ballots(s) => s.remaining(),
            SampleOrder::Tables(s) => s.remaining(),
        }
    }
    pub fn consumed(&self) -> usize {
        match self {
            SampleOrder::Ballots(s) => s.consumed(),
            SampleOrder::Tables(s) => s.consumed(),
        }
    }
}

/// The shuffled population together with the seed that produced it, so the order can be checked publicly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffledPopulation {
    pub seed_hex : String,
    pub order : SampleOrder,
}

/// How a sample of ballots is shown to the people pulling them out : for each table (in order) the ballot positions (in order).
pub fn group_by_table(ballots:&[BallotUnit]) -> BTreeMap<TableId,Vec<u32>> {
    let mut res : BTreeMap<TableId,Vec<u32>> = BTreeMap::new();
    for b in ballots { res.entry(b.table).or_default().push(b.index); }
    for v in res.values_mut() { v.sort(); }
    res
}

/// Lower case hex.
pub fn to_hex(bytes:&[u8]) -> String { bytes.iter().map(|b|format!("{:02x}",b)).collect() }

/// Parse hex, as given by randomness beacons. None if malformed.
pub fn from_hex(s:&str) -> Option<Vec<u8>> {
    let s = s.trim();
    if s.len()%2!=0 || !s.is_ascii() { return None; }
    (0..s.len()).step_by(2).map(|i|u8::from_str_radix(&s[i..i+2],16).ok()).collect()
}
