// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! Helpers for the `rla_audit` command line program : reading the JSON documents it is given
//! and turning audit state into text.

use std::fs::File;
use std::path::Path;
use anyhow::anyhow;
use rla::audit::{Audit, EngineConfig, ProposedBatch, SampleSelection};
use rla::beacon::{FixedSeed, RandomBeacon, SeedProvider};
use rla::sampling::from_hex;
use rla::vote_count::{ReportedTally, VoteCount};

/// A reported tally is either per table, `{"1":{"X":350,"Y":250},"2":{...}}`, or a single
/// count for the whole contest, `{"X":600,"Y":400}`, which is treated as one table.
pub fn parse_tally(json:&str) -> anyhow::Result<ReportedTally> {
    if let Ok(tally) = serde_json::from_str::<ReportedTally>(json) { return Ok(tally); }
    let votes : VoteCount = serde_json::from_str(json).map_err(|e|anyhow!("Could not read tally, neither per table nor a single count : {}",e))?;
    Ok(ReportedTally::single_table(votes))
}

/// The engine configuration from a JSON file, or the defaults.
pub fn load_config(path:Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        None => Ok(EngineConfig::default()),
        Some(path) => Ok(serde_json::from_reader(File::open(path)?)?),
    }
}

/// A fixed seed given in hex on the command line, otherwise the public beacon.
pub fn seed_provider(seed_hex:Option<&str>,config:&EngineConfig) -> anyhow::Result<Box<dyn SeedProvider>> {
    match seed_hex {
        Some(hex) => Ok(Box::new(FixedSeed(from_hex(hex).ok_or_else(||anyhow!("Seed {} is not hex",hex))?))),
        None => Ok(Box::new(RandomBeacon::new(config.beacon.clone()))),
    }
}

/// A p-value for people. Infinite p-values come from a likelihood of zero.
pub fn format_p_value(p:f64) -> String {
    if p.is_finite() { format!("{:.6}",p) } else { "∞".to_string() }
}

/// One line per table of what to recount.
pub fn describe_selection(batch:&ProposedBatch) -> Vec<String> {
    match &batch.selection {
        SampleSelection::Ballots(by_table) => by_table.iter().map(|(table,ballots)|{
            let positions : Vec<String> = ballots.iter().map(|b|b.to_string()).collect();
            format!("Table {} : ballots {}",table,positions.join(","))
        }).collect(),
        SampleSelection::Tables(tables) => tables.iter().map(|t|format!("Table {} : whole table",t)).collect(),
    }
}

/// Several lines summarizing where an audit is up to.
pub fn describe_status(audit:&Audit) -> Vec<String> {
    let mut res = vec![
        format!("Contest {} {} ({} audit, risk limit {})",audit.contest.id,audit.contest.name,audit.contest.mode,audit.contest.risk_limit),
        format!("Status : {}",audit.phase()),
        format!("Ballots polled : {} of at most {} in {} round(s)",audit.state.polled_ballots,audit.contest.max_polls,audit.state.rounds),
        format!("Max p-value : {}",format_p_value(audit.max_p_value())),
    ];
    if let Some(population) = &audit.population {
        res.push(format!("Sample seed {} with {} unit(s) still to recount",population.seed_hex,population.order.remaining()));
    }
    for sub in &audit.sub_audits {
        res.push(format!("  {} : max p-value {}{}",sub.name,format_p_value(sub.max_p_value()),if sub.validated(&audit.contest.risk_limit) {" (validated)"} else {""}));
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use rla::contest_metadata::{CandidateId, TableId};

    #[test]
    fn test_parse_tally() {
        let tabled = parse_tally(r#"{"1":{"X":350,"Y":250},"2":{"X":250,"Y":150}}"#).unwrap();
        assert_eq!(tabled.tables.len(),2);
        assert_eq!(tabled.totals().get(&CandidateId::new("X")),600);
        let single = parse_tally(r#"{"X":600,"Y":400}"#).unwrap();
        assert_eq!(single.tables.len(),1);
        assert_eq!(single.table_size(TableId(1)),1000);
        assert!(parse_tally("[1,2]").is_err());
    }

    #[test]
    fn test_format_p_value() {
        assert_eq!(format_p_value(0.05),"0.050000");
        assert_eq!(format_p_value(f64::INFINITY),"∞");
    }

    #[test]
    fn test_seed_provider() {
        assert!(seed_provider(Some("0g"),&EngineConfig::default()).is_err());
        let provider = seed_provider(Some("0102"),&EngineConfig::default()).unwrap();
        assert_eq!(provider.seed(chrono::Utc::now()).unwrap(),vec![1,2]);
    }

    #[test]
    fn test_describe_selection() {
        let batch = ProposedBatch{ size: 3, selection: SampleSelection::Ballots([(TableId(2),vec![4,9]),(TableId(5),vec![1])].into_iter().collect()) };
        assert_eq!(describe_selection(&batch),vec!["Table 2 : ballots 4,9".to_string(),"Table 5 : ballots 1".to_string()]);
    }
}
