// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.


use std::fs;
use std::path::PathBuf;
use anyhow::anyhow;
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use main_app::{describe_selection, describe_status, format_p_value, load_config, parse_tally, seed_provider};
use rla::audit::{AuditPhase, RecountBatch};
use rla::contest_metadata::{AuditMode, Contest, ContestId};
use rla::monte_carlo::average_sample_number;
use rla::registry::{AuditRegistry, JsonFileStore};

#[derive(Parser)]
#[command(version = "0.1", author = "Andrew Conway", name="rla_audit")]
/// Run risk limiting audits of plurality, super majority and D'Hondt contests, one recount round at a time.
/// Audit state is kept as one JSON file per contest in the store directory.
struct Opts {
    /// Directory holding the audit state files.
    #[arg(long,default_value="audits")]
    store : PathBuf,

    /// Optional JSON file with engine settings (precision, hedge, beacon).
    #[arg(long)]
    config : Option<PathBuf>,

    #[command(subcommand)]
    command : Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a contest for audit.
    Create {
        /// JSON contest definition.
        contest : PathBuf,
        /// JSON reported tally, per table or for the whole contest.
        tally : PathBuf,
    },
    /// Show which ballots (or tables) to recount next. Draws the sample the first time.
    Sample {
        contest : String,
        /// Use this seed (hex) instead of asking the randomness beacon.
        #[arg(long)]
        seed : Option<String>,
    },
    /// Apply a JSON recount batch.
    Recount {
        contest : String,
        batch : PathBuf,
    },
    /// Where an audit (or every audit) is up to.
    Status {
        contest : Option<String>,
    },
    /// Estimate by simulation how many ballots a ballot polling audit needs if the reported result is right.
    Simulate {
        contest : String,
        #[arg(long,default_value_t=100)]
        repetitions : usize,
        #[arg(long,default_value_t=1)]
        seed : u64,
        /// Give up on a simulated audit after this many ballots. Defaults to the contest's poll cap.
        #[arg(long)]
        max_ballots : Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt : Opts = Opts::parse();
    let config = load_config(opt.config.as_deref())?;
    let registry = AuditRegistry::new(JsonFileStore::new(&opt.store)?,config.clone());

    match opt.command {
        Command::Create { contest, tally } => {
            let contest : Contest = serde_json::from_str(&fs::read_to_string(&contest)?)?;
            let tally = parse_tally(&fs::read_to_string(&tally)?)?;
            let id = contest.id.clone();
            registry.register(contest,tally)?;
            for line in describe_status(&registry.snapshot(&id)?) { println!("{}",line); }
        }
        Command::Sample { contest, seed } => {
            let provider = seed_provider(seed.as_deref(),&config)?;
            let batch = registry.propose_batch(&ContestId(contest),provider.as_ref(),Utc::now())?;
            println!("Recount the next {} unit(s):",batch.size);
            for line in describe_selection(&batch) { println!("{}",line); }
        }
        Command::Recount { contest, batch } => {
            let batch : RecountBatch = serde_json::from_str(&fs::read_to_string(&batch)?)?;
            let id = ContestId(contest);
            let phase = registry.submit_recount(&id,&batch)?;
            let audit = registry.snapshot(&id)?;
            println!("Max p-value now {}",format_p_value(audit.max_p_value()));
            match phase {
                AuditPhase::Validated => println!("The reported outcome is confirmed at risk limit {}.",audit.contest.risk_limit),
                AuditPhase::Exhausted => println!("The audit could not confirm the outcome within {} ballots. A full recount is needed.",audit.contest.max_polls),
                _ => println!("More ballots need to be recounted."),
            }
        }
        Command::Status { contest: Some(contest) } => {
            for line in describe_status(&registry.snapshot(&ContestId(contest))?) { println!("{}",line); }
        }
        Command::Status { contest: None } => {
            for id in registry.contests()? {
                let audit = registry.snapshot(&id)?;
                println!("{}\t{}\t{}",id,audit.phase(),format_p_value(audit.max_p_value()));
            }
        }
        Command::Simulate { contest, repetitions, seed, max_ballots } => {
            let audit = registry.snapshot(&ContestId(contest))?;
            let max_ballots = max_ballots.unwrap_or(audit.contest.max_polls);
            if repetitions==0 { return Err(anyhow!("Need at least one repetition")); }
            if audit.contest.mode!=AuditMode::BallotPolling { return Err(anyhow!("Simulation is only available for ballot polling audits")); }
            for sub in &audit.sub_audits {
                info!("Simulating {} for {} repetitions",sub.name,repetitions);
                let summary = average_sample_number(sub,&audit.contest.risk_limit,max_ballots,&audit.precision,repetitions,seed)?;
                println!("{} : mean {:.1} ballots, validated in {:.1}% of {} runs",sub.name,summary.mean_ballots,100.0*summary.validated_fraction,summary.repetitions);
            }
        }
    }
    Ok(())
}
