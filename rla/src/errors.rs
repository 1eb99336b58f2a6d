// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! Everything that can go wrong while running an audit.
//!
//! All errors are local to one contest and one round. A round that fails leaves the audit exactly as it was.

use chrono::{DateTime, Utc};
use thiserror::Error;
use crate::contest_metadata::{CandidateId, TableId};

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("The random pulse scheduled for {scheduled} is not available yet (it is now {now}).")]
    Scheduling { scheduled : DateTime<Utc>, now : DateTime<Utc> },
    #[error("Randomness beacon failure : {0}")]
    ExternalService(String),
    #[error("Recount batch rejected : {0}")]
    Validation(#[from] ValidationFailure),
    #[error("Degenerate allocation : {0}")]
    DegenerateAllocation(String),
    #[error("Reported outcome is not auditable : {0}")]
    ArithmeticDomain(String),
    #[error("Invalid contest definition : {0}")]
    InvalidContest(String),
    #[error("Operation not allowed while the audit is {0}")]
    InvalidState(String),
    #[error("Could not store audit state : {0}")]
    Storage(String),
}

/// The predicate a recount batch failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("batch total mismatch: declared {declared}, summed {summed}")]
    TotalMismatch { declared : usize, summed : usize },
    #[error("unknown candidate {0}")]
    UnknownCandidate(CandidateId),
    #[error("unknown table {0}")]
    UnknownTable(TableId),
    #[error("empty batch")]
    EmptyBatch,
    #[error("batch of {declared} ballots exceeds the {remaining} ballots left in the sample")]
    BatchTooLarge { declared : usize, remaining : usize },
    #[error("table {0} is not among the next tables of the sample")]
    TableNotNext(TableId),
    #[error("a {expected} audit cannot accept a {got} recount")]
    WrongMode { expected : String, got : String },
}

impl From<std::io::Error> for AuditError {
    fn from(e: std::io::Error) -> Self { AuditError::Storage(e.to_string()) }
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self { AuditError::Storage(e.to_string()) }
}
