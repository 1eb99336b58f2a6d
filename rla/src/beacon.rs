// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! Where the public random seed comes from.
//!
//! The seed is a pulse from a public randomness beacon, published at a time fixed before the audit starts.
//! The beacon is just one [SeedProvider]; tests and offline replays use [FixedSeed].

use std::sync::Mutex;
use std::thread::sleep;
use std::time::Duration;
use chrono::{DateTime, Utc};
use log::{info, warn};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use crate::errors::AuditError;
use crate::sampling::from_hex;

/// Something that can produce the random seed bytes for a given (already elapsed) time.
pub trait SeedProvider {
    fn seed(&self,time:DateTime<Utc>) -> Result<Vec<u8>,AuditError>;
}

/// A seed known in advance.
pub struct FixedSeed(pub Vec<u8>);

impl SeedProvider for FixedSeed {
    fn seed(&self, _time: DateTime<Utc>) -> Result<Vec<u8>, AuditError> { Ok(self.0.clone()) }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// The pulse time in milliseconds since the epoch is appended to this.
    pub url : String,
    /// How many more times to try after a transient failure.
    pub retries : usize,
    pub retry_delay_ms : u64,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        BeaconConfig{
            url: "https://random.uchile.cl/beacon/2.0/pulse/time/".to_string(),
            retries: 3,
            retry_delay_ms: 2000,
        }
    }
}

#[derive(Deserialize)]
struct PulseResponse {
    pulse : Pulse,
}

#[derive(Deserialize)]
struct Pulse {
    #[serde(rename = "localRandomValue")]
    local_random_value : String,
}

enum FetchFailure {
    /// Worth trying again.
    Transient(String),
    Malformed(String),
}

/// A NIST style randomness beacon accessed over HTTP.
pub struct RandomBeacon {
    pub config : BeaconConfig,
}

impl RandomBeacon {
    pub fn new(config:BeaconConfig) -> Self { RandomBeacon{config} }

    /// Only one request to the beacon at a time from this process.
    fn beacon_lock() -> &'static Mutex<()> {
        static BEACON_MUTEX: OnceCell<Mutex<()>> = OnceCell::new();
        BEACON_MUTEX.get_or_init(||Mutex::new(()))
    }

    pub fn pulse_url(&self,time:DateTime<Utc>) -> String { format!("{}{}",self.config.url,time.timestamp_millis()) }

    fn fetch(url:&str) -> Result<Vec<u8>,FetchFailure> {
        let response = reqwest::blocking::get(url).map_err(|e|FetchFailure::Transient(e.to_string()))?;
        let status = response.status();
        if !status.is_success() { return Err(FetchFailure::Transient(format!("HTTP status {} from {}",status,url))); }
        let text = response.text().map_err(|e|FetchFailure::Transient(e.to_string()))?;
        parse_pulse(&text).map_err(FetchFailure::Malformed)
    }
}

/// Extract the random value from a beacon pulse JSON document.
pub fn parse_pulse(text:&str) -> Result<Vec<u8>,String> {
    let response : PulseResponse = serde_json::from_str(text).map_err(|e|format!("could not parse pulse : {}",e))?;
    if response.pulse.local_random_value.trim().is_empty() { return Err("pulse has an empty random value".to_string()); }
    from_hex(&response.pulse.local_random_value).ok_or_else(||format!("random value {} is not hex",response.pulse.local_random_value))
}

impl SeedProvider for RandomBeacon {
    fn seed(&self, time: DateTime<Utc>) -> Result<Vec<u8>, AuditError> {
        let url = self.pulse_url(time);
        let _lock = Self::beacon_lock().lock().unwrap_or_else(|e|e.into_inner());
        let mut attempt = 0;
        loop {
            info!("Requesting random pulse {}",url);
            match Self::fetch(&url) {
                Ok(seed) => return Ok(seed),
                Err(FetchFailure::Malformed(e)) => return Err(AuditError::ExternalService(e)),
                Err(FetchFailure::Transient(e)) => {
                    if attempt>=self.config.retries { return Err(AuditError::ExternalService(format!("{} (after {} attempts)",e,attempt+1))); }
                    warn!("Random pulse request failed : {}. Retrying.",e);
                    attempt+=1;
                    sleep(Duration::from_millis(self.config.retry_delay_ms));
                }
            }
        }
    }
}
