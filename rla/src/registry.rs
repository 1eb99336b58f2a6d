// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! Many audits at once. Each contest is its own unit of mutual exclusion, so rounds for one contest
//! are applied one at a time while different contests proceed in parallel. Every change is stored
//! before it is made visible; if storing fails the change is rolled back.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use chrono::{DateTime, Utc};
use log::{debug, error};
use crate::audit::{Audit, AuditPhase, EngineConfig, ProposedBatch, RecountBatch};
use crate::beacon::SeedProvider;
use crate::contest_metadata::{Contest, ContestId};
use crate::errors::AuditError;
use crate::vote_count::ReportedTally;

/// A lock that is still usable after a panic in another thread. Audits are only ever replaced whole, so the contents are consistent.
fn lock<T>(mutex:&Mutex<T>) -> MutexGuard<'_,T> { mutex.lock().unwrap_or_else(|e|e.into_inner()) }

/// Where audits live between rounds.
pub trait AuditStore : Send + Sync {
    fn load(&self,id:&ContestId) -> Result<Option<Audit>,AuditError>;
    fn save(&self,audit:&Audit) -> Result<(),AuditError>;
    fn list(&self) -> Result<Vec<ContestId>,AuditError>;
}

/// Keeps audits (as JSON, so they go through the same serialization as a real store) in memory.
#[derive(Default)]
pub struct MemoryStore {
    audits : Mutex<HashMap<ContestId,String>>,
}

impl AuditStore for MemoryStore {
    fn load(&self, id: &ContestId) -> Result<Option<Audit>, AuditError> {
        match lock(&self.audits).get(id) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }
    fn save(&self, audit: &Audit) -> Result<(), AuditError> {
        let json = serde_json::to_string(audit)?;
        lock(&self.audits).insert(audit.contest.id.clone(),json);
        Ok(())
    }
    fn list(&self) -> Result<Vec<ContestId>, AuditError> {
        let mut res : Vec<ContestId> = lock(&self.audits).keys().cloned().collect();
        res.sort();
        Ok(res)
    }
}

/// One `<contest id>.json` file per audit in a directory.
pub struct JsonFileStore {
    dir : PathBuf,
}

impl JsonFileStore {
    pub fn new(dir:impl Into<PathBuf>) -> Result<Self,AuditError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(JsonFileStore{ dir })
    }
    fn path(&self,id:&ContestId) -> Result<PathBuf,AuditError> {
        let ok = !id.0.is_empty() && !id.0.starts_with('.') && id.0.chars().all(|c|c.is_ascii_alphanumeric()||c=='_'||c=='-'||c=='.');
        if !ok { return Err(AuditError::Storage(format!("contest id {} can not be used as a file name",id))); }
        Ok(self.dir.join(format!("{}.json",id)))
    }
}

impl AuditStore for JsonFileStore {
    fn load(&self, id: &ContestId) -> Result<Option<Audit>, AuditError> {
        let path = self.path(id)?;
        if !path.exists() { return Ok(None); }
        let file = fs::File::open(path)?;
        Ok(Some(serde_json::from_reader(std::io::BufReader::new(file))?))
    }
    fn save(&self, audit: &Audit) -> Result<(), AuditError> {
        let path = self.path(&audit.contest.id)?;
        let temp = path.with_extension("json.partial");
        fs::write(&temp,serde_json::to_vec_pretty(audit)?)?;
        fs::rename(&temp,&path)?; // so a crash never leaves half a file.
        Ok(())
    }
    fn list(&self) -> Result<Vec<ContestId>, AuditError> {
        let mut res = vec![];
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e|e.to_str())==Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s|s.to_str()) { res.push(ContestId(stem.to_string())); }
            }
        }
        res.sort();
        Ok(res)
    }
}

pub struct AuditRegistry<S:AuditStore> {
    store : S,
    config : EngineConfig,
    audits : Mutex<HashMap<ContestId,Arc<Mutex<Audit>>>>,
}

impl <S:AuditStore> AuditRegistry<S> {
    pub fn new(store:S,config:EngineConfig) -> Self { AuditRegistry{ store, config, audits: Mutex::new(HashMap::new()) } }

    pub fn store(&self) -> &S { &self.store }

    /// Register a new contest. Fails if one with the same id already exists.
    pub fn register(&self,contest:Contest,tally:ReportedTally) -> Result<(),AuditError> {
        let mut audits = lock(&self.audits);
        if audits.contains_key(&contest.id) || self.store.load(&contest.id)?.is_some() {
            return Err(AuditError::InvalidContest(format!("contest {} is already registered",contest.id)));
        }
        let audit = Audit::new(contest,tally,&self.config)?;
        self.store.save(&audit)?;
        audits.insert(audit.contest.id.clone(),Arc::new(Mutex::new(audit)));
        Ok(())
    }

    /// The lock for one contest, loading it from the store if needed. The registry lock is only held while finding it.
    fn handle(&self,id:&ContestId) -> Result<Arc<Mutex<Audit>>,AuditError> {
        let mut audits = lock(&self.audits);
        if let Some(audit) = audits.get(id) { return Ok(audit.clone()); }
        let audit = self.store.load(id)?.ok_or_else(||AuditError::InvalidContest(format!("no contest {}",id)))?;
        debug!("Loaded {} from store",id);
        let handle = Arc::new(Mutex::new(audit));
        audits.insert(id.clone(),handle.clone());
        Ok(handle)
    }

    /// Run f on the audit with exclusive access. The result is stored; on any failure the audit is left as it was.
    pub fn with_audit<R>(&self,id:&ContestId,f:impl FnOnce(&mut Audit)->Result<R,AuditError>) -> Result<R,AuditError> {
        let handle = self.handle(id)?;
        let mut audit = lock(&handle);
        let backup = audit.clone();
        let res = f(&mut *audit).and_then(|r|{ self.store.save(&*audit)?; Ok(r) });
        if let Err(e) = &res {
            if let AuditError::Storage(_) = e { error!("Could not store {} : {}",id,e); }
            *audit=backup;
        }
        res
    }

    pub fn propose_batch(&self,id:&ContestId,provider:&dyn SeedProvider,now:DateTime<Utc>) -> Result<ProposedBatch,AuditError> {
        self.with_audit(id,|audit|audit.propose_batch(provider,now))
    }

    pub fn submit_recount(&self,id:&ContestId,batch:&RecountBatch) -> Result<AuditPhase,AuditError> {
        self.with_audit(id,|audit|audit.apply_recount(batch))
    }

    /// A copy of the current state of an audit.
    pub fn snapshot(&self,id:&ContestId) -> Result<Audit,AuditError> {
        let handle = self.handle(id)?;
        let audit = lock(&handle);
        Ok(audit.clone())
    }

    /// Every contest, in memory or in the store.
    pub fn contests(&self) -> Result<Vec<ContestId>,AuditError> {
        let mut res = self.store.list()?;
        for id in lock(&self.audits).keys() { if !res.contains(id) { res.push(id.clone()); } }
        res.sort();
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use chrono::TimeZone;
    use crate::beacon::FixedSeed;
    use crate::contest_metadata::{AuditMode, ElectionScheme, RiskLimit};

    fn contest(id:&str) -> Contest {
        Contest{
            id: ContestId(id.to_string()),
            name: String::new(),
            risk_limit: RiskLimit::from_f64(0.1).unwrap(),
            max_polls: 1000,
            winners: 1,
            mode: AuditMode::BallotPolling,
            scheme: ElectionScheme::Plurality,
            random_seed_time: Utc.with_ymd_and_hms(2024,5,1,12,0,0).unwrap(),
            weighted_sampling: false,
        }
    }

    fn tally() -> ReportedTally { ReportedTally::single_table([("X",600),("Y",400)].into_iter().collect()) }

    fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024,6,1,0,0,0).unwrap() }

    fn round() -> RecountBatch { RecountBatch::BallotPolling{ declared_ballots: 50, counts: [("X",30),("Y",20)].into_iter().collect() } }

    /// Fails every save after the first `allowed`.
    struct FlakyStore {
        inner : MemoryStore,
        allowed : usize,
        saves : AtomicUsize,
    }

    impl AuditStore for FlakyStore {
        fn load(&self, id: &ContestId) -> Result<Option<Audit>, AuditError> { self.inner.load(id) }
        fn save(&self, audit: &Audit) -> Result<(), AuditError> {
            if self.saves.fetch_add(1,Ordering::SeqCst)>=self.allowed { Err(AuditError::Storage("disk full".to_string())) } else { self.inner.save(audit) }
        }
        fn list(&self) -> Result<Vec<ContestId>, AuditError> { self.inner.list() }
    }

    #[test]
    fn test_register_twice() {
        let registry = AuditRegistry::new(MemoryStore::default(),EngineConfig::default());
        registry.register(contest("a"),tally()).unwrap();
        assert!(matches!(registry.register(contest("a"),tally()),Err(AuditError::InvalidContest(_))));
        registry.register(contest("b"),tally()).unwrap();
        assert_eq!(registry.contests().unwrap(),vec![ContestId("a".to_string()),ContestId("b".to_string())]);
    }

    #[test]
    fn test_rounds_are_stored() {
        let registry = AuditRegistry::new(MemoryStore::default(),EngineConfig::default());
        let id = ContestId("a".to_string());
        registry.register(contest("a"),tally()).unwrap();
        registry.propose_batch(&id,&FixedSeed(vec![5]),now()).unwrap();
        registry.submit_recount(&id,&round()).unwrap();
        let stored = registry.store().load(&id).unwrap().unwrap();
        assert_eq!(stored.state.polled_ballots,50);
        assert_eq!(stored.state,registry.snapshot(&id).unwrap().state);
    }

    #[test]
    fn test_rollback_when_store_fails() {
        let store = FlakyStore{ inner: MemoryStore::default(), allowed: 2, saves: AtomicUsize::new(0) };
        let registry = AuditRegistry::new(store,EngineConfig::default());
        let id = ContestId("a".to_string());
        registry.register(contest("a"),tally()).unwrap();
        registry.propose_batch(&id,&FixedSeed(vec![5]),now()).unwrap();
        let before = registry.snapshot(&id).unwrap();
        assert!(matches!(registry.submit_recount(&id,&round()),Err(AuditError::Storage(_))));
        let after = registry.snapshot(&id).unwrap();
        assert_eq!(after.state,before.state);
        assert_eq!(after.population,before.population);
    }

    #[test]
    fn test_concurrent_rounds_are_serialized() {
        let registry = AuditRegistry::new(MemoryStore::default(),EngineConfig::default());
        let id = ContestId("a".to_string());
        registry.register(contest("a"),tally()).unwrap();
        registry.propose_batch(&id,&FixedSeed(vec![5]),now()).unwrap();
        let results : Vec<Result<AuditPhase,AuditError>> = std::thread::scope(|s|{
            let threads : Vec<_> = (0..4).map(|_|s.spawn(||registry.submit_recount(&id,&round()))).collect();
            threads.into_iter().map(|t|t.join().unwrap()).collect()
        });
        // three identical rounds validate; whichever thread comes fourth finds the audit finished.
        assert_eq!(results.iter().filter(|r|r.is_ok()).count(),3);
        assert_eq!(results.iter().filter(|r|matches!(r,Err(AuditError::InvalidState(_)))).count(),1);
        let audit = registry.snapshot(&id).unwrap();
        assert_eq!(audit.state.polled_ballots,150);
        assert_eq!(audit.phase(),AuditPhase::Validated);
        assert_eq!(audit.remaining_sample(),850);
    }

    #[test]
    fn test_json_file_store() {
        let dir = std::env::temp_dir().join(format!("rla_store_test_{}",std::process::id()));
        let store = JsonFileStore::new(&dir).unwrap();
        let audit = Audit::new(contest("mayor-2024"),tally(),&EngineConfig::default()).unwrap();
        store.save(&audit).unwrap();
        let back = store.load(&audit.contest.id).unwrap().unwrap();
        assert_eq!(back.state,audit.state);
        assert_eq!(store.list().unwrap(),vec![ContestId("mayor-2024".to_string())]);
        assert!(store.load(&ContestId("absent".to_string())).unwrap().is_none());
        assert!(matches!(store.save(&Audit::new(contest("../escape"),tally(),&EngineConfig::default()).unwrap()),Err(AuditError::Storage(_))));
        fs::remove_dir_all(&dir).unwrap();
    }
}
