// Copyright 2025 MarshRPC Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use marshrpc_common::protocol::{CallId, Contract};
use serde::{Deserialize, Serialize};

/// Call counters for one procedure.
///
/// Uses relaxed atomics; counters are independent of each other and only
/// need to be eventually consistent in a snapshot.
#[derive(Debug, Default)]
struct ProcedureCounters {
    calls: AtomicU64,
    failures: AtomicU64,
    total_latency_us: AtomicU64,
}

/// Lock-free statistics for a running server.
///
/// The set of procedures is fixed when the server is built, so the map is
/// never mutated afterwards and needs no lock.
#[derive(Debug)]
pub(crate) struct ServerStats {
    started: Instant,
    procedures: BTreeMap<CallId, (&'static str, ProcedureCounters)>,
    unknown_procedure: AtomicU64,
    malformed: AtomicU64,
    connections_accepted: AtomicU64,
    active_connections: AtomicU64,
}

impl ServerStats {
    pub(crate) fn new(contract: &Contract) -> Self {
        let procedures = contract
            .procedures()
            .map(|info| (info.id, (info.name, ProcedureCounters::default())))
            .collect();

        Self {
            started: Instant::now(),
            procedures,
            unknown_procedure: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            connections_accepted: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
        }
    }

    /// Records a completed dispatch of a known procedure.
    pub(crate) fn record_call(&self, id: CallId, start_time: Instant, success: bool) {
        if let Some((_, counters)) = self.procedures.get(&id) {
            let latency_us = start_time.elapsed().as_micros() as u64;
            counters.calls.fetch_add(1, Ordering::Relaxed);
            counters.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
            if !success {
                counters.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn record_unknown_procedure(&self) {
        self.unknown_procedure.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let mut total_calls = 0;
        let mut failed_calls = 0;

        let procedures = self
            .procedures
            .iter()
            .map(|(id, (name, counters))| {
                let calls = counters.calls.load(Ordering::Relaxed);
                let failures = counters.failures.load(Ordering::Relaxed);
                let total_latency_us = counters.total_latency_us.load(Ordering::Relaxed);
                total_calls += calls;
                failed_calls += failures;

                ProcedureStats {
                    id: *id,
                    name: name.to_string(),
                    calls,
                    failures,
                    avg_latency_us: if calls == 0 { 0 } else { total_latency_us / calls },
                }
            })
            .collect();

        StatsSnapshot {
            uptime_ms: self.started.elapsed().as_millis() as u64,
            total_calls,
            failed_calls,
            unknown_procedure_requests: self.unknown_procedure.load(Ordering::Relaxed),
            malformed_requests: self.malformed.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            procedures,
        }
    }
}

/// Statistics for a specific procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureStats {
    pub id: CallId,
    pub name: String,
    pub calls: u64,
    pub failures: u64,
    pub avg_latency_us: u64,
}

/// Point-in-time copy of the server statistics.
///
/// `failures` includes calls rejected because their arguments could not be
/// decoded. Requests whose call id or header could not be resolved are not
/// attributed to a procedure; they only show up in
/// `unknown_procedure_requests` and `malformed_requests`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub uptime_ms: u64,
    pub total_calls: u64,
    pub failed_calls: u64,
    pub unknown_procedure_requests: u64,
    pub malformed_requests: u64,
    pub connections_accepted: u64,
    pub active_connections: u64,
    /// Ordered by call id
    pub procedures: Vec<ProcedureStats>,
}

impl StatsSnapshot {
    pub fn procedure(&self, name: &str) -> Option<&ProcedureStats> {
        self.procedures.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marshrpc_common::protocol::Declaration;

    const ADD: Declaration<(i32, i32), i32> = Declaration::new(1, "add");
    const FAIL: Declaration<(), i32> = Declaration::new(2, "fail");

    fn stats() -> ServerStats {
        let contract = Contract::builder("calc").declare(&ADD).declare(&FAIL).build().unwrap();
        ServerStats::new(&contract)
    }

    #[test]
    fn test_empty_snapshot_lists_every_procedure() {
        let snapshot = stats().snapshot();

        assert_eq!(snapshot.total_calls, 0);
        assert_eq!(snapshot.procedures.len(), 2);
        assert_eq!(snapshot.procedures[0].name, "add");
        assert_eq!(snapshot.procedures[1].name, "fail");
    }

    #[test]
    fn test_record_calls() {
        let stats = stats();
        let start = Instant::now();

        stats.record_call(1, start, true);
        stats.record_call(1, start, true);
        stats.record_call(2, start, false);
        // Ids outside the contract are ignored
        stats.record_call(99, start, true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_calls, 3);
        assert_eq!(snapshot.failed_calls, 1);
        assert_eq!(snapshot.procedure("add").unwrap().calls, 2);
        assert_eq!(snapshot.procedure("fail").unwrap().failures, 1);
    }

    #[test]
    fn test_connection_and_request_counters() {
        let stats = stats();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        stats.record_unknown_procedure();
        stats.record_malformed();
        stats.record_malformed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connections_accepted, 2);
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.unknown_procedure_requests, 1);
        assert_eq!(snapshot.malformed_requests, 2);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = stats();
        stats.record_call(1, Instant::now(), true);

        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["total_calls"], 1);
        assert_eq!(json["procedures"][0]["name"], "add");

        let back: StatsSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back.procedures.len(), 2);
    }
}
