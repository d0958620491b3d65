use std::{collections::HashMap, sync::Mutex, time::Instant};

use once_cell::sync::Lazy;

struct ScopeInfo {
    count: usize,
    micros: u64,
}

static SCOPE_INFO: Lazy<Mutex<HashMap<&'static str, ScopeInfo>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Runs `f`, accounting its wall time to `name`.
pub fn phase_scope<R>(name: &'static str, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed().as_micros() as u64;

    let mut info = SCOPE_INFO.lock().unwrap();
    let entry = info.entry(name).or_insert(ScopeInfo {
        count: 0,
        micros: 0,
    });
    entry.count += 1;
    entry.micros += elapsed;
    log::debug!(
        "{}: {}us (run #{}, {}us cumulative)",
        name,
        elapsed,
        entry.count,
        entry.micros
    );

    result
}
