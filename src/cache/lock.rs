use std::sync::{LockResult, RwLock, RwLockWriteGuard};

use tracing::warn;

/// Recover the guard from a poisoned lock instead of propagating the panic.
fn recover<G>(
    result: LockResult<G>,
    kind: &'static str,
    source: &'static str,
    op: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            source_module = source,
            lock_kind = kind,
            result = "poisoned_recovered",
            "Recovered from poisoned output cache lock"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), "rwlock.write", source, op)
}
