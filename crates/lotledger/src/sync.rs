//! Lock acquisition that survives a panicked holder.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("{} lock was poisoned, recovering", name);
            poisoned.into_inner()
        }
    }
}

pub(crate) fn read<'a, T>(lock: &'a RwLock<T>, name: &str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("{} read lock was poisoned, recovering", name);
            poisoned.into_inner()
        }
    }
}

pub(crate) fn write<'a, T>(lock: &'a RwLock<T>, name: &str) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("{} write lock was poisoned, recovering", name);
            poisoned.into_inner()
        }
    }
}
