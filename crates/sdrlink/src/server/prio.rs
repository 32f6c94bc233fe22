// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Worker thread priority elevation.

/// Apply a priority in [-1.0, 1.0] to the calling thread.
///
/// Positive priorities map onto the round-robin realtime band; zero and
/// negative values keep the default policy (no OS support for demotion
/// here).
#[cfg(unix)]
pub fn set_thread_priority(priority: f64) -> Result<(), String> {
    if priority <= 0.0 {
        return Ok(());
    }

    let policy = libc::SCHED_RR;
    // SAFETY: priority range queries have no side effects
    let max_prio = unsafe { libc::sched_get_priority_max(policy) };
    if max_prio < 0 {
        return Err(std::io::Error::last_os_error().to_string());
    }
    // SAFETY: as above
    let min_prio = unsafe { libc::sched_get_priority_min(policy) };
    if min_prio < 0 {
        return Err(std::io::Error::last_os_error().to_string());
    }

    let sched_priority = min_prio + (priority * f64::from(max_prio - min_prio)) as libc::c_int;
    let param = libc::sched_param { sched_priority };
    // SAFETY: param is a valid sched_param for the calling thread (pid 0)
    let ret = unsafe { libc::sched_setscheduler(0, policy, &param) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().to_string());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn set_thread_priority(_priority: f64) -> Result<(), String> {
    Ok(())
}

/// Elevate and log a failure instead of propagating it; an unprivileged
/// process simply runs at normal priority.
pub fn set_thread_priority_logged(priority: f64) {
    if let Err(err) = set_thread_priority(priority) {
        log::warn!("set thread priority {} failed: {}", priority, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_positive_priority_is_noop() {
        assert!(set_thread_priority(0.0).is_ok());
        assert!(set_thread_priority(-1.0).is_ok());
    }
}
