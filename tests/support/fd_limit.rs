//! Lowers the process's open-file-descriptor limit for exhaustion testing.

/// Guard that restores the process's file descriptor limit when dropped.
#[allow(dead_code)]
pub struct FdLimitGuard {
    soft: libc::rlim_t,
    hard: libc::rlim_t,
}

impl Drop for FdLimitGuard {
    fn drop(&mut self) {
        let rlim = libc::rlimit {
            rlim_cur: self.soft,
            rlim_max: self.hard,
        };
        unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) };
    }
}

/// Lowers the soft fd limit to `limit`, returning a guard that restores the
/// previous limit on drop, or `None` if the limit couldn't be read or set
/// (e.g. insufficient permission).
#[allow(dead_code)]
pub fn exhausted_file_descriptors(limit: u64) -> Option<FdLimitGuard> {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) } != 0 {
        return None;
    }
    let previous_soft = rlim.rlim_cur;
    let previous_hard = rlim.rlim_max;
    let new_soft = limit.min(previous_hard as u64) as libc::rlim_t;
    rlim.rlim_cur = new_soft;
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) } != 0 {
        return None;
    }
    Some(FdLimitGuard {
        soft: previous_soft,
        hard: previous_hard,
    })
}
