//! Open file descriptor limit negotiation

use crate::ResourceLimitError;

/// Raises the process's open file limit and reports the result
pub trait LimitNegotiator: Send + Sync {
    /// Raise the soft limit as far as allowed and return the limit now in effect
    fn raise_fd_limit(&self) -> Result<u64, ResourceLimitError>;
}

/// The real process resource limits
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLimits;

/// macOS rejects anything above OPEN_MAX for RLIMIT_NOFILE
#[cfg(target_os = "macos")]
const PLATFORM_MAX_FILES: u64 = 10240;

/// Linux default of fs.nr_open, the ceiling when the hard limit is unlimited
#[cfg(all(unix, not(target_os = "macos")))]
const PLATFORM_MAX_FILES: u64 = 1 << 20;

#[cfg(unix)]
impl ProcessLimits {
    fn read() -> Result<libc::rlimit, ResourceLimitError> {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
        if rc != 0 {
            return Err(ResourceLimitError::Read(std::io::Error::last_os_error()));
        }
        Ok(limit)
    }

    fn target(hard: u64) -> u64 {
        if cfg!(target_os = "macos") || hard == libc::RLIM_INFINITY as u64 {
            hard.min(PLATFORM_MAX_FILES)
        } else {
            hard
        }
    }
}

#[cfg(unix)]
impl LimitNegotiator for ProcessLimits {
    fn raise_fd_limit(&self) -> Result<u64, ResourceLimitError> {
        let mut limit = Self::read()?;

        let target = Self::target(limit.rlim_max as u64);
        if (limit.rlim_cur as u64) < target {
            limit.rlim_cur = target as libc::rlim_t;
            let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) };
            if rc != 0 {
                return Err(ResourceLimitError::Raise(std::io::Error::last_os_error()));
            }
        }

        // The kernel may have capped the request; report what actually holds
        let applied = Self::read()?;
        Ok(applied.rlim_cur as u64)
    }
}

#[cfg(not(unix))]
impl LimitNegotiator for ProcessLimits {
    fn raise_fd_limit(&self) -> Result<u64, ResourceLimitError> {
        Err(ResourceLimitError::Unsupported)
    }
}

/// Negotiator that always reports the same limit
#[derive(Debug, Clone, Copy)]
pub struct FixedLimit(pub u64);

impl LimitNegotiator for FixedLimit {
    fn raise_fd_limit(&self) -> Result<u64, ResourceLimitError> {
        Ok(self.0)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_raise_reports_soft_limit() {
        let before = ProcessLimits::read().unwrap();
        let raised = ProcessLimits.raise_fd_limit().unwrap();

        assert!(raised >= before.rlim_cur as u64);
        assert!(raised <= before.rlim_max as u64);

        // Raising again is a no-op
        assert_eq!(ProcessLimits.raise_fd_limit().unwrap(), raised);
    }

    #[test]
    fn test_fixed_limit() {
        assert_eq!(FixedLimit(4096).raise_fd_limit().unwrap(), 4096);
    }
}
