//! Status codes, the last-error record, and the error-check macro tier.
//!
//! Checks come in two tiers, mirroring the classic OSEK implementation
//! split: `os_check!` is always compiled, `os_check_ext!` only with the
//! `extended_checks` feature. A failed check populates the kernel-wide
//! [`ErrorRecord`], invokes the user error hook if one is configured, and
//! returns the status code from the enclosing service function. The hook may
//! return; the service then simply reports the status to its caller.
use crate::{
    cfg::KernelTraits,
    klock::CpuLockGuard,
    utils::Init,
};

/// Service status code. The numeric values are wire-stable and match the
/// OSEK binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    Ok = 0,
    Access = 1,
    CallLevel = 2,
    Id = 3,
    Limit = 4,
    NoFunc = 5,
    Resource = 6,
    State = 7,
    Value = 8,
    NotImplemented = 16,
}

impl ResultCode {
    #[inline]
    pub const fn as_raw(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Identifies the service that reported an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceId {
    None = 0,
    ActivateTask = 1,
    TerminateTask = 2,
    ChainTask = 3,
    Schedule = 4,
    GetTaskId = 5,
    GetResource = 6,
    ReleaseResource = 7,
    SetRelAlarm = 8,
    SetAbsAlarm = 9,
    CancelAlarm = 10,
    GetAlarm = 11,
    IncrementCounter = 12,
    Shutdown = 13,
}

/// The kernel-wide record of the most recent failed check.
#[derive(Clone, Copy, Debug)]
pub struct ErrorRecord {
    pub service: ServiceId,
    pub status: ResultCode,
    pub file: &'static str,
    pub line: u32,
    /// Up to three service parameters, zero-padded.
    pub params: [u32; 3],
}

impl Init for ErrorRecord {
    const INIT: Self = Self {
        service: ServiceId::None,
        status: ResultCode::Ok,
        file: "",
        line: 0,
        params: [0; 3],
    };
}

/// Zero-pad up to three parameters into the record format.
pub(crate) fn params(ps: &[u32]) -> [u32; 3] {
    let mut out = [0; 3];
    for (slot, p) in out.iter_mut().zip(ps) {
        *slot = *p;
    }
    out
}

/// Record a failed check and deliver it to the error hook.
pub(crate) fn report<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    service: ServiceId,
    status: ResultCode,
    params: [u32; 3],
    file: &'static str,
    line: u32,
) -> ResultCode {
    Traits::state().last_error.set(
        lock,
        ErrorRecord {
            service,
            status,
            file,
            line,
            params,
        },
    );
    if let Some(hook) = Traits::cfg().error_hook {
        hook(status);
    }
    status
}

/// Standard-tier check: always compiled. On failure, records the error and
/// returns `$status` from the enclosing function.
macro_rules! os_check {
    ($Traits:ty, $lock:expr, $cond:expr, $service:expr, $status:expr) => {
        os_check!($Traits, $lock, $cond, $service, $status, []);
    };
    ($Traits:ty, $lock:expr, $cond:expr, $service:expr, $status:expr, [$($param:expr),*]) => {
        if !$cond {
            return $crate::error::report::<$Traits>(
                $lock,
                $service,
                $status,
                $crate::error::params(&[$($param as u32),*]),
                file!(),
                line!(),
            );
        }
    };
}

/// Extended-tier check: compiled only with the `extended_checks` feature.
macro_rules! os_check_ext {
    ($($args:tt)*) => {
        #[cfg(feature = "extended_checks")]
        {
            $crate::error::os_check!($($args)*);
        }
    };
}

/// Extended-tier state assertion. Violations are programming errors in the
/// kernel or the configuration and are fatal.
macro_rules! os_assert_ext {
    ($cond:expr, $($arg:tt)+) => {
        #[cfg(feature = "extended_checks")]
        {
            if !$cond {
                panic!($($arg)+);
            }
        }
    };
}

pub(crate) use {os_assert_ext, os_check, os_check_ext};
