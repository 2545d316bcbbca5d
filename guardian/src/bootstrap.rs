//! Process hardening applied before any secret is collected.

/// Disable core dumps and `/proc/<pid>/mem` reads by other users, so a
/// passphrase typed into a prompt cannot leak through either.  Best effort:
/// failure is logged and otherwise ignored.
#[cfg(target_os = "linux")]
pub fn secure_bootstrap() {
    let zero: libc::c_ulong = 0;
    // SAFETY: prctl is safe to call with PR_SET_DUMPABLE and plain integer args.
    let ret = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, zero, zero, zero, zero) };
    if ret == 0 {
        tracing::debug!("PR_SET_DUMPABLE=0: core dumps disabled");
    } else {
        let err = std::io::Error::last_os_error();
        tracing::warn!("PR_SET_DUMPABLE=0 failed (non-fatal): {err}");
    }
}

#[cfg(not(target_os = "linux"))]
pub fn secure_bootstrap() {}
