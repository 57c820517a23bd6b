//! Boot identity
//!
//! - Linux/Android: `/proc/sys/kernel/random/boot_id`
//! - macOS/iOS: `kern.bootsessionuuid` sysctl
//! - Windows: `BootId` counter kept by the memory manager
//!
//! Values derived from "wall time minus uptime" move with the wall clock, so a
//! date change would read as a reboot. They are not used.

/// Identifier that changes on every boot, if the platform exposes one
pub fn boot_id() -> Option<String> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        let id = std::fs::read_to_string("/proc/sys/kernel/random/boot_id").ok()?;
        non_empty(&id)
    }

    #[cfg(target_vendor = "apple")]
    {
        sysctl_string("kern.bootsessionuuid")
    }

    #[cfg(target_os = "windows")]
    {
        use winreg::RegKey;
        use winreg::enums::HKEY_LOCAL_MACHINE;

        let key = RegKey::predef(HKEY_LOCAL_MACHINE)
            .open_subkey(
                r"SYSTEM\CurrentControlSet\Control\Session Manager\Memory Management\PrefetchParameters",
            )
            .ok()?;
        let id: u32 = key.get_value("BootId").ok()?;
        Some(id.to_string())
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_vendor = "apple",
        target_os = "windows"
    )))]
    {
        None
    }
}

#[cfg(target_vendor = "apple")]
fn sysctl_string(name: &str) -> Option<String> {
    let name = std::ffi::CString::new(name).ok()?;
    let mut buf = [0u8; 64];
    let mut len: libc::size_t = buf.len();

    // SAFETY: `name` is NUL-terminated, `buf` is writable for `len` bytes and
    // `len` is updated to the number of bytes written.
    let result = unsafe {
        libc::sysctlbyname(
            name.as_ptr(),
            buf.as_mut_ptr().cast(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if result != 0 {
        return None;
    }

    let text = String::from_utf8_lossy(&buf[..len.min(buf.len())]);
    non_empty(text.trim_end_matches('\0'))
}

#[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple", test))]
fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
