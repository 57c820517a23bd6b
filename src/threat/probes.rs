//! Platform probes.
//!
//! - Linux/Android: `/proc` inspection, DMI strings
//! - Android: su/Magisk/Xposed artefacts, root UID, QEMU pipes
//! - Windows: `IsDebuggerPresent`, developer-mode registry value
//!
//! Probes for indicators a platform cannot express report "not detected".

use super::{EnvironmentProbe, ThreatIndicator};
use anyhow::Result;

/// The standard probe set
///
/// `production` marks a build that must not carry debug instrumentation.
pub fn default_probes(production: bool) -> Vec<Box<dyn EnvironmentProbe>> {
    vec![
        Box::new(RootProbe),
        Box::new(DebuggerProbe),
        Box::new(HookFrameworkProbe),
        Box::new(EmulatorProbe),
        Box::new(AppIntegrityProbe { production }),
        Box::new(DeveloperModeProbe),
        Box::new(RemoteDebugBridgeProbe),
    ]
}

/// Rooted device
///
/// Only Android is probed. On desktops an administrator account is the normal
/// way to run the guardian tooling and says nothing about device integrity.
#[derive(Debug, Clone, Copy, Default)]
pub struct RootProbe;

impl EnvironmentProbe for RootProbe {
    fn indicator(&self) -> ThreatIndicator {
        ThreatIndicator::Root
    }

    fn detect(&self) -> Result<bool> {
        #[cfg(target_os = "android")]
        {
            if any_path_exists(&ANDROID_ROOT_PATHS) {
                return Ok(true);
            }
            // SAFETY: geteuid has no preconditions and cannot fail
            let euid = unsafe { libc::geteuid() };
            Ok(euid == 0)
        }

        #[cfg(not(target_os = "android"))]
        {
            Ok(false)
        }
    }
}

#[cfg(target_os = "android")]
const ANDROID_ROOT_PATHS: [&str; 10] = [
    "/system/bin/su",
    "/system/xbin/su",
    "/sbin/su",
    "/system/su",
    "/data/local/xbin/su",
    "/data/local/bin/su",
    "/data/adb/magisk",
    "/sbin/.magisk",
    "/data/data/com.topjohnwu.magisk",
    "/data/data/eu.chainfire.supersu",
];

/// Attached debugger or tracer
#[derive(Debug, Clone, Copy, Default)]
pub struct DebuggerProbe;

impl EnvironmentProbe for DebuggerProbe {
    fn indicator(&self) -> ThreatIndicator {
        ThreatIndicator::Debugger
    }

    fn detect(&self) -> Result<bool> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            let status = std::fs::read_to_string("/proc/self/status")?;
            Ok(tracer_pid(&status).is_some_and(|pid| pid != 0))
        }

        #[cfg(target_os = "windows")]
        {
            // SAFETY: IsDebuggerPresent takes no arguments and has no preconditions
            let present =
                unsafe { windows_sys::Win32::System::Diagnostics::Debug::IsDebuggerPresent() };
            Ok(present != 0)
        }

        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "windows")))]
        {
            Ok(false)
        }
    }
}

/// Parse the `TracerPid:` line of `/proc/<pid>/status`
pub fn tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// Runtime hooking frameworks mapped into the process
#[derive(Debug, Clone, Copy, Default)]
pub struct HookFrameworkProbe;

const HOOK_LIBRARY_MARKERS: [&str; 6] = [
    "frida-agent",
    "frida-gadget",
    "libsubstrate",
    "xposedbridge",
    "liblspd",
    "libriru",
];

impl EnvironmentProbe for HookFrameworkProbe {
    fn indicator(&self) -> ThreatIndicator {
        ThreatIndicator::HookFramework
    }

    fn detect(&self) -> Result<bool> {
        #[cfg(target_os = "android")]
        {
            if any_path_exists(&ANDROID_HOOK_PATHS) {
                return Ok(true);
            }
        }

        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            let maps = std::fs::read_to_string("/proc/self/maps")?;
            Ok(maps_contain_hook_library(&maps))
        }

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            Ok(false)
        }
    }
}

#[cfg(target_os = "android")]
const ANDROID_HOOK_PATHS: [&str; 5] = [
    "/system/framework/XposedBridge.jar",
    "/data/data/de.robv.android.xposed.installer",
    "/data/data/org.meowcat.edxposed.manager",
    "/data/data/io.github.lsposed.manager",
    "/data/local/tmp/frida-server",
];

/// True if a memory map listing names a known hooking library
pub fn maps_contain_hook_library(maps: &str) -> bool {
    let lower = maps.to_lowercase();
    HOOK_LIBRARY_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Emulator or virtual machine
#[derive(Debug, Clone, Copy, Default)]
pub struct EmulatorProbe;

const VM_VENDOR_MARKERS: [&str; 7] = [
    "VMware",
    "VirtualBox",
    "QEMU",
    "KVM",
    "Xen",
    "Parallels",
    "innotek GmbH",
];

impl EnvironmentProbe for EmulatorProbe {
    fn indicator(&self) -> ThreatIndicator {
        ThreatIndicator::Emulator
    }

    fn detect(&self) -> Result<bool> {
        #[cfg(target_os = "android")]
        {
            let qemu_files = ["/dev/socket/qemud", "/dev/qemu_pipe", "/system/bin/qemu-props"];
            if any_path_exists(&qemu_files) {
                return Ok(true);
            }
        }

        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            let dmi_paths = [
                "/sys/class/dmi/id/product_name",
                "/sys/class/dmi/id/sys_vendor",
                "/sys/class/dmi/id/board_vendor",
            ];

            // DMI is absent on many ARM boards; absence is not an error
            for path in dmi_paths {
                if let Ok(contents) = std::fs::read_to_string(path) {
                    if VM_VENDOR_MARKERS.iter().any(|m| contents.contains(m)) {
                        return Ok(true);
                    }
                }
            }

            let cpuinfo = std::fs::read_to_string("/proc/cpuinfo")?;
            Ok(cpuinfo_has_hypervisor(&cpuinfo))
        }

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            Ok(false)
        }
    }
}

/// True if any `flags` line in `/proc/cpuinfo` carries the hypervisor bit
pub fn cpuinfo_has_hypervisor(cpuinfo: &str) -> bool {
    cpuinfo
        .lines()
        .filter(|line| line.starts_with("flags"))
        .any(|line| line.split_whitespace().any(|flag| flag == "hypervisor"))
}

/// A build marked for production that still carries debug assertions
#[derive(Debug, Clone, Copy, Default)]
pub struct AppIntegrityProbe {
    pub production: bool,
}

impl EnvironmentProbe for AppIntegrityProbe {
    fn indicator(&self) -> ThreatIndicator {
        ThreatIndicator::IntegrityTampered
    }

    fn detect(&self) -> Result<bool> {
        Ok(self.production && cfg!(debug_assertions))
    }
}

/// Operating-system developer mode
#[derive(Debug, Clone, Copy, Default)]
pub struct DeveloperModeProbe;

impl EnvironmentProbe for DeveloperModeProbe {
    fn indicator(&self) -> ThreatIndicator {
        ThreatIndicator::DeveloperMode
    }

    fn detect(&self) -> Result<bool> {
        #[cfg(target_os = "windows")]
        {
            use winreg::RegKey;
            use winreg::enums::HKEY_LOCAL_MACHINE;

            let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
            let key = match hklm
                .open_subkey(r"SOFTWARE\Microsoft\Windows\CurrentVersion\AppModelUnlock")
            {
                Ok(key) => key,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(e.into()),
            };

            let value: u32 = key
                .get_value("AllowDevelopmentWithoutDevLicense")
                .unwrap_or(0);
            Ok(value == 1)
        }

        #[cfg(not(target_os = "windows"))]
        {
            Ok(false)
        }
    }
}

/// A running remote debug bridge daemon (adbd)
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteDebugBridgeProbe;

impl EnvironmentProbe for RemoteDebugBridgeProbe {
    fn indicator(&self) -> ThreatIndicator {
        ThreatIndicator::RemoteDebugBridge
    }

    fn detect(&self) -> Result<bool> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            for entry in std::fs::read_dir("/proc")?.flatten() {
                let is_pid = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()));
                if !is_pid {
                    continue;
                }

                // Processes may exit between listing and reading
                if let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) {
                    if comm.trim() == "adbd" {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            Ok(false)
        }
    }
}

#[cfg(target_os = "android")]
fn any_path_exists(paths: &[&str]) -> bool {
    paths.iter().any(|p| std::path::Path::new(p).exists())
}
