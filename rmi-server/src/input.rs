//! Key injection and app launching.
//!
//! `PRESS` writes evdev events straight into the device's key input
//! node. `PRESS_INPUT` goes through the platform `input keyevent`
//! utility instead, which survives SELinux configurations where the
//! input node is unwritable; platform fragmentation makes this a
//! best-effort matrix of exec candidates rather than a single
//! canonical path.

use std::io::Write;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use rmi_core::RmiError;

/// Key input node used by `PRESS`.
const INPUT_DEVICE: &str = "/dev/input/event2";

/// Highest keycode accepted by the evdev path (KEY_MAX).
const KEY_MAX: i32 = 0x2ff;

/// Shell-class UID/GID the injection children drop to (AID_SHELL).
const AID_SHELL: libc::uid_t = 2000;

// ── PRESS: raw evdev injection ───────────────────────────────────

const EV_SYN: u16 = 0x00;
const EV_KEY: u16 = 0x01;
const SYN_REPORT: u16 = 0;

// Mirrors the kernel's struct input_event; only ever read as raw
// bytes.
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct InputEvent {
    time: libc::timeval,
    kind: u16,
    code: u16,
    value: i32,
}

/// Write a key down/up pair, each followed by a `SYN_REPORT`, to the
/// device input node.
pub fn send_keyevent(keycode: i32) -> Result<(), RmiError> {
    if !(0..=KEY_MAX).contains(&keycode) {
        return Err(RmiError::Protocol(format!("keycode {keycode} out of range")));
    }

    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(INPUT_DEVICE)?;
    debug!("keyevent: using {INPUT_DEVICE} for keycode {keycode}");

    let mut now = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    if unsafe { libc::gettimeofday(&mut now, std::ptr::null_mut()) } == -1 {
        return Err(RmiError::Io(std::io::Error::last_os_error()));
    }

    let code = keycode as u16;
    let events = [
        InputEvent { time: now, kind: EV_KEY, code, value: 1 },
        InputEvent { time: now, kind: EV_SYN, code: SYN_REPORT, value: 0 },
        InputEvent { time: now, kind: EV_KEY, code, value: 0 },
        InputEvent { time: now, kind: EV_SYN, code: SYN_REPORT, value: 0 },
    ];
    let bytes = unsafe {
        std::slice::from_raw_parts(
            events.as_ptr() as *const u8,
            std::mem::size_of_val(&events),
        )
    };
    file.write_all(bytes)?;
    Ok(())
}

// ── PRESS_INPUT: platform input utility ──────────────────────────

struct ExecCandidate {
    program: &'static str,
    /// Leading arguments before `keyevent <code>`.
    prefix: &'static [&'static str],
    /// Whether the `input.jar` CLASSPATH must be set.
    classpath: bool,
    /// Whether the child drops to the shell user before exec.
    drop_privileges: bool,
}

/// Exec matrix in priority order. `runcon` keeps full credentials and
/// switches SELinux domain instead; every later candidate drops to the
/// shell user.
const INPUT_CANDIDATES: &[ExecCandidate] = &[
    ExecCandidate {
        program: "/system/bin/runcon",
        prefix: &["u:r:shell:s0", "/system/bin/sh", "/system/bin/input"],
        classpath: false,
        drop_privileges: false,
    },
    ExecCandidate {
        program: "/system/bin/sh",
        prefix: &["/system/bin/input"],
        classpath: false,
        drop_privileges: true,
    },
    ExecCandidate {
        program: "/system/bin/app_process",
        prefix: &["/system/bin", "com.android.commands.input.Input"],
        classpath: true,
        drop_privileges: true,
    },
    ExecCandidate {
        program: "/system/bin/app_process64",
        prefix: &["/system/bin", "com.android.commands.input.Input"],
        classpath: true,
        drop_privileges: true,
    },
    ExecCandidate {
        program: "/system/bin/app_process32",
        prefix: &["/system/bin", "com.android.commands.input.Input"],
        classpath: true,
        drop_privileges: true,
    },
    ExecCandidate {
        program: "/system/bin/cmd",
        prefix: &["input"],
        classpath: false,
        drop_privileges: true,
    },
    ExecCandidate {
        program: "/system/bin/toybox",
        prefix: &["input"],
        classpath: false,
        drop_privileges: true,
    },
    ExecCandidate {
        program: "/system/bin/toolbox",
        prefix: &["input"],
        classpath: false,
        drop_privileges: true,
    },
];

/// Inject a key press through the platform `input keyevent` utility.
///
/// The first candidate that spawns decides the outcome; a spawn
/// failure falls through to the next candidate. Non-zero exit of the
/// spawned utility is a failure.
pub async fn send_keyevent_input(keycode: i32) -> Result<(), RmiError> {
    if keycode < 0 {
        return Err(RmiError::Protocol(format!("negative keycode {keycode}")));
    }
    let key = keycode.to_string();
    debug!("press_input: keycode {keycode}");

    for candidate in INPUT_CANDIDATES {
        if !is_executable(candidate.program) {
            continue;
        }

        let mut cmd = Command::new(candidate.program);
        cmd.args(candidate.prefix)
            .arg("keyevent")
            .arg(&key)
            .stdout(Stdio::null());
        apply_shell_env(&mut cmd);
        if candidate.classpath {
            cmd.env("CLASSPATH", "/system/framework/input.jar");
        }
        if candidate.drop_privileges {
            unsafe {
                cmd.pre_exec(|| {
                    drop_to_shell_user();
                    Ok(())
                });
            }
        }

        debug!("press_input: exec {}", candidate.program);
        match cmd.status().await {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => {
                warn!("press_input: {} exited with {status}", candidate.program);
                return Err(RmiError::Protocol(format!(
                    "input utility exited with {status}"
                )));
            }
            Err(e) => {
                warn!("press_input: exec {} failed: {e}", candidate.program);
                continue;
            }
        }
    }

    Err(RmiError::Protocol("no usable input utility".into()))
}

// ── OPEN: best-effort app launch ─────────────────────────────────

/// Launch an application by package name. Best effort: the launcher
/// intent is triggered through `monkey`, directly or via the shell.
pub async fn open_package(package: &str) -> Result<(), RmiError> {
    if package.is_empty()
        || !package
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_')
    {
        return Err(RmiError::Protocol(format!("invalid package name {package}")));
    }

    let monkey_args = [
        "-p",
        package,
        "-c",
        "android.intent.category.LAUNCHER",
        "1",
    ];

    if is_executable("/system/bin/monkey") {
        let mut cmd = Command::new("/system/bin/monkey");
        cmd.args(monkey_args).stdout(Stdio::null());
        apply_shell_env(&mut cmd);
        match cmd.status().await {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => {
                warn!("open: monkey exited with {status}");
            }
            Err(e) => warn!("open: exec monkey failed: {e}"),
        }
    }

    // Fallback through the shell so PATH resolution applies.
    let mut cmd = Command::new("/system/bin/sh");
    cmd.arg("-c")
        .arg(format!(
            "monkey -p {package} -c android.intent.category.LAUNCHER 1"
        ))
        .stdout(Stdio::null());
    apply_shell_env(&mut cmd);
    match cmd.status().await {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(RmiError::Protocol(format!("launcher exited with {status}"))),
        Err(e) => Err(RmiError::Io(e)),
    }
}

// ── Shared child setup ───────────────────────────────────────────

/// The sanitized shell environment the injection children run with.
const SHELL_ENV: &[(&str, &str)] = &[
    ("PATH", "/sbin:/vendor/bin:/system/sbin:/system/bin:/system/xbin"),
    ("ANDROID_ROOT", "/system"),
    ("ANDROID_DATA", "/data"),
    ("ANDROID_RUNTIME_ROOT", "/system"),
    ("ANDROID_ASSETS", "/system/app"),
    ("ANDROID_BOOTLOGO", "1"),
    ("ANDROID_STORAGE", "/storage"),
    ("EXTERNAL_STORAGE", "/sdcard"),
    ("ASEC_MOUNTPOINT", "/mnt/asec"),
    ("TMPDIR", "/data/local/tmp"),
    ("HOME", "/data"),
    ("USER", "shell"),
    ("SHELL", "/system/bin/sh"),
    ("MKSH", "/system/bin/sh"),
    ("TERM", "xterm"),
    (
        "BOOTCLASSPATH",
        "/system/framework/core-libart.jar:/system/framework/conscrypt.jar\
         :/system/framework/okhttp.jar:/system/framework/core-junit.jar\
         :/system/framework/bouncycastle.jar:/system/framework/ext.jar\
         :/system/framework/framework.jar:/system/framework/telephony-common.jar\
         :/system/framework/voip-common.jar:/system/framework/ims-common.jar\
         :/system/framework/apache-xml.jar:/system/framework/org.apache.http.legacy.boot.jar",
    ),
    (
        "SYSTEMSERVERCLASSPATH",
        "/system/framework/services.jar:/system/framework/ethernet-service.jar\
         :/system/framework/wifi-service.jar",
    ),
    (
        "LD_LIBRARY_PATH",
        "/system/lib64:/vendor/lib64:/system/lib:/vendor/lib",
    ),
];

fn apply_shell_env(cmd: &mut Command) {
    cmd.env_clear();
    for (key, value) in SHELL_ENV {
        cmd.env(key, value);
    }
}

/// Drop the child to the shell user: clear supplementary groups, then
/// GID, then UID, in that order. Best effort, and a no-op when not
/// running as root. Runs between fork and exec, so no allocation and
/// no logging.
fn drop_to_shell_user() {
    unsafe {
        if libc::getuid() != 0 && libc::geteuid() != 0 {
            return;
        }
        let _ = libc::setgroups(0, std::ptr::null());
        let _ = libc::setgid(AID_SHELL as libc::gid_t);
        let _ = libc::setuid(AID_SHELL);
    }
}

fn is_executable(path: &str) -> bool {
    let c_path = match std::ffi::CString::new(path) {
        Ok(p) => p,
        Err(_) => return false,
    };
    unsafe { libc::access(c_path.as_ptr(), libc::X_OK) == 0 }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keycode_range_enforced() {
        assert!(send_keyevent(-1).is_err());
        assert!(send_keyevent(KEY_MAX + 1).is_err());
    }

    #[tokio::test]
    async fn press_input_rejects_negative() {
        assert!(send_keyevent_input(-5).await.is_err());
    }

    #[tokio::test]
    async fn open_rejects_unsafe_package_names() {
        assert!(open_package("").await.is_err());
        assert!(open_package("com.app; rm -rf /").await.is_err());
        assert!(open_package("com.app|x").await.is_err());
    }

    #[test]
    fn input_event_layout_matches_kernel_abi() {
        // timeval + u16 + u16 + i32, no padding surprises.
        assert_eq!(
            std::mem::size_of::<InputEvent>(),
            std::mem::size_of::<libc::timeval>() + 8
        );
    }

    #[test]
    fn executable_probe() {
        assert!(is_executable("/bin/sh") || is_executable("/system/bin/sh"));
        assert!(!is_executable("/definitely/not/a/real/binary"));
    }
}
