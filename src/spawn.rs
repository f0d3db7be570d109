//! Launching the session daemon as a detached background process: the
//! current binary re-executed with `--daemon` and the new-session
//! arguments.
//!
//! On Windows the daemon must escape the parent's Job Object
//! (`CREATE_BREAKAWAY_FROM_JOB`) or SSH-spawned daemons are reaped when
//! the SSH session ends, and must be created without a console window:
//! ConPTY needs the daemon to keep whatever console session it starts
//! with, so it is started console-less rather than detaching later.

use std::io;
use std::path::Path;

pub fn spawn_daemon(
    socket_path: &Path,
    session_name: &str,
    workdir: &str,
    shell_cmd: &str,
) -> io::Result<()> {
    let exe = std::env::current_exe()?;
    let args = daemon_args(socket_path, session_name, workdir, shell_cmd);
    platform_spawn(&exe, &args)
}

fn daemon_args(
    socket_path: &Path,
    session_name: &str,
    workdir: &str,
    shell_cmd: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--daemon".into(),
        "-S".into(),
        socket_path.to_string_lossy().into_owned(),
        "new-session".into(),
        "-d".into(),
    ];
    if !session_name.is_empty() {
        args.push("-s".into());
        args.push(session_name.into());
    }
    if !workdir.is_empty() {
        args.push("-c".into());
        args.push(workdir.into());
    }
    if !shell_cmd.is_empty() {
        args.push(shell_cmd.into());
    }
    args
}

#[cfg(windows)]
fn platform_spawn(exe: &Path, args: &[String]) -> io::Result<()> {
    use std::ffi::c_void;
    use std::os::windows::ffi::OsStrExt;

    type Handle = isize;

    #[repr(C)]
    #[allow(non_snake_case)]
    struct STARTUPINFOW {
        cb: u32,
        lpReserved: *mut u16,
        lpDesktop: *mut u16,
        lpTitle: *mut u16,
        dwX: u32,
        dwY: u32,
        dwXSize: u32,
        dwYSize: u32,
        dwXCountChars: u32,
        dwYCountChars: u32,
        dwFillAttribute: u32,
        dwFlags: u32,
        wShowWindow: u16,
        cbReserved2: u16,
        lpReserved2: *mut u8,
        hStdInput: Handle,
        hStdOutput: Handle,
        hStdError: Handle,
    }

    #[repr(C)]
    #[allow(non_snake_case)]
    struct PROCESS_INFORMATION {
        hProcess: Handle,
        hThread: Handle,
        dwProcessId: u32,
        dwThreadId: u32,
    }

    #[link(name = "kernel32")]
    extern "system" {
        fn CreateProcessW(
            lpApplicationName: *const u16,
            lpCommandLine: *mut u16,
            lpProcessAttributes: *const c_void,
            lpThreadAttributes: *const c_void,
            bInheritHandles: i32,
            dwCreationFlags: u32,
            lpEnvironment: *const c_void,
            lpCurrentDirectory: *const u16,
            lpStartupInfo: *const STARTUPINFOW,
            lpProcessInformation: *mut PROCESS_INFORMATION,
        ) -> i32;
        fn CloseHandle(hObject: Handle) -> i32;
    }

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_BREAKAWAY_FROM_JOB: u32 = 0x0100_0000;

    // Quote arguments containing spaces or quotes.
    let mut cmdline = format!("\"{}\"", exe.display());
    for arg in args {
        if arg.contains(' ') || arg.contains('"') {
            cmdline.push_str(&format!(" \"{}\"", arg.replace('"', "\\\"")));
        } else {
            cmdline.push(' ');
            cmdline.push_str(arg);
        }
    }
    let mut cmdline_wide: Vec<u16> = std::ffi::OsStr::new(&cmdline)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let mut si: STARTUPINFOW = unsafe { std::mem::zeroed() };
    si.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
    let mut pi: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };

    let ok = unsafe {
        CreateProcessW(
            std::ptr::null(),
            cmdline_wide.as_mut_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            0, // don't inherit handles
            CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP | CREATE_BREAKAWAY_FROM_JOB,
            std::ptr::null(),
            std::ptr::null(),
            &si,
            &mut pi,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }

    // The daemon runs on its own; nothing waits on these handles.
    unsafe {
        CloseHandle(pi.hThread);
        CloseHandle(pi.hProcess);
    }
    Ok(())
}

#[cfg(not(windows))]
fn platform_spawn(exe: &Path, args: &[String]) -> io::Result<()> {
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    Command::new(exe)
        .args(args)
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_carry_the_full_session() {
        let args = daemon_args(Path::new("/tmp/a.session"), "work", "/srv", "sleep 5");
        assert_eq!(
            args,
            vec![
                "--daemon",
                "-S",
                "/tmp/a.session",
                "new-session",
                "-d",
                "-s",
                "work",
                "-c",
                "/srv",
                "sleep 5"
            ]
        );
    }

    #[test]
    fn empty_fields_are_omitted() {
        let args = daemon_args(Path::new("/tmp/a"), "", "", "");
        assert_eq!(args, vec!["--daemon", "-S", "/tmp/a", "new-session", "-d"]);
    }
}
