//! ConPTY backend.
//!
//! Raw Win32 calls via `#[link]` extern blocks. The console's anonymous
//! pipes are synchronous and not overlapped; a thread parked in a blocking
//! `ReadFile` can stall ConPTY's internal flush on some Windows builds, so
//! reads poll `PeekNamedPipe` and only call `ReadFile` when bytes are
//! known to be available.

use std::ffi::c_void;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use super::{ExitFlag, Terminal};

type Handle = isize;

const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x0002_0016;
const EXTENDED_STARTUPINFO_PRESENT: u32 = 0x0008_0000;
const INFINITE: u32 = 0xFFFF_FFFF;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const CLOSE_WAIT: Duration = Duration::from_millis(100);

#[repr(C)]
#[derive(Copy, Clone)]
struct COORD {
    x: i16,
    y: i16,
}

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
struct STARTUPINFOEXW {
    StartupInfo: STARTUPINFOW,
    lpAttributeList: *mut c_void,
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
    fn CreatePipe(
        hReadPipe: *mut Handle,
        hWritePipe: *mut Handle,
        lpPipeAttributes: *const c_void,
        nSize: u32,
    ) -> i32;
    fn CreatePseudoConsole(
        size: COORD,
        hInput: Handle,
        hOutput: Handle,
        dwFlags: u32,
        phPC: *mut Handle,
    ) -> i32;
    fn ResizePseudoConsole(hPC: Handle, size: COORD) -> i32;
    fn ClosePseudoConsole(hPC: Handle);
    fn InitializeProcThreadAttributeList(
        lpAttributeList: *mut c_void,
        dwAttributeCount: u32,
        dwFlags: u32,
        lpSize: *mut usize,
    ) -> i32;
    fn UpdateProcThreadAttribute(
        lpAttributeList: *mut c_void,
        dwFlags: u32,
        Attribute: usize,
        lpValue: *mut c_void,
        cbSize: usize,
        lpPreviousValue: *mut c_void,
        lpReturnSize: *mut usize,
    ) -> i32;
    fn DeleteProcThreadAttributeList(lpAttributeList: *mut c_void);
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
    fn ReadFile(
        hFile: Handle,
        lpBuffer: *mut u8,
        nNumberOfBytesToRead: u32,
        lpNumberOfBytesRead: *mut u32,
        lpOverlapped: *mut c_void,
    ) -> i32;
    fn WriteFile(
        hFile: Handle,
        lpBuffer: *const u8,
        nNumberOfBytesToWrite: u32,
        lpNumberOfBytesWritten: *mut u32,
        lpOverlapped: *mut c_void,
    ) -> i32;
    fn PeekNamedPipe(
        hNamedPipe: Handle,
        lpBuffer: *mut c_void,
        nBufferSize: u32,
        lpBytesRead: *mut u32,
        lpTotalBytesAvail: *mut u32,
        lpBytesLeftThisMessage: *mut u32,
    ) -> i32;
    fn WaitForSingleObject(hHandle: Handle, dwMilliseconds: u32) -> u32;
    fn GetExitCodeProcess(hProcess: Handle, lpExitCode: *mut u32) -> i32;
    fn TerminateProcess(hProcess: Handle, uExitCode: u32) -> i32;
    fn CloseHandle(hObject: Handle) -> i32;
}

fn to_wide(s: &str) -> Vec<u16> {
    std::ffi::OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

/// RAII wrapper for a one-slot proc/thread attribute list.
struct AttributeList {
    buf: Vec<u8>,
}

impl AttributeList {
    fn new() -> io::Result<Self> {
        let mut size: usize = 0;
        unsafe {
            // First call reports the required buffer size.
            InitializeProcThreadAttributeList(std::ptr::null_mut(), 1, 0, &mut size);
        }
        let mut buf = vec![0u8; size];
        let ok = unsafe {
            InitializeProcThreadAttributeList(buf.as_mut_ptr() as *mut c_void, 1, 0, &mut size)
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(AttributeList { buf })
    }

    fn as_ptr(&mut self) -> *mut c_void {
        self.buf.as_mut_ptr() as *mut c_void
    }
}

impl Drop for AttributeList {
    fn drop(&mut self) {
        unsafe { DeleteProcThreadAttributeList(self.buf.as_mut_ptr() as *mut c_void) };
    }
}

/// A pseudo console, its I/O pipe ends, and the attached child process.
pub struct ConPty {
    hpc: Handle,
    pipe_in: Handle,  // write end → child stdin
    pipe_out: Handle, // read end ← child stdout+stderr
    process: Handle,
    exit: Arc<ExitFlag>,
    close_once: Once,
}

// The fields are kernel handles; access is serialized by the OS (pipes)
// and by `Once` (teardown).
unsafe impl Send for ConPty {}
unsafe impl Sync for ConPty {}

impl ConPty {
    pub fn spawn(cols: u16, rows: u16, command: &str, workdir: &Path) -> io::Result<Arc<Self>> {
        let mut in_read: Handle = 0;
        let mut in_write: Handle = 0;
        let mut out_read: Handle = 0;
        let mut out_write: Handle = 0;

        unsafe {
            if CreatePipe(&mut in_read, &mut in_write, std::ptr::null(), 0) == 0 {
                return Err(io::Error::last_os_error());
            }
            if CreatePipe(&mut out_read, &mut out_write, std::ptr::null(), 0) == 0 {
                let err = io::Error::last_os_error();
                CloseHandle(in_read);
                CloseHandle(in_write);
                return Err(err);
            }
        }

        let size = COORD { x: cols as i16, y: rows as i16 };
        let mut hpc: Handle = 0;
        let hr = unsafe { CreatePseudoConsole(size, in_read, out_write, 0, &mut hpc) };
        if hr != 0 {
            unsafe {
                CloseHandle(in_read);
                CloseHandle(in_write);
                CloseHandle(out_read);
                CloseHandle(out_write);
            }
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("CreatePseudoConsole failed: HRESULT 0x{hr:08x}"),
            ));
        }

        // The console owns the child-side ends now.
        unsafe {
            CloseHandle(in_read);
            CloseHandle(out_write);
        }

        let process = match start_process(hpc, command, workdir) {
            Ok(h) => h,
            Err(e) => {
                unsafe {
                    ClosePseudoConsole(hpc);
                    CloseHandle(in_write);
                    CloseHandle(out_read);
                }
                return Err(e);
            }
        };

        let exit = Arc::new(ExitFlag::new());
        {
            let exit = exit.clone();
            let process = process;
            thread::spawn(move || {
                unsafe { WaitForSingleObject(process, INFINITE) };
                let mut code: u32 = 0;
                unsafe { GetExitCodeProcess(process, &mut code) };
                exit.signal(code as i32);
            });
        }

        Ok(Arc::new(ConPty {
            hpc,
            pipe_in: in_write,
            pipe_out: out_read,
            process,
            exit,
            close_once: Once::new(),
        }))
    }
}

fn start_process(hpc: Handle, command: &str, workdir: &Path) -> io::Result<Handle> {
    let mut attrs = AttributeList::new()?;
    let mut hpc_value = hpc;
    let ok = unsafe {
        // lpValue is the HPCON value itself, not a pointer to it: the API
        // reads the handle from this address.
        UpdateProcThreadAttribute(
            attrs.as_ptr(),
            0,
            PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
            &mut hpc_value as *mut Handle as *mut c_void,
            std::mem::size_of::<Handle>(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }

    let cmdline = if command.is_empty() { default_shell()? } else { command.to_string() };
    let mut cmdline_wide = to_wide(&cmdline);

    let workdir_wide;
    let workdir_ptr = if workdir.as_os_str().is_empty() {
        std::ptr::null()
    } else {
        workdir_wide = workdir
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect::<Vec<u16>>();
        workdir_wide.as_ptr()
    };

    let mut si: STARTUPINFOEXW = unsafe { std::mem::zeroed() };
    si.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;
    si.lpAttributeList = attrs.as_ptr();

    let mut pi: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };
    let ok = unsafe {
        CreateProcessW(
            std::ptr::null(),
            cmdline_wide.as_mut_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            0, // don't inherit handles
            EXTENDED_STARTUPINFO_PRESENT,
            std::ptr::null(),
            workdir_ptr,
            &si.StartupInfo,
            &mut pi,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }

    unsafe { CloseHandle(pi.hThread) };
    Ok(pi.hProcess)
}

/// Resolve the default interactive shell: pwsh if installed, else cmd.
fn default_shell() -> io::Result<String> {
    which::which("pwsh")
        .or_else(|_| which::which("cmd"))
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("no shell found: {e}")))
}

impl Terminal for ConPty {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let exited = self.exit.get().is_some();
            let mut avail: u32 = 0;
            let ok = unsafe {
                PeekNamedPipe(
                    self.pipe_out,
                    std::ptr::null_mut(),
                    0,
                    std::ptr::null_mut(),
                    &mut avail,
                    std::ptr::null_mut(),
                )
            };
            if ok == 0 {
                // The pipe is gone; once the child is down that's a clean
                // end of stream.
                if exited {
                    return Ok(0);
                }
                return Err(io::Error::last_os_error());
            }
            if avail > 0 {
                let mut n: u32 = 0;
                let ok = unsafe {
                    ReadFile(
                        self.pipe_out,
                        buf.as_mut_ptr(),
                        buf.len() as u32,
                        &mut n,
                        std::ptr::null_mut(),
                    )
                };
                if ok == 0 {
                    return Err(io::Error::last_os_error());
                }
                return Ok(n as usize);
            }
            if exited {
                return Ok(0);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut n: u32 = 0;
        let ok = unsafe {
            WriteFile(
                self.pipe_in,
                data.as_ptr(),
                data.len() as u32,
                &mut n,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn resize(&self, cols: u16, rows: u16) -> io::Result<()> {
        let hr = unsafe { ResizePseudoConsole(self.hpc, COORD { x: cols as i16, y: rows as i16 }) };
        if hr != 0 {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("ResizePseudoConsole failed: HRESULT 0x{hr:08x}"),
            ));
        }
        Ok(())
    }

    fn wait(&self) -> i32 {
        self.exit.wait()
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit.get()
    }

    fn close(&self) {
        self.close_once.call_once(|| {
            unsafe {
                // Dropping the console tells the child its terminal is
                // gone; termination is the backstop.
                ClosePseudoConsole(self.hpc);
                TerminateProcess(self.process, 1);
            }
            // Give the watcher a moment to record the exit code.
            self.exit.wait_timeout(CLOSE_WAIT);
            unsafe {
                CloseHandle(self.pipe_in);
                CloseHandle(self.pipe_out);
                // Process handle last; the watcher waits on it.
                CloseHandle(self.process);
            }
        });
    }
}

impl Drop for ConPty {
    fn drop(&mut self) {
        self.close();
    }
}
