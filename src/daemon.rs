//! The session daemon: owns the pseudo-terminal, scrollback, virtual
//! screen and tee file, and serves the request protocol over a loopback
//! TCP listener advertised by the control file.
//!
//! Four long-lived tasks: the output pump (sole reader of the terminal),
//! the exit watcher, the accept loop, and a short-lived handler per
//! connection (one request, one response, close).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::control::{self, ControlInfo};
use crate::keys;
use crate::protocol::{self, Action, Request, Response};
use crate::pty::{self, Terminal};
use crate::screen::Screen;
use crate::scrollback::Scrollback;

pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 40;
const DEFAULT_CAPTURE_LINES: usize = 50;
const SCROLLBACK_CAPACITY: usize = 2000;
const CONNECTION_DEADLINE: Duration = Duration::from_secs(10);
const EXIT_GRACE: Duration = Duration::from_secs(5);
const ACCEPT_IDLE: Duration = Duration::from_millis(50);

/// Normalized start configuration, immutable once the daemon runs.
pub struct StartConfig {
    pub socket_path: PathBuf,
    pub session_name: String,
    pub workdir: PathBuf,
    pub shell_cmd: String,
    pub cols: u16,
    pub rows: u16,
}

struct Daemon {
    terminal: Arc<dyn Terminal>,
    scrollback: Scrollback,
    screen: Screen,
    tee: Mutex<Option<File>>,
    child_exited: AtomicBool,
    shutdown: AtomicBool,
    log: LogFile,
}

/// Main entry point for a daemon process. Builds the terminal, starts the
/// background tasks, and blocks until the child has exited and the grace
/// period has elapsed.
pub fn run(config: StartConfig) -> io::Result<()> {
    let terminal = pty::spawn(config.cols, config.rows, &config.shell_cmd, &config.workdir)
        .map_err(|e| io::Error::new(e.kind(), format!("create terminal: {e}")))?;

    let listener = match TcpListener::bind(("127.0.0.1", 0)) {
        Ok(l) => l,
        Err(e) => {
            terminal.close();
            return Err(io::Error::new(e.kind(), format!("listen: {e}")));
        }
    };
    let port = listener.local_addr()?.port();

    let info = ControlInfo { port, pid: std::process::id() };
    if let Err(e) = control::write_control_file(&config.socket_path, &info) {
        terminal.close();
        return Err(io::Error::new(e.kind(), format!("write control file: {e}")));
    }

    let log = LogFile::create(&log_path(&config.socket_path));
    log.line(&format!(
        "daemon: session={} pid={} port={} socket={}",
        config.session_name,
        info.pid,
        port,
        config.socket_path.display()
    ));

    let daemon = Arc::new(Daemon {
        terminal,
        scrollback: Scrollback::new(SCROLLBACK_CAPACITY),
        screen: Screen::new(config.cols as usize, config.rows as usize),
        tee: Mutex::new(None),
        child_exited: AtomicBool::new(false),
        shutdown: AtomicBool::new(false),
        log,
    });

    {
        let d = daemon.clone();
        thread::spawn(move || d.output_pump());
    }
    {
        let d = daemon.clone();
        thread::spawn(move || d.exit_watcher());
    }

    // Accept loop. The watcher raises `shutdown` after the grace period;
    // a non-blocking listener lets the loop observe the flag.
    if listener.set_nonblocking(true).is_ok() {
        loop {
            if daemon.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    let d = daemon.clone();
                    thread::spawn(move || d.handle_connection(stream));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_IDLE),
                Err(e) => {
                    daemon.log.line(&format!("daemon: accept error: {e}"));
                    break;
                }
            }
        }
    }

    daemon.cleanup(&config);
    Ok(())
}

/// The daemon's log sits next to the control file: `<socket>.log`.
fn log_path(socket_path: &Path) -> PathBuf {
    let mut s = socket_path.as_os_str().to_os_string();
    s.push(".log");
    PathBuf::from(s)
}

impl Daemon {
    /// Continuously drain the terminal, fanning each chunk into the
    /// scrollback ring, the virtual screen, and the tee file if one is
    /// set. Ends on end-of-stream or a read error.
    fn output_pump(&self) {
        let mut buf = [0u8; 4096];
        loop {
            match self.terminal.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => {
                    let chunk = &buf[..n];
                    self.scrollback.write(chunk);
                    self.screen.write(chunk);
                    let mut tee = self.tee.lock().unwrap();
                    if let Some(f) = tee.as_mut() {
                        let _ = f.write_all(chunk);
                    }
                }
                Err(e) => {
                    self.log.line(&format!("daemon: read error: {e}"));
                    return;
                }
            }
        }
    }

    /// Wait for the child, then shut the daemon down after a grace period
    /// that leaves clients room for a final capture.
    fn exit_watcher(&self) {
        let code = self.terminal.wait();
        self.log.line(&format!("daemon: child exited with code {code}"));
        self.child_exited.store(true, Ordering::SeqCst);
        thread::sleep(EXIT_GRACE);
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn handle_connection(&self, mut stream: TcpStream) {
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_read_timeout(Some(CONNECTION_DEADLINE));
        let _ = stream.set_write_timeout(Some(CONNECTION_DEADLINE));

        let req: Request = match protocol::read_message(&mut stream) {
            Ok(r) => r,
            Err(e) => {
                self.log.line(&format!("daemon: read request: {e}"));
                return;
            }
        };
        let resp = self.dispatch(&req);
        if let Err(e) = protocol::write_message(&mut stream, &resp) {
            self.log.line(&format!("daemon: write response: {e}"));
        }
    }

    fn dispatch(&self, req: &Request) -> Response {
        match req.action {
            Action::Ping => Response::ok(),
            Action::SendKeys => self.handle_send_keys(req),
            Action::SendKey => self.handle_send_key(req),
            Action::CapturePane => self.handle_capture(req),
            Action::HasSession => self.handle_has_session(),
            Action::KillSession => self.handle_kill_session(),
            Action::SetOption => self.handle_set_option(req),
            Action::PipePane => self.handle_pipe_pane(req),
            Action::Unknown => Response::err("unknown action"),
        }
    }

    fn handle_send_keys(&self, req: &Request) -> Response {
        if !req.text.is_empty() {
            if let Err(e) = self.write_terminal(req.text.as_bytes()) {
                return Response::err(e.to_string());
            }
        }
        if req.send_enter {
            if let Err(e) = self.write_terminal(b"\r") {
                return Response::err(e.to_string());
            }
        }
        Response::ok()
    }

    fn handle_send_key(&self, req: &Request) -> Response {
        let seq = match keys::sequence(&req.key) {
            Some(s) => s,
            None => return Response::err(format!("unknown key: {}", req.key)),
        };
        match self.write_terminal(seq.as_bytes()) {
            Ok(()) => Response::ok(),
            Err(e) => Response::err(e.to_string()),
        }
    }

    /// Full write or error; everything sent here is a short key sequence,
    /// so a partial write means something is wrong with the pipe.
    fn write_terminal(&self, data: &[u8]) -> io::Result<()> {
        let n = self.terminal.write(data)?;
        if n < data.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short write to terminal"));
        }
        Ok(())
    }

    fn handle_capture(&self, req: &Request) -> Response {
        let lines = if req.lines <= 0 { DEFAULT_CAPTURE_LINES } else { req.lines as usize };
        // The virtual screen is the capture source: full-screen TUIs
        // rewrite cells in place, which raw scrollback cannot represent.
        let rows = self.screen.capture(lines);
        let mut resp = Response::ok();
        resp.output = Some(rows.join("\n"));
        resp
    }

    fn handle_has_session(&self) -> Response {
        let mut resp = Response::ok();
        resp.exists = Some(!self.child_exited.load(Ordering::SeqCst));
        resp
    }

    fn handle_kill_session(&self) -> Response {
        self.terminal.close();
        Response::ok()
    }

    fn handle_set_option(&self, req: &Request) -> Response {
        match req.option.as_str() {
            "history-limit" => match req.value.parse::<usize>() {
                Ok(n) if n > 0 => {
                    self.scrollback.set_capacity(n);
                    Response::ok()
                }
                _ => Response::err("invalid history-limit value"),
            },
            _ => Response::err(format!("unknown option: {}", req.option)),
        }
    }

    fn handle_pipe_pane(&self, req: &Request) -> Response {
        let mut tee = self.tee.lock().unwrap();
        // Replacing or clearing closes the previous file.
        *tee = None;

        if req.shell_cmd.is_empty() {
            return Response::ok();
        }
        let path = match extract_pipe_path(&req.shell_cmd) {
            Some(p) => PathBuf::from(p),
            None => {
                return Response::err("unsupported pipe-pane command (only 'cat >> path' supported)")
            }
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = fs::create_dir_all(parent);
            }
        }
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => {
                *tee = Some(f);
                Response::ok()
            }
            Err(e) => Response::err(e.to_string()),
        }
    }

    fn cleanup(&self, config: &StartConfig) {
        *self.tee.lock().unwrap() = None;
        self.terminal.close();
        control::remove_control_file(&config.socket_path);
        self.log.line(&format!("daemon: cleaned up session {}", config.session_name));
    }
}

/// Parse `cat >> /path/to/file` (optionally quoted) and return the path.
/// Any other command shape is unsupported.
fn extract_pipe_path(cmd: &str) -> Option<String> {
    let rest = cmd.trim().strip_prefix("cat")?;
    let rest = rest.trim_start().strip_prefix(">>")?;
    let path = rest.trim().trim_matches(|c| c == '\'' || c == '"');
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

struct LogFile {
    file: Mutex<Option<File>>,
}

impl LogFile {
    /// A daemon without a log file still runs; logging is best-effort.
    fn create(path: &Path) -> Self {
        LogFile { file: Mutex::new(File::create(path).ok()) }
    }

    fn line(&self, msg: &str) {
        if let Some(f) = self.file.lock().unwrap().as_mut() {
            let _ = writeln!(f, "[{}] {}", chrono::Local::now().format("%H:%M:%S%.3f"), msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_path_plain() {
        assert_eq!(extract_pipe_path("cat >> /tmp/out.log").as_deref(), Some("/tmp/out.log"));
    }

    #[test]
    fn pipe_path_quoted() {
        assert_eq!(
            extract_pipe_path("cat >> \"C:\\logs\\pane output.log\"").as_deref(),
            Some("C:\\logs\\pane output.log")
        );
        assert_eq!(extract_pipe_path("cat >> '/tmp/a b.log'").as_deref(), Some("/tmp/a b.log"));
    }

    #[test]
    fn pipe_path_compact() {
        assert_eq!(extract_pipe_path("cat>>out.log").as_deref(), Some("out.log"));
    }

    #[test]
    fn pipe_path_rejects_other_shapes() {
        assert_eq!(extract_pipe_path("tee -a out.log"), None);
        assert_eq!(extract_pipe_path("cat > out.log"), None);
        assert_eq!(extract_pipe_path("cat >>"), None);
        assert_eq!(extract_pipe_path(""), None);
    }

    #[test]
    fn log_path_is_sibling() {
        assert_eq!(
            log_path(Path::new("/tmp/conmux/dev.session")),
            PathBuf::from("/tmp/conmux/dev.session.log")
        );
    }
}
