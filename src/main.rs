use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use conmux::cli::{self, Command, CommandKind};
use conmux::client;
use conmux::daemon::{self, StartConfig, DEFAULT_COLS, DEFAULT_ROWS};
use conmux::keys;
use conmux::protocol::{Action, Request};
use conmux::spawn;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() {
        print_usage();
        std::process::exit(1);
    }
    if args[0] == "-V" {
        println!("conmux {}", conmux::VERSION);
        return;
    }

    let cmd = match cli::parse(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("conmux: {e}");
            std::process::exit(1);
        }
    };

    if cmd.daemon_mode {
        run_daemon(&cmd);
        return;
    }

    std::process::exit(execute(&cmd));
}

fn run_daemon(cmd: &Command) {
    let workdir = if cmd.start_dir.is_empty() {
        std::env::current_dir().unwrap_or_default()
    } else {
        PathBuf::from(&cmd.start_dir)
    };
    let config = StartConfig {
        socket_path: cmd.socket_path.clone(),
        session_name: cmd.session_name.clone(),
        workdir,
        shell_cmd: cmd.shell_cmd.clone(),
        cols: DEFAULT_COLS,
        rows: DEFAULT_ROWS,
    };
    if let Err(e) = daemon::run(config) {
        eprintln!("conmux: daemon error: {e}");
        std::process::exit(1);
    }
}

fn execute(cmd: &Command) -> i32 {
    match cmd.kind {
        CommandKind::NewSession => execute_new_session(cmd),
        CommandKind::SendKeys => execute_send_keys(cmd),
        CommandKind::CapturePane => execute_capture_pane(cmd),
        CommandKind::HasSession => execute_has_session(cmd),
        CommandKind::KillSession => execute_kill_session(cmd),
        CommandKind::SetOption => execute_set_option(cmd),
        CommandKind::PipePane => execute_pipe_pane(cmd),
    }
}

fn execute_new_session(cmd: &Command) -> i32 {
    if let Err(e) =
        spawn::spawn_daemon(&cmd.socket_path, &cmd.session_name, &cmd.start_dir, &cmd.shell_cmd)
    {
        eprintln!("conmux: failed to create session: {e}");
        return 1;
    }

    // Poll until the daemon answers (up to 5 seconds).
    for _ in 0..50 {
        thread::sleep(Duration::from_millis(100));
        if let Ok(resp) = client::send_request(&cmd.socket_path, &Request::new(Action::Ping)) {
            if resp.ok {
                return 0;
            }
        }
    }
    eprintln!("conmux: session created but daemon not responding");
    1
}

fn execute_send_keys(cmd: &Command) -> i32 {
    if cmd.literal {
        let mut req = Request::new(Action::SendKeys);
        req.text = cmd.keys.join(" ");
        req.literal = true;
        return roundtrip(cmd, &req);
    }

    // Each token is either a named key (sent interpreted) or plain text.
    for key in &cmd.keys {
        let req = if keys::is_named(key) {
            let mut req = Request::new(Action::SendKey);
            req.key = key.clone();
            req
        } else {
            let mut req = Request::new(Action::SendKeys);
            req.text = key.clone();
            req
        };
        let code = roundtrip(cmd, &req);
        if code != 0 {
            return code;
        }
    }
    0
}

fn execute_capture_pane(cmd: &Command) -> i32 {
    let mut req = Request::new(Action::CapturePane);
    req.lines = if cmd.start_line < 0 { -cmd.start_line } else { 50 };
    req.alternate = cmd.alternate;
    req.join = cmd.join_lines;

    let resp = match client::send_request(&cmd.socket_path, &req) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("conmux: {e}");
            return 1;
        }
    };
    if !resp.ok {
        eprintln!("conmux: {}", resp.error.unwrap_or_default());
        return 1;
    }
    if cmd.print {
        let output = resp.output.unwrap_or_default();
        print!("{output}");
        if !output.ends_with('\n') {
            println!();
        }
    }
    0
}

fn execute_has_session(cmd: &Command) -> i32 {
    match client::send_request(&cmd.socket_path, &Request::new(Action::HasSession)) {
        Ok(resp) if resp.exists.unwrap_or(false) => 0,
        _ => 1,
    }
}

fn execute_kill_session(cmd: &Command) -> i32 {
    match client::send_request(&cmd.socket_path, &Request::new(Action::KillSession)) {
        // An unreachable daemon is already dead; killing it succeeds.
        Err(_) => 0,
        Ok(resp) if resp.ok => 0,
        Ok(resp) => {
            eprintln!("conmux: {}", resp.error.unwrap_or_default());
            1
        }
    }
}

fn execute_set_option(cmd: &Command) -> i32 {
    let mut req = Request::new(Action::SetOption);
    req.option = cmd.option.clone();
    req.value = cmd.value.clone();
    roundtrip(cmd, &req)
}

fn execute_pipe_pane(cmd: &Command) -> i32 {
    let mut req = Request::new(Action::PipePane);
    req.shell_cmd = cmd.pipe_cmd.clone();
    roundtrip(cmd, &req)
}

/// Send a request; map transport errors and error responses to stderr +
/// exit code 1.
fn roundtrip(cmd: &Command, req: &Request) -> i32 {
    match client::send_request(&cmd.socket_path, req) {
        Ok(resp) if resp.ok => 0,
        Ok(resp) => {
            eprintln!("conmux: {}", resp.error.unwrap_or_default());
            1
        }
        Err(e) => {
            eprintln!("conmux: {e}");
            1
        }
    }
}

fn print_usage() {
    eprintln!(
        "conmux {} — Windows-native tmux-compatible session manager

Usage:
  conmux [-S socket-path] command [flags]

Commands:
  new-session    Create a new session
  send-keys      Send keys to a session
  capture-pane   Capture pane output
  has-session    Check if a session exists
  kill-session   Kill a session
  set-option     Set a session option
  pipe-pane      Pipe pane output to a file

Flags:
  -S path        Control file path (session identification)
  -V             Show version",
        conmux::VERSION
    );
}
