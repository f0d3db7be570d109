//! tmux-style argument parsing: global flags before the subcommand,
//! subcommand flags after it. Parsed by hand; tmux grammars (`-S -50`,
//! `--` separators, trailing command words) don't fit declarative option
//! parsers.

use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    NewSession,
    SendKeys,
    CapturePane,
    HasSession,
    KillSession,
    SetOption,
    PipePane,
}

/// One parsed invocation. Fields are populated per `kind`; the rest keep
/// their defaults.
#[derive(Debug)]
pub struct Command {
    pub kind: CommandKind,
    pub socket_path: PathBuf,
    pub daemon_mode: bool,

    // new-session
    pub detached: bool,
    pub session_name: String,
    pub start_dir: String,
    pub shell_cmd: String,

    // send-keys
    pub target: String,
    pub keys: Vec<String>,
    pub literal: bool,

    // capture-pane
    pub print: bool,
    pub join_lines: bool,
    pub alternate: bool,
    pub start_line: i64,

    // set-option
    pub option: String,
    pub value: String,

    // pipe-pane
    pub pipe_cmd: String,
}

impl Command {
    fn new(kind: CommandKind) -> Self {
        Command {
            kind,
            socket_path: PathBuf::new(),
            daemon_mode: false,
            detached: false,
            session_name: String::new(),
            start_dir: String::new(),
            shell_cmd: String::new(),
            target: String::new(),
            keys: Vec::new(),
            literal: false,
            print: false,
            join_lines: false,
            alternate: false,
            start_line: 0,
            option: String::new(),
            value: String::new(),
            pipe_cmd: String::new(),
        }
    }
}

fn err(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.into())
}

/// Parse an argument list (without the program name).
pub fn parse(args: &[String]) -> io::Result<Command> {
    if args.is_empty() {
        return Err(err("no command specified"));
    }

    let mut socket_path: Option<PathBuf> = None;
    let mut daemon_mode = false;
    let mut i = 0;

    // Global flags precede the subcommand.
    while i < args.len() {
        match args[i].as_str() {
            "-S" => {
                i += 1;
                let path = args.get(i).ok_or_else(|| err("-S requires an argument"))?;
                socket_path = Some(PathBuf::from(path));
                i += 1;
            }
            "--daemon" => {
                daemon_mode = true;
                i += 1;
            }
            // tmux -u enables UTF-8; always on here.
            "-u" => i += 1,
            _ => break,
        }
    }

    let mut cmd = if i >= args.len() {
        // The spawner re-executes with --daemon and the new-session args;
        // a bare --daemon still means "run a session daemon".
        if daemon_mode {
            Command::new(CommandKind::NewSession)
        } else {
            return Err(err("no command specified"));
        }
    } else {
        let sub = args[i].as_str();
        let rest = &args[i + 1..];
        match sub {
            "new-session" => parse_new_session(rest)?,
            "send-keys" => parse_send_keys(rest)?,
            "capture-pane" => parse_capture_pane(rest)?,
            "has-session" => parse_target_only(CommandKind::HasSession, sub, rest)?,
            "kill-session" => parse_target_only(CommandKind::KillSession, sub, rest)?,
            "set-option" => parse_set_option(rest)?,
            "pipe-pane" => parse_pipe_pane(rest)?,
            "attach" | "attach-session" => return Err(err("attach is not supported")),
            other => return Err(err(format!("unknown command: {other}"))),
        }
    };

    cmd.daemon_mode = daemon_mode;
    cmd.socket_path = match socket_path {
        Some(p) => p,
        None => default_socket_path(&cmd),
    };
    Ok(cmd)
}

/// Without `-S`, sessions are addressed by name: the control file lives at
/// `~/.conmux/<name>.session`, the name coming from `-t`, then `-s`, then
/// "default".
fn default_socket_path(cmd: &Command) -> PathBuf {
    let name = if !cmd.target.is_empty() {
        cmd.target.as_str()
    } else if !cmd.session_name.is_empty() {
        cmd.session_name.as_str()
    } else {
        "default"
    };
    let safe: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .take(64)
        .collect();
    let home = std::env::var("USERPROFILE")
        .or_else(|_| std::env::var("HOME"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".conmux").join(format!("{safe}.session"))
}

fn parse_new_session(args: &[String]) -> io::Result<Command> {
    let mut cmd = Command::new(CommandKind::NewSession);
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-d" => {
                cmd.detached = true;
                i += 1;
            }
            "-s" => {
                i += 1;
                cmd.session_name =
                    args.get(i).ok_or_else(|| err("-s requires a session name"))?.clone();
                i += 1;
            }
            // Window name: accepted for tmux compatibility, single-window model.
            "-n" => {
                i += 1;
                args.get(i).ok_or_else(|| err("-n requires a window name"))?;
                i += 1;
            }
            "-c" => {
                i += 1;
                cmd.start_dir = args.get(i).ok_or_else(|| err("-c requires a directory"))?.clone();
                i += 1;
            }
            _ => {
                cmd.shell_cmd = args[i..].join(" ");
                break;
            }
        }
    }
    Ok(cmd)
}

fn parse_send_keys(args: &[String]) -> io::Result<Command> {
    let mut cmd = Command::new(CommandKind::SendKeys);
    let mut i = 0;
    let mut past_options = false;
    while i < args.len() {
        if past_options {
            cmd.keys.push(args[i].clone());
            i += 1;
            continue;
        }
        match args[i].as_str() {
            "-t" => {
                i += 1;
                cmd.target = args.get(i).ok_or_else(|| err("-t requires a target"))?.clone();
                i += 1;
            }
            "-l" => {
                cmd.literal = true;
                i += 1;
            }
            "--" => {
                past_options = true;
                i += 1;
            }
            _ => {
                cmd.keys.push(args[i].clone());
                i += 1;
            }
        }
    }
    Ok(cmd)
}

fn parse_capture_pane(args: &[String]) -> io::Result<Command> {
    let mut cmd = Command::new(CommandKind::CapturePane);
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-p" => {
                cmd.print = true;
                i += 1;
            }
            "-J" => {
                cmd.join_lines = true;
                i += 1;
            }
            "-a" => {
                cmd.alternate = true;
                i += 1;
            }
            "-t" => {
                i += 1;
                cmd.target = args.get(i).ok_or_else(|| err("-t requires a target"))?.clone();
                i += 1;
            }
            "-S" => {
                i += 1;
                let raw = args.get(i).ok_or_else(|| err("capture-pane -S requires a line number"))?;
                cmd.start_line = raw
                    .parse()
                    .map_err(|e| err(format!("invalid start line {raw:?}: {e}")))?;
                i += 1;
            }
            other => return Err(err(format!("unknown capture-pane flag: {other}"))),
        }
    }
    Ok(cmd)
}

fn parse_target_only(kind: CommandKind, sub: &str, args: &[String]) -> io::Result<Command> {
    let mut cmd = Command::new(kind);
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-t" => {
                i += 1;
                cmd.target = args.get(i).ok_or_else(|| err("-t requires a target"))?.clone();
                i += 1;
            }
            other => return Err(err(format!("unknown {sub} flag: {other}"))),
        }
    }
    Ok(cmd)
}

fn parse_set_option(args: &[String]) -> io::Result<Command> {
    let mut cmd = Command::new(CommandKind::SetOption);
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-t" => {
                i += 1;
                cmd.target = args.get(i).ok_or_else(|| err("-t requires a target"))?.clone();
                i += 1;
            }
            _ => {
                cmd.option = args[i].clone();
                if let Some(v) = args.get(i + 1) {
                    cmd.value = v.clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
        }
    }
    Ok(cmd)
}

fn parse_pipe_pane(args: &[String]) -> io::Result<Command> {
    let mut cmd = Command::new(CommandKind::PipePane);
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-t" => {
                i += 1;
                cmd.target = args.get(i).ok_or_else(|| err("-t requires a target"))?.clone();
                i += 1;
            }
            _ => {
                cmd.pipe_cmd = args[i..].join(" ");
                break;
            }
        }
    }
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(args: &[&str]) -> Command {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        parse(&owned).unwrap()
    }

    fn parse_err(args: &[&str]) -> String {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        parse(&owned).unwrap_err().to_string()
    }

    #[test]
    fn new_session_full() {
        let cmd = parse_ok(&[
            "-S", "/tmp/x.session", "new-session", "-d", "-s", "work", "-c", "/srv", "vim",
            "notes.txt",
        ]);
        assert_eq!(cmd.kind, CommandKind::NewSession);
        assert_eq!(cmd.socket_path, PathBuf::from("/tmp/x.session"));
        assert!(cmd.detached);
        assert_eq!(cmd.session_name, "work");
        assert_eq!(cmd.start_dir, "/srv");
        assert_eq!(cmd.shell_cmd, "vim notes.txt");
    }

    #[test]
    fn daemon_mode_without_subcommand() {
        let cmd = parse_ok(&["--daemon", "-S", "/tmp/x"]);
        assert!(cmd.daemon_mode);
        assert_eq!(cmd.kind, CommandKind::NewSession);
    }

    #[test]
    fn send_keys_named_and_literal() {
        let cmd = parse_ok(&["send-keys", "-t", "work", "echo hi", "Enter"]);
        assert_eq!(cmd.kind, CommandKind::SendKeys);
        assert_eq!(cmd.target, "work");
        assert_eq!(cmd.keys, vec!["echo hi", "Enter"]);
        assert!(!cmd.literal);

        let cmd = parse_ok(&["send-keys", "-l", "--", "-t", "literal dash"]);
        assert!(cmd.literal);
        assert_eq!(cmd.keys, vec!["-t", "literal dash"]);
    }

    #[test]
    fn capture_pane_flags() {
        let cmd = parse_ok(&["capture-pane", "-p", "-J", "-a", "-S", "-100"]);
        assert_eq!(cmd.kind, CommandKind::CapturePane);
        assert!(cmd.print);
        assert!(cmd.join_lines);
        assert!(cmd.alternate);
        assert_eq!(cmd.start_line, -100);
    }

    #[test]
    fn capture_pane_bad_start_line() {
        assert!(parse_err(&["capture-pane", "-S", "many"]).contains("invalid start line"));
    }

    #[test]
    fn set_option_pair() {
        let cmd = parse_ok(&["set-option", "-t", "work", "history-limit", "5000"]);
        assert_eq!(cmd.kind, CommandKind::SetOption);
        assert_eq!(cmd.option, "history-limit");
        assert_eq!(cmd.value, "5000");
    }

    #[test]
    fn pipe_pane_command_joined() {
        let cmd = parse_ok(&["pipe-pane", "cat", ">>", "/tmp/out.log"]);
        assert_eq!(cmd.kind, CommandKind::PipePane);
        assert_eq!(cmd.pipe_cmd, "cat >> /tmp/out.log");

        let cmd = parse_ok(&["pipe-pane"]);
        assert_eq!(cmd.pipe_cmd, "");
    }

    #[test]
    fn default_socket_path_from_target() {
        let cmd = parse_ok(&["has-session", "-t", "agent-7"]);
        let s = cmd.socket_path.to_string_lossy().into_owned();
        assert!(s.ends_with("agent-7.session"), "{s}");
        assert!(s.contains(".conmux"), "{s}");
    }

    #[test]
    fn default_socket_path_falls_back() {
        let cmd = parse_ok(&["kill-session"]);
        assert!(cmd.socket_path.to_string_lossy().ends_with("default.session"));
    }

    #[test]
    fn utf8_flag_is_silently_accepted() {
        let cmd = parse_ok(&["-u", "has-session", "-t", "x"]);
        assert_eq!(cmd.kind, CommandKind::HasSession);
    }

    #[test]
    fn window_name_accepted_and_ignored() {
        let cmd = parse_ok(&["new-session", "-n", "main", "-s", "dev"]);
        assert_eq!(cmd.session_name, "dev");
    }

    #[test]
    fn errors() {
        assert!(parse_err(&[]).contains("no command"));
        assert!(parse_err(&["-S"]).contains("-S requires"));
        assert!(parse_err(&["frobnicate"]).contains("unknown command"));
        assert!(parse_err(&["has-session", "-x"]).contains("unknown has-session flag"));
        assert!(parse_err(&["attach"]).contains("not supported"));
        assert!(parse_err(&["send-keys", "-t"]).contains("-t requires"));
    }
}
