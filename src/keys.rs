//! tmux key names and the VT byte sequences terminal applications expect.
//! The daemon translates `send_key` requests through this table; the
//! client uses it to decide whether a send-keys token is a named key or
//! literal text.

pub fn sequence(name: &str) -> Option<&'static str> {
    Some(match name {
        "Enter" => "\r",
        "Escape" => "\x1b",
        "BSpace" => "\x7f",
        "Tab" => "\t",
        "Space" => " ",
        "C-c" => "\x03",
        "C-d" => "\x04",
        "C-z" => "\x1a",
        "Up" => "\x1b[A",
        "Down" => "\x1b[B",
        "Right" => "\x1b[C",
        "Left" => "\x1b[D",
        "Home" => "\x1b[H",
        "End" => "\x1b[F",
        "DC" => "\x1b[3~",
        "PageUp" => "\x1b[5~",
        "PageDown" => "\x1b[6~",
        _ => return None,
    })
}

pub fn is_named(name: &str) -> bool {
    sequence(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys() {
        assert_eq!(sequence("Enter"), Some("\r"));
        assert_eq!(sequence("Escape"), Some("\x1b"));
        assert_eq!(sequence("C-c"), Some("\x03"));
        assert_eq!(sequence("Up"), Some("\x1b[A"));
        assert_eq!(sequence("PageDown"), Some("\x1b[6~"));
    }

    #[test]
    fn unknown_keys() {
        assert_eq!(sequence("enter"), None); // case sensitive, like tmux
        assert_eq!(sequence("F1"), None);
        assert!(!is_named("ls"));
        assert!(is_named("Tab"));
    }
}
