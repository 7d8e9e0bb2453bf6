//! Line protocol definitions
//!
//! Every frame is one newline-terminated UTF-8 line. Inbound lines are either
//! the `EXIT` control token or chat text; outbound lines are rendered from
//! [`ServerLine`].

use std::fmt;

/// Control token that ends a session (matched case-insensitively)
pub const EXIT_TOKEN: &str = "EXIT";

/// Terminal acknowledgement sent after `EXIT`
pub const DONE_LINE: &str = "DONE";

/// Sender name used for server-authored notices
pub const SERVER_NAME: &str = "SERVER";

/// Client → Server frame, after the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Leave the chat
    Exit,
    /// Relay this text to everyone else
    Chat(String),
}

impl ClientFrame {
    /// Classify one decoded line
    pub fn parse(line: String) -> Self {
        if line.eq_ignore_ascii_case(EXIT_TOKEN) {
            ClientFrame::Exit
        } else {
            ClientFrame::Chat(line)
        }
    }
}

/// Server → Client line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    /// A user's chat line: `"{from}: {text}"`
    Chat { from: String, text: String },
    /// A server notice: `"SERVER: {text}"`
    Notice(String),
    /// Acknowledgement of `EXIT`
    Done,
}

impl ServerLine {
    /// Notice announcing that `name` joined
    pub fn joined(name: &str) -> Self {
        ServerLine::Notice(format!("{} joined", name))
    }

    /// Notice announcing that `name` left
    pub fn left(name: &str) -> Self {
        ServerLine::Notice(format!("{} left", name))
    }
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerLine::Chat { from, text } => write!(f, "{}: {}", from, text),
            ServerLine::Notice(text) => write!(f, "{}: {}", SERVER_NAME, text),
            ServerLine::Done => f.write_str(DONE_LINE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_is_case_insensitive() {
        assert_eq!(ClientFrame::parse("EXIT".into()), ClientFrame::Exit);
        assert_eq!(ClientFrame::parse("exit".into()), ClientFrame::Exit);
        assert_eq!(ClientFrame::parse("ExIt".into()), ClientFrame::Exit);
    }

    #[test]
    fn test_exit_must_match_whole_line() {
        assert_eq!(
            ClientFrame::parse("exit now".into()),
            ClientFrame::Chat("exit now".into())
        );
        assert_eq!(
            ClientFrame::parse(" EXIT".into()),
            ClientFrame::Chat(" EXIT".into())
        );
    }

    #[test]
    fn test_server_line_rendering() {
        let chat = ServerLine::Chat {
            from: "alice".into(),
            text: "hi".into(),
        };
        assert_eq!(chat.to_string(), "alice: hi");
        assert_eq!(ServerLine::joined("bob").to_string(), "SERVER: bob joined");
        assert_eq!(ServerLine::left("alice").to_string(), "SERVER: alice left");
        assert_eq!(ServerLine::Done.to_string(), "DONE");
    }
}
