use pbx_core::Extension;

/// A parsed client command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `pickup` — lift the handset
    Pickup,
    /// `hangup` — replace the handset
    Hangup,
    /// `dial <digits>` — None when the argument is not a decimal extension
    Dial(Option<Extension>),
    /// `chat <message>` — message may be empty
    Chat(String),
}

impl Command {
    /// Parse one client line into a command.
    ///
    /// Keywords are case-sensitive. The trailing CRLF (or a bare LF) is
    /// stripped before matching. Returns None for anything unrecognized,
    /// including `dial` without an argument; the server ignores such lines
    /// without a notification.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line == "pickup" {
            return Some(Command::Pickup);
        }
        if line == "hangup" {
            return Some(Command::Hangup);
        }
        if let Some(rest) = line.strip_prefix("dial ") {
            // First whitespace-separated token is the extension; a token
            // that does not parse as decimal digits dials a null target
            let Some(arg) = rest.split_whitespace().next() else {
                return None;
            };
            return Some(Command::Dial(arg.parse::<Extension>().ok()));
        }
        if line == "chat" {
            // Bare chat keyword sends the empty message
            return Some(Command::Chat(String::new()));
        }
        if let Some(rest) = line.strip_prefix("chat ") {
            // Message is the rest of the line after the keyword and any
            // further run of spaces
            return Some(Command::Chat(rest.trim_start_matches(' ').to_string()));
        }
        None
    }
}
