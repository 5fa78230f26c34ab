/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Message(String),
    New,
    List,
    History,
    /// 1-based conversation number as shown by `/list`
    Select(usize),
    Delete(usize),
    Clear,
    Think(bool),
    Attach(String),
    Detach,
    /// 1-based turn numbers as shown by `/history`
    Regenerate(usize),
    Remove(usize),
    Edit(usize, String),
    Cancel,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  /new                 start a new conversation
  /list                list conversations
  /select <n>          switch to conversation n
  /delete <n>          delete conversation n
  /history             show the active conversation
  /clear               clear the active conversation
  /think on|off        toggle thinking mode
  /attach <path|url>   attach an image or video to the next message
  /detach              drop pending attachments
  /regen <n>           regenerate from turn n
  /rm <n>              delete turn n
  /edit <n> <text>     replace the text of turn n
  /cancel              stop the current response (or press Ctrl-C)
  /quit                exit
Anything else is sent as a message.";

fn number(arg: &str, usage: &str) -> Result<usize, String> {
    match arg.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("usage: {usage}")),
    }
}

/// Parse an input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Option<Result<Command, String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Ok(Command::Message(line.to_string())));
    };

    let (name, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let arg = arg.trim();
    let command = match name {
        "new" => Ok(Command::New),
        "list" | "ls" => Ok(Command::List),
        "history" => Ok(Command::History),
        "select" => number(arg, "/select <n>").map(Command::Select),
        "delete" => number(arg, "/delete <n>").map(Command::Delete),
        "clear" => Ok(Command::Clear),
        "think" => match arg {
            "on" => Ok(Command::Think(true)),
            "off" => Ok(Command::Think(false)),
            _ => Err("usage: /think on|off".to_string()),
        },
        "attach" if !arg.is_empty() => Ok(Command::Attach(arg.to_string())),
        "attach" => Err("usage: /attach <path|url>".to_string()),
        "detach" => Ok(Command::Detach),
        "regen" => number(arg, "/regen <n>").map(Command::Regenerate),
        "rm" => number(arg, "/rm <n>").map(Command::Remove),
        "edit" => {
            let (index, text) = arg.split_once(char::is_whitespace).unwrap_or((arg, ""));
            match (number(index, "/edit <n> <text>"), text.trim()) {
                (Ok(n), text) if !text.is_empty() => Ok(Command::Edit(n, text.to_string())),
                _ => Err("usage: /edit <n> <text>".to_string()),
            }
        }
        "cancel" => Ok(Command::Cancel),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(format!("unknown command /{other}, try /help")),
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(
            parse("  what is in this picture? "),
            Some(Ok(Command::Message("what is in this picture?".to_string())))
        );
        assert_eq!(parse("   "), None);
    }

    #[test]
    fn test_commands_with_arguments() {
        assert_eq!(parse("/select 2"), Some(Ok(Command::Select(2))));
        assert_eq!(parse("/think off"), Some(Ok(Command::Think(false))));
        assert_eq!(
            parse("/attach ./cat photo.png"),
            Some(Ok(Command::Attach("./cat photo.png".to_string())))
        );
        assert_eq!(
            parse("/edit 3 a better question"),
            Some(Ok(Command::Edit(3, "a better question".to_string())))
        );
        assert_eq!(parse("/q"), Some(Ok(Command::Quit)));
    }

    #[test]
    fn test_invalid_commands() {
        assert!(matches!(parse("/select 0"), Some(Err(_))));
        assert!(matches!(parse("/select two"), Some(Err(_))));
        assert!(matches!(parse("/edit 1"), Some(Err(_))));
        assert!(matches!(parse("/think maybe"), Some(Err(_))));
        assert!(matches!(parse("/attach"), Some(Err(_))));
        assert!(matches!(parse("/bogus"), Some(Err(e)) if e.contains("/bogus")));
    }
}
