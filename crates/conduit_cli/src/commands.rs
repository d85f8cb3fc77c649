/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Message(String),
    Command(SlashCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Cancel,
    New,
    Conversation(String),
    Cwd(String),
    Allow,
    Deny,
    Connect,
    Disconnect,
    Quit,
    /// Known command without its required argument.
    MissingArgument(&'static str),
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
commands:
  /help                 show this help
  /cancel               stop the response in progress
  /new                  start a new conversation
  /conversation <id>    switch to an existing conversation
  /cwd <path>           set the working directory for tools
  /allow, /deny         answer the pending permission request
  /connect              connect (or retry after failure)
  /disconnect           close the connection
  /quit                 exit";

pub fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    match parse_slash_command(trimmed) {
        Some(command) => Input::Command(command),
        None => Input::Message(trimmed.to_string()),
    }
}

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (command, argument) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };

    let parsed = match command {
        "/help" => SlashCommand::Help,
        "/cancel" => SlashCommand::Cancel,
        "/new" => SlashCommand::New,
        "/conversation" => required(argument, "/conversation <id>", SlashCommand::Conversation),
        "/cwd" => required(argument, "/cwd <path>", SlashCommand::Cwd),
        "/allow" => SlashCommand::Allow,
        "/deny" => SlashCommand::Deny,
        "/connect" => SlashCommand::Connect,
        "/disconnect" => SlashCommand::Disconnect,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command.to_string()),
    };

    Some(parsed)
}

fn required(
    argument: &str,
    usage: &'static str,
    build: impl FnOnce(String) -> SlashCommand,
) -> SlashCommand {
    if argument.is_empty() {
        SlashCommand::MissingArgument(usage)
    } else {
        build(argument.to_string())
    }
}
