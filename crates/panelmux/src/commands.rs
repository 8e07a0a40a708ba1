//! Line-oriented control protocol read from stdin.
//!
//! Lines starting with `:` are control commands. Everything else is typed
//! into the active terminal. A leading `::` escapes a literal colon.

use anyhow::{anyhow, bail, Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Spawn another terminal in the session and switch to it.
    New,
    List,
    /// Switch to the terminal whose id starts with, or whose title equals, the argument.
    Use(String),
    /// Close the named terminal, or the active one.
    Close(Option<String>),
    Resize { cols: u16, rows: u16 },
    Help,
    Quit,
    /// Send the line to the active terminal as a command.
    Send(String),
}

pub const HELP: &str = "\
:new                 spawn a terminal and switch to it
:list                list terminals (* active, + default)
:use <id|title>      switch to a terminal
:close [id|title]    close a terminal (the active one by default)
:resize <cols> <rows>
:quit                close everything and exit
::text               send a line starting with ':'";

pub fn parse(line: &str) -> Result<Command> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(Command::Send(line.to_string()));
    };
    if rest.starts_with(':') {
        return Ok(Command::Send(rest.to_string()));
    }

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let command = match name {
        "new" => Command::New,
        "list" | "ls" => Command::List,
        "use" => Command::Use(
            words
                .next()
                .map(str::to_string)
                .ok_or_else(|| anyhow!(":use needs a terminal id or title"))?,
        ),
        "close" => Command::Close(words.next().map(str::to_string)),
        "resize" => {
            let cols = dimension(words.next(), "cols")?;
            let rows = dimension(words.next(), "rows")?;
            Command::Resize { cols, rows }
        }
        "help" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        "" => bail!("empty command, try :help"),
        other => bail!("unknown command :{other}, try :help"),
    };

    if let Some(extra) = words.next() {
        bail!("unexpected argument {extra:?} to :{name}");
    }
    Ok(command)
}

fn dimension(word: Option<&str>, what: &str) -> Result<u16> {
    let word = word.ok_or_else(|| anyhow!(":resize needs <cols> <rows>"))?;
    let value: u16 = word
        .parse()
        .with_context(|| format!("invalid {what} {word:?}"))?;
    if value == 0 {
        bail!("{what} must be positive");
    }
    Ok(value)
}
