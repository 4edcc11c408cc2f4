//! Line-oriented console surface.
//!
//! Reads commands from stdin and turns them into session inputs. The
//! console keeps the last displayed text so composition commands can
//! report the full surface text the way an editor would.

use anyhow::Result;
use textsync_core::{CompositionSpan, Input, ManualOperation, OperationKind, Selection};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use crate::client::Request;

pub const HELP: &str = "\
Commands:
  set <text>                   replace the whole surface text
  insert [pos] <text>          insert (at end when pos is omitted)
  delete <pos> <len>           delete len characters at pos
  replace <pos> <len> <text>   replace len characters at pos
  compose <start> [end]        open a composition over start..end
  preedit <text>               show provisional composed text
  commit <text>                commit the composition with text
  cancel                       abandon the composition
  show                         print the document
  log                          print the activity log
  help                         print this help
  quit                         exit
Text arguments accept \\n and \\t escapes.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0} (try `help`)")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Not a number: {0}")]
    InvalidNumber(String),
}

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set(String),
    Insert { position: Option<usize>, text: String },
    Delete { position: usize, length: usize },
    Replace { position: usize, length: usize, text: String },
    Compose { start: usize, end: Option<usize> },
    Preedit(String),
    Commit(String),
    Cancel,
    Show,
    Log,
    Help,
    Quit,
}

/// Parse one console line. Blank lines parse to `None`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let (name, rest) = split_word(line.trim_start());
    let command = match name {
        "set" => Command::Set(unescape(rest)),
        "insert" => {
            let (first, after) = split_word(rest.trim_start());
            match first.parse::<usize>() {
                Ok(position) if !after.is_empty() => Command::Insert {
                    position: Some(position),
                    text: unescape(after),
                },
                _ if rest.is_empty() => return Err(CommandError::Usage("insert [pos] <text>")),
                _ => Command::Insert {
                    position: None,
                    text: unescape(rest),
                },
            }
        }
        "delete" => {
            let (position, rest) = number(rest, "delete <pos> <len>")?;
            let (length, _) = number(rest, "delete <pos> <len>")?;
            Command::Delete { position, length }
        }
        "replace" => {
            let (position, rest) = number(rest, "replace <pos> <len> <text>")?;
            let (length, text) = number(rest, "replace <pos> <len> <text>")?;
            Command::Replace {
                position,
                length,
                text: unescape(text),
            }
        }
        "compose" => {
            let (start, rest) = number(rest, "compose <start> [end]")?;
            let end = if rest.trim().is_empty() {
                None
            } else {
                Some(number(rest, "compose <start> [end]")?.0)
            };
            Command::Compose { start, end }
        }
        "preedit" => Command::Preedit(unescape(rest)),
        "commit" => Command::Commit(unescape(rest)),
        "cancel" => Command::Cancel,
        "show" => Command::Show,
        "log" => Command::Log,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Split off the first word. The remainder loses exactly one separator so
/// text arguments keep their own leading whitespace.
fn split_word(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(index) => {
            let sep_len = s[index..].chars().next().map_or(1, char::len_utf8);
            (&s[..index], &s[index + sep_len..])
        }
        None => (s, ""),
    }
}

fn number<'a>(s: &'a str, usage: &'static str) -> Result<(usize, &'a str), CommandError> {
    let (word, rest) = split_word(s.trim_start());
    if word.is_empty() {
        return Err(CommandError::Usage(usage));
    }
    let value = word
        .parse()
        .map_err(|_| CommandError::InvalidNumber(word.to_string()))?;
    Ok((value, rest))
}

/// Decode `\n`, `\t` and `\\`. Other escapes are kept verbatim.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Replace the chars in `span` (clamped to `text`) with `insert`.
fn splice(text: &str, span: CompositionSpan, insert: &str) -> String {
    let len = text.chars().count();
    let start = span.start.min(len);
    let end = span.end.min(len);
    let mut out: String = text.chars().take(start).collect();
    out.push_str(insert);
    out.extend(text.chars().skip(end));
    out
}

/// What the console loop should do after a line.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Input(Input),
    Show,
    Log,
    Help,
    Quit,
}

/// Console state between lines.
#[derive(Debug, Default)]
pub struct Console {
    /// Text most recently displayed by the session
    shown: String,
    /// Open composition, as the surface sees it
    span: Option<CompositionSpan>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_display(&mut self, text: String) {
        self.shown = text;
    }

    pub fn shown(&self) -> &str {
        &self.shown
    }

    /// Translate a parsed command into what the loop should do.
    pub fn execute(&mut self, command: Command) -> Outcome {
        let manual = |kind, position, length, content| {
            Outcome::Input(Input::Manual(ManualOperation {
                kind,
                position,
                length,
                content,
            }))
        };

        match command {
            Command::Set(text) => {
                if self.span.is_none() {
                    self.shown = text.clone();
                }
                Outcome::Input(Input::LocalEdit(text))
            }
            Command::Insert { position, text } => {
                manual(OperationKind::Insert, position, 0, text)
            }
            Command::Delete { position, length } => {
                manual(OperationKind::Delete, Some(position), length, String::new())
            }
            Command::Replace {
                position,
                length,
                text,
            } => manual(OperationKind::Replace, Some(position), length, text),
            Command::Compose { start, end } => {
                let selection = Selection::new(start, end.unwrap_or(start));
                self.span = Some(selection.into());
                Outcome::Input(Input::CompositionStart(selection))
            }
            Command::Preedit(text) => {
                let surface = self.surface_with(&text);
                Outcome::Input(Input::CompositionUpdate(surface))
            }
            Command::Commit(text) => {
                let surface = self.surface_with(&text);
                self.span = None;
                self.shown = surface.clone();
                Outcome::Input(Input::CompositionEnd {
                    committed: text,
                    surface,
                })
            }
            Command::Cancel => {
                self.span = None;
                Outcome::Input(Input::CompositionCancel)
            }
            Command::Show => Outcome::Show,
            Command::Log => Outcome::Log,
            Command::Help => Outcome::Help,
            Command::Quit => Outcome::Quit,
        }
    }

    /// The surface text with `text` over the open span, or appended when
    /// no composition was started.
    fn surface_with(&self, text: &str) -> String {
        let len = self.shown.chars().count();
        let span = self.span.unwrap_or(CompositionSpan { start: len, end: len });
        splice(&self.shown, span, text)
    }
}

/// Run the console until `quit`, end of input, or the driver going away.
pub async fn run(
    requests: mpsc::UnboundedSender<Request>,
    mut surface_rx: mpsc::UnboundedReceiver<String>,
) -> Result<()> {
    let mut console = Console::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", HELP);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let command = match parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };

                match console.execute(command) {
                    Outcome::Input(input) => {
                        if requests.send(Request::Apply(input)).is_err() {
                            break;
                        }
                    }
                    Outcome::Show => {
                        let (tx, rx) = oneshot::channel();
                        if requests.send(Request::Snapshot(tx)).is_err() {
                            break;
                        }
                        if let Ok(snapshot) = rx.await {
                            println!("{}", snapshot.buffer);
                            println!(
                                "-- {} chars, composing: {}, unconfirmed: {}",
                                snapshot.buffer.chars().count(),
                                snapshot.composing,
                                snapshot.pending
                            );
                        }
                    }
                    Outcome::Log => {
                        let (tx, rx) = oneshot::channel();
                        if requests.send(Request::Snapshot(tx)).is_err() {
                            break;
                        }
                        if let Ok(snapshot) = rx.await {
                            for record in &snapshot.log {
                                println!("{}", record);
                            }
                        }
                    }
                    Outcome::Help => println!("{}", HELP),
                    Outcome::Quit => break,
                }
            }

            Some(text) = surface_rx.recv() => {
                println!("{}", text);
                console.on_display(text);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(line: &str) -> Command {
        parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_blank_line_is_ignored() {
        assert_eq!(parse("   \n"), Ok(None));
    }

    #[test]
    fn test_insert_with_and_without_position() {
        assert_eq!(
            parsed("insert 3 hi there"),
            Command::Insert {
                position: Some(3),
                text: "hi there".into()
            }
        );
        assert_eq!(
            parsed("insert hi"),
            Command::Insert {
                position: None,
                text: "hi".into()
            }
        );
        // A lone number is text, not a position
        assert_eq!(
            parsed("insert 42"),
            Command::Insert {
                position: None,
                text: "42".into()
            }
        );
    }

    #[test]
    fn test_text_keeps_leading_spaces_and_escapes() {
        assert_eq!(
            parsed("replace 0 2  a\\nb\\tc"),
            Command::Replace {
                position: 0,
                length: 2,
                text: " a\nb\tc".into()
            }
        );
    }

    #[test]
    fn test_usage_and_number_errors() {
        assert_eq!(parse("delete 1"), Err(CommandError::Usage("delete <pos> <len>")));
        assert_eq!(
            parse("delete x 1"),
            Err(CommandError::InvalidNumber("x".into()))
        );
        assert_eq!(parse("frobnicate"), Err(CommandError::Unknown("frobnicate".into())));
    }

    #[test]
    fn test_compose_end_is_optional() {
        assert_eq!(parsed("compose 4"), Command::Compose { start: 4, end: None });
        assert_eq!(
            parsed("compose 4 1"),
            Command::Compose {
                start: 4,
                end: Some(1)
            }
        );
    }

    #[test]
    fn test_unescape_keeps_unknown_escapes() {
        assert_eq!(unescape(r"a\qb\\c\"), "a\\qb\\c\\");
    }

    #[test]
    fn test_commit_reports_full_surface() {
        let mut console = Console::new();
        console.on_display("abcdef".into());

        // Backwards selection over "bc"
        console.execute(Command::Compose {
            start: 3,
            end: Some(1),
        });
        assert_eq!(
            console.execute(Command::Preedit("xy".into())),
            Outcome::Input(Input::CompositionUpdate("axydef".into()))
        );
        assert_eq!(
            console.execute(Command::Commit("日本".into())),
            Outcome::Input(Input::CompositionEnd {
                committed: "日本".into(),
                surface: "a日本def".into()
            })
        );
        assert_eq!(console.shown(), "a日本def");
    }

    #[test]
    fn test_commit_without_compose_appends() {
        let mut console = Console::new();
        console.on_display("ab".into());
        assert_eq!(
            console.execute(Command::Commit("c".into())),
            Outcome::Input(Input::CompositionEnd {
                committed: "c".into(),
                surface: "abc".into()
            })
        );
    }

    #[test]
    fn test_manual_commands_map_to_manual_operations() {
        let mut console = Console::new();
        assert_eq!(
            console.execute(Command::Delete {
                position: 1,
                length: 2
            }),
            Outcome::Input(Input::Manual(ManualOperation {
                kind: OperationKind::Delete,
                position: Some(1),
                length: 2,
                content: String::new(),
            }))
        );
    }
}
