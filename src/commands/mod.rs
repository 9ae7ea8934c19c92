//! Interactive commands of the inspector.
//!
//! A [`Session`] executes one command line at a time. A failing command never
//! ends the session: [`run_shell`] reports it as a single line and reads the
//! next one.

use crate::prelude::*;
use crate::printers::{Printers, VectorView, vector};
use crate::target::Target;
use console::style;
use std::io::{BufRead, Write};

pub const SVECTOR_DUMP: &str = "svector-dump";
pub const PRINT: &str = "print";

const HELP: &str = "\
print <expression>                     Display the value of an expression
svector-dump <expression> <type>       Dump the elements of an SVector, each a <type> *
help                                   Show this message
quit                                   Leave the shell";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Quit,
}

pub struct Session {
    target: Target,
    printers: Printers,
}

impl Session {
    pub fn new(target: Target, printers: Printers) -> Self {
        Self { target, printers }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Run one command line, writing its output to `out`.
    pub fn execute<W: Write>(&self, line: &str, out: &mut W) -> Result<Outcome> {
        let line = line.trim();
        let (command, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

        match command {
            "" => {}
            PRINT | "p" => self.print(args.trim(), out)?,
            SVECTOR_DUMP => self.svector_dump(args, out)?,
            "help" => writeln!(out, "{HELP}")?,
            "quit" | "exit" => return Ok(Outcome::Quit),
            other => bail!("Undefined command: \"{other}\". Try \"help\"."),
        }

        Ok(Outcome::Continue)
    }

    fn print<W: Write>(&self, expression: &str, out: &mut W) -> Result<()> {
        if expression.is_empty() {
            bail!(InspectError::InvalidArgument {
                position: 1,
                which: "expression",
                reason: "missing expression".to_string(),
            });
        }
        let value = self.target.evaluate(expression)?;
        let rendered = self.printers.display(&self.target, &value)?;
        writeln!(out, "{rendered}")?;
        Ok(())
    }

    fn svector_dump<W: Write>(&self, args: &str, out: &mut W) -> Result<()> {
        let (expression, element_type) = parse_dump_arguments(args)?;

        let vector = self
            .target
            .evaluate(&expression)
            .and_then(|value| VectorView::new(&self.target, value))
            .map_err(|error| InspectError::InvalidArgument {
                position: 1,
                which: "vector expression",
                reason: error.to_string(),
            })?;

        let mut written = Ok(());
        let dumped = vector::dump_elements(&self.printers, &vector, &element_type, |index, rendered| {
            if written.is_ok() {
                written = writeln!(out, "{index}: {rendered}");
            }
        });
        written?;
        dumped?;

        Ok(())
    }
}

/// Split `<vector_expression> <element_type_name>` with shell quoting rules.
fn parse_dump_arguments(args: &str) -> InspectResult<(String, String)> {
    let tokens = shell_words::split(args).map_err(|error| InspectError::InvalidArgument {
        position: 0,
        which: "arguments",
        reason: error.to_string(),
    })?;

    match <[String; 2]>::try_from(tokens) {
        Ok([expression, element_type]) => Ok((expression, element_type)),
        Err(tokens) => Err(match tokens.len() {
            0 => InspectError::InvalidArgument {
                position: 1,
                which: "vector expression",
                reason: "missing vector expression".to_string(),
            },
            1 => InspectError::InvalidArgument {
                position: 2,
                which: "element type",
                reason: "missing element type".to_string(),
            },
            _ => InspectError::InvalidArgument {
                position: 3,
                which: "extra",
                reason: format!("unexpected argument '{}'", tokens[2]),
            },
        }),
    }
}

/// Read command lines from `input` until EOF or `quit`.
pub fn run_shell<R: BufRead, W: Write>(session: &Session, input: R, out: &mut W, interactive: bool) -> Result<()> {
    let mut lines = input.lines();
    loop {
        if interactive {
            write!(out, "{}", style("(selva) ").bold())?;
            out.flush()?;
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("Failed to read command")?;

        match session.execute(&line, out) {
            Ok(Outcome::Quit) => break,
            Ok(Outcome::Continue) => {}
            Err(error) => {
                let message = format!("Error: {error}");
                if interactive {
                    writeln!(out, "{}", style(message).red())?;
                } else {
                    writeln!(out, "{message}")?;
                }
            }
        }
    }
    Ok(())
}
