use std::io::{BufRead, Write};

use crate::error::{Error, Result};

/// Yes/no confirmation from the operator.
pub trait Confirm: Send + Sync {
	fn confirm(&self, question: &str) -> Result<bool>;
}

/// Asks on stdout and reads answers from stdin.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
	fn confirm(&self, question: &str) -> Result<bool> {
		let stdin = std::io::stdin();
		let stdout = std::io::stdout();
		ask(question, &mut stdin.lock(), &mut stdout.lock())
	}
}

/// Always gives the same answer. Useful for scripted runs and tests.
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
	fn confirm(&self, _question: &str) -> Result<bool> {
		Ok(self.0)
	}
}

/// Ask `question` until the answer is one of y/yes/n/no.
pub fn ask<R: BufRead, W: Write>(question: &str, input: &mut R, output: &mut W) -> Result<bool> {
	let io_err = |e: std::io::Error| Error::InvalidInput(format!("prompt failed: {e}"));

	loop {
		write!(output, "{question} [y/n]: ").map_err(io_err)?;
		output.flush().map_err(io_err)?;

		let mut line = String::new();
		if input.read_line(&mut line).map_err(io_err)? == 0 {
			return Err(Error::InvalidInput("no answer: input closed".into()));
		}

		match line.trim().to_lowercase().as_str() {
			"y" | "yes" => return Ok(true),
			"n" | "no" => return Ok(false),
			_ => writeln!(output, "Invalid input. Please enter either \"y\" or \"n\".")
				.map_err(io_err)?,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn accepts_short_and_long_forms() {
		for (answer, expected) in [("y\n", true), ("YES\n", true), ("n\n", false), ("No\n", false)] {
			let mut out = Vec::new();
			let got = ask("Sign?", &mut Cursor::new(answer), &mut out).unwrap();
			assert_eq!(got, expected, "answer {answer:?}");
		}
	}

	#[test]
	fn loops_on_unrecognized_input() {
		let mut out = Vec::new();
		let got = ask("Sign?", &mut Cursor::new("maybe\n\nyes\n"), &mut out).unwrap();
		assert!(got);

		let printed = String::from_utf8(out).unwrap();
		assert_eq!(printed.matches("Sign? [y/n]: ").count(), 3);
		assert_eq!(printed.matches("Invalid input").count(), 2);
	}

	#[test]
	fn closed_input_is_an_error() {
		let mut out = Vec::new();
		assert!(ask("Sign?", &mut Cursor::new("what\n"), &mut out).is_err());
	}
}
