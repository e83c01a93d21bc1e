//! Terminal prompts for the interactive shell.
//!
//! All prompts are written to stderr so stdout stays clean for results.

use anyhow::{Context, Result};
use console::{style, Term};

/// Whether a human is at the terminal to answer prompts.
pub fn attended() -> bool {
    console::user_attended() && console::user_attended_stderr()
}

/// Prompt for a line of text, trimmed.
pub fn prompt_string(prompt: &str) -> Result<String> {
    let term = Term::stderr();
    term.write_str(&format!("{} ", style(format!("{prompt}:")).bold()))
        .context("Failed to write prompt")?;
    let input = term.read_line().context("Failed to read user input")?;
    Ok(input.trim().to_string())
}

/// Prompt for a secret without echoing it.
pub fn prompt_secret(prompt: &str) -> Result<String> {
    let term = Term::stderr();
    term.write_str(&format!("{} ", style(format!("{prompt}:")).bold()))
        .context("Failed to write prompt")?;
    let input = term
        .read_secure_line()
        .context("Failed to read user input")?;
    Ok(input.trim().to_string())
}

/// Yes/no question. Empty input takes `default`.
pub fn prompt_confirmation(prompt: &str, default: bool) -> Result<bool> {
    let hint = if default { "Y/n" } else { "y/N" };
    loop {
        let input = prompt_string(&format!("{prompt} ({hint})"))?;
        match parse_confirmation(&input, default) {
            Some(answer) => return Ok(answer),
            None => eprintln!("Please enter 'y' for yes or 'n' for no."),
        }
    }
}

fn parse_confirmation(input: &str, default: bool) -> Option<bool> {
    match input.to_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Show a numbered list and return the chosen index.
///
/// Empty input picks the first entry; `q` returns `None`.
pub fn pick(title: &str, options: &[String]) -> Result<Option<usize>> {
    if options.is_empty() {
        return Ok(None);
    }

    eprintln!("{}", style(title).bold().underlined());
    for (i, option) in options.iter().enumerate() {
        eprintln!("  {} {}", style(format!("{:>2})", i + 1)).cyan(), option);
    }

    loop {
        let input = prompt_string(&format!("Choose 1-{} (Enter = 1, q = cancel)", options.len()))?;
        match parse_choice(&input, options.len()) {
            Ok(choice) => return Ok(choice),
            Err(message) => eprintln!("{}", style(message).yellow()),
        }
    }
}

fn parse_choice(input: &str, count: usize) -> std::result::Result<Option<usize>, String> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Some(0));
    }
    if input.eq_ignore_ascii_case("q") {
        return Ok(None);
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Ok(Some(n - 1)),
        _ => Err(format!("Enter a number between 1 and {count}")),
    }
}
