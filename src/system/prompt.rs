// src/system/prompt.rs

//! Line-oriented user input.

use dialoguer::{Input, Password, theme::ColorfulTheme};
use inquire::PasswordDisplayMode;
use std::io::{self, BufRead, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("User Interface Error: {0}")]
    Dialoguer(#[from] dialoguer::Error),
    #[error("User Interface Error: {0}")]
    Inquire(#[from] inquire::InquireError),
    #[error("Could not read input: {0}")]
    Io(#[from] io::Error),
}

/// Prompts on the terminal for a plain value.
pub fn prompt(message: &str) -> Result<String, PromptError> {
    let value: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt(message)
        .allow_empty(true)
        .interact_text()?;
    Ok(value)
}

/// Prompts on the terminal without echoing the typed value.
pub fn prompt_hidden(message: &str) -> Result<String, PromptError> {
    let value = Password::with_theme(&ColorfulTheme::default())
        .with_prompt(message)
        .allow_empty_password(true)
        .interact()?;
    Ok(value)
}

/// Prompts on the terminal, echoing `*` for every typed character.
pub fn prompt_masked(message: &str) -> Result<String, PromptError> {
    let value = inquire::Password::new(message)
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()?;
    Ok(value)
}

/// [`read_line`] that echoes `mask` to `output` once per character read.
pub fn read_masked<R: BufRead, W: Write>(
    message: &str,
    mask: char,
    input: &mut R,
    output: &mut W,
) -> Result<String, PromptError> {
    let value = read_line(message, input, output)?;
    let masked: String = value.chars().map(|_| mask).collect();
    writeln!(output, "{}", masked)?;
    Ok(value)
}

/// Writes `message` to `output` and reads one line from `input`, without the
/// line terminator. End of input yields an empty string.
pub fn read_line<R: BufRead, W: Write>(
    message: &str,
    input: &mut R,
    output: &mut W,
) -> Result<String, PromptError> {
    output.write_all(message.as_bytes())?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}
