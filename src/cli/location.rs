//! `file:line[:column]` arguments

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::models::Position;

/// A 1-indexed source position as typed on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLocation {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl ParsedLocation {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            bail!("Location cannot be empty");
        }

        let (file, rest) = split_path_and_position(input)?;
        let (line, column) = parse_position(rest)?;

        Ok(Self {
            file: PathBuf::from(file),
            line,
            column,
        })
    }

    /// Resolve the file against `root` and require that it exists.
    pub fn resolve(self, root: &Path) -> Result<Self> {
        let file = if self.file.is_absolute() {
            self.file
        } else {
            root.join(&self.file)
        };
        let file = file
            .canonicalize()
            .with_context(|| format!("File not found: {}", file.display()))?;
        Ok(Self { file, ..self })
    }

    /// Zero-based LSP position
    pub fn position(&self) -> Position {
        Position::from_cli(self.line, self.column)
    }
}

/// Split at the first `:` followed by a digit or `-`, skipping a Windows
/// drive prefix.
fn split_path_and_position(input: &str) -> Result<(&str, &str)> {
    let bytes = input.as_bytes();
    let has_drive = bytes.len() > 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic();
    let start = if has_drive { 2 } else { 0 };

    let split = input[start..]
        .char_indices()
        .map(|(i, c)| (start + i, c))
        .find(|&(i, c)| {
            c == ':'
                && input[i + 1..]
                    .chars()
                    .next()
                    .is_some_and(|next| next.is_ascii_digit() || next == '-')
        })
        .map(|(i, _)| i);

    let Some(split) = split else {
        bail!("Invalid location format. Expected: file:line[:column]\nExample: src/main.rs:10:5")
    };
    if input[split + 1..].starts_with('-') {
        bail!("Invalid line number: line numbers are 1-indexed positive integers");
    }
    Ok((&input[..split], &input[split + 1..]))
}

fn parse_position(rest: &str) -> Result<(u32, u32)> {
    let (line, column) = match rest.split_once(':') {
        Some((line, column)) => (line, Some(column)),
        None => (rest, None),
    };

    let line: u32 = line
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid line number '{line}': must be a positive integer"))?;
    let column: u32 = match column {
        Some(column) => column.parse().map_err(|_| {
            anyhow::anyhow!("Invalid column number '{column}': must be a positive integer")
        })?,
        None => 1,
    };

    if line == 0 {
        bail!("Line number must be >= 1 (got 0)");
    }
    if column == 0 {
        bail!("Column number must be >= 1 (got 0)");
    }
    Ok((line, column))
}
