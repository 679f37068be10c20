//! Line-oriented operator console.
//!
//! Only the first non-whitespace character of a line matters. End of input is
//! treated like the exit command.

use std::io::{BufRead, Write};

use crate::roi::{ReconfigureError, RegionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartCommand {
    Start,
    Exit,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    /// Zero-based region index.
    Select(usize),
    Exit,
    Invalid,
}

pub fn parse_start(line: &str) -> StartCommand {
    match line.trim_start().chars().next() {
        Some('a' | 'A') => StartCommand::Start,
        Some('x' | 'X') => StartCommand::Exit,
        _ => StartCommand::Invalid,
    }
}

/// Parse a menu line. Digits `1..=n_regions` select a region.
pub fn parse_menu(line: &str, n_regions: usize) -> MenuCommand {
    match line.trim_start().chars().next() {
        Some('x' | 'X') => MenuCommand::Exit,
        Some(c) => match c.to_digit(10) {
            Some(d) if d >= 1 && (d as usize) <= n_regions => MenuCommand::Select(d as usize - 1),
            _ => MenuCommand::Invalid,
        },
        None => MenuCommand::Invalid,
    }
}

fn read_line<R: BufRead>(input: &mut R) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Ask whether to start. Returns `false` if the operator chose to exit.
pub fn prompt_start<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> std::io::Result<bool> {
    loop {
        writeln!(out, "Press [a] or [A] and then [Enter] to start acquisition")?;
        writeln!(out, "Press [x] or [X] and then [Enter] to exit")?;
        out.flush()?;
        let Some(line) = read_line(input)? else {
            return Ok(false);
        };
        match parse_start(&line) {
            StartCommand::Start => return Ok(true),
            StartCommand::Exit => return Ok(false),
            StartCommand::Invalid => writeln!(out, "invalid input")?,
        }
    }
}

/// Show the region menu and forward selections to `select` until exit.
pub fn run_menu<R, W, F>(
    input: &mut R,
    out: &mut W,
    regions: &[RegionConfig],
    mut select: F,
) -> std::io::Result<()>
where
    R: BufRead,
    W: Write,
    F: FnMut(usize) -> Result<RegionConfig, ReconfigureError>,
{
    loop {
        writeln!(out, "Select a region of interest:")?;
        for (i, r) in regions.iter().enumerate() {
            writeln!(out, "  [{}] {}x{}", i + 1, r.width, r.height)?;
        }
        writeln!(out, "  [x] exit")?;
        out.flush()?;

        let Some(line) = read_line(input)? else {
            return Ok(());
        };
        match parse_menu(&line, regions.len()) {
            MenuCommand::Select(index) => match select(index) {
                Ok(config) => writeln!(out, "region {} applied: {config}", index + 1)?,
                Err(e) => writeln!(out, "region {} not applied: {e}", index + 1)?,
            },
            MenuCommand::Exit => return Ok(()),
            MenuCommand::Invalid => writeln!(out, "invalid input")?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roi::DEFAULT_REGIONS;

    #[test]
    fn parse_menu_lines() {
        assert_eq!(parse_menu("1\n", 3), MenuCommand::Select(0));
        assert_eq!(parse_menu("  3", 3), MenuCommand::Select(2));
        assert_eq!(parse_menu("2abc", 3), MenuCommand::Select(1));
        assert_eq!(parse_menu("4", 3), MenuCommand::Invalid);
        assert_eq!(parse_menu("0", 3), MenuCommand::Invalid);
        assert_eq!(parse_menu("x", 3), MenuCommand::Exit);
        assert_eq!(parse_menu("X\n", 3), MenuCommand::Exit);
        assert_eq!(parse_menu("q", 3), MenuCommand::Invalid);
        assert_eq!(parse_menu("\n", 3), MenuCommand::Invalid);
    }

    #[test]
    fn parse_start_lines() {
        assert_eq!(parse_start("A\n"), StartCommand::Start);
        assert_eq!(parse_start(" a"), StartCommand::Start);
        assert_eq!(parse_start("x"), StartCommand::Exit);
        assert_eq!(parse_start("b"), StartCommand::Invalid);
    }

    #[test]
    fn prompt_start_retries_then_exits_at_eof() {
        let mut input = std::io::Cursor::new("z\n");
        let mut out = Vec::new();
        assert!(!prompt_start(&mut input, &mut out).unwrap());
        assert!(String::from_utf8(out).unwrap().contains("invalid input"));

        let mut input = std::io::Cursor::new("?\nA\n");
        assert!(prompt_start(&mut input, &mut Vec::new()).unwrap());
    }

    #[test]
    fn menu_forwards_selections() {
        let mut input = std::io::Cursor::new("2\n9\n3\nx\n1\n");
        let mut out = Vec::new();
        let mut selected = Vec::new();
        run_menu(&mut input, &mut out, &DEFAULT_REGIONS, |i| {
            selected.push(i);
            Ok(DEFAULT_REGIONS[i])
        })
        .unwrap();
        assert_eq!(selected, vec![1, 2]);
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("[2] 640x480"));
        assert!(out.contains("invalid input"));
    }

    #[test]
    fn menu_reports_failures_and_ends_at_eof() {
        let mut input = std::io::Cursor::new("1\n");
        let mut out = Vec::new();
        run_menu(&mut input, &mut out, &DEFAULT_REGIONS, |index| {
            Err(ReconfigureError::IndexOutOfRange { index, len: 0 })
        })
        .unwrap();
        assert!(String::from_utf8(out).unwrap().contains("region 1 not applied"));
    }
}
