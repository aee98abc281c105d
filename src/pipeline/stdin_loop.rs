//! Child-side request framing over stdin.
//!
//! The reader treats three consecutive blank lines as end-of-input. This
//! exact count is observable protocol surface (the bridge writes exactly
//! three) and must not change.

use std::io::{BufRead, Write};

/// Recurring request banner. The bridge keys its readiness detection and
/// per-response sealing on this literal.
pub const INPUT_BANNER: &str = "Enter your input :";

/// Blank lines that terminate one request.
pub const END_OF_INPUT_BLANKS: usize = 3;

/// Print the request banner, blank-padded like the original prompt.
pub fn print_banner() {
    println!();
    println!("{INPUT_BANNER}");
    println!();
    let _ = std::io::stdout().flush();
}

/// Read one request: accumulate lines until three consecutive blanks.
/// Returns `None` on EOF (the caller should shut the pipeline down).
pub fn read_request<R: BufRead>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut lines: Vec<String> = Vec::new();
    let mut blanks = 0usize;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            blanks += 1;
        } else {
            blanks = 0;
        }
        lines.push(line.to_string());
        if blanks == END_OF_INPUT_BLANKS {
            break;
        }
    }

    lines.truncate(lines.len() - END_OF_INPUT_BLANKS);
    Ok(Some(lines.join("\n")))
}
