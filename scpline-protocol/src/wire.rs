//! SCP control-line codec
//!
//! Builds the lines sent to a sink and tokenizes the lines received from a
//! source. Nothing here performs I/O.

use crate::error::ScpError;
use crate::state::{ScpMode, ScpRequest, ScpRequestKind};

/// Success acknowledgement
pub const STATUS_OK: u8 = 0;
/// Warning, followed by a message line
pub const STATUS_WARNING: u8 = 1;
/// Error, followed by a message line
pub const STATUS_ERROR: u8 = 2;

/// Upper bound for an inbound control line, terminator included.
pub const MAX_LINE_LENGTH: usize = 4096;

pub const END_DIRECTORY_LINE: &[u8] = b"E\n";

/// Remote command issued when the session is initialized.
pub fn exec_command(mode: ScpMode, location: &str) -> String {
    format!("scp {} {location}", mode.exec_flag())
}

/// Reduces a path-qualified name to its final component.
///
/// Both `/` and `\` separate components and trailing separators are ignored.
/// A name with no component at all (`""`, `"/"`) is returned as is.
pub fn basename(name: &str) -> &str {
    let trimmed = name.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        return name;
    }
    match trimmed.rfind(['/', '\\']) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

pub fn directory_line(perms: &str, name: &str) -> String {
    format!("D{perms} 0 {name}\n")
}

pub fn file_line(perms: &str, size: u64, name: &str) -> String {
    format!("C{perms} {size} {name}\n")
}

/// `0x02 <reason> \n`. Line breaks inside the reason are flattened so the
/// peer sees a single message line.
pub fn deny_message(reason: &str) -> Vec<u8> {
    let mut message = Vec::with_capacity(reason.len() + 2);
    message.push(STATUS_ERROR);
    message.extend(
        reason
            .bytes()
            .map(|b| if b == b'\n' || b == b'\r' { b' ' } else { b }),
    );
    message.push(b'\n');
    message
}

/// Rejects names that would break the framing of an outbound control line.
pub fn check_name(what: &'static str, value: &str) -> Result<(), ScpError> {
    if value.is_empty() || value.contains(['\n', '\r']) {
        return Err(invalid(what, value));
    }
    Ok(())
}

/// Permission strings end at the first space, so they must be one token.
pub fn check_permissions(value: &str) -> Result<(), ScpError> {
    if value.is_empty() || value.contains(|c: char| c.is_ascii_whitespace()) {
        return Err(invalid("permissions", value));
    }
    Ok(())
}

fn invalid(what: &'static str, value: &str) -> ScpError {
    ScpError::InvalidArgument {
        what,
        value: value.to_owned(),
    }
}

/// Tokenizes `C<perm> <size> <name>\n` and `D<perm> 0 <name>\n`.
///
/// The line must still carry its terminator: a line cut short by the
/// length cap has no name terminator and fails to parse. Names and
/// permissions are not required to be UTF-8; the raw name bytes are kept
/// next to a lossy rendering.
pub fn parse_request(line: &[u8]) -> Result<ScpRequest, ScpError> {
    let kind = match line.first() {
        Some(b'C') => ScpRequestKind::NewFile,
        Some(b'D') => ScpRequestKind::NewDirectory,
        Some(other) => {
            return Err(ScpError::UnsupportedDirective {
                directive: char::from(*other),
                line: display_line(line),
            })
        }
        None => return Err(parse_error(line)),
    };

    let body = &line[1..];
    let (permissions, rest) = split_at_byte(body, b' ').ok_or_else(|| parse_error(line))?;
    let (size, rest) = split_at_byte(rest, b' ').ok_or_else(|| parse_error(line))?;
    let (name, _) = split_at_byte(rest, b'\n').ok_or_else(|| parse_error(line))?;

    let size = parse_size(size).ok_or_else(|| parse_error(line))?;

    Ok(ScpRequest {
        kind,
        permissions: String::from_utf8_lossy(permissions).into_owned(),
        size: match kind {
            ScpRequestKind::NewFile => size,
            ScpRequestKind::NewDirectory => 0,
        },
        name: String::from_utf8_lossy(name).into_owned(),
        raw_name: name.to_vec(),
    })
}

fn split_at_byte(data: &[u8], separator: u8) -> Option<(&[u8], &[u8])> {
    let idx = data.iter().position(|b| *b == separator)?;
    Some((&data[..idx], &data[idx + 1..]))
}

fn parse_size(token: &[u8]) -> Option<u64> {
    if token.is_empty() || !token.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(token).ok()?.parse().ok()
}

pub(crate) fn display_line(line: &[u8]) -> String {
    String::from_utf8_lossy(line).trim_end().to_owned()
}

fn parse_error(line: &[u8]) -> ScpError {
    ScpError::Parse {
        line: display_line(line),
    }
}
