//-
// Copyright (c) 2026, the countersign authors
//
// This file is part of countersign.
//
// Countersign is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Countersign is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with countersign. If not, see <http://www.gnu.org/licenses/>.

//! The recursive MIME entity parser.
//!
//! `parse()` turns a raw mail byte stream into a `MimeEntity` tree. It is
//! designed to be robust moreso than strictly correct: bare-LF line endings
//! are accepted anywhere, an unterminated multipart is closed by end of
//! input, and body bytes are carried verbatim as opaque bytes with no
//! transfer decoding or charset handling.
//!
//! Parsing is all-or-nothing. A malformation anywhere in the tree (an
//! unparsable `Content-Type`, a multipart entity with no `boundary`
//! parameter, a mangled header line) aborts the whole parse; no partial
//! tree is ever returned.

use std::io::Read;

use super::header;
use super::model::{ContentType, Header, MimeEntity};
use crate::support::error::Error;

/// Maximum multipart nesting depth accepted from untrusted input.
const MAX_NESTING_DEPTH: usize = 32;

/// Parses the whole of `input` as an RFC 5322 mail into an entity tree.
pub fn parse(mut input: impl Read) -> Result<MimeEntity, Error> {
    let mut data = Vec::new();
    input.read_to_end(&mut data)?;
    parse_entity(&data, 0)
}

fn parse_entity(data: &[u8], depth: usize) -> Result<MimeEntity, Error> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::NestingTooDeep);
    }

    let mut lines = Lines::new(data);
    let header = parse_header_block(&mut lines)?;

    let content_type = match header.get("Content-Type") {
        Some(value) => header::parse_content_type(value.as_bytes())
            .ok_or(Error::InvalidContentType)?,
        None => ContentType::default(),
    };

    let body = lines.rest();
    if content_type.is_multipart() {
        let boundary = content_type
            .boundary()
            .ok_or(Error::InvalidContentType)?
            .to_owned();
        let parts = parse_multipart_body(body, &boundary, depth)?;
        Ok(MimeEntity {
            header,
            content_type,
            text: Vec::new(),
            parts,
        })
    } else {
        Ok(MimeEntity {
            header,
            content_type,
            text: body.to_vec(),
            parts: vec![],
        })
    }
}

/// Reads header lines up to (and consuming) the blank separator line.
///
/// End of input also terminates the block, so a header-only fragment parses
/// as an entity with an empty body.
fn parse_header_block(lines: &mut Lines<'_>) -> Result<Header, Error> {
    let mut header = Header::new();
    while let Some(line) = lines.next_line() {
        let content = trim_line_ending(line);
        if content.is_empty() {
            break;
        }
        if content.starts_with(b" ") || content.starts_with(b"\t") {
            let extra = std::str::from_utf8(content)
                .map_err(|_| Error::InvalidHeader)?
                .trim();
            if !header.continue_last(extra) {
                return Err(Error::InvalidHeader);
            }
            continue;
        }
        let (name, value) =
            header::split_header_line(content).ok_or(Error::InvalidHeader)?;
        header.push(name, value);
    }
    Ok(header)
}

fn parse_multipart_body(
    body: &[u8],
    boundary: &str,
    depth: usize,
) -> Result<Vec<MimeEntity>, Error> {
    let delimiter = format!("--{}", boundary);
    let terminator = format!("--{}--", boundary);

    let mut lines = Lines::new(body);
    let mut parts = Vec::new();
    // None until the first delimiter; anything before it is preamble and is
    // discarded.
    let mut segment: Option<Vec<u8>> = None;

    loop {
        let line = match lines.next_line() {
            Some(line) => line,
            // RFC 2046 requires a closing delimiter, but plenty of real
            // mail omits it, so end of input closes the container too.
            None => {
                finish_segment(&mut segment, &mut parts, depth)?;
                return Ok(parts);
            },
        };

        let content = trim_line_ending(line);
        if content == terminator.as_bytes() {
            finish_segment(&mut segment, &mut parts, depth)?;
            // Bytes after the terminator are epilogue and are ignored.
            return Ok(parts);
        } else if content == delimiter.as_bytes() {
            finish_segment(&mut segment, &mut parts, depth)?;
            segment = Some(Vec::new());
        } else if let Some(segment) = segment.as_mut() {
            segment.extend_from_slice(line);
        }
    }
}

/// Completes the segment accumulated since the previous delimiter, parsing
/// it as a full entity of its own.
fn finish_segment(
    segment: &mut Option<Vec<u8>>,
    parts: &mut Vec<MimeEntity>,
    depth: usize,
) -> Result<(), Error> {
    if let Some(mut segment) = segment.take() {
        // The line ending before a delimiter belongs to the delimiter, not
        // to the part it closes.
        strip_final_line_ending(&mut segment);
        parts.push(parse_entity(&segment, depth + 1)?);
    }
    Ok(())
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    if line.ends_with(b"\r\n") {
        &line[..line.len() - 2]
    } else if line.ends_with(b"\n") {
        &line[..line.len() - 1]
    } else {
        line
    }
}

fn strip_final_line_ending(data: &mut Vec<u8>) {
    if data.ends_with(b"\r\n") {
        data.truncate(data.len() - 2);
    } else if data.ends_with(b"\n") {
        data.truncate(data.len() - 1);
    }
}

/// Iteration over lines of a byte slice, with each line keeping its
/// terminator. The final line may have none.
struct Lines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    fn new(data: &'a [u8]) -> Self {
        Lines { data, pos: 0 }
    }

    fn next_line(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        let end = match memchr::memchr(b'\n', &self.data[start..]) {
            Some(off) => start + off + 1,
            None => self.data.len(),
        };
        self.pos = end;
        Some(&self.data[start..end])
    }

    /// The unconsumed remainder of the input.
    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}
