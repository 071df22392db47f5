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

//! Utilities for working with individual RFC 2822 headers.
//!
//! The grammar uses the `complete`-flavoured nom combinators throughout:
//! header values arrive as whole slices, so end of input must terminate a
//! token rather than signal that more data could follow.

use std::borrow::Cow;
use std::str;

use nom::{
    branch::alt,
    bytes::complete::{is_a, is_not, tag},
    combinator::{map, opt},
    *,
};

use super::model::ContentType;

// RFC 2045 5.1 "token": any printable ASCII character which is neither
// whitespace nor a tspecial.
fn token(i: &[u8]) -> IResult<&[u8], &[u8]> {
    bytes::complete::take_while1(|ch: u8| {
        ch > 0x20 && ch < 0x7f && !b"()<>@,;:\\\"/[]?=".contains(&ch)
    })(i)
}

// RFC 2822 3.2.3 "Folding white space".
// Unfolding happens before this parser runs, so the line-ending characters
// are treated as simple whitespace.
fn fws(i: &[u8]) -> IResult<&[u8], &[u8]> {
    map(is_a(" \t\r\n"), |_| &b" "[..])(i)
}

// RFC 2822 3.2.2 "quoted-pair", including the 8-bit clean "obsolete" syntax
fn quoted_pair(i: &[u8]) -> IResult<&[u8], &[u8]> {
    sequence::preceded(tag("\\"), bytes::complete::take(1usize))(i)
}

// RFC 2822 3.2.5 "Quoted [string] text"
fn qtext(i: &[u8]) -> IResult<&[u8], &[u8]> {
    is_not(" \t\r\n\\\"")(i)
}

// RFC 2822 3.2.5 "Quoted [string] content"
// The original spec puts FWS in the quoted-string definition, which would
// make it much more complex.
fn qcontent(i: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((qtext, quoted_pair, fws))(i)
}

// RFC 2822 3.2.5 "Quoted string"
fn quoted_string(i: &[u8]) -> IResult<&[u8], Cow<[u8]>> {
    sequence::delimited(
        sequence::pair(opt(fws), tag("\"")),
        multi::fold_many0(
            qcontent,
            Cow::Borrowed(&[] as &[u8]),
            |mut acc: Cow<[u8]>, item| {
                if acc.is_empty() {
                    acc = Cow::Borrowed(item);
                } else {
                    acc.to_mut().extend_from_slice(item);
                }
                acc
            },
        ),
        sequence::pair(tag("\""), opt(fws)),
    )(i)
}

// RFC 2045 5.1 "value"
fn parm_value(i: &[u8]) -> IResult<&[u8], Cow<[u8]>> {
    alt((map(token, Cow::Borrowed), quoted_string))(i)
}

// RFC 2045 5.1 "parameter"
fn parameter(i: &[u8]) -> IResult<&[u8], (&[u8], Cow<[u8]>)> {
    sequence::separated_pair(token, tag("="), parm_value)(i)
}

fn parameters(i: &[u8]) -> IResult<&[u8], Vec<(&[u8], Cow<[u8]>)>> {
    multi::many0(sequence::preceded(
        sequence::tuple((opt(fws), tag(";"), opt(fws))),
        parameter,
    ))(i)
}

// RFC 2045 5.1 media type with its parameter list. Agents routinely emit a
// dangling ';' after the last parameter, so one is tolerated.
fn content_type_syntax(
    i: &[u8],
) -> IResult<&[u8], ((&[u8], &[u8]), Vec<(&[u8], Cow<[u8]>)>)> {
    sequence::preceded(
        opt(fws),
        sequence::pair(
            sequence::separated_pair(token, tag("/"), token),
            sequence::terminated(
                parameters,
                sequence::tuple((opt(fws), opt(tag(";")), opt(fws))),
            ),
        ),
    )(i)
}

/// Parses a `Content-Type` header value.
///
/// Returns `None` if the value does not conform to the `type/subtype
/// [;parameters]` syntax. The type, subtype, and parameter names are
/// lowercased; parameter values are dequoted but otherwise verbatim.
pub fn parse_content_type(value: &[u8]) -> Option<ContentType> {
    match content_type_syntax(value) {
        Ok((rest, ((typ, subtype), parms))) if rest.is_empty() => {
            let parms = parms
                .into_iter()
                .map(|(name, value)| {
                    Some((lowercase(name)?, utf8_owned(&value)?))
                })
                .collect::<Option<Vec<_>>>()?;
            Some(ContentType {
                typ: lowercase(typ)?,
                subtype: lowercase(subtype)?,
                parms,
            })
        },
        _ => None,
    }
}

/// Splits a raw (line-ending-free) header line into its name and value.
///
/// The name keeps its original casing; the value is trimmed of surrounding
/// whitespace. Returns `None` for lines with no colon or an empty name.
pub fn split_header_line(line: &[u8]) -> Option<(String, String)> {
    let colon = memchr::memchr(b':', line)?;
    let name = str::from_utf8(&line[..colon]).ok()?.trim();
    let value = str::from_utf8(&line[colon + 1..]).ok()?.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_owned(), value.to_owned()))
}

fn lowercase(bytes: &[u8]) -> Option<String> {
    str::from_utf8(bytes).ok().map(str::to_ascii_lowercase)
}

fn utf8_owned(bytes: &[u8]) -> Option<String> {
    str::from_utf8(bytes).ok().map(str::to_owned)
}
