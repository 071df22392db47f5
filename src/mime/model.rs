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

//! The parsed representation of a MIME entity tree.

/// The header block of a MIME entity.
///
/// Field names are matched case-insensitively on lookup, but the original
/// casing, ordering, and duplicates are all preserved.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    fields: Vec<(String, String)>,
}

impl Header {
    pub fn new() -> Self {
        Header::default()
    }

    pub fn push(&mut self, name: String, value: String) {
        self.fields.push((name, value));
    }

    /// Returns the first value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Folds a continuation line onto the most recent field.
    ///
    /// Returns false if there is no field to continue.
    pub(crate) fn continue_last(&mut self, extra: &str) -> bool {
        match self.fields.last_mut() {
            Some((_, value)) => {
                value.push(' ');
                value.push_str(extra);
                true
            },
            None => false,
        }
    }
}

/// A parsed `Content-Type` value.
///
/// The type, subtype, and parameter names are normalised to lower case;
/// parameter values are kept verbatim (minus any quoting).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    pub typ: String,
    pub subtype: String,
    /// Parameters in their original order, duplicates included.
    pub parms: Vec<(String, String)>,
}

impl ContentType {
    pub fn is_multipart(&self) -> bool {
        self.typ == "multipart"
    }

    /// Returns the first `boundary` parameter, if any.
    pub fn boundary(&self) -> Option<&str> {
        self.parms
            .iter()
            .find(|(name, _)| name == "boundary")
            .map(|(_, value)| value.as_str())
    }
}

impl Default for ContentType {
    /// The implied content type of an entity with no `Content-Type` header.
    fn default() -> Self {
        ContentType {
            typ: "text".to_owned(),
            subtype: "plain".to_owned(),
            parms: vec![],
        }
    }
}

/// One node of a parsed mail.
///
/// An entity is either a leaf, whose raw body is in `text`, or a multipart
/// container, whose children are in `parts`. A container never has `text`
/// and a leaf never has `parts`.
///
/// `text` holds the body bytes exactly as they appeared on the wire: no
/// transfer decoding, no charset handling, and no assumption that the bytes
/// are valid UTF-8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MimeEntity {
    pub header: Header,
    pub content_type: ContentType,
    pub text: Vec<u8>,
    pub parts: Vec<MimeEntity>,
}

impl MimeEntity {
    /// Returns the first value of the named header, or `default` if the
    /// header is absent.
    pub fn get_header<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.header.get(name).unwrap_or(default)
    }

    pub fn get_subject(&self) -> &str {
        self.get_header("Subject", "")
    }
}
