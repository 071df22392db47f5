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

//! Composition of outbound multipart mails, PGP/MIME (RFC 3156) included.

use std::io::{self, Write};

use rand::{rngs::OsRng, Rng};

const CRLF: &str = "\r\n";

/// Writes a multipart mail, headers included, to an output sink.
///
/// The writer owns a randomly generated boundary token and a header set
/// which can be extended only until the first body part goes out. Headers
/// are emitted lazily, exactly once, on the first part write or on `close()`
/// when no part was ever written.
pub struct EncodingMultipartWriter<W> {
    out: W,
    boundary: String,
    headers: Vec<(String, String)>,
    headers_written: bool,
    part_written: bool,
}

impl<W: Write> EncodingMultipartWriter<W> {
    /// Creates a writer for a `multipart/<multitype>` mail writing to `out`.
    ///
    /// `multitype` is for example "mixed", "alternative", or "encrypted".
    /// An optional `protocol` parameter is added to the `Content-Type`, e.g.
    /// "application/pgp-encrypted". The writer defines the headers
    /// `Mime-Version`, `Content-Type`, and `Content-Transfer-Encoding`;
    /// `extra_headers` may add to or override them, with caller values
    /// winning on (case-insensitive) name collision.
    pub fn new(
        out: W,
        multitype: &str,
        protocol: Option<&str>,
        extra_headers: &[(&str, &str)],
    ) -> Self {
        let boundary = format!("{:032x}", OsRng.gen::<u128>());
        let mut content_type = format!(
            "multipart/{};{} boundary=\"{}\"",
            multitype, CRLF, boundary
        );
        if let Some(protocol) = protocol {
            content_type
                .push_str(&format!(";{} protocol=\"{}\";", CRLF, protocol));
        }

        let mut headers = vec![
            ("Mime-Version".to_owned(), "1.0".to_owned()),
            ("Content-Type".to_owned(), content_type),
            ("Content-Transfer-Encoding".to_owned(), "7bit".to_owned()),
        ];
        for &(name, value) in extra_headers {
            match headers
                .iter_mut()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
            {
                Some(header) => header.1 = value.to_owned(),
                None => headers.push((name.to_owned(), value.to_owned())),
            }
        }

        EncodingMultipartWriter {
            out,
            boundary,
            headers,
            headers_written: false,
            part_written: false,
        }
    }

    /// The generated boundary token.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    fn check_write_headers(&mut self) -> io::Result<()> {
        if self.headers_written {
            return Ok(());
        }
        self.headers_written = true;
        for (name, value) in &self.headers {
            write!(self.out, "{}: {}{}", name, value, CRLF)?;
        }
        write!(self.out, "{}", CRLF)
    }

    fn begin_part(&mut self, part_headers: &[(&str, String)]) -> io::Result<()> {
        self.check_write_headers()?;
        if self.part_written {
            // Terminate the previous part's body line.
            write!(self.out, "{}", CRLF)?;
        }
        self.part_written = true;
        write!(self.out, "--{}{}", self.boundary, CRLF)?;
        for (name, value) in part_headers {
            write!(self.out, "{}: {}{}", name, value, CRLF)?;
        }
        write!(self.out, "{}", CRLF)
    }

    /// Writes the fixed PGP/MIME version-identification part.
    pub fn write_pgp_mime_version(&mut self) -> io::Result<()> {
        self.begin_part(&[
            ("Content-Type", "application/pgp-encrypted".to_owned()),
            (
                "Content-Description",
                "PGP/MIME version identification".to_owned(),
            ),
        ])?;
        write!(self.out, "Version: 1{}", CRLF)
    }

    /// Starts an inline file part and returns the sink to write its
    /// contents to.
    pub fn write_inline_file(
        &mut self,
        name: &str,
        mime_type: &str,
        description: &str,
    ) -> io::Result<&mut W> {
        self.write_file(name, mime_type, description, "inline")
    }

    /// Starts an attached file part and returns the sink to write its
    /// contents to.
    pub fn write_attached_file(
        &mut self,
        name: &str,
        mime_type: &str,
        description: &str,
    ) -> io::Result<&mut W> {
        self.write_file(name, mime_type, description, "attachment")
    }

    fn write_file(
        &mut self,
        name: &str,
        mime_type: &str,
        description: &str,
        disposition: &str,
    ) -> io::Result<&mut W> {
        self.begin_part(&[
            (
                "Content-Type",
                format!("{}; name=\"{}\"", mime_type, name),
            ),
            (
                "Content-Disposition",
                format!("{}; filename=\"{}\"", disposition, name),
            ),
            ("Content-Description", description.to_owned()),
        ])?;
        Ok(&mut self.out)
    }

    /// Writes `text` as a `text/plain` part.
    pub fn write_plain_text(&mut self, text: &str) -> io::Result<()> {
        self.begin_part(&[("Content-Type", "text/plain".to_owned())])?;
        self.out.write_all(text.as_bytes())
    }

    /// Finalises the multipart body.
    ///
    /// Valid (and still produces a complete message) when no part was ever
    /// written.
    pub fn close(&mut self) -> io::Result<()> {
        self.check_write_headers()?;
        write!(self.out, "{}--{}--{}", CRLF, self.boundary, CRLF)
    }
}
