//! Minimal streaming XML writer
//!
//! Elements are written as soon as they are started, so a document can be
//! produced incrementally from an event stream without holding a tree in
//! memory. Output is indented with two spaces per level.

use std::io::{self, Write};

const INDENT: &str = "  ";

pub struct XmlWriter<W: Write> {
    out: W,
    open: Vec<String>,
    /// The last start tag is still waiting for its `>` (attributes allowed).
    tag_open: bool,
    wrote_anything: bool,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            open: Vec::new(),
            tag_open: false,
            wrote_anything: false,
        }
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn write_declaration(&mut self) -> io::Result<()> {
        self.out
            .write_all(br#"<?xml version="1.0" encoding="utf-8"?>"#)?;
        self.wrote_anything = true;
        Ok(())
    }

    pub fn start_element(&mut self, name: &str) -> io::Result<()> {
        self.close_start_tag()?;
        self.new_line()?;
        write!(self.out, "<{}", name)?;
        self.open.push(name.to_string());
        self.tag_open = true;
        Ok(())
    }

    /// Add an attribute to the element just started.
    pub fn attribute(&mut self, name: &str, value: &str) -> io::Result<()> {
        if !self.tag_open {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("attribute '{}' written outside of a start tag", name),
            ));
        }
        write!(self.out, " {}=\"{}\"", name, escape(value, true))
    }

    /// Write `<name>text</name>` as a child of the current element.
    pub fn element_string(&mut self, name: &str, text: &str) -> io::Result<()> {
        self.close_start_tag()?;
        self.new_line()?;
        write!(self.out, "<{0}>{1}</{0}>", name, escape(text, false))
    }

    pub fn end_element(&mut self) -> io::Result<()> {
        let Some(name) = self.open.pop() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "end_element without an open element",
            ));
        };
        if self.tag_open {
            self.tag_open = false;
            self.out.write_all(b" />")
        } else {
            self.new_line()?;
            write!(self.out, "</{}>", name)
        }
    }

    /// Close every open element.
    pub fn end_all(&mut self) -> io::Result<()> {
        while !self.open.is_empty() {
            self.end_element()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn close_start_tag(&mut self) -> io::Result<()> {
        if self.tag_open {
            self.tag_open = false;
            self.out.write_all(b">")?;
        }
        Ok(())
    }

    fn new_line(&mut self) -> io::Result<()> {
        if self.wrote_anything {
            self.out.write_all(b"\n")?;
            for _ in 0..self.open.len() {
                self.out.write_all(INDENT.as_bytes())?;
            }
        }
        self.wrote_anything = true;
        Ok(())
    }
}

/// Escape markup characters. Control characters that XML 1.0 cannot carry
/// are replaced with U+FFFD.
fn escape(value: &str, attribute: bool) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' if attribute => escaped.push_str("&quot;"),
            '\n' if attribute => escaped.push_str("&#xA;"),
            '\r' => escaped.push_str("&#xD;"),
            '\t' if attribute => escaped.push_str("&#x9;"),
            '\n' | '\t' => escaped.push(c),
            c if (c as u32) < 0x20 => escaped.push('\u{FFFD}'),
            c => escaped.push(c),
        }
    }
    escaped
}
