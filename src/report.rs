//! XML report sink
//!
//! Turns the crawler's event stream into a nested document:
//!
//! ```text
//! <analysis path="/data">
//!   <dir name="data">
//!     <dir name="locked">
//!       <securityError />
//!     </dir>
//!     <file name="a.txt" size="100" modified="..." />
//!     <size>100</size>
//!     <modified>...</modified>
//!   </dir>
//! </analysis>
//! ```
//!
//! Write failures are recorded once and make every later write a no-op, so
//! a full disk never takes down the crawl or the live view.

use crate::node::Node;
use crate::path_util::PathStyle;
use crate::scan_events::ScanEvent;
use crate::size::Size;
use crate::xml::XmlWriter;
use std::collections::HashMap;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DirRecord {
    size: Size,
    faulted: bool,
}

pub struct ReportWriter<W: Write> {
    xml: Option<XmlWriter<W>>,
    style: PathStyle,
    registry: HashMap<String, DirRecord>,
    open_dirs: Vec<String>,
    error: Option<io::Error>,
    completed: bool,
}

impl<W: Write> ReportWriter<W> {
    /// Start a report for `root`; the declaration and `<analysis>` element
    /// are written immediately.
    pub fn new(out: W, root: &str) -> Self {
        Self::with_style(out, root, PathStyle::native())
    }

    pub fn with_style(out: W, root: &str, style: PathStyle) -> Self {
        let mut report = Self {
            xml: Some(XmlWriter::new(out)),
            style,
            registry: HashMap::new(),
            open_dirs: Vec::new(),
            error: None,
            completed: false,
        };
        report.write(|xml| {
            xml.write_declaration()?;
            xml.start_element("analysis")?;
            xml.attribute("path", root)
        });
        report
    }

    /// Apply one crawler event.
    pub fn apply(&mut self, event: &ScanEvent) {
        match event {
            ScanEvent::DirectoryDiscovered(path) => self.add_dir(path),
            ScanEvent::FilesRead(files) => self.add_files(files),
            ScanEvent::DirectoryRead(dir) => self.dir_read(dir),
            ScanEvent::SecurityError(path) => self.security_error(path),
            ScanEvent::Complete => self.complete(),
            ScanEvent::Terminating => self.flush(),
        }
    }

    /// Open a `<dir>` element. A path seen before is ignored.
    pub fn add_dir(&mut self, path: &str) {
        if self.registry.contains_key(path) {
            return;
        }
        self.registry.insert(path.to_string(), DirRecord::default());
        self.open_dirs.push(path.to_string());

        let name = self.style.short_name(path);
        self.write(|xml| {
            xml.start_element("dir")?;
            xml.attribute("name", &name)
        });
    }

    /// Write one `<file>` element per node; properties become attributes.
    pub fn add_files(&mut self, files: &[Node]) {
        let style = self.style;
        self.write(|xml| {
            for file in files {
                xml.start_element("file")?;
                xml.attribute("name", &style.short_name(file.path()))?;
                if file.size().is_defined() {
                    xml.attribute("size", &file.size().to_bytes_string())?;
                }
                for property in file.properties() {
                    xml.attribute(&property.name, &property.value)?;
                }
                xml.end_element()?;
            }
            Ok(())
        });
    }

    /// Write the aggregate size and properties, then close the `<dir>`.
    pub fn dir_read(&mut self, dir: &Node) {
        if !self.close_dir(dir.path()) {
            return;
        }
        if let Some(record) = self.registry.get_mut(dir.path()) {
            record.size = dir.size();
        }

        self.write(|xml| {
            if dir.size().is_defined() {
                xml.element_string("size", &dir.size().to_bytes_string())?;
                for property in dir.properties() {
                    xml.element_string(&property.name, &property.value)?;
                }
            }
            xml.end_element()
        });
    }

    /// Replace the body of the directory with `<securityError />` and close it.
    pub fn security_error(&mut self, path: &str) {
        if !self.close_dir(path) {
            return;
        }
        if let Some(record) = self.registry.get_mut(path) {
            record.faulted = true;
        }

        self.write(|xml| {
            xml.start_element("securityError")?;
            xml.end_element()?;
            xml.end_element()
        });
    }

    /// Close every open element and flush. The document is well-formed after
    /// this call.
    pub fn complete(&mut self) {
        if self.completed {
            return;
        }
        if !self.open_dirs.is_empty() {
            tracing::warn!(open = self.open_dirs.len(), "closing directories left open");
            self.open_dirs.clear();
        }
        self.write(|xml| {
            xml.end_all()?;
            xml.flush()
        });
        self.completed = true;
    }

    pub fn flush(&mut self) {
        self.write(|xml| xml.flush());
    }

    /// Flush and release the output. Later writes are ignored. Returns the
    /// underlying writer unless it was already released.
    pub fn close(&mut self) -> Option<W> {
        self.flush();
        self.xml.take().map(XmlWriter::into_inner)
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// First write failure, if any.
    pub fn error(&self) -> Option<&io::Error> {
        self.error.as_ref()
    }

    /// Number of distinct directories written.
    pub fn directory_count(&self) -> usize {
        self.registry.len()
    }

    pub fn faulted_count(&self) -> usize {
        self.registry.values().filter(|r| r.faulted).count()
    }

    /// Pops `path` if it is the innermost open directory.
    fn close_dir(&mut self, path: &str) -> bool {
        if self.open_dirs.last().map(String::as_str) != Some(path) {
            tracing::warn!(path, "event for a directory that is not open, ignoring");
            return false;
        }
        self.open_dirs.pop();
        true
    }

    fn write<F>(&mut self, f: F)
    where
        F: FnOnce(&mut XmlWriter<W>) -> io::Result<()>,
    {
        if self.error.is_some() {
            return;
        }
        let Some(xml) = self.xml.as_mut() else {
            return;
        };
        if let Err(e) = f(xml) {
            tracing::warn!(error = %e, "report write failed, further output dropped");
            self.error = Some(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Property;

    const STYLE: PathStyle = PathStyle::Unix;

    fn output(report: &mut ReportWriter<Vec<u8>>) -> String {
        String::from_utf8(report.close().unwrap()).unwrap()
    }

    fn sample_events() -> Vec<ScanEvent> {
        vec![
            ScanEvent::DirectoryDiscovered("/r".into()),
            ScanEvent::DirectoryDiscovered("/r/sub".into()),
            ScanEvent::FilesRead(vec![Node::new("/r/sub/b.txt", Size::new(50))]),
            ScanEvent::DirectoryRead(Node::new("/r/sub", Size::new(50))),
            ScanEvent::FilesRead(vec![Node::new("/r/a.txt", Size::new(100))]),
            ScanEvent::DirectoryRead(Node::new("/r", Size::new(150))),
            ScanEvent::Complete,
        ]
    }

    #[test]
    fn test_complete_run_produces_nested_document() {
        let mut report = ReportWriter::with_style(Vec::new(), "/r", STYLE);
        for event in sample_events() {
            report.apply(&event);
        }

        let expected = "<?xml version=\"1.0\" encoding=\"utf-8\"?>
<analysis path=\"/r\">
  <dir name=\"r\">
    <dir name=\"sub\">
      <file name=\"b.txt\" size=\"50\" />
      <size>50</size>
    </dir>
    <file name=\"a.txt\" size=\"100\" />
    <size>150</size>
  </dir>
</analysis>";
        assert!(report.is_completed());
        assert_eq!(output(&mut report), expected);
    }

    #[test]
    fn test_security_error_replaces_directory_body() {
        let mut report = ReportWriter::with_style(Vec::new(), "/r", STYLE);
        report.add_dir("/r");
        report.add_dir("/r/locked");
        report.security_error("/r/locked");
        report.add_files(&[]);
        report.dir_read(&Node::new("/r", Size::UNDEFINED));
        report.complete();

        let out = output(&mut report);
        assert!(out.contains("<dir name=\"locked\">\n      <securityError />\n    </dir>"));
        assert!(!out.contains("<size>"));
        assert!(out.ends_with("</analysis>"));
        assert_eq!(report.faulted_count(), 1);
    }

    #[test]
    fn test_undefined_file_size_is_omitted_and_properties_written() {
        let mut report = ReportWriter::with_style(Vec::new(), "/r", STYLE);
        report.add_dir("/r");
        report.add_files(&[Node::with_properties(
            "/r/empty.txt",
            Size::UNDEFINED,
            vec![Property::new("owner", "1000")],
        )]);
        report.dir_read(&Node::with_properties(
            "/r",
            Size::new(10),
            vec![Property::new("modified", "2024-01-01 00:00:00")],
        ));
        report.complete();

        let out = output(&mut report);
        assert!(out.contains("<file name=\"empty.txt\" owner=\"1000\" />"));
        assert!(out.contains("<size>10</size>\n    <modified>2024-01-01 00:00:00</modified>"));
    }

    #[test]
    fn test_add_dir_twice_is_idempotent() {
        let mut report = ReportWriter::with_style(Vec::new(), "/r", STYLE);
        report.add_dir("/r");
        report.add_dir("/r");
        report.complete();

        assert_eq!(report.directory_count(), 1);
        assert_eq!(output(&mut report).matches("<dir ").count(), 1);
    }

    #[test]
    fn test_complete_closes_directories_left_open() {
        let mut report = ReportWriter::with_style(Vec::new(), "/r", STYLE);
        report.add_dir("/r");
        report.add_dir("/r/sub");
        report.complete();
        report.complete();

        let out = output(&mut report);
        assert!(out.ends_with("  </dir>\n</analysis>"));
    }

    #[test]
    fn test_terminating_leaves_document_open() {
        let mut report = ReportWriter::with_style(Vec::new(), "/r", STYLE);
        report.apply(&ScanEvent::DirectoryDiscovered("/r".into()));
        report.apply(&ScanEvent::Terminating);

        let out = output(&mut report);
        assert!(!report.is_completed());
        assert!(!out.contains("</analysis>"));
        assert!(report.close().is_none());
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_recorded_once() {
        let mut report = ReportWriter::with_style(FailingWriter, "/r", STYLE);
        for event in sample_events() {
            report.apply(&event);
        }
        assert_eq!(report.error().map(|e| e.to_string()), Some("disk full".into()));
        assert_eq!(report.directory_count(), 2);
    }
}
