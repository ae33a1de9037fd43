//! Rewriting of the serialized workbook container.
//!
//! Some consumers sniff only the first few zip members to decide whether a
//! file is a workbook, so the content types, workbook and styles parts are
//! moved to the front of the archive.

use std::io::{Cursor, Read, Write};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::Result;
use crate::io::theme;

pub const CONTENT_TYPES_ENTRY: &str = "[Content_Types].xml";
pub const WORKBOOK_ENTRY: &str = "xl/workbook.xml";
pub const STYLES_ENTRY: &str = "xl/styles.xml";

/// Entries emitted first, in this order, when present.
pub const LEADING_ENTRIES: [&str; 3] = [CONTENT_TYPES_ENTRY, WORKBOOK_ENTRY, STYLES_ENTRY];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub is_dir: bool,
}

/// Ordered members of a zip container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchiveBundle {
    entries: Vec<ArchiveEntry>,
}

impl ArchiveBundle {
    pub fn new(entries: Vec<ArchiveEntry>) -> Self {
        Self { entries }
    }

    /// Reads every member in central directory order.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            entries.push(ArchiveEntry {
                name: file.name().to_string(),
                data,
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    /// Writes the members, in order, into a new deflated archive.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for entry in &self.entries {
            if entry.is_dir {
                writer.add_directory(entry.name.as_str(), options)?;
            } else {
                writer.start_file(entry.name.as_str(), options)?;
                writer.write_all(&entry.data)?;
            }
        }
        Ok(writer.finish()?.into_inner())
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Moves the leading entries to the front; everything else keeps its relative order.
    pub fn reorder(self) -> Self {
        let mut remaining = self.entries;
        let mut ordered = Vec::with_capacity(remaining.len());
        for name in LEADING_ENTRIES {
            if let Some(position) = remaining.iter().position(|entry| entry.name == name) {
                ordered.push(remaining.remove(position));
            }
        }
        ordered.extend(remaining);
        Self { entries: ordered }
    }

    /// Replaces the data of the named entry, if present.
    pub fn map_entry<F>(&mut self, name: &str, patch: F)
    where
        F: FnOnce(Vec<u8>) -> Vec<u8>,
    {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.name == name) {
            let data = std::mem::take(&mut entry.data);
            entry.data = patch(data);
        }
    }
}

/// Reorders the members of a serialized archive.
pub fn reorder_entries(bytes: &[u8]) -> Result<Vec<u8>> {
    ArchiveBundle::from_bytes(bytes)?.reorder().to_bytes()
}

/// Applies the enabled theme palette and the entry reordering to a serialized workbook.
pub fn post_process(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut bundle = ArchiveBundle::from_bytes(bytes)?;
    if theme::is_applied() {
        bundle.map_entry(theme::THEME_ENTRY, theme::patch_theme);
    }
    let bundle = bundle.reorder();
    debug!(entries = ?bundle.names(), "archive rewritten");
    bundle.to_bytes()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn archive_with(names: &[&str]) -> Vec<u8> {
        let bundle = ArchiveBundle::new(
            names
                .iter()
                .map(|name| ArchiveEntry {
                    name: (*name).to_string(),
                    data: format!("<{name}/>").into_bytes(),
                    is_dir: false,
                })
                .collect(),
        );
        bundle.to_bytes().expect("archive written")
    }

    fn names_of(bytes: &[u8]) -> Vec<String> {
        ArchiveBundle::from_bytes(bytes)
            .expect("archive read")
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn leading_entries_move_to_the_front() {
        let bytes = archive_with(&[
            "docProps/app.xml",
            "xl/styles.xml",
            "_rels/.rels",
            "xl/workbook.xml",
            "[Content_Types].xml",
            "xl/worksheets/sheet1.xml",
        ]);

        let reordered = names_of(&reorder_entries(&bytes).expect("reordered"));

        assert_eq!(
            reordered,
            vec![
                "[Content_Types].xml",
                "xl/workbook.xml",
                "xl/styles.xml",
                "docProps/app.xml",
                "_rels/.rels",
                "xl/worksheets/sheet1.xml",
            ]
        );
    }

    #[test]
    fn reordering_is_idempotent() {
        let bytes = archive_with(&["b.xml", "xl/styles.xml", "a.xml", "[Content_Types].xml"]);

        let once = reorder_entries(&bytes).expect("first pass");
        let twice = reorder_entries(&once).expect("second pass");

        assert_eq!(names_of(&once), names_of(&twice));
    }

    #[test]
    fn missing_leading_entries_are_skipped_without_loss() {
        let inputs: [&[&str]; 3] = [
            &["xl/styles.xml", "a.xml", "b.xml"],
            &["a.xml", "b.xml"],
            &["[Content_Types].xml"],
        ];
        for names in inputs {
            let bytes = archive_with(names);
            let after = names_of(&reorder_entries(&bytes).expect("reordered"));

            assert_eq!(after.len(), names.len());
            let before: BTreeSet<&str> = names.iter().copied().collect();
            let after_set: BTreeSet<&str> = after.iter().map(String::as_str).collect();
            assert_eq!(before, after_set);
        }
    }

    #[test]
    fn entry_contents_survive_reordering() {
        let bytes = archive_with(&["a.xml", "xl/workbook.xml"]);
        let reordered = ArchiveBundle::from_bytes(&reorder_entries(&bytes).expect("reordered"))
            .expect("archive read");

        assert_eq!(
            reordered.entry("a.xml").map(|entry| entry.data.clone()),
            Some(b"<a.xml/>".to_vec())
        );
    }

    #[test]
    fn post_processing_patches_the_theme_once_enabled() {
        let bundle = ArchiveBundle::new(vec![
            ArchiveEntry {
                name: theme::THEME_ENTRY.to_string(),
                data: br#"<a:srgbClr val="4F81BD"/>"#.to_vec(),
                is_dir: false,
            },
            ArchiveEntry {
                name: CONTENT_TYPES_ENTRY.to_string(),
                data: b"<Types/>".to_vec(),
                is_dir: false,
            },
        ]);
        let bytes = bundle.to_bytes().expect("archive written");

        theme::ensure_applied();
        let processed = ArchiveBundle::from_bytes(&post_process(&bytes).expect("processed"))
            .expect("archive read");

        assert_eq!(processed.names()[0], CONTENT_TYPES_ENTRY);
        assert_eq!(
            processed.entry(theme::THEME_ENTRY).map(|entry| entry.data.clone()),
            Some(br#"<a:srgbClr val="5B9BD5"/>"#.to_vec())
        );
    }
}
