//! Delimited flat file settings.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// How a flat file is laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFormat {
    /// A single ASCII character; `\t` and `tab` mean a tab.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_true")]
    pub has_header: bool,
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for FileFormat {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            has_header: true,
        }
    }
}

impl FileFormat {
    pub fn new(delimiter: impl Into<String>, has_header: bool) -> Self {
        Self {
            delimiter: delimiter.into(),
            has_header,
        }
    }

    /// The delimiter as the byte the csv reader/writer expects.
    pub fn delimiter_byte(&self) -> BridgeResult<u8> {
        match self.delimiter.as_str() {
            "\\t" | "tab" | "TAB" => Ok(b'\t'),
            d if d.len() == 1 && d.is_ascii() && d != "\n" && d != "\r" && d != "\"" => {
                Ok(d.as_bytes()[0])
            }
            d => Err(BridgeError::Config(format!(
                "invalid delimiter '{}': expected a single ASCII character",
                d.escape_default()
            ))),
        }
    }

    /// A reader that yields every record, header included.
    ///
    /// Header handling is left to the caller so the first record is always
    /// visible, whether or not it holds column names.
    pub fn reader_builder(&self) -> BridgeResult<csv::ReaderBuilder> {
        let mut builder = csv::ReaderBuilder::new();
        builder.delimiter(self.delimiter_byte()?).has_headers(false);
        Ok(builder)
    }

    pub fn writer_builder(&self) -> BridgeResult<csv::WriterBuilder> {
        let mut builder = csv::WriterBuilder::new();
        builder.delimiter(self.delimiter_byte()?).has_headers(false);
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delimiters() {
        assert_eq!(FileFormat::default().delimiter_byte().unwrap(), b',');
        assert_eq!(FileFormat::new("|", true).delimiter_byte().unwrap(), b'|');
        assert_eq!(FileFormat::new("\\t", true).delimiter_byte().unwrap(), b'\t');
        assert_eq!(FileFormat::new("\t", true).delimiter_byte().unwrap(), b'\t');
        assert_eq!(FileFormat::new("tab", true).delimiter_byte().unwrap(), b'\t');
    }

    #[test]
    fn test_invalid_delimiters() {
        for bad in ["", ";;", "é", "\n", "\""] {
            let err = FileFormat::new(bad, true).delimiter_byte().unwrap_err();
            assert_eq!(err.kind(), "config", "delimiter {:?}", bad);
        }
    }

    #[test]
    fn test_defaults_from_json() {
        let format: FileFormat = serde_json::from_str("{}").unwrap();
        assert_eq!(format, FileFormat::default());
        let format: FileFormat = serde_json::from_str(r#"{"has_header": false}"#).unwrap();
        assert!(!format.has_header);
        assert_eq!(format.delimiter, ",");
    }
}
