//! Turns a discovered result file into an [`InspectionRecord`].
//!
//! Two conventions exist on the shop floor:
//!
//! - **CSV**: everything is in the file name, `{serial}_{datetimeTag}_{resultToken}.csv`.
//!   The file content is never read.
//! - **XML**: fields live inside the document. Each logical field is mapped to an
//!   element path relative to the document root; a trailing `[@attr]` selects an
//!   attribute instead of the element text. Missing elements decode to
//!   [`NOT_AVAILABLE`] rather than failing the whole document.

use crate::models::{FileType, InspectionRecord, LineConfig, SerialState};
use camino::Utf8Path;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;

/// Sentinel for a mapped XML field that could not be resolved
pub const NOT_AVAILABLE: &str = "N/A";

/// Logical XML fields every record needs
pub const FIELD_SERIAL: &str = "serial";
pub const FIELD_RESULT: &str = "result";
pub const FIELD_EVENT_ID: &str = "event_id";

pub const REQUIRED_XML_FIELDS: [&str; 3] = [FIELD_SERIAL, FIELD_RESULT, FIELD_EVENT_ID];

static ATTRIBUTE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\[@(.+?)\]$").expect("Invalid attribute path regex"));

/// Errors that make a candidate file undecodable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid file name: {0}")]
    InvalidFilename(String),

    #[error("Missing field '{field}' in {path}")]
    MissingField { field: String, path: String },

    #[error("Failed to parse {path}: {reason}")]
    ParseFailure { path: String, reason: String },
}

/// Split a CSV result file name into `(serial, datetime_tag, result_token)`.
///
/// The name must have exactly three underscore-separated, non-empty tokens;
/// the result token ends at the first `.` of the last token.
pub fn parse_filename(file_name: &str) -> Option<(&str, &str, &str)> {
    let mut parts = file_name.split('_');
    let serial = parts.next()?;
    let tag = parts.next()?;
    let last = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let result = last.split_once('.').map_or(last, |(token, _)| token);

    if serial.is_empty() || tag.is_empty() || result.is_empty() {
        return None;
    }

    Some((serial, tag, result))
}

/// Filename-token decoder for CSV lines
#[derive(Debug, Clone)]
pub struct CsvFilenameDecoder {
    pass_tokens: HashSet<String>,
}

impl CsvFilenameDecoder {
    pub fn new(pass_tokens: HashSet<String>) -> Self {
        Self { pass_tokens }
    }

    pub fn decode(&self, path: &Utf8Path) -> Result<InspectionRecord, DecodeError> {
        let file_name = path.file_name().unwrap_or(path.as_str());

        let (serial, _tag, result) = parse_filename(file_name)
            .ok_or_else(|| DecodeError::InvalidFilename(file_name.to_string()))?;

        Ok(InspectionRecord {
            serial_number: serial.to_string(),
            result_token: result.to_string(),
            state: SerialState::from_token(result, &self.pass_tokens),
            event_id: None,
            extras: IndexMap::new(),
            source_path: path.to_path_buf(),
        })
    }
}

/// One mapped XML field: element path plus optional attribute name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub name: String,
    pub element_path: String,
    pub attribute: Option<String>,
}

impl FieldPath {
    pub fn parse(name: &str, raw: &str) -> Self {
        let raw = raw.trim();
        match ATTRIBUTE_PATH.captures(raw) {
            Some(caps) => Self {
                name: name.to_string(),
                element_path: caps[1].to_string(),
                attribute: Some(caps[2].to_string()),
            },
            None => Self {
                name: name.to_string(),
                element_path: raw.to_string(),
                attribute: None,
            },
        }
    }

    /// Resolve this field against a document root, or [`NOT_AVAILABLE`]
    fn resolve(&self, root: roxmltree::Node<'_, '_>) -> String {
        let Some(element) = find_element(root, &self.element_path) else {
            return NOT_AVAILABLE.to_string();
        };

        let value = match &self.attribute {
            Some(attribute) => element.attribute(attribute.as_str()),
            None => element.text().map(str::trim).filter(|text| !text.is_empty()),
        };

        value.unwrap_or(NOT_AVAILABLE).to_string()
    }
}

/// Walk `a/b/c` from the root element, taking the first matching child per step
fn find_element<'a, 'input>(
    root: roxmltree::Node<'a, 'input>,
    path: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    let mut current = root;
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        current = current
            .children()
            .find(|child| child.is_element() && child.tag_name().name() == segment)?;
    }
    Some(current)
}

/// Path-mapped field extractor for XML lines
#[derive(Debug, Clone)]
pub struct XmlFieldExtractor {
    fields: Vec<FieldPath>,
    pass_tokens: HashSet<String>,
}

impl XmlFieldExtractor {
    pub fn new(mapping: &IndexMap<String, String>, pass_tokens: HashSet<String>) -> Self {
        let fields = mapping
            .iter()
            .map(|(name, raw)| FieldPath::parse(name, raw))
            .collect();
        Self {
            fields,
            pass_tokens,
        }
    }

    /// Extract every mapped field from an XML document, in mapping order
    pub fn extract(&self, xml: &str) -> Result<IndexMap<String, String>, String> {
        let document = roxmltree::Document::parse(xml).map_err(|e| e.to_string())?;
        let root = document.root_element();

        Ok(self
            .fields
            .iter()
            .map(|field| (field.name.clone(), field.resolve(root)))
            .collect())
    }

    /// Read `path` without blocking the runtime and decode it
    pub async fn decode(&self, path: &Utf8Path) -> Result<InspectionRecord, DecodeError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DecodeError::ParseFailure {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        self.decode_str(path, &contents)
    }

    pub fn decode_str(&self, path: &Utf8Path, xml: &str) -> Result<InspectionRecord, DecodeError> {
        let mut fields = self
            .extract(xml)
            .map_err(|reason| DecodeError::ParseFailure {
                path: path.to_string(),
                reason,
            })?;

        let mut take = |field: &str| {
            fields
                .shift_remove(field)
                .filter(|value| value != NOT_AVAILABLE && !value.is_empty())
                .ok_or_else(|| DecodeError::MissingField {
                    field: field.to_string(),
                    path: path.to_string(),
                })
        };

        let serial_number = take(FIELD_SERIAL)?;
        let result_token = take(FIELD_RESULT)?;
        let event_id = take(FIELD_EVENT_ID)?;
        let state = SerialState::from_token(&result_token, &self.pass_tokens);

        Ok(InspectionRecord {
            serial_number,
            result_token,
            state,
            event_id: Some(event_id),
            extras: fields,
            source_path: path.to_path_buf(),
        })
    }
}

/// The decoder variant a line uses
#[derive(Debug, Clone)]
pub enum LineDecoder {
    Csv(CsvFilenameDecoder),
    Xml(XmlFieldExtractor),
}

impl LineDecoder {
    pub fn for_line(config: &LineConfig) -> Self {
        let pass_tokens = config.rules.pass_tokens.clone();
        match config.file_type {
            FileType::Csv => LineDecoder::Csv(CsvFilenameDecoder::new(pass_tokens)),
            FileType::Xml => {
                LineDecoder::Xml(XmlFieldExtractor::new(&config.rules.xml_mapping, pass_tokens))
            }
        }
    }

    pub async fn decode(&self, path: &Utf8Path) -> Result<InspectionRecord, DecodeError> {
        match self {
            LineDecoder::Csv(decoder) => decoder.decode(path),
            LineDecoder::Xml(decoder) => decoder.decode(path).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use proptest::prelude::*;

    fn pass_set(tokens: &[&str]) -> HashSet<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    fn palmi_mapping() -> IndexMap<String, String> {
        let mut mapping = IndexMap::new();
        mapping.insert("inspection_time".to_string(), "Header/StartTime".to_string());
        mapping.insert("event_id".to_string(), "Header[@EventId]".to_string());
        mapping.insert("serial".to_string(), "Panel/Barcode".to_string());
        mapping.insert("result".to_string(), "Panel/Result[@Code]".to_string());
        mapping
    }

    const PALMI_DOC: &str = r#"<?xml version="1.0"?>
<Inspection>
  <Header EventId="42">
    <StartTime>2025-01-01T12:00:00</StartTime>
  </Header>
  <Panel>
    <Barcode> ABC123 </Barcode>
    <Result Code="0">Good</Result>
  </Panel>
</Inspection>"#;

    #[test]
    fn test_parse_filename() {
        assert_eq!(
            parse_filename("ABC123_20250101120000_PASS.csv"),
            Some(("ABC123", "20250101120000", "PASS"))
        );
        assert_eq!(parse_filename("ABC123_20250101120000.csv"), None);
        assert_eq!(parse_filename("A_B_C_D.csv"), None);
        assert_eq!(parse_filename("_20250101_PASS.csv"), None);
        assert_eq!(parse_filename("ABC_20250101_.csv"), None);
    }

    #[test]
    fn test_csv_decode_pass_and_fail() {
        let decoder = CsvFilenameDecoder::new(pass_set(&["PASS", "GOOD"]));

        let pass = decoder
            .decode(Utf8Path::new("/spi/Line1/ABC123_20250101120000_PASS.csv"))
            .unwrap();
        assert_eq!(pass.serial_number, "ABC123");
        assert_eq!(pass.state, SerialState::Pass);
        assert_eq!(pass.state.code(), 0);
        assert!(pass.event_id.is_none());

        let fail = decoder
            .decode(Utf8Path::new("/spi/Line1/ABC124_20250101120001_NG.csv"))
            .unwrap();
        assert_eq!(fail.state, SerialState::Fail);
        assert_eq!(fail.state.code(), 1);
        assert!(!fail.result_passed());
    }

    #[test]
    fn test_csv_decode_invalid_name() {
        let decoder = CsvFilenameDecoder::new(pass_set(&["PASS"]));
        let err = decoder
            .decode(Utf8Path::new("/spi/Line1/garbage.csv"))
            .unwrap_err();
        assert_eq!(err, DecodeError::InvalidFilename("garbage.csv".to_string()));
    }

    #[test]
    fn test_field_path_parse() {
        let attr = FieldPath::parse("result", "Panel/Result[@Code]");
        assert_eq!(attr.element_path, "Panel/Result");
        assert_eq!(attr.attribute.as_deref(), Some("Code"));

        let text = FieldPath::parse("serial", " Panel/Barcode ");
        assert_eq!(text.element_path, "Panel/Barcode");
        assert!(text.attribute.is_none());
    }

    #[test]
    fn test_xml_decode() {
        let extractor = XmlFieldExtractor::new(&palmi_mapping(), pass_set(&["0"]));
        let record = extractor
            .decode_str(Utf8Path::new("/spi/Line2/a.xml"), PALMI_DOC)
            .unwrap();

        assert_eq!(record.serial_number, "ABC123");
        assert_eq!(record.result_token, "0");
        assert_eq!(record.state, SerialState::Pass);
        assert_eq!(record.event_id.as_deref(), Some("42"));
        assert_eq!(
            record.extras.get("inspection_time").map(String::as_str),
            Some("2025-01-01T12:00:00")
        );
    }

    #[test]
    fn test_xml_missing_elements_become_sentinel() {
        let extractor = XmlFieldExtractor::new(&palmi_mapping(), pass_set(&["0"]));
        let fields = extractor
            .extract("<Inspection><Panel><Barcode>X1</Barcode></Panel></Inspection>")
            .unwrap();

        assert_eq!(fields["serial"], "X1");
        assert_eq!(fields["event_id"], NOT_AVAILABLE);
        assert_eq!(fields["result"], NOT_AVAILABLE);
        assert_eq!(fields["inspection_time"], NOT_AVAILABLE);
    }

    #[test]
    fn test_xml_missing_required_field() {
        let extractor = XmlFieldExtractor::new(&palmi_mapping(), pass_set(&["0"]));
        let err = extractor
            .decode_str(
                Utf8Path::new("b.xml"),
                "<Inspection><Panel><Barcode>X1</Barcode></Panel></Inspection>",
            )
            .unwrap_err();

        assert!(matches!(err, DecodeError::MissingField { ref field, .. } if field == "result"));
    }

    #[tokio::test]
    async fn test_xml_decode_reads_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp.path().join("panel.xml")).unwrap();
        std::fs::write(&path, PALMI_DOC).unwrap();

        let extractor = XmlFieldExtractor::new(&palmi_mapping(), pass_set(&["0"]));
        let record = extractor.decode(&path).await.unwrap();
        assert_eq!(record.serial_number, "ABC123");
        assert_eq!(record.source_path, path);

        let missing = extractor.decode(&path.with_file_name("gone.xml")).await;
        assert!(matches!(missing, Err(DecodeError::ParseFailure { .. })));
    }

    #[test]
    fn test_xml_parse_failure() {
        let extractor = XmlFieldExtractor::new(&palmi_mapping(), pass_set(&["0"]));
        let err = extractor
            .decode_str(Utf8Path::new("c.xml"), "<Inspection><Panel>")
            .unwrap_err();
        assert!(matches!(err, DecodeError::ParseFailure { .. }));
    }

    proptest! {
        #[test]
        fn prop_well_formed_names_round_trip(
            serial in "[A-Za-z0-9-]{1,16}",
            tag in "[0-9]{8,14}",
            result in "[A-Za-z0-9]{1,8}",
        ) {
            let decoder = CsvFilenameDecoder::new(pass_set(&["PASS"]));
            let path = Utf8PathBuf::from(format!("/in/{serial}_{tag}_{result}.csv"));
            let record = decoder.decode(&path).unwrap();
            prop_assert_eq!(record.serial_number, serial);
            prop_assert_eq!(record.result_token, result);
        }

        #[test]
        fn prop_wrong_token_count_rejected(
            tokens in proptest::collection::vec("[A-Za-z0-9]{1,6}", 1..6usize)
                .prop_filter("exactly three tokens is valid", |t| t.len() != 3),
        ) {
            let decoder = CsvFilenameDecoder::new(pass_set(&["PASS"]));
            let name = format!("{}.csv", tokens.join("_"));
            let err = decoder.decode(Utf8Path::new(&name)).unwrap_err();
            prop_assert_eq!(err, DecodeError::InvalidFilename(name.clone()));
        }

        #[test]
        fn prop_state_is_pass_iff_member(token in "[A-Z]{1,6}") {
            let pass = pass_set(&["PASS", "GOOD", "OK"]);
            let expected = if pass.contains(&token) { 0 } else { 1 };
            prop_assert_eq!(SerialState::from_token(&token, &pass).code(), expected);
        }
    }
}
