//! CSV payload parsing.
//!
//! A payload is row-oriented CSV with a header. Each row carries one embedding
//! vector (`emb_0` .. `emb_{N-1}`) and one reference price (`last_price`).
//!
//! Rules:
//! - A required column absent from the header is a `DataFormat` error.
//! - A row with an empty or missing required cell is skipped, not padded.
//! - A present cell that is not a finite number is a `DataFormat` error.
//! - Retained rows keep their input order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::AiError;

/// Column layout expected in uploaded datasets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub embedding_dim: usize,
    pub feature_prefix: String,
    pub reference_column: String,
}

impl Default for DatasetSchema {
    fn default() -> Self {
        Self {
            embedding_dim: 128,
            feature_prefix: "emb_".to_string(),
            reference_column: "last_price".to_string(),
        }
    }
}

impl DatasetSchema {
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    pub fn feature_columns(&self) -> Vec<String> {
        (0..self.embedding_dim)
            .map(|i| format!("{}{}", self.feature_prefix, i))
            .collect()
    }
}

/// Feature vectors and their reference prices, row-aligned.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedDataset {
    pub features: Vec<Vec<f32>>,
    pub references: Vec<f64>,
    /// Rows dropped because a required cell was empty or missing.
    pub skipped_rows: usize,
}

impl ParsedDataset {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// The most recent reference price (the forecast anchor).
    pub fn last_reference(&self) -> Option<f64> {
        self.references.last().copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatasetParser {
    schema: DatasetSchema,
}

impl DatasetParser {
    pub fn new(schema: DatasetSchema) -> Self {
        Self { schema }
    }

    pub fn parse(&self, payload: &[u8]) -> Result<ParsedDataset, AiError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| AiError::data_format(format!("payload is not valid UTF-8: {e}")))?;

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| AiError::data_format(format!("malformed CSV header: {e}")))?
            .clone();
        if headers.iter().all(str::is_empty) {
            return Err(AiError::data_format("payload has no header row"));
        }

        let mut positions: HashMap<&str, usize> = HashMap::with_capacity(headers.len());
        for (idx, name) in headers.iter().enumerate() {
            positions.entry(name).or_insert(idx);
        }

        let feature_names = self.schema.feature_columns();
        let mut missing = Vec::new();
        let feature_idx: Vec<usize> = feature_names
            .iter()
            .filter_map(|col| {
                let idx = positions.get(col.as_str()).copied();
                if idx.is_none() {
                    missing.push(col.as_str());
                }
                idx
            })
            .collect();
        let reference_idx = positions.get(self.schema.reference_column.as_str()).copied();
        if reference_idx.is_none() {
            missing.push(self.schema.reference_column.as_str());
        }
        let Some(reference_idx) = reference_idx.filter(|_| missing.is_empty()) else {
            return Err(AiError::data_format(format!(
                "missing required columns: {}",
                summarize(&missing)
            )));
        };

        let mut dataset = ParsedDataset::default();
        for (row, record) in reader.records().enumerate() {
            // 1-based, header excluded
            let row = row + 1;
            let record = record
                .map_err(|e| AiError::data_format(format!("malformed CSV at row {row}: {e}")))?;

            let cell = |idx: usize| record.get(idx).filter(|v| !v.is_empty());
            let complete = cell(reference_idx).is_some() && feature_idx.iter().all(|&i| cell(i).is_some());
            if !complete {
                dataset.skipped_rows += 1;
                continue;
            }

            let mut features = Vec::with_capacity(feature_idx.len());
            for (&idx, name) in feature_idx.iter().zip(&feature_names) {
                let value = parse_number(record.get(idx).unwrap_or_default(), row, name)? as f32;
                if !value.is_finite() {
                    return Err(AiError::data_format(format!(
                        "value out of range in column {name} at row {row}"
                    )));
                }
                features.push(value);
            }
            let reference = parse_number(
                record.get(reference_idx).unwrap_or_default(),
                row,
                &self.schema.reference_column,
            )?;

            dataset.features.push(features);
            dataset.references.push(reference);
        }

        Ok(dataset)
    }
}

fn parse_number(raw: &str, row: usize, column: &str) -> Result<f64, AiError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(AiError::data_format(format!(
            "non-numeric value {raw:?} in column {column} at row {row}"
        ))),
    }
}

fn summarize(columns: &[&str]) -> String {
    const SHOWN: usize = 5;
    if columns.len() <= SHOWN {
        columns.join(", ")
    } else {
        format!(
            "{} and {} more",
            columns[..SHOWN].join(", "),
            columns.len() - SHOWN
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn schema(dim: usize) -> DatasetSchema {
        DatasetSchema::default().with_embedding_dim(dim)
    }

    fn header(dim: usize) -> String {
        let mut cols: Vec<String> = (0..dim).map(|i| format!("emb_{i}")).collect();
        cols.push("last_price".to_string());
        cols.join(",")
    }

    #[test]
    fn parses_rows_in_order() {
        let csv = format!("{}\n1,2,10.5\n3,4,11\n", header(2));
        let parsed = DatasetParser::new(schema(2)).parse(csv.as_bytes()).unwrap();

        assert_eq!(parsed.features, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(parsed.references, vec![10.5, 11.0]);
        assert_eq!(parsed.last_reference(), Some(11.0));
        assert_eq!(parsed.skipped_rows, 0);
    }

    #[test]
    fn extra_columns_and_column_order_are_irrelevant() {
        let csv = "date,last_price,emb_1,emb_0\n2024-01-01,9.5,2,1\n";
        let parsed = DatasetParser::new(schema(2)).parse(csv.as_bytes()).unwrap();
        assert_eq!(parsed.features, vec![vec![1.0, 2.0]]);
        assert_eq!(parsed.references, vec![9.5]);
    }

    #[test]
    fn incomplete_rows_are_skipped_not_padded() {
        let csv = format!("{}\n1,2,10\n1,,10\n5,6\n7,8,12\n", header(2));
        let parsed = DatasetParser::new(schema(2)).parse(csv.as_bytes()).unwrap();

        assert_eq!(parsed.features, vec![vec![1.0, 2.0], vec![7.0, 8.0]]);
        assert_eq!(parsed.references, vec![10.0, 12.0]);
        assert_eq!(parsed.skipped_rows, 2);
    }

    #[test]
    fn missing_header_columns_are_a_format_error() {
        let csv = "emb_0,last_price\n1,10\n";
        let err = DatasetParser::new(schema(2)).parse(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, AiError::DataFormat(_)));
        assert!(err.to_string().contains("emb_1"));

        let csv = "emb_0,emb_1\n1,2\n";
        let err = DatasetParser::new(schema(2)).parse(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("last_price"));
    }

    #[test]
    fn long_missing_column_lists_are_summarized() {
        let csv = "last_price\n1\n";
        let err = DatasetParser::new(schema(128)).parse(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("and 123 more"));
    }

    #[test]
    fn non_numeric_values_are_a_format_error() {
        let csv = format!("{}\n1,abc,10\n", header(2));
        let err = DatasetParser::new(schema(2)).parse(csv.as_bytes()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("emb_1") && msg.contains("row 1"), "{msg}");

        let csv = format!("{}\n1,2,NaN\n", header(2));
        assert!(DatasetParser::new(schema(2)).parse(csv.as_bytes()).is_err());
    }

    #[test]
    fn non_utf8_and_empty_payloads_are_rejected() {
        let err = DatasetParser::new(schema(2)).parse(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));

        let err = DatasetParser::new(schema(2)).parse(b"").unwrap_err();
        assert!(err.to_string().contains("no header"));
    }

    #[test]
    fn header_only_payload_is_empty_dataset() {
        let parsed = DatasetParser::new(schema(2)).parse(header(2).as_bytes()).unwrap();
        assert!(parsed.is_empty());
    }

    fn rows_strategy() -> impl Strategy<Value = Vec<(Option<i16>, i16, u16)>> {
        prop::collection::vec((prop::option::of(any::<i16>()), any::<i16>(), 1u16..10_000), 0..40)
    }

    fn render(rows: &[(Option<i16>, i16, u16)]) -> String {
        let mut out = header(2);
        out.push('\n');
        for (a, b, price) in rows {
            let a = a.map(|v| v.to_string()).unwrap_or_default();
            out.push_str(&format!("{a},{b},{price}\n"));
        }
        out
    }

    proptest! {
        #[test]
        fn parsing_is_idempotent(rows in rows_strategy()) {
            let parser = DatasetParser::new(schema(2));
            let csv = render(&rows);
            let first = parser.parse(csv.as_bytes()).unwrap();
            let second = parser.parse(csv.as_bytes()).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn retained_rows_preserve_input_order(rows in rows_strategy()) {
            let parsed = DatasetParser::new(schema(2)).parse(render(&rows).as_bytes()).unwrap();

            let expected: Vec<f64> = rows
                .iter()
                .filter(|(a, _, _)| a.is_some())
                .map(|(_, _, p)| f64::from(*p))
                .collect();
            prop_assert_eq!(&parsed.references, &expected);
            prop_assert_eq!(parsed.features.len(), parsed.references.len());
            prop_assert_eq!(parsed.skipped_rows, rows.len() - expected.len());
        }
    }
}
