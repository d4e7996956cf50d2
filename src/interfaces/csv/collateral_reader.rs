use crate::domain::policy::CollateralItem;
use crate::error::{LoanError, Result};
use std::io::Read;

/// Reads collateral items from a CSV source with a
/// `kind, quantity, base_value` header.
///
/// Whitespace around fields is trimmed, so hand-edited files with padded
/// columns parse the same as machine-written ones.
pub struct CollateralReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CollateralReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes one item per record.
    pub fn items(self) -> impl Iterator<Item = Result<CollateralItem>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LoanError::from))
    }

    /// Reads every item, stopping at the first malformed record.
    pub fn read_all(self) -> Result<Vec<CollateralItem>> {
        self.items().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "kind, quantity, base_value\nVEHICLE, 1, 20000\nprecious_metal, 2.5, 1800.00";
        let items = CollateralReader::new(data.as_bytes()).read_all().unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, "VEHICLE");
        assert_eq!(items[1].quantity, dec!(2.5));
        assert_eq!(items[1].base_value, dec!(1800.00));
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "kind, quantity, base_value\nVEHICLE, many, 20000";
        let results: Vec<Result<CollateralItem>> =
            CollateralReader::new(data.as_bytes()).items().collect();

        assert!(matches!(results[0], Err(LoanError::Csv(_))));
    }
}
