use crate::domain::amortization::PaymentDetail;
use crate::error::Result;
use std::io::Write;

/// Writes amortization rows as CSV, rounded to cents.
pub struct ScheduleWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ScheduleWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_schedule<I>(&mut self, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = PaymentDetail>,
    {
        let mut written = 0;
        for row in rows {
            self.writer.serialize(row.rounded())?;
            written += 1;
        }
        self.writer.flush()?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::amortization::LoanTerms;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writes_header_and_rounded_rows() {
        let terms = LoanTerms::compute(dec!(50000), dec!(8.5), 12, dec!(0)).unwrap();
        let mut out = Vec::new();
        let written = ScheduleWriter::new(&mut out)
            .write_schedule(terms.schedule())
            .unwrap();

        let mut reader = csv::Reader::from_reader(out.as_slice());
        let header = reader.headers().unwrap().clone();
        assert_eq!(
            header.iter().collect::<Vec<_>>(),
            ["period", "payment", "principal", "interest", "remaining_balance"]
        );
        let rows: Vec<PaymentDetail> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(written, 12);
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[11].remaining_balance, Decimal::ZERO);
        let principal: Decimal = rows.iter().map(|r| r.principal).sum();
        assert!((principal - dec!(50000)).abs() <= dec!(0.12));
        assert_eq!(rows[0].payment, dec!(4357.66));
    }
}
