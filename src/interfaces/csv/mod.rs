pub mod collateral_reader;
pub mod schedule_writer;
