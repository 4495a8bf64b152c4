//! Verified-records registry and reports.

mod records;

pub use records::{parse_yen, Registry, RentRoll, RentRollRow, VerifiedRecord};
