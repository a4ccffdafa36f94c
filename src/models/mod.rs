pub mod reading;

pub use reading::{state_of_charge_from_pack, Reading, ReadingError, CELL_COUNT};
