mod hotel;
mod reservation;

pub use self::hotel::*;
pub use self::reservation::*;
