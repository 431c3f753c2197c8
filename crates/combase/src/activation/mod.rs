//! Class object activation
//!
//! - [`ClassExporter`]: where running local servers advertise their class objects
//! - [`ClassResolver`]: the ordered search behind `GetClassObject` and `CreateInstance`

mod export;
mod resolver;

pub use export::*;
pub use resolver::*;
