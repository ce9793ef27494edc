pub mod arch;
pub mod inferior;
pub mod inject;
pub mod maps;
pub mod prot;

pub use inferior::{Inferior, InferiorError};
pub use inject::{INT80, PatchFrame, SYS_MPROTECT_I386};
