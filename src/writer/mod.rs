//! Writing side of the document model.
//!
//! ```text
//! Object values
//!     ↓
//! [ObjectSerializer] (PDF syntax)
//!     ↓
//! [IncrementalUpdate] (objects + xref section + trailer)
//!     ↓
//! Document overlay
//! ```

mod acroform;
mod incremental;
mod object_serializer;

pub use acroform::{AcroFormBuilder, SIG_FLAG_APPEND_ONLY, SIG_FLAG_SIGNATURES_EXIST};
pub use incremental::{IncrementalUpdate, WrittenUpdate};
pub use object_serializer::{indirect_header, wrap_indirect, ObjectSerializer};
