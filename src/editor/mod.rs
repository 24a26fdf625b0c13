//! Live editing: open buffers, pending edits, save/discard against the
//! sandbox, and inspector-driven line highlights.

pub mod highlight;
pub mod resolver;
pub mod surface;
mod sync;

pub use highlight::{parse_inspector_signal, HighlightRequest};
pub use resolver::{EditResolver, ModifyFileAction, WriteThroughResolver};
pub use surface::{language_for_path, DecorationId, EditorSurface, HeadlessSurface, SurfaceCall};
pub use sync::LiveEditSynchronizer;
