//! Small helpers shared by the heap and the upload queue.

pub(crate) mod layout;
pub(crate) mod size;
