use std::fmt::{Debug, Display};

use kernel::UploadRecord;

/// Append-only store of upload records.
pub trait UploadLog {
    type Err: Debug + Display;

    /// Appends a record, dropping the oldest entries beyond the cap.
    fn append(&self, record: &UploadRecord) -> Result<(), Self::Err>;

    /// All records in insertion order.
    fn load_all(&self) -> Result<Vec<UploadRecord>, Self::Err>;

    /// Removes the record and its files. `false` when no record has this id.
    fn delete_by_id(&self, id: &str) -> Result<bool, Self::Err>;

    /// Removes every stored file and empties the log. Returns removed files count.
    fn clear_all(&self) -> Result<usize, Self::Err>;
}
